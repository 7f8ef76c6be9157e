//! Engine configuration
//!
//! Loaded from a JSON file; every field has a default, so an empty object
//! is a valid configuration.

use std::collections::HashSet;
use std::fmt;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::action::SequencerConfig;
use crate::protocol::{LinkConfig, DEFAULT_BAUD_RATE, MASTER_ADDRESS};

/// Errors loading or checking a configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file could not be read
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// The file is not valid JSON for this configuration
    #[error("Parse error: {0}")]
    ParseError(#[from] serde_json::Error),

    /// A panel address outside its dialect's range
    #[error("Address {address:#04x} is not a valid {dialect} address")]
    InvalidAddress {
        /// Dialect
        dialect: PanelDialect,
        /// Address
        address: u8,
    },

    /// Two panels configured at one address
    #[error("More than one panel at address {0:#04x}")]
    DuplicateAddress(u8),

    /// A panel configured at the controller's address
    #[error("Panel address {0:#04x} is the master address")]
    MasterAddress(u8),
}

/// Panel dialects that can be emulated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PanelDialect {
    /// 12 line display
    OneTouch,
    /// LEDs and a one line display
    AllButton,
    /// LED array
    SpaLink,
}

impl PanelDialect {
    /// Addresses the controller polls for this dialect
    pub fn address_range(&self) -> RangeInclusive<u8> {
        match self {
            PanelDialect::OneTouch => 0x40..=0x43,
            PanelDialect::AllButton => 0x08..=0x0b,
            PanelDialect::SpaLink => 0x20..=0x22,
        }
    }
}

impl fmt::Display for PanelDialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PanelDialect::OneTouch => "One Touch",
            PanelDialect::AllButton => "All Button",
            PanelDialect::SpaLink => "SpaLink",
        };
        f.write_str(name)
    }
}

/// One emulated panel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PanelConfig {
    /// Dialect
    pub dialect: PanelDialect,
    /// Bus address
    pub address: u8,
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Serial device of the RS-485 adapter
    pub serial_device: String,
    /// Bus speed
    pub baud_rate: u32,
    /// Panels to emulate; the first is the primary panel
    pub panels: Vec<PanelConfig>,
    /// Decode traffic without acknowledging anything
    pub monitor_mode: bool,
    /// Address acknowledgments are sent to
    pub master_address: u8,
    /// How long an action step waits for confirmation
    pub step_timeout_ms: u64,
    /// Pause after a step that needs the controller to settle
    pub action_settle_ms: u64,
    /// Quiet period before a OneTouch display is read
    pub display_settle_ms: u64,
    /// Where identity and temperatures are persisted
    pub state_file: Option<PathBuf>,
    /// How often the controller clock is checked; 0 disables the check
    pub clock_check_interval_secs: u64,
    /// Drift allowed before the controller clock is corrected
    pub clock_tolerance_minutes: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            serial_device: "/dev/ttyUSB0".to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            panels: vec![PanelConfig {
                dialect: PanelDialect::AllButton,
                address: 0x09,
            }],
            monitor_mode: false,
            master_address: MASTER_ADDRESS,
            step_timeout_ms: 10_000,
            action_settle_ms: 1_000,
            display_settle_ms: 2_000,
            state_file: None,
            clock_check_interval_secs: 3_600,
            clock_tolerance_minutes: 1,
        }
    }
}

impl EngineConfig {
    /// Load and check a configuration file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Parse and check a JSON configuration
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check panel addresses
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for panel in &self.panels {
            if panel.address == self.master_address {
                return Err(ConfigError::MasterAddress(panel.address));
            }
            if !panel.dialect.address_range().contains(&panel.address) {
                return Err(ConfigError::InvalidAddress {
                    dialect: panel.dialect,
                    address: panel.address,
                });
            }
            if !seen.insert(panel.address) {
                return Err(ConfigError::DuplicateAddress(panel.address));
            }
        }
        Ok(())
    }

    /// Link reader settings
    pub fn link_config(&self) -> LinkConfig {
        LinkConfig {
            monitor_mode: self.monitor_mode,
            master_address: self.master_address,
        }
    }

    /// Action sequencer timing
    pub fn sequencer_config(&self) -> SequencerConfig {
        SequencerConfig {
            step_timeout: Duration::from_millis(self.step_timeout_ms),
            settle_delay: Duration::from_millis(self.action_settle_ms),
        }
    }

    /// OneTouch display settle period
    pub fn display_settle(&self) -> Duration {
        Duration::from_millis(self.display_settle_ms)
    }

    /// Clock check period, if enabled
    pub fn clock_check_interval(&self) -> Option<Duration> {
        (self.clock_check_interval_secs > 0).then(|| Duration::from_secs(self.clock_check_interval_secs))
    }
}
