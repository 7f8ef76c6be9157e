//! Display text helpers

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Bytes the controller sends as a degree sign, depending on the panel
pub const ONE_TOUCH_DEGREE: u8 = 0x60;
/// Degree sign on All Button panels
pub const ALL_BUTTON_DEGREE: u8 = 0xdf;

static TEMPERATURE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(-?\d+)°([A-Z]?)$").expect("invalid temperature regex"));

/// Temperature sensors reported on the displays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TempSensor {
    /// Air temperature
    Air,
    /// Pool water
    Pool,
    /// Spa water
    Spa,
    /// Solar collector
    Solar,
}

impl TempSensor {
    /// Sensor named by a display token such as `POOL`
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "AIR" => Some(Self::Air),
            "POOL" => Some(Self::Pool),
            "SPA" => Some(Self::Spa),
            "SOLAR" => Some(Self::Solar),
            _ => None,
        }
    }
}

/// Decode display bytes into text, normalizing the panel's degree byte
///
/// Leading and trailing blanks and NULs are removed.
pub fn decode_text(bytes: &[u8], degree: u8) -> String {
    let text: String = bytes
        .iter()
        .map(|&b| if b == degree { '°' } else { char::from(b) })
        .collect();
    text.trim_matches(|c: char| c == ' ' || c == '\0').to_string()
}

/// Parse a token such as `81°F` or `23°` into its value and scale
pub fn parse_temperature(token: &str) -> Option<(i32, Option<String>)> {
    let caps = TEMPERATURE.captures(token)?;
    let value = caps.get(1)?.as_str().parse().ok()?;
    let scale = caps
        .get(2)
        .map(|m| m.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    Some((value, scale))
}
