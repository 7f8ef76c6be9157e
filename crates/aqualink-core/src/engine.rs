//! Engine
//!
//! Wires a configuration into running parts: the pool and its state file
//! writer, one panel and one action sequencer per configured address, the
//! OneTouch display watchers, the link reader and the clock job. Everything
//! stops when the engine's shutdown token is cancelled.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::action::ActionSequencer;
use crate::config::{ConfigError, EngineConfig, PanelDialect};
use crate::panel::{AllButtonPanel, MasterPanel, OneTouchPanel, Panel, SpaLinkPanel};
use crate::pool::Pool;
use crate::protocol::{LinkReader, ProtocolError};

/// A configured panel, by dialect
#[derive(Clone)]
pub enum PanelHandle {
    /// OneTouch
    OneTouch(Arc<OneTouchPanel>),
    /// All Button
    AllButton(Arc<AllButtonPanel>),
    /// SpaLink
    SpaLink(Arc<SpaLinkPanel>),
}

impl PanelHandle {
    /// The panel behind the dialect
    pub fn as_panel(&self) -> Arc<dyn Panel> {
        match self {
            PanelHandle::OneTouch(p) => p.clone(),
            PanelHandle::AllButton(p) => p.clone(),
            PanelHandle::SpaLink(p) => p.clone(),
        }
    }

    /// Bus address
    pub fn address(&self) -> u8 {
        self.as_panel().core().address()
    }
}

struct PanelEntry {
    handle: PanelHandle,
    sequencer: ActionSequencer,
}

/// Running panel emulation
pub struct Engine {
    config: EngineConfig,
    pool: Arc<Pool>,
    panels: Vec<PanelEntry>,
    master: Arc<MasterPanel>,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Engine {
    /// Build the engine and start its panel tasks
    ///
    /// Must be called inside a tokio runtime. The link is started separately
    /// with [`Engine::spawn_link`].
    pub fn start(config: EngineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let pool = Arc::new(Pool::from_config(&config));
        let shutdown = CancellationToken::new();
        let mut tasks: Vec<JoinHandle<()>> = pool.spawn_state_writer(shutdown.clone()).into_iter().collect();

        let mut panels = Vec::with_capacity(config.panels.len());
        for panel_config in &config.panels {
            let address = panel_config.address;
            let handle = match panel_config.dialect {
                PanelDialect::OneTouch => PanelHandle::OneTouch(Arc::new(OneTouchPanel::new(address, pool.clone()))),
                PanelDialect::AllButton => {
                    PanelHandle::AllButton(Arc::new(AllButtonPanel::new(address, pool.clone())))
                }
                PanelDialect::SpaLink => PanelHandle::SpaLink(Arc::new(SpaLinkPanel::new(address))),
            };
            let sequencer = ActionSequencer::spawn(handle.as_panel(), config.sequencer_config(), shutdown.clone());
            if let PanelHandle::OneTouch(panel) = &handle {
                tasks.push(panel.spawn_display_task(
                    Some(sequencer.clone()),
                    config.display_settle(),
                    shutdown.clone(),
                ));
            }
            info!(
                panel = %panel_config.dialect,
                addr = format!("{:#04x}", address),
                "Panel configured"
            );
            panels.push(PanelEntry { handle, sequencer });
        }

        match panels.first() {
            Some(primary) => pool.bind(&primary.sequencer),
            None => warn!("No panels configured, equipment cannot be switched"),
        }

        Ok(Self {
            master: Arc::new(MasterPanel::new(config.master_address)),
            config,
            pool,
            panels,
            shutdown,
            tasks,
        })
    }

    /// Configuration the engine was built from
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Shared pool state
    pub fn pool(&self) -> &Arc<Pool> {
        &self.pool
    }

    /// Token that stops every engine task
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Configured panels in configuration order
    pub fn panels(&self) -> impl Iterator<Item = &PanelHandle> {
        self.panels.iter().map(|entry| &entry.handle)
    }

    /// Panel at `address`
    pub fn panel(&self, address: u8) -> Option<&PanelHandle> {
        self.entry(address).map(|entry| &entry.handle)
    }

    /// Sequencer of the panel at `address`
    pub fn sequencer(&self, address: u8) -> Option<&ActionSequencer> {
        self.entry(address).map(|entry| &entry.sequencer)
    }

    fn entry(&self, address: u8) -> Option<&PanelEntry> {
        self.panels.iter().find(|entry| entry.handle.address() == address)
    }

    /// Start reading the bus on `stream`
    pub fn spawn_link<S>(&self, stream: S) -> JoinHandle<Result<(), ProtocolError>>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let reader = LinkReader::new(
            stream,
            self.panels.iter().map(|entry| entry.handle.as_panel()),
            self.config.link_config(),
        )
        .with_master(self.master.clone());
        tokio::spawn(reader.run(self.shutdown.clone()))
    }

    /// Check the controller clock periodically, if configured
    pub fn spawn_clock_job(&mut self) {
        let Some(period) = self.config.clock_check_interval() else {
            debug!("Clock check disabled");
            return;
        };
        let pool = self.pool.clone();
        let shutdown = self.shutdown.clone();
        self.tasks.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {}
                }
                match pool.check_and_correct_clock().await {
                    Ok(Some(delta)) => info!(delta = ?delta, "Controller clock corrected"),
                    Ok(None) => debug!("Controller clock checked"),
                    Err(e) => warn!(error = %e, "Controller clock not corrected"),
                }
            }
        }));
    }

    /// Stop every task and wake anything waiting on a panel
    pub async fn shutdown(self) {
        info!("Shutting down");
        self.shutdown.cancel();
        for entry in &self.panels {
            entry.handle.as_panel().release();
        }
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Engine task failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PanelConfig;
    use crate::pool::EquipmentKind;

    #[tokio::test]
    async fn test_start_binds_primary_panel() {
        let config = EngineConfig {
            panels: vec![
                PanelConfig {
                    dialect: PanelDialect::SpaLink,
                    address: 0x20,
                },
                PanelConfig {
                    dialect: PanelDialect::OneTouch,
                    address: 0x40,
                },
            ],
            ..Default::default()
        };
        let engine = Engine::start(config).unwrap();
        assert!(matches!(engine.panel(0x20), Some(PanelHandle::SpaLink(_))));
        assert!(matches!(engine.panel(0x40), Some(PanelHandle::OneTouch(_))));
        assert!(engine.panel(0x09).is_none());
        assert_eq!(
            engine.sequencer(0x40).map(|s| s.panel().core().address()),
            Some(0x40)
        );
        assert!(engine.pool().equipment(EquipmentKind::Spa).is_bound());
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_start_rejects_invalid_config() {
        let config = EngineConfig {
            panels: vec![PanelConfig {
                dialect: PanelDialect::SpaLink,
                address: 0x09,
            }],
            ..Default::default()
        };
        assert!(Engine::start(config).is_err());
    }
}
