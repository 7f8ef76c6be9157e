//! Link reader
//!
//! Owns the byte stream. Every frame addressed to an emulated panel is
//! acknowledged before the panel interprets it, because the controller
//! expects the reply within the poll window. The acknowledgment carries the
//! panel's pending button, which is how presses reach the controller.

use std::collections::HashMap;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

use super::{Frame, FrameCodec, ProtocolError, MASTER_ADDRESS};
use crate::panel::Panel;

/// Link reader settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkConfig {
    /// Decode only; never transmit
    pub monitor_mode: bool,
    /// Address acknowledgments are sent to
    pub master_address: u8,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            monitor_mode: false,
            master_address: MASTER_ADDRESS,
        }
    }
}

/// Frame pump between the bus and the panels
pub struct LinkReader<S> {
    framed: Framed<S, FrameCodec>,
    panels: HashMap<u8, Arc<dyn Panel>>,
    master: Option<Arc<dyn Panel>>,
    config: LinkConfig,
    last_destination: Option<u8>,
    frames: u64,
}

impl<S> LinkReader<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Read `stream` on behalf of `panels`
    pub fn new(stream: S, panels: impl IntoIterator<Item = Arc<dyn Panel>>, config: LinkConfig) -> Self {
        Self {
            framed: Framed::new(stream, FrameCodec::new()),
            panels: panels
                .into_iter()
                .map(|panel| (panel.core().address(), panel))
                .collect(),
            master: None,
            config,
            last_destination: None,
            frames: 0,
        }
    }

    /// Also decode the replies addressed to the controller
    pub fn with_master(mut self, master: Arc<dyn Panel>) -> Self {
        self.master = Some(master);
        self
    }

    /// Frames received so far
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Run until `shutdown` is cancelled or the stream fails
    ///
    /// Every panel is released on the way out so no action step is left
    /// waiting on a dead link.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<(), ProtocolError> {
        for panel in self.panels.values() {
            panel.core().attach();
        }
        info!(
            panels = self.panels.len(),
            monitor = self.config.monitor_mode,
            "Link reader started"
        );
        let result = loop {
            let next = tokio::select! {
                _ = shutdown.cancelled() => break Ok(()),
                next = self.framed.next() => next,
            };
            match next {
                Some(Ok(frame)) => {
                    if let Err(e) = self.handle_frame(frame).await {
                        error!(error = %e, "Link write failed");
                        break Err(e);
                    }
                }
                Some(Err(e)) => {
                    error!(error = %e, "Link read failed");
                    break Err(e);
                }
                None => {
                    error!("Link closed");
                    break Err(ProtocolError::LinkClosed);
                }
            }
        };

        for panel in self.panels.values() {
            panel.release();
        }
        info!(frames = self.frames, "Link reader stopped");
        result
    }

    async fn handle_frame(&mut self, frame: Frame) -> Result<(), ProtocolError> {
        self.frames += 1;
        let destination = frame.address;

        if let Some(panel) = self.panels.get(&destination).cloned() {
            if !self.config.monitor_mode {
                let ack = panel.core().ack_frame(self.config.master_address);
                self.framed.send(ack).await?;
            }
            panel.parse_message(frame.command, &frame.args);
        } else if destination == self.config.master_address
            && self
                .last_destination
                .is_some_and(|last| self.panels.contains_key(&last))
        {
            if let Some(master) = &self.master {
                master.parse_message(frame.command, &frame.args);
            } else {
                trace!(frame = %frame, "Reply to controller");
            }
        } else {
            debug!(
                addr = format!("{:#04x}", destination),
                command = format!("{:#04x}", frame.command),
                "Frame for another device"
            );
        }

        self.last_destination = Some(destination);
        Ok(())
    }
}
