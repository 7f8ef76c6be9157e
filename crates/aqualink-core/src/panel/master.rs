//! Master observer
//!
//! Frames addressed to the controller are only interesting right after a
//! frame to one of our panels: they are that panel's reply. They are
//! decoded with the base commands for diagnostics and never acknowledged.

use std::sync::Arc;

use super::{DispatchTable, Panel, PanelCore, Signal};

/// Passive view of the controller's own address
pub struct MasterPanel {
    core: PanelCore,
    table: DispatchTable<MasterPanel>,
}

impl MasterPanel {
    /// Observe frames sent to `address`
    pub fn new(address: u8) -> Self {
        Self {
            core: PanelCore::new("Master", address, 0x00),
            table: DispatchTable::base(),
        }
    }
}

impl Panel for MasterPanel {
    fn core(&self) -> &PanelCore {
        &self.core
    }

    fn parse_message(&self, command: u8, args: &[u8]) {
        self.table.dispatch(self, command, args);
    }

    fn signals(&self) -> Vec<Arc<Signal>> {
        vec![self.core.status_signal().clone()]
    }
}
