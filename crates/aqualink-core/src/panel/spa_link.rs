//! SpaLink panel
//!
//! A 3 digit LED display, 9 buttons and 3 LEDs. Addresses 0x20-0x22. The
//! status bytes have not been decoded, so every press is confirmed by the
//! next change of status.

use std::sync::Arc;

use super::{Button, DispatchTable, Panel, PanelCore, Signal};
use crate::action::{ActionSequence, ActionStep};
use crate::pool::{EquipmentKind, EquipmentState};

const ACK_PREFIX: u8 = 0x00;

/// Buttons 1 to 8 in panel order
const BUTTONS: [Button; 8] = [
    Button::new("1", 0x09),
    Button::new("2", 0x06),
    Button::new("3", 0x03),
    Button::new("4", 0x08),
    Button::new("5", 0x02),
    Button::new("6", 0x07),
    Button::new("7", 0x04),
    Button::new("8", 0x01),
];

const POOL_LIGHT: &[usize] = &[6];
const SPA_LIGHT: &[usize] = &[7];
const LIGHTS: &[usize] = &[6, 7];
const BLOWER: &[usize] = &[4];
const SPA: &[usize] = &[1, 2];
const SPA_MODE: &[usize] = &[1, 2, 6, 7];

/// SpaLink panel emulation
pub struct SpaLinkPanel {
    core: PanelCore,
    table: DispatchTable<SpaLinkPanel>,
}

impl SpaLinkPanel {
    /// Create the panel at `address`
    pub fn new(address: u8) -> Self {
        Self {
            core: PanelCore::new("SpaLink", address, ACK_PREFIX),
            table: DispatchTable::base(),
        }
    }

    /// Button `number`, counting from 1
    pub fn button(number: usize) -> Option<Button> {
        number.checked_sub(1).and_then(|i| BUTTONS.get(i)).copied()
    }

    fn sequence(&self, numbers: &[usize]) -> ActionSequence {
        numbers
            .iter()
            .filter_map(|&n| Self::button(n))
            .map(|button| ActionStep::new(button, self.core.status_signal().clone()))
            .collect()
    }

    /// Toggle the pool light
    pub fn pool_light_sequence(&self) -> ActionSequence {
        self.sequence(POOL_LIGHT)
    }

    /// Toggle the spa light
    pub fn spa_light_sequence(&self) -> ActionSequence {
        self.sequence(SPA_LIGHT)
    }

    /// Toggle both lights
    pub fn lights_sequence(&self) -> ActionSequence {
        self.sequence(LIGHTS)
    }

    /// Toggle the blower
    pub fn blower_sequence(&self) -> ActionSequence {
        self.sequence(BLOWER)
    }

    /// Spa valves and heat
    pub fn spa_sequence(&self) -> ActionSequence {
        self.sequence(SPA)
    }

    /// Spa valves, heat and both lights in one go
    ///
    /// Not bound to any equipment: Spa Mode switches the lights itself.
    pub fn spa_mode_sequence(&self) -> ActionSequence {
        self.sequence(SPA_MODE)
    }
}

impl Panel for SpaLinkPanel {
    fn core(&self) -> &PanelCore {
        &self.core
    }

    fn parse_message(&self, command: u8, args: &[u8]) {
        self.table.dispatch(self, command, args);
    }

    fn signals(&self) -> Vec<Arc<Signal>> {
        vec![self.core.status_signal().clone()]
    }

    fn binding_for(&self, kind: EquipmentKind, _target: EquipmentState) -> Option<ActionSequence> {
        match kind {
            EquipmentKind::Aux4 => Some(self.pool_light_sequence()),
            EquipmentKind::Aux5 => Some(self.spa_light_sequence()),
            EquipmentKind::Aux2 => Some(self.blower_sequence()),
            EquipmentKind::Spa => Some(self.spa_sequence()),
            _ => None,
        }
    }
}
