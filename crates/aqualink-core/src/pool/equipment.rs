//! Equipment and modes

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::action::{ActionError, ActionSequencer};
use crate::sync::lock;

/// Equipment the controller switches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EquipmentKind {
    /// Filter pump
    Pump,
    /// Spa valves
    Spa,
    /// Auxiliary 1 (cleaner)
    Aux1,
    /// Auxiliary 2 (blower)
    Aux2,
    /// Auxiliary 3
    Aux3,
    /// Auxiliary 4 (pool light)
    Aux4,
    /// Auxiliary 5 (spa light)
    Aux5,
    /// Auxiliary 6
    Aux6,
    /// Auxiliary 7
    Aux7,
    /// Heater
    Heater,
}

impl EquipmentKind {
    /// Every kind, in report order
    pub const ALL: [EquipmentKind; 10] = [
        EquipmentKind::Pump,
        EquipmentKind::Spa,
        EquipmentKind::Aux1,
        EquipmentKind::Aux2,
        EquipmentKind::Aux3,
        EquipmentKind::Aux4,
        EquipmentKind::Aux5,
        EquipmentKind::Aux6,
        EquipmentKind::Aux7,
        EquipmentKind::Heater,
    ];

    /// Name of the equipment usually wired to this output
    pub fn default_name(&self) -> &'static str {
        match self {
            EquipmentKind::Pump => "Pump",
            EquipmentKind::Spa => "Spa",
            EquipmentKind::Aux1 => "Cleaner",
            EquipmentKind::Aux2 => "Blower",
            EquipmentKind::Aux3 => "Aux 3",
            EquipmentKind::Aux4 => "Pool Light",
            EquipmentKind::Aux5 => "Spa Light",
            EquipmentKind::Aux6 => "Aux 6",
            EquipmentKind::Aux7 => "Aux 7",
            EquipmentKind::Heater => "Heater",
        }
    }
}

/// Equipment state as reported by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum EquipmentState {
    /// Off
    #[default]
    Off,
    /// On
    On,
    /// Enabled; the heater is allowed to run but is not running
    Enabled,
    /// Enhanced heat
    EnhancedHeat,
}

impl EquipmentState {
    /// State from a status field; unknown nonzero values read as on
    pub fn from_raw(value: u8) -> Self {
        match value {
            0 => Self::Off,
            1 => Self::On,
            2 => Self::Enabled,
            4 => Self::EnhancedHeat,
            _ => Self::On,
        }
    }

    /// Wire value
    pub fn raw(&self) -> u8 {
        match self {
            Self::Off => 0,
            Self::On => 1,
            Self::Enabled => 2,
            Self::EnhancedHeat => 4,
        }
    }

    /// Short label used in state reports
    pub fn label(&self) -> &'static str {
        match self {
            Self::Off => "OFF",
            Self::On => "ON",
            Self::Enabled => "ENA",
            Self::EnhancedHeat => "ENH",
        }
    }

    /// Anything but off
    pub fn is_on(&self) -> bool {
        *self != Self::Off
    }
}

impl fmt::Display for EquipmentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One switchable piece of equipment
pub struct Equipment {
    name: String,
    kind: EquipmentKind,
    state: Mutex<EquipmentState>,
    changed: Arc<AtomicBool>,
    sequencer: OnceLock<ActionSequencer>,
}

impl fmt::Debug for Equipment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Equipment")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("state", &self.state())
            .finish()
    }
}

impl Equipment {
    pub(crate) fn new(kind: EquipmentKind, changed: Arc<AtomicBool>) -> Self {
        Self {
            name: kind.default_name().to_string(),
            kind,
            state: Mutex::new(EquipmentState::Off),
            changed,
            sequencer: OnceLock::new(),
        }
    }

    /// Display name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Output this equipment is wired to
    pub fn kind(&self) -> EquipmentKind {
        self.kind
    }

    /// Last known state
    pub fn state(&self) -> EquipmentState {
        *lock(&self.state)
    }

    /// Record the state reported by the controller; returns whether it changed
    ///
    /// This does not switch anything, see [`Equipment::change_state`].
    pub fn set_state(&self, state: EquipmentState) -> bool {
        let mut current = lock(&self.state);
        if *current == state {
            return false;
        }
        *current = state;
        drop(current);
        self.changed.store(true, Ordering::Release);
        info!(equipment = %self.name, state = state.label(), "Equipment state");
        true
    }

    /// Attach the sequencer of the panel that switches this equipment
    ///
    /// Returns false if it was already attached.
    pub fn bind(&self, sequencer: ActionSequencer) -> bool {
        self.sequencer.set(sequencer).is_ok()
    }

    /// Whether a panel has been attached
    pub fn is_bound(&self) -> bool {
        self.sequencer.get().is_some()
    }

    /// Switch the equipment on or off through its panel
    ///
    /// Does nothing when the equipment is already in the requested on/off
    /// state. With `wait` the call returns once the button sequence has
    /// finished; otherwise once it has been queued.
    pub async fn change_state(
        self: &Arc<Self>,
        target: EquipmentState,
        wait: bool,
    ) -> Result<(), ActionError> {
        let current = self.state();
        if current.is_on() == target.is_on() {
            debug!(equipment = %self.name, state = current.label(), "Already in requested state");
            return Ok(());
        }

        let sequencer = self
            .sequencer
            .get()
            .ok_or_else(|| ActionError::NoPanel(self.name.clone()))?;
        let sequence = sequencer
            .panel()
            .binding_for(self.kind, target)
            .ok_or_else(|| ActionError::Unbound {
                equipment: self.name.clone(),
                panel: sequencer.panel().core().name().to_string(),
            })?;

        let action = format!("{} {}", self.name, if target.is_on() { "On" } else { "Off" });
        let handle = sequencer.submit(action, sequence).await?;
        if wait {
            let result = handle.wait().await;
            if result.is_ok() {
                self.complete(target);
            }
            result
        } else {
            let equipment = self.clone();
            tokio::spawn(async move {
                if handle.wait().await.is_ok() {
                    equipment.complete(target);
                }
            });
            Ok(())
        }
    }

    /// Completion of a switching sequence, for panels that never report state
    fn complete(&self, target: EquipmentState) {
        if self.state().is_on() != target.is_on() {
            self.set_state(target);
        }
    }
}

/// Named groups of equipment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModeKind {
    /// Pump and cleaner
    Clean,
    /// Spa, heater and lights
    Spa,
    /// Pool and spa lights
    Lights,
}

impl ModeKind {
    /// Every mode
    pub const ALL: [ModeKind; 3] = [ModeKind::Clean, ModeKind::Spa, ModeKind::Lights];

    /// Display name
    pub fn name(&self) -> &'static str {
        match self {
            ModeKind::Clean => "Clean Mode",
            ModeKind::Spa => "Spa Mode",
            ModeKind::Lights => "Lights Mode",
        }
    }

    /// Members, in switch-on order
    pub fn members(&self) -> &'static [EquipmentKind] {
        match self {
            ModeKind::Clean => &[EquipmentKind::Pump, EquipmentKind::Aux1],
            ModeKind::Spa => &[
                EquipmentKind::Spa,
                EquipmentKind::Heater,
                EquipmentKind::Aux4,
                EquipmentKind::Aux5,
            ],
            ModeKind::Lights => &[EquipmentKind::Aux4, EquipmentKind::Aux5],
        }
    }
}

/// Ordered equipment switched as one unit
///
/// Switching on walks the list forward, switching off walks it backward.
/// The mode's own state is the last direction it was commanded in.
#[derive(Debug)]
pub struct Mode {
    kind: ModeKind,
    equipment: Vec<Arc<Equipment>>,
    state: Mutex<EquipmentState>,
}

impl Mode {
    pub(crate) fn new(kind: ModeKind, equipment: Vec<Arc<Equipment>>) -> Self {
        Self {
            kind,
            equipment,
            state: Mutex::new(EquipmentState::Off),
        }
    }

    /// Display name
    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    /// Which mode this is
    pub fn kind(&self) -> ModeKind {
        self.kind
    }

    /// Members in switch-on order
    pub fn equipment(&self) -> &[Arc<Equipment>] {
        &self.equipment
    }

    /// Last commanded state
    pub fn state(&self) -> EquipmentState {
        *lock(&self.state)
    }

    /// Start switching the mode in the background
    ///
    /// `None` toggles the last commanded state.
    pub fn change_state(self: &Arc<Self>, on: Option<bool>) -> JoinHandle<Result<(), ActionError>> {
        let on = on.unwrap_or_else(|| !self.state().is_on());
        let mode = self.clone();
        tokio::spawn(async move { mode.run(on).await })
    }

    /// Switch every member, one after the other
    ///
    /// Members the panel has no binding for are skipped. Any other failure
    /// stops the walk.
    pub async fn run(&self, on: bool) -> Result<(), ActionError> {
        let target = if on { EquipmentState::On } else { EquipmentState::Off };
        *lock(&self.state) = target;
        info!(mode = self.name(), state = target.label(), "Mode started");

        let mut order: Vec<&Arc<Equipment>> = self.equipment.iter().collect();
        if !on {
            order.reverse();
        }
        for equipment in order {
            match equipment.change_state(target, true).await {
                Ok(()) => {}
                Err(e @ (ActionError::Unbound { .. } | ActionError::NoPanel(_))) => {
                    warn!(mode = self.name(), error = %e, "Skipping equipment");
                }
                Err(e) => {
                    warn!(mode = self.name(), error = %e, "Mode stopped");
                    return Err(e);
                }
            }
        }

        info!(mode = self.name(), state = target.label(), "Mode complete");
        Ok(())
    }
}
