//! Pool state
//!
//! The aggregated view of the controller: identity, temperatures, equipment
//! and modes. Panels write into it as they decode frames; everything else
//! reads it through [`Pool::snapshot`].

mod clock;
mod equipment;
mod state_file;

pub use clock::{clock_correction, parse_controller_time, ClockDelta};
pub use equipment::{Equipment, EquipmentKind, EquipmentState, Mode, ModeKind};
pub use state_file::StateFile;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, RwLock};

use chrono::{Local, NaiveDateTime};
use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::action::{ActionError, ActionSequencer};
use crate::config::EngineConfig;
use crate::panel::text::TempSensor;
use crate::sync::{read, write};

/// What the controller calls itself
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Identity {
    /// Installation title
    pub title: String,
    /// Controller model
    pub model: String,
    /// Firmware revision
    pub rev: String,
    /// Controller date line
    pub date: String,
    /// Controller time line
    pub time: String,
}

/// Temperatures reported by the controller
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Environment {
    /// Air
    pub air_temp: i32,
    /// Pool water
    pub pool_temp: i32,
    /// Spa water
    pub spa_temp: i32,
    /// Solar collector
    pub solar_temp: i32,
    /// Whichever body of water is circulating
    pub water_temp: i32,
    /// `F` or `C`, empty until reported
    pub temp_scale: String,
}

/// Controller operating mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum OpMode {
    /// Normal operation
    #[default]
    Auto,
    /// Service switch set; panels cannot switch equipment
    Service,
    /// Temporary service override
    Timeout,
}

impl OpMode {
    /// Mode named by a display line such as `SERVICE`
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "AUTO" => Some(Self::Auto),
            "SERVICE" => Some(Self::Service),
            "TIMEOUT" => Some(Self::Timeout),
            _ => None,
        }
    }
}

/// Pool, equipment and modes
pub struct Pool {
    identity: RwLock<Identity>,
    environment: RwLock<Environment>,
    op_mode: RwLock<OpMode>,
    equipment: Vec<Arc<Equipment>>,
    modes: Vec<Arc<Mode>>,
    changed: Arc<AtomicBool>,
    state_changed: Notify,
    state_file: Option<PathBuf>,
    clock_tolerance_minutes: i64,
    clock_panel: OnceLock<ActionSequencer>,
}

impl fmt::Debug for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("identity", &*read(&self.identity))
            .field("environment", &*read(&self.environment))
            .field("state_file", &self.state_file)
            .finish()
    }
}

impl Pool {
    /// Create the pool, restoring persisted state from `state_file` if given
    pub fn new(state_file: Option<PathBuf>, clock_tolerance_minutes: i64) -> Self {
        let changed = Arc::new(AtomicBool::new(false));
        let equipment: Vec<Arc<Equipment>> = EquipmentKind::ALL
            .into_iter()
            .map(|kind| Arc::new(Equipment::new(kind, changed.clone())))
            .collect();
        let modes = ModeKind::ALL
            .into_iter()
            .map(|kind| {
                let members = kind
                    .members()
                    .iter()
                    .filter_map(|m| equipment.iter().find(|e| e.kind() == *m).cloned())
                    .collect();
                Arc::new(Mode::new(kind, members))
            })
            .collect();

        let pool = Self {
            identity: RwLock::new(Identity::default()),
            environment: RwLock::new(Environment::default()),
            op_mode: RwLock::new(OpMode::default()),
            equipment,
            modes,
            changed,
            state_changed: Notify::new(),
            state_file,
            clock_tolerance_minutes,
            clock_panel: OnceLock::new(),
        };
        if let Some(path) = &pool.state_file {
            pool.restore(path);
        }
        pool
    }

    /// Create the pool described by `config`
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            config.state_file.clone(),
            i64::from(config.clock_tolerance_minutes),
        )
    }

    fn restore(&self, path: &Path) {
        let state = match StateFile::load(path) {
            Ok(state) => state,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "No pool state restored");
                return;
            }
        };
        {
            let mut identity = write(&self.identity);
            if let Some(title) = state.get("title") {
                identity.title = title.to_string();
            }
            if let Some(model) = state.get("model") {
                identity.model = model.to_string();
            }
            if let Some(rev) = state.get("rev") {
                identity.rev = rev.to_string();
            }
        }
        {
            let mut env = write(&self.environment);
            env.air_temp = state.get_i32("airTemp").unwrap_or(env.air_temp);
            env.pool_temp = state.get_i32("poolTemp").unwrap_or(env.pool_temp);
            env.spa_temp = state.get_i32("spaTemp").unwrap_or(env.spa_temp);
            if let Some(scale) = state.get("tempScale") {
                env.temp_scale = scale.to_string();
            }
        }
        info!(path = %path.display(), "Restored pool state");
    }

    /// Persist identity and temperatures if anything changed
    ///
    /// Failures are logged; persistence is best-effort.
    pub fn write_state(&self) {
        if !self.changed.swap(false, Ordering::AcqRel) {
            return;
        }
        let Some(path) = &self.state_file else {
            return;
        };
        let mut state = StateFile::new();
        {
            let identity = read(&self.identity);
            state.set("title", identity.title.as_str());
            state.set("model", identity.model.as_str());
            state.set("rev", identity.rev.as_str());
        }
        {
            let env = read(&self.environment);
            state.set("airTemp", env.air_temp.to_string());
            state.set("poolTemp", env.pool_temp.to_string());
            state.set("spaTemp", env.spa_temp.to_string());
            state.set("tempScale", env.temp_scale.as_str());
        }
        match state.save(path) {
            Ok(()) => debug!(path = %path.display(), "Pool state saved"),
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to save pool state"),
        }
    }

    /// Save the state file off the async threads whenever the state changes
    ///
    /// Pending changes are flushed once more when `shutdown` is cancelled.
    /// Returns `None` when there is no state file.
    pub fn spawn_state_writer(self: &Arc<Self>, shutdown: CancellationToken) -> Option<JoinHandle<()>> {
        self.state_file.as_ref()?;
        let pool = self.clone();
        Some(tokio::spawn(async move {
            loop {
                let stopping = tokio::select! {
                    _ = shutdown.cancelled() => true,
                    _ = pool.state_changed.notified() => false,
                };
                let writer = pool.clone();
                if let Err(e) = tokio::task::spawn_blocking(move || writer.write_state()).await {
                    warn!(error = %e, "State writer failed");
                }
                if stopping {
                    break;
                }
            }
            debug!("State writer stopped");
        }))
    }

    fn mark_changed(&self) {
        self.changed.store(true, Ordering::Release);
        self.state_changed.notify_one();
    }

    /// Current identity
    pub fn identity(&self) -> Identity {
        read(&self.identity).clone()
    }

    /// Current temperatures
    pub fn environment(&self) -> Environment {
        read(&self.environment).clone()
    }

    /// Current operating mode
    pub fn op_mode(&self) -> OpMode {
        *read(&self.op_mode)
    }

    /// Set the installation title
    pub fn set_title(&self, title: &str) {
        let mut identity = write(&self.identity);
        if identity.title == title {
            return;
        }
        identity.title = title.to_string();
        drop(identity);
        info!(title, "Pool title");
        self.mark_changed();
    }

    /// Set the controller model and revision
    pub fn set_model(&self, model: &str, rev: &str) {
        let mut identity = write(&self.identity);
        if identity.model == model && identity.rev == rev {
            return;
        }
        identity.model = model.to_string();
        identity.rev = rev.to_string();
        drop(identity);
        info!(model, rev, "Controller model");
        self.mark_changed();
    }

    /// Set the controller date line
    pub fn set_date(&self, date: &str) {
        let mut identity = write(&self.identity);
        if identity.date == date {
            return;
        }
        identity.date = date.to_string();
        drop(identity);
        debug!(date, "Controller date");
    }

    /// Set the controller time line
    pub fn set_time(&self, time: &str) {
        let mut identity = write(&self.identity);
        if identity.time == time {
            return;
        }
        identity.time = time.to_string();
        drop(identity);
        debug!(time, "Controller time");
    }

    /// Set the operating mode
    pub fn set_op_mode(&self, mode: OpMode) {
        let mut current = write(&self.op_mode);
        if *current == mode {
            return;
        }
        *current = mode;
        drop(current);
        info!(mode = ?mode, "Operating mode");
        self.changed.store(true, Ordering::Release);
    }

    /// Record a temperature; `scale` is kept when given
    pub fn set_temperature(&self, sensor: TempSensor, value: i32, scale: Option<&str>) {
        let mut env = write(&self.environment);
        let field = match sensor {
            TempSensor::Air => &mut env.air_temp,
            TempSensor::Pool => &mut env.pool_temp,
            TempSensor::Spa => &mut env.spa_temp,
            TempSensor::Solar => &mut env.solar_temp,
        };
        let mut changed = *field != value;
        *field = value;
        if let Some(scale) = scale.filter(|s| *s != env.temp_scale) {
            env.temp_scale = scale.to_string();
            changed = true;
        }
        drop(env);
        if changed {
            debug!(sensor = ?sensor, value, "Temperature");
            self.mark_changed();
        }
    }

    /// Record the circulating water temperature
    pub fn set_water_temp(&self, value: i32) {
        let mut env = write(&self.environment);
        if env.water_temp == value {
            return;
        }
        env.water_temp = value;
        drop(env);
        debug!(value, "Water temperature");
        self.mark_changed();
    }

    /// Equipment of `kind`
    pub fn equipment(&self, kind: EquipmentKind) -> &Arc<Equipment> {
        // ALL is exhaustive and the list is built from it
        &self.equipment[EquipmentKind::ALL
            .iter()
            .position(|k| *k == kind)
            .unwrap_or_default()]
    }

    /// All equipment in report order
    pub fn equipment_list(&self) -> &[Arc<Equipment>] {
        &self.equipment
    }

    /// Mode of `kind`
    pub fn mode(&self, kind: ModeKind) -> &Arc<Mode> {
        &self.modes[ModeKind::ALL
            .iter()
            .position(|k| *k == kind)
            .unwrap_or_default()]
    }

    /// All modes
    pub fn modes(&self) -> &[Arc<Mode>] {
        &self.modes
    }

    /// Attach every piece of equipment, and the clock, to the primary panel
    pub fn bind(&self, sequencer: &ActionSequencer) {
        for equipment in &self.equipment {
            if !equipment.bind(sequencer.clone()) {
                warn!(equipment = equipment.name(), "Equipment already attached to a panel");
            }
        }
        if self.clock_panel.set(sequencer.clone()).is_err() {
            warn!("Clock already attached to a panel");
        }
    }

    /// Compare the controller clock with local time and fix it if needed
    ///
    /// Returns the correction that was applied.
    pub async fn check_and_correct_clock(&self) -> Result<Option<ClockDelta>, ActionError> {
        self.correct_clock_at(Local::now().naive_local()).await
    }

    /// Like [`Pool::check_and_correct_clock`] with an explicit local time
    pub async fn correct_clock_at(&self, now: NaiveDateTime) -> Result<Option<ClockDelta>, ActionError> {
        let identity = self.identity();
        let Some(controller) = parse_controller_time(&identity.date, &identity.time) else {
            debug!(date = %identity.date, time = %identity.time, "Controller clock not known yet");
            return Ok(None);
        };
        let Some(delta) = clock_correction(controller, now, self.clock_tolerance_minutes) else {
            return Ok(None);
        };

        let sequencer = self
            .clock_panel
            .get()
            .ok_or_else(|| ActionError::NoPanel("clock".to_string()))?;
        let panel = sequencer.panel();
        let sequence = panel
            .clock_sequence(&delta)
            .ok_or_else(|| ActionError::ClockUnsupported(panel.core().name().to_string()))?;

        info!(controller = %controller, local = %now, delta = ?delta, "Adjusting controller clock");
        sequencer.run("Set clock", sequence).await?;
        Ok(Some(delta))
    }

    /// Read-only copy of the current state
    pub fn snapshot(&self) -> PoolSnapshot {
        PoolSnapshot {
            identity: self.identity(),
            environment: self.environment(),
            op_mode: self.op_mode(),
            equipment: self
                .equipment
                .iter()
                .map(|e| EquipmentSnapshot {
                    name: e.name().to_string(),
                    kind: e.kind(),
                    state: e.state(),
                })
                .collect(),
            modes: self
                .modes
                .iter()
                .map(|m| ModeSnapshot {
                    name: m.name().to_string(),
                    kind: m.kind(),
                    state: m.state(),
                })
                .collect(),
        }
    }
}

/// Equipment state in a [`PoolSnapshot`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EquipmentSnapshot {
    /// Display name
    pub name: String,
    /// Output
    pub kind: EquipmentKind,
    /// State
    pub state: EquipmentState,
}

/// Mode state in a [`PoolSnapshot`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModeSnapshot {
    /// Display name
    pub name: String,
    /// Mode
    pub kind: ModeKind,
    /// Last commanded state
    pub state: EquipmentState,
}

/// Read-only copy of the pool for collaborators
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolSnapshot {
    /// Identity
    pub identity: Identity,
    /// Temperatures
    pub environment: Environment,
    /// Operating mode
    pub op_mode: OpMode,
    /// Equipment in report order
    pub equipment: Vec<EquipmentSnapshot>,
    /// Modes
    pub modes: Vec<ModeSnapshot>,
}

impl PoolSnapshot {
    /// State of the equipment of `kind`
    pub fn equipment_state(&self, kind: EquipmentKind) -> Option<EquipmentState> {
        self.equipment.iter().find(|e| e.kind == kind).map(|e| e.state)
    }
}

impl fmt::Display for PoolSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let id = &self.identity;
        let env = &self.environment;
        writeln!(f, "Title:      {}", id.title)?;
        writeln!(f, "Model:      {} Rev {}", id.model, id.rev)?;
        writeln!(f, "Date:       {}", id.date)?;
        writeln!(f, "Time:       {}", id.time)?;
        writeln!(f, "Air Temp:    {}°{}", env.air_temp, env.temp_scale)?;
        writeln!(f, "Pool Temp:   {}°{}", env.pool_temp, env.temp_scale)?;
        writeln!(f, "Spa Temp:    {}°{}", env.spa_temp, env.temp_scale)?;
        for equipment in &self.equipment {
            writeln!(f, "{:<12}{}", format!("{}:", equipment.name), equipment.state)?;
        }
        Ok(())
    }
}
