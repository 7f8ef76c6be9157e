//! OneTouch panel
//!
//! A 16 character by 12 line display, six buttons and one LED. Addresses
//! 0x40-0x43.
//!
//! The controller paints the display one line at a time, so the panel state
//! is only read once the display has been quiet for the settle period. What
//! the display shows depends on which page is up; [`read_display`] works out
//! the page and what it says.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::text::{decode_text, parse_temperature, TempSensor, ONE_TOUCH_DEGREE};
use super::{Button, DispatchTable, Panel, PanelCore, Signal};
use crate::action::{ActionSequence, ActionSequencer, ActionStep};
use crate::pool::{EquipmentKind, EquipmentState, Pool};
use crate::protocol::{to_hex, Command};
use crate::sync::lock;

/// Number of display lines
pub const DISPLAY_LINES: usize = 12;
const ACK_PREFIX: u8 = 0x8b;
/// Highlight line value meaning "none"
const NO_LINE: u8 = 0xff;

const ONE: Button = Button::new("one", 0x03);
const BACK: Button = Button::new("back", 0x02);
const SELECT: Button = Button::new("select", 0x04);
const DOWN: Button = Button::new("down", 0x05);
const UP: Button = Button::new("up", 0x06);

/// Highlighted part of the display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Highlight {
    /// Highlighted line, if any
    pub line: Option<u8>,
    /// First highlighted column
    pub start: u8,
    /// Last highlighted column; `None` is the whole line
    pub end: Option<u8>,
}

/// Page the display is showing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum DisplayMode {
    /// Not read yet
    #[default]
    Unknown,
    /// Equipment status list
    Equipment,
    /// Home page
    Main,
    /// OneTouch macro page
    OneTouch,
    /// Power-up page showing the model
    Init,
    /// Any menu
    Menu,
}

/// Equipment shown as running
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct EquipmentFlags {
    /// Filter pump
    pub filter: bool,
    /// Cleaner
    pub cleaner: bool,
    /// Spa
    pub spa: bool,
    /// Spa heat
    pub heater: bool,
    /// Pool light
    pub pool_light: bool,
    /// Spa light
    pub spa_light: bool,
}

impl EquipmentFlags {
    fn states(&self) -> [(EquipmentKind, bool); 6] {
        [
            (EquipmentKind::Pump, self.filter),
            (EquipmentKind::Aux1, self.cleaner),
            (EquipmentKind::Spa, self.spa),
            (EquipmentKind::Heater, self.heater),
            (EquipmentKind::Aux4, self.pool_light),
            (EquipmentKind::Aux5, self.spa_light),
        ]
    }
}

/// What the home page shows
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MainScreen {
    /// Line 0
    pub title: String,
    /// Line 2
    pub date: String,
    /// Line 3
    pub time: String,
    /// Equipment implied by a summary on line 5
    pub equipment: Option<EquipmentFlags>,
    /// Water temperature on line 5
    pub water: Option<(TempSensor, i32)>,
    /// Air temperature on line 6
    pub air: Option<i32>,
}

/// Result of reading a settled display
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayReading {
    /// Equipment status list
    Equipment(EquipmentFlags),
    /// Home page
    Main(MainScreen),
    /// OneTouch page
    OneTouch {
        /// Whether the spa macro reads ON
        spa_on: bool,
    },
    /// Power-up page
    Init {
        /// Model from line 5
        model: Option<String>,
    },
    /// Any other page
    Menu,
}

impl DisplayReading {
    /// Page this reading came from
    pub fn mode(&self) -> DisplayMode {
        match self {
            DisplayReading::Equipment(_) => DisplayMode::Equipment,
            DisplayReading::Main(_) => DisplayMode::Main,
            DisplayReading::OneTouch { .. } => DisplayMode::OneTouch,
            DisplayReading::Init { .. } => DisplayMode::Init,
            DisplayReading::Menu => DisplayMode::Menu,
        }
    }
}

/// Work out the page and its contents from the display lines
pub fn read_display(lines: &[String]) -> DisplayReading {
    let line = |n: usize| lines.get(n).map(String::as_str).unwrap_or_default();

    if line(0) == "EQUIPMENT ON" {
        let mut flags = EquipmentFlags::default();
        for text in lines {
            match text.as_str() {
                "FILTER PUMP" => flags.filter = true,
                "CLEANER" => flags.cleaner = true,
                "SPA" => flags.spa = true,
                "SPA HEAT" => flags.heater = true,
                "POOL LIGHT" => flags.pool_light = true,
                "SPA LIGHT" => flags.spa_light = true,
                _ => {}
            }
        }
        DisplayReading::Equipment(flags)
    } else if line(11) == "MENU / HELP" {
        DisplayReading::Main(read_main(line(0), line(2), line(3), line(5), line(6)))
    } else if line(11) == "SYSTEM ON" {
        DisplayReading::OneTouch {
            spa_on: line(2).ends_with(" ON"),
        }
    } else if line(5).starts_with("MODEL") {
        DisplayReading::Init {
            model: line(5).split_whitespace().nth(1).map(str::to_string),
        }
    } else {
        DisplayReading::Menu
    }
}

fn read_main(title: &str, date: &str, time: &str, summary: &str, air: &str) -> MainScreen {
    let mut screen = MainScreen {
        title: title.to_string(),
        date: date.to_string(),
        time: time.to_string(),
        ..Default::default()
    };
    match summary {
        "FILTER PUMP OFF" => screen.equipment = Some(EquipmentFlags::default()),
        "SPA ON" => {
            screen.equipment = Some(EquipmentFlags {
                filter: true,
                spa: true,
                heater: true,
                pool_light: true,
                spa_light: true,
                cleaner: false,
            })
        }
        "SPA COOLDOWN" => {
            screen.equipment = Some(EquipmentFlags {
                filter: true,
                spa: true,
                ..Default::default()
            })
        }
        _ => screen.water = temperature_line(summary),
    }
    screen.air = temperature_line(air)
        .filter(|(sensor, _)| *sensor == TempSensor::Air)
        .map(|(_, value)| value);
    screen
}

/// `POOL 81°` style line
fn temperature_line(text: &str) -> Option<(TempSensor, i32)> {
    let mut parts = text.split_whitespace();
    let sensor = TempSensor::from_label(parts.next()?)?;
    let (value, _) = parse_temperature(parts.next()?)?;
    Some((sensor, value))
}

#[derive(Debug, Default)]
struct Display {
    lines: [String; DISPLAY_LINES],
    highlight: Highlight,
    mode: DisplayMode,
}

/// OneTouch panel emulation
pub struct OneTouchPanel {
    core: PanelCore,
    pool: Arc<Pool>,
    table: DispatchTable<OneTouchPanel>,
    display: Mutex<Display>,
    display_signal: Arc<Signal>,
    highlight_signal: Arc<Signal>,
    spa_on_signal: Arc<Signal>,
    spa_off_signal: Arc<Signal>,
}

impl OneTouchPanel {
    /// Create the panel at `address`, reporting into `pool`
    pub fn new(address: u8, pool: Arc<Pool>) -> Self {
        let table = DispatchTable::base()
            .with(Command::LongMessage, Self::handle_long_message)
            .with(Command::Poll, Self::handle_poll)
            .with(Command::HighlightLine, Self::handle_highlight_line)
            .with(Command::ClearDisplay, Self::handle_clear)
            .with(Command::HighlightField, Self::handle_highlight_field);
        Self {
            core: PanelCore::new("One Touch", address, ACK_PREFIX),
            pool,
            table,
            display: Mutex::new(Display::default()),
            display_signal: Arc::new(Signal::new("display")),
            highlight_signal: Arc::new(Signal::new("highlight")),
            spa_on_signal: Arc::new(Signal::new("spa on")),
            spa_off_signal: Arc::new(Signal::new("spa off")),
        }
    }

    /// Current display lines
    pub fn lines(&self) -> Vec<String> {
        lock(&self.display).lines.to_vec()
    }

    /// Current highlight
    pub fn highlight(&self) -> Highlight {
        lock(&self.display).highlight
    }

    /// Page found by the last display evaluation
    pub fn display_mode(&self) -> DisplayMode {
        lock(&self.display).mode
    }

    /// Signal fired by every display line update
    pub fn display_signal(&self) -> &Arc<Signal> {
        &self.display_signal
    }

    /// Signal fired by every line highlight
    pub fn highlight_signal(&self) -> &Arc<Signal> {
        &self.highlight_signal
    }

    fn handle_long_message(&self, args: &[u8]) {
        let line = usize::from(args[0]);
        let text = decode_text(&args[1..], ONE_TOUCH_DEGREE);
        debug!(panel = self.core.name(), line, text = %text, "longMsg");
        if line >= DISPLAY_LINES {
            warn!(panel = self.core.name(), line, "Display line out of range");
            return;
        }
        lock(&self.display).lines[line] = text;
        self.display_signal.set();
    }

    fn handle_poll(&self, _args: &[u8]) {
        trace!(panel = self.core.name(), "poll");
    }

    fn handle_highlight_line(&self, args: &[u8]) {
        debug!(panel = self.core.name(), line = args[0], rest = %to_hex(&args[1..]), "hilite");
        let line = (args[0] != NO_LINE).then_some(args[0]);
        lock(&self.display).highlight = Highlight {
            line,
            start: 0,
            end: None,
        };
        self.highlight_signal.set();
    }

    fn handle_clear(&self, args: &[u8]) {
        debug!(panel = self.core.name(), args = %to_hex(args), "clear");
        let mut display = lock(&self.display);
        display.lines = Default::default();
        display.highlight.line = None;
    }

    fn handle_highlight_field(&self, args: &[u8]) {
        let (line, start, end, set) = (args[0], args[1], args[2], args[3] != 0);
        debug!(panel = self.core.name(), line, start, end, set, "hifield");
        lock(&self.display).highlight = if set {
            Highlight {
                line: Some(line),
                start,
                end: Some(end),
            }
        } else {
            Highlight {
                line: Some(line),
                start: 0,
                end: None,
            }
        };
    }

    /// Read the settled display into the pool
    ///
    /// Returns the previous and the new page.
    pub fn evaluate_display(&self) -> (DisplayMode, DisplayMode) {
        let (previous, reading) = {
            let mut display = lock(&self.display);
            let reading = read_display(&display.lines);
            let previous = display.mode;
            display.mode = reading.mode();
            (previous, reading)
        };
        let mode = reading.mode();
        debug!(panel = self.core.name(), mode = ?mode, "Display mode");
        self.apply(reading);
        (previous, mode)
    }

    fn apply(&self, reading: DisplayReading) {
        match reading {
            DisplayReading::Main(screen) => {
                self.pool.set_title(&screen.title);
                self.pool.set_date(&screen.date);
                self.pool.set_time(&screen.time);
                if let Some(flags) = screen.equipment {
                    self.apply_flags(&flags);
                }
                if let Some((sensor, value)) = screen.water {
                    self.pool.set_temperature(sensor, value, None);
                    self.pool.set_water_temp(value);
                }
                if let Some(value) = screen.air {
                    self.pool.set_temperature(TempSensor::Air, value, None);
                }
            }
            DisplayReading::Equipment(flags) => self.apply_flags(&flags),
            DisplayReading::OneTouch { spa_on: true } => self.spa_on_signal.set(),
            DisplayReading::OneTouch { spa_on: false } => self.spa_off_signal.set(),
            DisplayReading::Init { model: Some(model) } => {
                let rev = self.pool.identity().rev;
                self.pool.set_model(&model, &rev);
            }
            DisplayReading::Init { model: None } | DisplayReading::Menu => {}
        }
    }

    fn apply_flags(&self, flags: &EquipmentFlags) {
        for (kind, on) in flags.states() {
            let state = if on { EquipmentState::On } else { EquipmentState::Off };
            self.pool.equipment(kind).set_state(state);
        }
    }

    /// Watch the display and evaluate it each time it settles
    ///
    /// When the panel powers up away from the home page, `sequencer` is used
    /// to return there.
    pub fn spawn_display_task(
        self: &Arc<Self>,
        sequencer: Option<ActionSequencer>,
        settle: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let panel = self.clone();
        tokio::spawn(async move { panel.watch_display(sequencer, settle, shutdown).await })
    }

    async fn watch_display(
        &self,
        sequencer: Option<ActionSequencer>,
        settle: Duration,
        shutdown: CancellationToken,
    ) {
        debug!(panel = self.core.name(), "Display watcher started");
        loop {
            self.display_signal.clear();
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = self.display_signal.wait() => {}
            }
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(settle) => {}
            }

            let (previous, mode) = self.evaluate_display();
            if previous == DisplayMode::Init && mode != DisplayMode::Main {
                if let Some(sequencer) = &sequencer {
                    if let Err(e) = sequencer.submit("Main", self.main_sequence()).await {
                        warn!(panel = self.core.name(), error = %e, "Could not return to main page");
                    }
                }
            }
        }
        debug!(panel = self.core.name(), "Display watcher stopped");
    }

    fn step(&self, button: Button, signal: &Arc<Signal>) -> ActionStep {
        ActionStep::new(button, signal.clone())
    }

    /// Press select to return to the home page from the OneTouch page
    pub fn main_sequence(&self) -> ActionSequence {
        ActionSequence::single(self.step(SELECT, &self.highlight_signal))
    }

    /// Press back
    pub fn back_sequence(&self) -> ActionSequence {
        ActionSequence::single(self.step(BACK, &self.highlight_signal))
    }

    /// Press up
    pub fn up_sequence(&self) -> ActionSequence {
        ActionSequence::single(self.step(UP, &self.highlight_signal))
    }

    /// Press down
    pub fn down_sequence(&self) -> ActionSequence {
        ActionSequence::single(self.step(DOWN, &self.highlight_signal))
    }

    /// Presses that bring the display from `mode` to the home page
    fn home_from(&self, mode: DisplayMode) -> ActionSequence {
        match mode {
            DisplayMode::Menu => self.back_sequence(),
            DisplayMode::OneTouch => self.main_sequence(),
            _ => ActionSequence::default(),
        }
    }

    /// Switch the spa through the OneTouch page
    pub fn spa_sequence(&self, on: bool) -> ActionSequence {
        let done = if on { &self.spa_on_signal } else { &self.spa_off_signal };
        self.home_from(self.display_mode()).then(ActionSequence::new(vec![
            self.step(DOWN, &self.highlight_signal),
            self.step(SELECT, &self.highlight_signal),
            self.step(ONE, done),
            self.step(SELECT, &self.highlight_signal),
        ]))
    }
}

impl Panel for OneTouchPanel {
    fn core(&self) -> &PanelCore {
        &self.core
    }

    fn parse_message(&self, command: u8, args: &[u8]) {
        self.table.dispatch(self, command, args);
    }

    fn signals(&self) -> Vec<Arc<Signal>> {
        vec![
            self.core.status_signal().clone(),
            self.display_signal.clone(),
            self.highlight_signal.clone(),
            self.spa_on_signal.clone(),
            self.spa_off_signal.clone(),
        ]
    }

    fn binding_for(&self, kind: EquipmentKind, target: EquipmentState) -> Option<ActionSequence> {
        match kind {
            EquipmentKind::Spa => Some(self.spa_sequence(target.is_on())),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn screen(lines: &[(usize, &str)]) -> Vec<String> {
        let mut display = vec![String::new(); DISPLAY_LINES];
        for &(n, text) in lines {
            display[n] = text.to_string();
        }
        display
    }

    fn long_message(line: u8, text: &str) -> Vec<u8> {
        let mut args = vec![line];
        let mut bytes: Vec<u8> = text
            .chars()
            .map(|c| if c == '°' { ONE_TOUCH_DEGREE } else { c as u8 })
            .collect();
        bytes.resize(16, b' ');
        args.extend(bytes);
        args
    }

    #[test]
    fn test_read_main_page() {
        let lines = screen(&[
            (0, "BACKYARD"),
            (2, "05/12/14 MON"),
            (3, "10:32 AM"),
            (5, "POOL 81°"),
            (6, "AIR 72°"),
            (11, "MENU / HELP"),
        ]);
        assert_eq!(
            read_display(&lines),
            DisplayReading::Main(MainScreen {
                title: "BACKYARD".into(),
                date: "05/12/14 MON".into(),
                time: "10:32 AM".into(),
                equipment: None,
                water: Some((TempSensor::Pool, 81)),
                air: Some(72),
            })
        );
    }

    #[test]
    fn test_page_priority() {
        // equipment page wins even when line 11 matches another page
        let lines = screen(&[(0, "EQUIPMENT ON"), (3, "CLEANER"), (4, "SPA LIGHT"), (11, "MENU / HELP")]);
        assert_eq!(
            read_display(&lines),
            DisplayReading::Equipment(EquipmentFlags {
                cleaner: true,
                spa_light: true,
                ..Default::default()
            })
        );
        assert_eq!(
            read_display(&screen(&[(2, "SPA MODE     ON"), (11, "SYSTEM ON")])),
            DisplayReading::OneTouch { spa_on: true }
        );
        assert_eq!(
            read_display(&screen(&[(5, "MODEL 8157")])),
            DisplayReading::Init {
                model: Some("8157".into())
            }
        );
        assert_eq!(read_display(&screen(&[(0, "SETUP")])), DisplayReading::Menu);
    }

    #[test]
    fn test_display_commands() {
        let panel = OneTouchPanel::new(0x40, Arc::new(Pool::new(None, 1)));
        panel.parse_message(0x04, &long_message(5, "POOL 81°"));
        assert_eq!(panel.lines()[5], "POOL 81°");
        assert!(panel.display_signal().is_set());

        panel.parse_message(0x08, &[3, 0, 0]);
        assert_eq!(panel.highlight().line, Some(3));
        assert!(panel.highlight_signal().is_set());

        panel.parse_message(0x10, &[4, 2, 9, 1]);
        assert_eq!(
            panel.highlight(),
            Highlight {
                line: Some(4),
                start: 2,
                end: Some(9),
            }
        );

        panel.parse_message(0x09, &[0, 0]);
        assert!(panel.lines().iter().all(String::is_empty));
        assert_eq!(panel.highlight().line, None);

        // out of range line is ignored
        panel.parse_message(0x04, &long_message(12, "X"));
        assert!(panel.lines().iter().all(String::is_empty));
    }

    #[test]
    fn test_evaluate_updates_pool() {
        let pool = Arc::new(Pool::new(None, 1));
        let panel = OneTouchPanel::new(0x40, pool.clone());
        for (n, text) in [(0, "BACKYARD"), (5, "SPA ON"), (6, "AIR 68°"), (11, "MENU / HELP")] {
            panel.parse_message(0x04, &long_message(n, text));
        }
        assert_eq!(panel.evaluate_display(), (DisplayMode::Unknown, DisplayMode::Main));

        assert_eq!(pool.identity().title, "BACKYARD");
        assert_eq!(pool.environment().air_temp, 68);
        assert_eq!(pool.equipment(EquipmentKind::Spa).state(), EquipmentState::On);
        assert_eq!(pool.equipment(EquipmentKind::Aux5).state(), EquipmentState::On);
        assert_eq!(pool.equipment(EquipmentKind::Aux1).state(), EquipmentState::Off);
    }

    #[test]
    fn test_spa_sequence_depends_on_page() {
        let panel = OneTouchPanel::new(0x40, Arc::new(Pool::new(None, 1)));
        let names = |seq: ActionSequence| seq.buttons().iter().map(|b| b.name).collect::<Vec<_>>();

        assert_eq!(names(panel.spa_sequence(true)), vec!["down", "select", "one", "select"]);

        panel.parse_message(0x04, &long_message(11, "SYSTEM ON"));
        panel.evaluate_display();
        assert_eq!(
            names(panel.spa_sequence(false)),
            vec!["select", "down", "select", "one", "select"]
        );
        let sequence = panel.spa_sequence(false);
        let step = &sequence.steps()[3];
        assert_eq!(step.signal().name(), "spa off");

        assert!(panel.binding_for(EquipmentKind::Pump, EquipmentState::On).is_none());
    }
}
