//! All Button panel
//!
//! A 16 character, one line display, 12 buttons and 12 LEDs. Addresses
//! 0x08-0x0b, selected by jumpers.
//!
//! The controller reports the LEDs as a 5 byte status word; each piece of
//! equipment occupies a bit field of it. Text arrives on line 0 and carries
//! the model, title, date, time and temperatures in turn.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use byteorder::{BigEndian, ByteOrder};
use tracing::debug;

use super::dispatch::handle_status;
use super::text::{decode_text, parse_temperature, TempSensor, ALL_BUTTON_DEGREE};
use super::{Button, DispatchTable, Panel, PanelCore, Signal};
use crate::action::{ActionSequence, ActionStep};
use crate::pool::{ClockDelta, EquipmentKind, EquipmentState, OpMode, Pool};
use crate::protocol::Command;
use crate::sync::lock;

const ACK_PREFIX: u8 = 0x00;

const PUMP: Button = Button::new("pump", 0x02);
const SPA: Button = Button::new("spa", 0x01);
const AUX1: Button = Button::new("aux1", 0x05);
const AUX2: Button = Button::new("aux2", 0x0a);
const AUX3: Button = Button::new("aux3", 0x0f);
const AUX4: Button = Button::new("aux4", 0x06);
const AUX5: Button = Button::new("aux5", 0x0b);
const AUX6: Button = Button::new("aux6", 0x10);
const AUX7: Button = Button::new("aux7", 0x15);
const POOL_HEAT: Button = Button::new("poolhtr", 0x12);
const SPA_HEAT: Button = Button::new("spahtr", 0x17);
const SOLAR_HEAT: Button = Button::new("solarhtr", 0x1c);
const MENU: Button = Button::new("menu", 0x09);
const CANCEL: Button = Button::new("cancel", 0x0e);
const LEFT: Button = Button::new("left", 0x13);
const RIGHT: Button = Button::new("right", 0x18);
const ENTER: Button = Button::new("enter", 0x1d);
const HOLD: Button = Button::new("hold", 0x19);
const OVERRIDE: Button = Button::new("override", 0x1e);

/// Status bit fields, in the order the controller packs them
const STATUS_LAYOUT: [(EquipmentKind, Button, u64); 12] = [
    (EquipmentKind::Aux2, AUX2, 0xc0_0000_0000),
    (EquipmentKind::Aux3, AUX3, 0x30_0000_0000),
    (EquipmentKind::Aux7, AUX7, 0x03_0000_0000),
    (EquipmentKind::Aux5, AUX5, 0x00_c000_0000),
    (EquipmentKind::Pump, PUMP, 0x00_3000_0000),
    (EquipmentKind::Spa, SPA, 0x00_0c00_0000),
    (EquipmentKind::Aux1, AUX1, 0x00_0300_0000),
    (EquipmentKind::Aux6, AUX6, 0x00_00c0_0000),
    (EquipmentKind::Aux4, AUX4, 0x00_0003_0000),
    (EquipmentKind::Heater, SPA_HEAT, 0x00_0000_000f),
    (EquipmentKind::Heater, POOL_HEAT, 0x00_0000_f000),
    (EquipmentKind::Heater, SOLAR_HEAT, 0x00_0000_00f0),
];

/// Clock menu position: three steps right of the first menu entry
const CLOCK_MENU_OFFSET: i32 = 3;

/// Association of a status bit field with equipment and its button
#[derive(Debug)]
pub struct StatusBinding {
    kind: EquipmentKind,
    button: Button,
    mask: u64,
    shift: u32,
    signal: Arc<Signal>,
}

impl StatusBinding {
    /// Bind the bits of `mask` to `kind`, toggled by `button`
    pub fn new(kind: EquipmentKind, button: Button, mask: u64) -> Self {
        Self {
            kind,
            button,
            mask,
            shift: mask.trailing_zeros(),
            signal: Arc::new(Signal::new(button.name)),
        }
    }

    /// Equipment the field reports
    pub fn kind(&self) -> EquipmentKind {
        self.kind
    }

    /// Button that toggles the equipment
    pub fn button(&self) -> Button {
        self.button
    }

    /// Status mask
    pub fn mask(&self) -> u64 {
        self.mask
    }

    /// Signal fired when the field changes
    pub fn signal(&self) -> &Arc<Signal> {
        &self.signal
    }

    /// Value of the field in `status`
    pub fn field(&self, status: u64) -> u8 {
        ((status & self.mask) >> self.shift) as u8
    }

    fn action(&self) -> ActionSequence {
        ActionSequence::single(ActionStep::new(self.button, self.signal.clone()).settled())
    }
}

/// What a line 0 message says
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SystemText {
    /// `POOL TEMP 81°F`
    Temperature {
        /// Sensor
        sensor: TempSensor,
        /// Value
        value: i32,
        /// Scale, if shown
        scale: Option<String>,
    },
    /// `05/12/14 MON`
    Date(String),
    /// `10:32 AM`
    Time(String),
    /// `B0029221 REV MMM`
    Model {
        /// Model
        model: String,
        /// Revision
        rev: String,
    },
    /// `SERVICE`
    OpMode(OpMode),
    /// Anything else, such as the title or an equipment name
    Text(String),
    /// Blank, or a temperature line that could not be read
    Unrecognized,
}

/// Classify a line 0 message
pub fn parse_system_text(text: &str) -> SystemText {
    let parts: Vec<&str> = text.split_whitespace().collect();
    match parts.as_slice() {
        [] => SystemText::Unrecognized,
        [single] => match OpMode::from_label(single) {
            Some(mode) => SystemText::OpMode(mode),
            None => SystemText::Text(text.to_string()),
        },
        [label, "TEMP", rest @ ..] => {
            let reading = TempSensor::from_label(label)
                .zip(rest.first().and_then(|t| parse_temperature(t)));
            match reading {
                Some((sensor, (value, scale))) => SystemText::Temperature { sensor, value, scale },
                None => SystemText::Unrecognized,
            }
        }
        [first, ..] if first.contains('/') => SystemText::Date(text.to_string()),
        [first, ..] if first.contains(':') => SystemText::Time(text.to_string()),
        [model, "REV", rev, ..] => SystemText::Model {
            model: model.to_string(),
            rev: rev.to_string(),
        },
        _ => SystemText::Text(text.to_string()),
    }
}

/// All Button panel emulation
pub struct AllButtonPanel {
    core: PanelCore,
    pool: Arc<Pool>,
    table: DispatchTable<AllButtonPanel>,
    bindings: Vec<StatusBinding>,
    last_status: Mutex<u64>,
    message_signal: Arc<Signal>,
    first_message: AtomicBool,
}

impl AllButtonPanel {
    /// Create the panel at `address`, reporting into `pool`
    pub fn new(address: u8, pool: Arc<Pool>) -> Self {
        let table = DispatchTable::base()
            .with(Command::Status, Self::handle_status)
            .with(Command::Message, Self::handle_message)
            .with(Command::LongMessage, Self::handle_message);
        Self {
            core: PanelCore::new("All Button", address, ACK_PREFIX),
            pool,
            table,
            bindings: STATUS_LAYOUT
                .iter()
                .map(|&(kind, button, mask)| StatusBinding::new(kind, button, mask))
                .collect(),
            last_status: Mutex::new(0),
            message_signal: Arc::new(Signal::new("message")),
            first_message: AtomicBool::new(true),
        }
    }

    /// Status bit field bindings
    pub fn bindings(&self) -> &[StatusBinding] {
        &self.bindings
    }

    /// First binding for `kind`
    pub fn binding(&self, kind: EquipmentKind) -> Option<&StatusBinding> {
        self.bindings.iter().find(|b| b.kind == kind)
    }

    /// Signal fired by every line 0 message
    pub fn message_signal(&self) -> &Arc<Signal> {
        &self.message_signal
    }

    fn menu_step(&self, button: Button) -> ActionStep {
        ActionStep::new(button, self.message_signal.clone()).settled()
    }

    /// Press menu
    pub fn menu_sequence(&self) -> ActionSequence {
        ActionSequence::single(self.menu_step(MENU))
    }

    /// Press left
    pub fn left_sequence(&self) -> ActionSequence {
        ActionSequence::single(self.menu_step(LEFT))
    }

    /// Press right
    pub fn right_sequence(&self) -> ActionSequence {
        ActionSequence::single(self.menu_step(RIGHT))
    }

    /// Press cancel
    pub fn cancel_sequence(&self) -> ActionSequence {
        ActionSequence::single(self.menu_step(CANCEL))
    }

    /// Press enter
    pub fn enter_sequence(&self) -> ActionSequence {
        ActionSequence::single(self.menu_step(ENTER))
    }

    /// Press hold
    pub fn hold_sequence(&self) -> ActionSequence {
        ActionSequence::single(self.menu_step(HOLD))
    }

    /// Press override
    pub fn override_sequence(&self) -> ActionSequence {
        ActionSequence::single(self.menu_step(OVERRIDE))
    }

    /// `count` presses of right, or of left when negative
    fn repeat(&self, count: i32) -> impl Iterator<Item = ActionStep> + '_ {
        let button = if count > 0 { RIGHT } else { LEFT };
        (0..count.unsigned_abs()).map(move |_| self.menu_step(button))
    }

    fn handle_status(&self, args: &[u8]) {
        handle_status(self, args);

        let status = BigEndian::read_uint(args, args.len());
        let mut last = lock(&self.last_status);
        if status == *last {
            return;
        }
        debug!(panel = self.core.name(), status = format!("{:010x}", status), "status");
        for binding in &self.bindings {
            let old = binding.field(*last);
            let new = binding.field(status);
            if old != new {
                debug!(
                    panel = self.core.name(),
                    button = binding.button.name,
                    old = format!("{:x}", old),
                    new = format!("{:x}", new),
                    "Status field changed"
                );
                self.pool
                    .equipment(binding.kind)
                    .set_state(EquipmentState::from_raw(new));
                binding.signal.set();
            }
        }
        *last = status;
    }

    fn handle_message(&self, args: &[u8]) {
        let line = args[0];
        let text = decode_text(&args[1..], ALL_BUTTON_DEGREE);
        debug!(panel = self.core.name(), line, text = %text, "msg");
        if line != 0 {
            return;
        }
        self.message_signal.set();
        self.apply_system_text(&text);
    }

    fn apply_system_text(&self, text: &str) {
        let parsed = parse_system_text(text);
        let multi_word = text.split_whitespace().nth(1).is_some();
        // the first multi-word line after startup identifies the controller
        if multi_word && self.first_message.swap(false, Ordering::AcqRel) {
            match &parsed {
                SystemText::Model { model, rev } => return self.pool.set_model(model, rev),
                SystemText::Text(_) => {
                    let parts: Vec<&str> = text.split_whitespace().collect();
                    let rev = parts.get(2).copied().unwrap_or_default();
                    return self.pool.set_model(parts[0], rev);
                }
                _ => {}
            }
        }

        match parsed {
            SystemText::Temperature { sensor, value, scale } => {
                self.pool.set_temperature(sensor, value, scale.as_deref());
            }
            SystemText::Date(date) => self.pool.set_date(&date),
            SystemText::Time(time) => self.pool.set_time(&time),
            SystemText::Model { model, rev } => self.pool.set_model(&model, &rev),
            SystemText::OpMode(mode) => self.pool.set_op_mode(mode),
            SystemText::Text(text) => {
                let last = text.split_whitespace().last().unwrap_or_default();
                if last != "ON" && last != "OFF" && self.pool.identity().title.is_empty() {
                    self.pool.set_title(&text);
                }
            }
            SystemText::Unrecognized => {}
        }
    }
}

impl Panel for AllButtonPanel {
    fn core(&self) -> &PanelCore {
        &self.core
    }

    fn parse_message(&self, command: u8, args: &[u8]) {
        self.table.dispatch(self, command, args);
    }

    fn signals(&self) -> Vec<Arc<Signal>> {
        let mut signals = vec![self.core.status_signal().clone(), self.message_signal.clone()];
        signals.extend(self.bindings.iter().map(|b| b.signal.clone()));
        signals
    }

    fn binding_for(&self, kind: EquipmentKind, _target: EquipmentState) -> Option<ActionSequence> {
        // every button toggles
        self.binding(kind).map(StatusBinding::action)
    }

    fn clock_sequence(&self, delta: &ClockDelta) -> Option<ActionSequence> {
        let mut steps = vec![self.menu_step(MENU)];
        steps.extend(self.repeat(CLOCK_MENU_OFFSET));
        steps.push(self.menu_step(ENTER));
        steps.push(self.menu_step(ENTER));
        for field in delta.fields() {
            steps.extend(self.repeat(field));
            steps.push(self.menu_step(ENTER));
        }
        Some(ActionSequence::new(steps))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn panel() -> (AllButtonPanel, Arc<Pool>) {
        let pool = Arc::new(Pool::new(None, 1));
        (AllButtonPanel::new(0x09, pool.clone()), pool)
    }

    fn message(text: &str) -> Vec<u8> {
        let mut args = vec![0u8];
        let mut bytes: Vec<u8> = text
            .chars()
            .map(|c| if c == '°' { ALL_BUTTON_DEGREE } else { c as u8 })
            .collect();
        bytes.resize(16, b' ');
        args.extend(bytes);
        args
    }

    #[test]
    fn test_parse_system_text() {
        assert_eq!(
            parse_system_text("POOL TEMP 81°F"),
            SystemText::Temperature {
                sensor: TempSensor::Pool,
                value: 81,
                scale: Some("F".to_string()),
            }
        );
        assert_eq!(parse_system_text("05/12/14 MON"), SystemText::Date("05/12/14 MON".into()));
        assert_eq!(parse_system_text("10:32 AM"), SystemText::Time("10:32 AM".into()));
        assert_eq!(
            parse_system_text("B0029221 REV MMM"),
            SystemText::Model {
                model: "B0029221".into(),
                rev: "MMM".into(),
            }
        );
        assert_eq!(parse_system_text("SERVICE"), SystemText::OpMode(OpMode::Service));
        assert_eq!(parse_system_text("FILTER PUMP ON"), SystemText::Text("FILTER PUMP ON".into()));
        assert_eq!(parse_system_text("SPA TEMP --"), SystemText::Unrecognized);
        assert_eq!(parse_system_text(""), SystemText::Unrecognized);
    }

    #[test]
    fn test_field_shift() {
        let binding = StatusBinding::new(EquipmentKind::Pump, PUMP, 0x00_3000_0000);
        assert_eq!(binding.field(0x00_1000_0000), 1);
        assert_eq!(binding.field(0xff_cfff_ffff), 0);
        let solar = StatusBinding::new(EquipmentKind::Heater, SOLAR_HEAT, 0xf0);
        assert_eq!(solar.field(0x40), 4);
    }

    #[test]
    fn test_status_updates_changed_equipment_only() {
        let (panel, pool) = panel();
        panel.parse_message(0x02, &[0x00, 0x10, 0x00, 0x00, 0x00]);
        assert_eq!(pool.equipment(EquipmentKind::Pump).state(), EquipmentState::On);
        assert!(panel.binding(EquipmentKind::Pump).unwrap().signal().is_set());
        assert!(!panel.binding(EquipmentKind::Spa).unwrap().signal().is_set());

        panel.parse_message(0x02, &[0x00, 0x10, 0x00, 0x00, 0x02]);
        assert_eq!(pool.equipment(EquipmentKind::Heater).state(), EquipmentState::Enabled);
        assert_eq!(pool.equipment(EquipmentKind::Pump).state(), EquipmentState::On);
    }

    #[test]
    fn test_text_sequence_fills_pool() {
        let (panel, pool) = panel();
        for line in ["B0029221 REV MMM", "BACKYARD", "05/12/14 MON", "10:32 AM", "AIR TEMP 72°F"] {
            panel.parse_message(0x03, &message(line));
        }
        let identity = pool.identity();
        assert_eq!(identity.model, "B0029221");
        assert_eq!(identity.rev, "MMM");
        assert_eq!(identity.title, "BACKYARD");
        assert_eq!(identity.date, "05/12/14 MON");
        assert_eq!(identity.time, "10:32 AM");
        assert_eq!(pool.environment().air_temp, 72);
        assert_eq!(pool.environment().temp_scale, "F");
        assert!(panel.message_signal().is_set());
    }

    #[test]
    fn test_title_not_taken_from_equipment_line() {
        let (panel, pool) = panel();
        panel.parse_message(0x03, &message("B0029221 REV MMM"));
        panel.parse_message(0x03, &message("FILTER PUMP ON"));
        assert_eq!(pool.identity().title, "");
        panel.parse_message(0x04, &message("MY POOL"));
        assert_eq!(pool.identity().title, "MY POOL");
        panel.parse_message(0x03, &message("OTHER TITLE"));
        assert_eq!(pool.identity().title, "MY POOL");
    }

    #[test]
    fn test_other_lines_do_not_signal() {
        let (panel, pool) = panel();
        let mut args = message("B0029221 REV MMM");
        args[0] = 1;
        panel.parse_message(0x03, &args);
        assert!(!panel.message_signal().is_set());
        assert_eq!(pool.identity().model, "");
    }

    #[test]
    fn test_bindings() {
        let (panel, _) = panel();
        let heater = panel.binding_for(EquipmentKind::Heater, EquipmentState::On).unwrap();
        assert_eq!(heater.buttons(), vec![SPA_HEAT]);
        assert!(heater.steps()[0].settles());
        let cleaner = panel.binding_for(EquipmentKind::Aux1, EquipmentState::Off).unwrap();
        assert_eq!(cleaner.buttons(), vec![AUX1]);
    }

    #[test]
    fn test_menu_sequences() {
        let (panel, _) = panel();
        for (sequence, code) in [
            (panel.menu_sequence(), 0x09),
            (panel.cancel_sequence(), 0x0e),
            (panel.left_sequence(), 0x13),
            (panel.right_sequence(), 0x18),
            (panel.hold_sequence(), 0x19),
            (panel.override_sequence(), 0x1e),
            (panel.enter_sequence(), 0x1d),
        ] {
            assert_eq!(sequence.len(), 1);
            let step = &sequence.steps()[0];
            assert_eq!(step.button().code, code);
            assert_eq!(step.signal().name(), "message");
        }
    }

    #[test]
    fn test_clock_sequence() {
        let (panel, _) = panel();
        let delta = ClockDelta {
            hours: 1,
            minutes: -2,
            ..Default::default()
        };
        let names: Vec<&str> = panel
            .clock_sequence(&delta)
            .unwrap()
            .buttons()
            .iter()
            .map(|b| b.name)
            .collect();
        assert_eq!(
            names,
            vec![
                "menu", "right", "right", "right", "enter", "enter", "enter", "enter", "enter",
                "right", "enter", "left", "left", "enter",
            ]
        );
    }
}
