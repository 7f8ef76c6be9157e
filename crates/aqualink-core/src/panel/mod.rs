//! Panel emulation
//!
//! Each emulated panel owns one bus address. The link reader acknowledges
//! every frame sent to that address (carrying the pending button press, if
//! any) and then hands the frame to the panel's command interpreter.
//!
//! Dialects:
//! - [`OneTouchPanel`]: 12 line text display, menu driven
//! - [`AllButtonPanel`]: status LEDs plus a one line text display
//! - [`SpaLinkPanel`]: LED array only
//! - [`MasterPanel`]: passive observer of frames addressed to the controller

mod all_button;
mod dispatch;
mod master;
mod one_touch;
mod signal;
mod spa_link;
pub mod text;

pub use all_button::{parse_system_text, AllButtonPanel, StatusBinding, SystemText};
pub use dispatch::{handle_ack, handle_message, handle_probe, handle_status, DispatchTable, Handler};
pub use master::MasterPanel;
pub use one_touch::{
    read_display, DisplayMode, DisplayReading, EquipmentFlags, Highlight, MainScreen,
    OneTouchPanel, DISPLAY_LINES,
};
pub use signal::Signal;
pub use spa_link::SpaLinkPanel;

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::action::ActionSequence;
use crate::pool::{ClockDelta, EquipmentKind, EquipmentState};
use crate::protocol::{Command, Frame};
use crate::sync::lock;

/// A key on a physical panel and the code the controller expects for it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Button {
    /// Name used in logs
    pub name: &'static str,
    /// Code sent in the acknowledgment
    pub code: u8,
}

impl Button {
    /// Define a button
    pub const fn new(name: &'static str, code: u8) -> Self {
        Self { name, code }
    }
}

impl fmt::Display for Button {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:#04x})", self.name, self.code)
    }
}

/// State shared by every panel dialect
#[derive(Debug)]
pub struct PanelCore {
    name: String,
    address: u8,
    ack_prefix: u8,
    pending_button: AtomicU8,
    released: AtomicBool,
    last_ack: Mutex<Option<Vec<u8>>>,
    last_status: Mutex<Option<Vec<u8>>>,
    last_message: Mutex<Option<Vec<u8>>>,
    status_signal: Arc<Signal>,
}

impl PanelCore {
    /// Create the shared state for a panel at `address`
    pub fn new(name: impl Into<String>, address: u8, ack_prefix: u8) -> Self {
        Self {
            name: name.into(),
            address,
            ack_prefix,
            pending_button: AtomicU8::new(0),
            released: AtomicBool::new(false),
            last_ack: Mutex::new(None),
            last_status: Mutex::new(None),
            last_message: Mutex::new(None),
            status_signal: Arc::new(Signal::new("status")),
        }
    }

    /// Panel name used in logs
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bus address the panel answers to
    pub fn address(&self) -> u8 {
        self.address
    }

    /// First argument byte of every acknowledgment
    pub fn ack_prefix(&self) -> u8 {
        self.ack_prefix
    }

    /// Queue a button press for the next acknowledgment
    pub fn set_pending_button(&self, button: Button) {
        debug!(panel = %self.name, button = %button, "Button pending");
        self.pending_button.store(button.code, Ordering::Release);
    }

    /// Drop any queued button press
    pub fn clear_pending_button(&self) {
        self.pending_button.store(0, Ordering::Release);
    }

    /// Currently queued button code, 0 when none
    pub fn pending_button(&self) -> u8 {
        self.pending_button.load(Ordering::Acquire)
    }

    /// Take the queued button code; a press is sent exactly once
    pub fn take_pending_button(&self) -> u8 {
        self.pending_button.swap(0, Ordering::AcqRel)
    }

    /// Build the acknowledgment for a frame addressed to this panel
    ///
    /// Consumes the pending button.
    pub fn ack_frame(&self, master_address: u8) -> Frame {
        let button = self.take_pending_button();
        if button != 0 {
            debug!(panel = %self.name, button = format!("{:#04x}", button), "Sending button press");
        }
        Frame::new(master_address, Command::Ack.code(), vec![self.ack_prefix, button])
    }

    /// Whether the link serving this panel has gone away
    ///
    /// Signals set by [`Panel::release`] do not confirm anything while this
    /// is true.
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Mark the panel as served by a live link again
    pub fn attach(&self) {
        self.released.store(false, Ordering::SeqCst);
    }

    pub(crate) fn mark_released(&self) {
        self.released.store(true, Ordering::SeqCst);
    }

    /// Signal fired whenever the status bytes change
    pub fn status_signal(&self) -> &Arc<Signal> {
        &self.status_signal
    }

    /// Last status bytes received
    pub fn last_status(&self) -> Option<Vec<u8>> {
        lock(&self.last_status).clone()
    }

    /// Last message bytes received
    pub fn last_message(&self) -> Option<Vec<u8>> {
        lock(&self.last_message).clone()
    }

    pub(crate) fn record_ack(&self, args: &[u8]) -> bool {
        Self::record(&self.last_ack, args)
    }

    pub(crate) fn record_status(&self, args: &[u8]) -> bool {
        Self::record(&self.last_status, args)
    }

    pub(crate) fn record_message(&self, args: &[u8]) -> bool {
        Self::record(&self.last_message, args)
    }

    fn record(slot: &Mutex<Option<Vec<u8>>>, args: &[u8]) -> bool {
        let mut last = lock(slot);
        if last.as_deref() == Some(args) {
            return false;
        }
        *last = Some(args.to_vec());
        true
    }
}

/// A panel dialect that can be attached to the link
///
/// The link reader calls [`Panel::parse_message`] for every frame addressed
/// to the panel, after the acknowledgment has been written.
pub trait Panel: Send + Sync + 'static {
    /// State shared by all dialects
    fn core(&self) -> &PanelCore;

    /// Interpret a frame addressed to this panel
    fn parse_message(&self, command: u8, args: &[u8]);

    /// Every signal an action step on this panel may wait for
    fn signals(&self) -> Vec<Arc<Signal>>;

    /// Button sequence that moves `kind` towards `target`
    fn binding_for(&self, _kind: EquipmentKind, _target: EquipmentState) -> Option<ActionSequence> {
        None
    }

    /// Button sequence that applies a clock correction
    fn clock_sequence(&self, _delta: &ClockDelta) -> Option<ActionSequence> {
        None
    }

    /// Wake everything waiting on this panel when its link goes away
    ///
    /// Waiting action steps fail instead of completing.
    fn release(&self) {
        self.core().mark_released();
        for signal in self.signals() {
            signal.set();
        }
    }
}
