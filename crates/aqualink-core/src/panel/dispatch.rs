//! Command dispatch
//!
//! Every dialect starts from the base table and overrides or adds handlers
//! for the commands it understands.

use std::collections::HashMap;

use tracing::{debug, trace, warn};

use super::Panel;
use crate::protocol::to_hex;
use crate::protocol::Command;

/// Handler invoked with the frame's argument bytes
pub type Handler<P> = fn(&P, &[u8]);

/// Command table for one panel dialect
pub struct DispatchTable<P> {
    handlers: HashMap<Command, Handler<P>>,
}

impl<P: Panel> DispatchTable<P> {
    /// Table handling probe, ack, status and message with the base behavior
    pub fn base() -> Self {
        Self {
            handlers: HashMap::new(),
        }
        .with(Command::Probe, handle_probe::<P>)
        .with(Command::Ack, handle_ack::<P>)
        .with(Command::Status, handle_status::<P>)
        .with(Command::Message, handle_message::<P>)
    }

    /// Add or replace the handler for `command`
    pub fn with(mut self, command: Command, handler: Handler<P>) -> Self {
        self.handlers.insert(command, handler);
        self
    }

    /// Whether `command` has a handler
    pub fn handles(&self, command: Command) -> bool {
        self.handlers.contains_key(&command)
    }

    /// Route a frame to its handler
    ///
    /// Unknown commands and frames with the wrong number of argument bytes
    /// are logged and ignored.
    pub fn dispatch(&self, panel: &P, code: u8, args: &[u8]) {
        let name = panel.core().name();
        let Some(command) = Command::from_code(code) else {
            debug!(panel = name, command = format!("{:#04x}", code), args = %to_hex(args), "Unknown command");
            return;
        };
        let Some(handler) = self.handlers.get(&command) else {
            debug!(panel = name, command = command.name(), args = %to_hex(args), "Unhandled command");
            return;
        };
        if args.len() != command.arg_len() {
            warn!(
                panel = name,
                command = command.name(),
                expected = command.arg_len(),
                actual = args.len(),
                "Wrong argument length, frame ignored"
            );
            return;
        }
        handler(panel, args);
    }
}

/// Probe: nothing beyond the acknowledgment
pub fn handle_probe<P: Panel>(panel: &P, _args: &[u8]) {
    trace!(panel = panel.core().name(), "probe");
}

/// Ack: remember it, log when it changes
pub fn handle_ack<P: Panel>(panel: &P, args: &[u8]) {
    let core = panel.core();
    if core.record_ack(args) {
        debug!(panel = core.name(), args = %to_hex(args), "ack");
    }
}

/// Status: remember it and fire the status signal when it changes
pub fn handle_status<P: Panel>(panel: &P, args: &[u8]) {
    let core = panel.core();
    if core.record_status(args) {
        debug!(panel = core.name(), args = %to_hex(args), "status");
        core.status_signal().set();
    }
}

/// Message: remember it, log when it changes
pub fn handle_message<P: Panel>(panel: &P, args: &[u8]) {
    let core = panel.core();
    if core.record_message(args) {
        debug!(panel = core.name(), args = %to_hex(args), "msg");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::panel::{PanelCore, Signal};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Probe {
        core: PanelCore,
        polls: AtomicUsize,
    }

    impl Panel for Probe {
        fn core(&self) -> &PanelCore {
            &self.core
        }

        fn parse_message(&self, command: u8, args: &[u8]) {
            table().dispatch(self, command, args);
        }

        fn signals(&self) -> Vec<Arc<Signal>> {
            vec![self.core.status_signal().clone()]
        }
    }

    fn count_poll(panel: &Probe, _args: &[u8]) {
        panel.polls.fetch_add(1, Ordering::SeqCst);
    }

    fn table() -> DispatchTable<Probe> {
        DispatchTable::base().with(Command::Poll, count_poll)
    }

    fn probe() -> Probe {
        Probe {
            core: PanelCore::new("probe", 0x09, 0x00),
            polls: AtomicUsize::new(0),
        }
    }

    #[test]
    fn test_status_signal_fires_only_on_change() {
        let panel = probe();
        panel.parse_message(0x02, &[0, 0, 0, 0, 1]);
        assert!(panel.core.status_signal().is_set());

        panel.core.status_signal().clear();
        panel.parse_message(0x02, &[0, 0, 0, 0, 1]);
        assert!(!panel.core.status_signal().is_set());

        panel.parse_message(0x02, &[0, 0, 0, 0, 2]);
        assert!(panel.core.status_signal().is_set());
        assert_eq!(panel.core.last_status(), Some(vec![0, 0, 0, 0, 2]));
    }

    #[test]
    fn test_wrong_length_is_ignored() {
        let panel = probe();
        panel.parse_message(0x02, &[0, 0, 1]);
        assert!(!panel.core.status_signal().is_set());
        assert_eq!(panel.core.last_status(), None);
    }

    #[test]
    fn test_added_and_unknown_commands() {
        let panel = probe();
        panel.parse_message(0x05, &[]);
        panel.parse_message(0x05, &[]);
        panel.parse_message(0x7f, &[1, 2]);
        assert_eq!(panel.polls.load(Ordering::SeqCst), 2);
        assert!(table().handles(Command::Poll));
        assert!(!table().handles(Command::LongMessage));
    }
}
