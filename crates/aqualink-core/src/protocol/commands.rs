//! Protocol commands
//!
//! Defines the commands the controller sends to its panels.

use serde::{Deserialize, Serialize};

/// Commands addressed to a panel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Command {
    /// Liveness probe (0x00)
    Probe,

    /// Acknowledgment carrying the pressed button (0x01)
    Ack,

    /// 5 byte status/LED mask (0x02)
    Status,

    /// Line number + 16 characters of text (0x03)
    Message,

    /// Line number + 16 characters for a multi-line display (0x04)
    LongMessage,

    /// Periodic poll sent to OneTouch panels, purpose unknown (0x05)
    Poll,

    /// Highlight (invert) a display line (0x08)
    HighlightLine,

    /// Clear the display (0x09)
    ClearDisplay,

    /// Highlight a character range of a display line (0x10)
    HighlightField,
}

impl Command {
    /// Every command known to the bus
    pub const ALL: [Command; 9] = [
        Command::Probe,
        Command::Ack,
        Command::Status,
        Command::Message,
        Command::LongMessage,
        Command::Poll,
        Command::HighlightLine,
        Command::ClearDisplay,
        Command::HighlightField,
    ];

    /// Get the command byte
    pub fn code(&self) -> u8 {
        match self {
            Command::Probe => 0x00,
            Command::Ack => 0x01,
            Command::Status => 0x02,
            Command::Message => 0x03,
            Command::LongMessage => 0x04,
            Command::Poll => 0x05,
            Command::HighlightLine => 0x08,
            Command::ClearDisplay => 0x09,
            Command::HighlightField => 0x10,
        }
    }

    /// Look up a command by its byte
    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.code() == code)
    }

    /// Number of argument bytes the command always carries
    pub fn arg_len(&self) -> usize {
        match self {
            Command::Probe | Command::Poll => 0,
            Command::Ack | Command::ClearDisplay => 2,
            Command::HighlightLine => 3,
            Command::HighlightField => 4,
            Command::Status => 5,
            Command::Message | Command::LongMessage => 17,
        }
    }

    /// Short name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            Command::Probe => "probe",
            Command::Ack => "ack",
            Command::Status => "status",
            Command::Message => "msg",
            Command::LongMessage => "longMsg",
            Command::Poll => "poll",
            Command::HighlightLine => "hilite",
            Command::ClearDisplay => "clear",
            Command::HighlightField => "hifield",
        }
    }
}
