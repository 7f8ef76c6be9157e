//! Protocol errors

use thiserror::Error;

/// Errors that can occur on the panel bus
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The serial device could not be opened or configured
    #[error("Serial port error: {0}")]
    SerialError(String),

    /// The serial device does not exist
    #[error("Port not found: {0}")]
    PortNotFound(String),

    /// The byte stream ended
    #[error("Link closed")]
    LinkClosed,

    /// Low level I/O failure on the link
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}
