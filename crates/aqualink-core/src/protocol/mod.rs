//! Serial Protocol Communication
//!
//! Implements the Aqualink RS-485 panel bus protocol.
//!
//! Every frame on the bus is `DLE STX <addr> <cmd> <args...> <checksum> DLE ETX`
//! with any literal DLE inside the frame followed by a stuffed NUL.

mod codec;
pub mod commands;
mod error;
mod frame;
mod link;
pub mod serial;

pub use codec::FrameCodec;
pub use commands::Command;
pub use error::ProtocolError;
pub use frame::{checksum, decode_all, encode, Frame, FrameDecoder};
pub(crate) use frame::to_hex;
pub use link::{LinkConfig, LinkReader};
pub use serial::{list_ports, open_port, PortInfo};

/// Data link escape
pub const DLE: u8 = 0x10;
/// Start of text
pub const STX: u8 = 0x02;
/// End of text
pub const ETX: u8 = 0x03;
/// Stuffing byte inserted after a literal DLE
pub const NUL: u8 = 0x00;

/// Bus address of the controller (master)
pub const MASTER_ADDRESS: u8 = 0x00;

/// Physical bit rate of the panel bus
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Maximum unescaped frame body (addr + cmd + args + checksum)
pub const MAX_FRAME_LEN: usize = 64;
