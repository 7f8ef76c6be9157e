//! Frame encoding/decoding
//!
//! Frame format on the wire:
//! - 2 bytes: DLE STX
//! - 1 byte: destination address
//! - 1 byte: command
//! - N bytes: command arguments
//! - 1 byte: checksum, sum of DLE STX addr cmd args modulo 256
//! - 2 bytes: DLE ETX
//!
//! Any byte equal to DLE between the leading DLE STX and the trailing DLE ETX
//! (checksum included) is followed by a stuffed NUL on the wire.

use std::fmt;

use tracing::trace;

use super::{Command, DLE, ETX, MAX_FRAME_LEN, NUL, STX};

/// A decoded protocol frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Destination address
    pub address: u8,
    /// Command byte
    pub command: u8,
    /// Unescaped argument bytes
    pub args: Vec<u8>,
}

impl Frame {
    /// Create a new frame
    pub fn new(address: u8, command: u8, args: impl Into<Vec<u8>>) -> Self {
        Self {
            address,
            command,
            args: args.into(),
        }
    }

    /// Known command for this frame, if any
    pub fn known_command(&self) -> Option<Command> {
        Command::from_code(self.command)
    }

    /// Checksum this frame carries on the wire
    pub fn checksum(&self) -> u8 {
        checksum(self.address, self.command, &self.args)
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02x} {:02x} {}",
            self.address,
            self.command,
            to_hex(&self.args)
        )
    }
}

/// Compute the frame checksum over the unescaped DLE STX, address, command and args
pub fn checksum(address: u8, command: u8, args: &[u8]) -> u8 {
    [DLE, STX, address, command]
        .iter()
        .chain(args)
        .fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// Encode a frame to wire bytes, stuffing a NUL after every literal DLE
pub fn encode(frame: &Frame) -> Vec<u8> {
    let mut out = Vec::with_capacity(frame.args.len() + 8);
    out.push(DLE);
    out.push(STX);

    let cs = frame.checksum();
    let body = [frame.address, frame.command]
        .into_iter()
        .chain(frame.args.iter().copied())
        .chain(std::iter::once(cs));
    for b in body {
        out.push(b);
        if b == DLE {
            out.push(NUL);
        }
    }

    out.push(DLE);
    out.push(ETX);
    out
}

/// Decode every valid frame contained in a byte slice
pub fn decode_all(bytes: &[u8]) -> Vec<Frame> {
    let mut decoder = FrameDecoder::new();
    bytes.iter().filter_map(|&b| decoder.push(b)).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Looking for DLE STX
    Hunting { saw_dle: bool },
    /// Inside a frame body
    Body,
}

/// Incremental frame decoder
///
/// Bytes are pushed one at a time. Noise before a DLE STX is skipped, frames
/// with a bad checksum are discarded, and decoding resumes with the next frame.
#[derive(Debug)]
pub struct FrameDecoder {
    state: State,
    body: Vec<u8>,
    /// Previous body byte was a DLE
    after_dle: bool,
    /// Position of the DLE that started the terminating sequence
    terminator: Option<usize>,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    /// Create a decoder that starts by hunting for DLE STX
    pub fn new() -> Self {
        Self {
            state: State::Hunting { saw_dle: false },
            body: Vec::with_capacity(MAX_FRAME_LEN),
            after_dle: false,
            terminator: None,
        }
    }

    /// Drop any partial frame and resynchronize
    pub fn reset(&mut self) {
        self.state = State::Hunting { saw_dle: false };
        self.start_body();
    }

    /// True while a frame body is being accumulated
    pub fn in_frame(&self) -> bool {
        self.state == State::Body
    }

    fn start_body(&mut self) {
        self.body.clear();
        self.after_dle = false;
        self.terminator = None;
    }

    /// Feed one byte, returning a frame when a valid one completes
    pub fn push(&mut self, byte: u8) -> Option<Frame> {
        match self.state {
            State::Hunting { saw_dle } => {
                if saw_dle && byte == STX {
                    self.state = State::Body;
                    self.start_body();
                } else {
                    self.state = State::Hunting {
                        saw_dle: byte == DLE,
                    };
                }
                None
            }
            State::Body => self.push_body(byte),
        }
    }

    fn push_body(&mut self, byte: u8) -> Option<Frame> {
        if self.after_dle {
            self.after_dle = false;
            match byte {
                NUL => {
                    // stuffed NUL, the DLE before it was data
                    if self.terminator == Some(self.body.len() - 1) {
                        self.terminator = None;
                    }
                    return None;
                }
                STX => {
                    // a new frame started before this one terminated
                    trace!(partial = %to_hex(&self.body), "frame restarted");
                    self.start_body();
                    return None;
                }
                _ => {}
            }
        }

        if let Some(end) = self.terminator {
            if byte == ETX {
                let frame = self.finish(end);
                self.state = State::Hunting { saw_dle: false };
                return frame;
            }
        }

        if byte == DLE {
            self.terminator.get_or_insert(self.body.len());
            self.after_dle = true;
        }
        self.body.push(byte);

        if self.body.len() > MAX_FRAME_LEN {
            trace!(len = self.body.len(), "frame too long, resynchronizing");
            self.reset();
        }
        None
    }

    fn finish(&mut self, end: usize) -> Option<Frame> {
        let body = &self.body[..end];
        if body.len() < 3 {
            trace!(body = %to_hex(body), "frame too short");
            return None;
        }

        let (address, command) = (body[0], body[1]);
        let args = &body[2..body.len() - 1];
        let received = body[body.len() - 1];
        let expected = checksum(address, command, args);
        if received != expected {
            trace!(
                body = %to_hex(body),
                expected = %format!("{:#04x}", expected),
                received = %format!("{:#04x}", received),
                "bad checksum"
            );
            return None;
        }

        Some(Frame::new(address, command, args))
    }
}

/// Format bytes as space separated hex
pub(crate) fn to_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}
