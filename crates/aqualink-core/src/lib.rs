//! # Aqualink Core Library
//!
//! Core functionality for monitoring and driving an Aqualink pool/spa
//! controller over its RS-485 panel bus.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - The DLE/STX framed wire codec with byte stuffing and checksums
//! - A link reader that acknowledges controller polls on behalf of emulated panels
//! - Command interpreters for the OneTouch, All Button and SpaLink panel dialects
//! - A per-panel action sequencer that turns button sequences into equipment changes
//! - The aggregated pool state, equipment and modes
//!
//! ## Supported panels
//!
//! - OneTouch (12 line text display)
//! - All Button (status LEDs, one line text)
//! - SpaLink (LED array)
//!
//! ## Example
//!
//! ```rust,ignore
//! use aqualink_core::prelude::*;
//! use aqualink_core::protocol::open_port;
//!
//! let config = EngineConfig::from_file("aqualink.json")?;
//! let port = open_port(&config.serial_device, Some(config.baud_rate))?;
//! let engine = Engine::start(config)?;
//! let link = engine.spawn_link(port);
//!
//! let spa_mode = engine.pool().mode(ModeKind::Spa);
//! spa_mode.change_state(Some(true));
//! ```

pub mod action;
pub mod config;
pub mod engine;
pub mod panel;
pub mod pool;
pub mod protocol;
mod sync;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::action::{ActionError, ActionSequence, ActionSequencer, ActionStep};
    pub use crate::config::{EngineConfig, PanelConfig, PanelDialect};
    pub use crate::engine::{Engine, PanelHandle};
    pub use crate::panel::{AllButtonPanel, OneTouchPanel, Panel, SpaLinkPanel};
    pub use crate::pool::{
        Equipment, EquipmentKind, EquipmentState, Mode, ModeKind, Pool, PoolSnapshot,
    };
    pub use crate::protocol::{Frame, FrameCodec, LinkReader, ProtocolError};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
