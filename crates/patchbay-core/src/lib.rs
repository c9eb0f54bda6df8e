//! Patchbay Core
//!
//! Core types and encoding for the patchbay parameter routing hub.
//!
//! This crate provides:
//! - The declaration model ([`ComponentInfo`], [`ChannelInfo`], [`ParameterInfo`])
//! - Selections that reference declared entities ([`ComponentSelection`],
//!   [`ChannelSelection`], [`ParameterSelection`])
//! - Numeric samples flowing through mappings ([`ParameterSample`])
//! - The message envelope and its content variants ([`HubMessage`])
//! - JSON encoding/decoding of envelopes ([`codec`])

pub mod codec;
pub mod error;
pub mod message;
pub mod sample;
pub mod selection;
pub mod time;
pub mod types;

pub use codec::{decode, encode};
pub use error::{Error, Result};
pub use message::{ChannelContent, ComponentContent, HubMessage, MessageContent, MessageType};
pub use sample::ParameterSample;
pub use selection::{ChannelSelection, ComponentSelection, ParameterSelection};
pub use time::Timestamp;
pub use types::*;

/// Delimiter written before and after every envelope on stream transports.
///
/// A NUL byte can never appear in JSON text, so it cannot collide with payload bytes.
pub const FRAME_DELIMITER: u8 = 0x00;

/// Maximum size of a single framed envelope
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Default TCP port
pub const DEFAULT_TCP_PORT: u16 = 7350;

/// Default WebSocket port
pub const DEFAULT_WS_PORT: u16 = 7351;

/// Default OSC (UDP) port
pub const DEFAULT_OSC_PORT: u16 = 9000;
