//! Patchbay Connectors
//!
//! A connector owns one listening endpoint or device and reports the
//! connections it opens to the hub:
//! - TCP (delimiter-framed JSON envelopes)
//! - WebSocket (one JSON envelope per frame)
//! - OSC (UDP, translated to control messages)
//! - MIDI (note and controller traffic translated to channel messages)
//!
//! Connections deliver parsed [`HubMessage`](patchbay_core::HubMessage)s and
//! accept typed messages for transmission. Malformed inbound units are logged
//! and dropped without closing the connection.

pub mod config;
pub mod connector;
pub mod error;
pub mod midi;
pub mod tcp;
pub mod websocket;

mod server;

#[cfg(feature = "osc")]
pub mod osc;

pub use config::{create_connector, ConnectorConfig};
pub use connector::{Connection, ConnectionId, Connector, ConnectorEvent, ConnectorKind};
pub use error::{BridgeError, Result};
pub use midi::MidiTranslator;
pub use tcp::TcpConnector;
pub use websocket::WebSocketConnector;

#[cfg(feature = "osc")]
pub use osc::{OscConnection, OscConnector};

#[cfg(feature = "midi")]
pub use midi::{MidiConnection, MidiConnector};

/// Capacity of each connection's inbound message queue
pub const INBOUND_BUFFER_SIZE: usize = 1000;
