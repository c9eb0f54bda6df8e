//! Patchbay Transport Layer
//!
//! Byte links for the hub's network connectors:
//! - TCP with delimiter framing
//! - WebSocket, one envelope per message
//!
//! A link moves opaque frames. Decoding them into hub messages happens in the
//! connectors.

pub mod error;
pub mod framing;
pub mod traits;

#[cfg(any(feature = "tcp", feature = "websocket"))]
mod link;

#[cfg(feature = "tcp")]
pub mod tcp;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use error::{Result, TransportError};
pub use framing::{encode_frame, FrameDecoder};
pub use traits::{Transport, TransportEvent, TransportReceiver, TransportSender, TransportServer};

#[cfg(any(feature = "tcp", feature = "websocket"))]
pub use link::{LinkReceiver, LinkSender};

#[cfg(feature = "tcp")]
pub use tcp::{TcpConfig, TcpServer, TcpTransport};

#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConfig, WebSocketServer, WebSocketTransport};
