//! Transport errors

use thiserror::Error;

pub type Result<T> = std::result::Result<T, TransportError>;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("cannot listen on {addr}: {source}")]
    BindFailed {
        addr: String,
        source: std::io::Error,
    },

    #[error("accept failed: {0}")]
    AcceptFailed(std::io::Error),

    #[error("cannot reach {addr}: {reason}")]
    ConnectionFailed { addr: String, reason: String },

    #[error("websocket handshake with {peer} failed: {reason}")]
    Handshake { peer: String, reason: String },

    #[error("url must use ws:// or wss://, got {0}")]
    InvalidUrl(String),

    #[error("link is closed")]
    ConnectionClosed,

    #[error("outbound queue is full")]
    BufferFull,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
