//! Hub error types

use patchbay_bridge::ConnectionId;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, HubError>;

#[derive(Error, Debug)]
pub enum HubError {
    #[error("component '{component}' is already declared by {owner}")]
    DuplicateDeclaration {
        component: String,
        owner: ConnectionId,
    },

    #[error("component '{component}' is not owned by {connection}")]
    NotOwner {
        component: String,
        connection: ConnectionId,
    },

    #[error("unknown component: {0}")]
    UnknownComponent(String),

    #[error("unknown channel: {0}")]
    UnknownChannel(String),

    #[error("unknown parameter: {0}")]
    UnknownParameter(String),

    #[error("unknown instance: {0}")]
    UnknownInstance(String),

    #[error("message for {received} does not address {expected}")]
    ChannelMismatch { expected: String, received: String },

    #[error("mapping index {index} out of bounds (len {len})")]
    IndexOutOfBounds { index: usize, len: usize },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("hub is not running")]
    Stopped,

    #[error("message error: {0}")]
    Core(#[from] patchbay_core::Error),

    #[error("connector error: {0}")]
    Bridge(#[from] patchbay_bridge::BridgeError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
