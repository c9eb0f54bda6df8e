//! Bridge error types

use thiserror::Error;

pub type Result<T> = std::result::Result<T, BridgeError>;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("connector already started: {0}")]
    AlreadyStarted(String),

    #[error("connector not started: {0}")]
    NotStarted(String),

    #[error("unsupported connector type: {0}")]
    UnsupportedConnectorType(String),

    #[error("bind failed: {0}")]
    BindFailed(String),

    #[error("send error: {0}")]
    Send(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("transport error: {0}")]
    Transport(#[from] patchbay_transport::TransportError),

    #[error("message error: {0}")]
    Core(#[from] patchbay_core::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
