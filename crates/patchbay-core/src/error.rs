//! Error types for patchbay core

use thiserror::Error;

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types
#[derive(Error, Debug)]
pub enum Error {
    /// Wire payload fails structural validation
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// Envelope `type` outside the closed set of message types
    #[error("unsupported message type: {0}")]
    UnsupportedMessageType(String),

    /// Parameter declared with `min > max`
    #[error("invalid range for parameter {parameter}: min {min} > max {max}")]
    InvalidRange { parameter: String, min: f64, max: f64 },

    /// Identifier repeated inside one declaration scope
    #[error("duplicate {scope} identifier: {identifier}")]
    DuplicateIdentifier { scope: &'static str, identifier: String },

    /// JSON encoding error
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
