//! Shared error types.

use thiserror::Error;

/// Failure to encode or decode a protocol frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("failed to decode frame: {0}")]
    Decode(String),
    #[error("failed to encode frame: {0}")]
    Encode(String),
}

/// Error from one of the HTTP collaborators (identity resolution, one-shot queries).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("Deserialization error: {0}")]
    Deserialize(String),
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),
}
