//! Errors that can cross the live client boundary.
//!
//! Transport faults and malformed frames never surface here; they become
//! connection status changes and diagnostic log entries instead.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LiveError {
    #[error("invalid endpoint '{endpoint}': {source}")]
    InvalidEndpoint {
        endpoint: String,
        #[source]
        source: url::ParseError,
    },
    #[error("endpoint '{0}' must use ws:// or wss://")]
    UnsupportedScheme(String),
    #[error("invalid value for {name}: '{value}'")]
    InvalidSetting { name: &'static str, value: String },
}
