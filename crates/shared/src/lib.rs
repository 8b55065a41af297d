//! Shared types for the ESAV Live client and anything speaking its protocol.

pub mod error;
pub mod models;
pub mod protocol;

pub use error::*;
pub use models::*;
pub use protocol::*;
