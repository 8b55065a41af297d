//! Client-side stores fed by the live connection.
//!
//! Only the connection task writes documents and query states; consumers
//! read through [`crate::LiveQuery`] or the lookup helpers on
//! [`crate::LiveClient`].

pub mod documents;
pub mod log;
pub mod queries;

pub use documents::DocumentStore;
pub use log::{DiagnosticLog, LogEntry, LogEntryKind};
pub use queries::{QueryStateStore, STALE_KEY_PREFIX};
