//! ESAV Live client.
//!
//! Keeps a local, normalized cache of forum documents in sync with the
//! ESAV Live server and hands consumers live, de-duplicated query results.
//! See [`live`] for the moving parts.

pub mod api_client;
pub mod config;
pub mod error;
pub mod identity;
pub mod live;
pub mod logging;
pub mod storage;
pub mod stores;

pub use api_client::QueryClient;
pub use config::{LiveConfig, ReconnectConfig};
pub use error::LiveError;
pub use identity::{
    CachedIdentityResolver, CachedProfileResolver, HttpIdentityResolver, HttpProfileResolver,
    IdentityResolver, ProfileResolver,
};
pub use live::{ConnectionStatus, LiveClient, LiveQuery, QueryOptions, QueryResult};
pub use storage::{FileStore, KeyValueStore, MemoryStore, SharedStore};

pub use esav_shared as shared;
