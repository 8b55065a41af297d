//! Live query synchronization over a single WebSocket.
//!
//! This module provides:
//! - One connection with exponential-backoff reconnect
//! - Normalized document and query-state stores fed by server deltas
//! - Reference-counted subscriptions shared by every consumer of a query
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                  LiveConnection                     │
//! │   (task owning the socket, status and reconnects)   │
//! └─────────────────────────────────────────────────────┘
//!             │ deltas                 ▲ subscribe /
//!             ▼                        │ unsubscribe
//!   ┌──────────────────┐     ┌──────────────────────┐
//!   │  DocumentStore   │     │ SubscriptionRegistry │
//!   │  QueryStateStore │     │   (ref counts)       │
//!   └──────────────────┘     └──────────────────────┘
//!             │                        ▲
//!             ▼                        │ acquire / release
//!   ┌─────────────────────────────────────────────────┐
//!   │          LiveQuery (one per consumer)           │
//!   └─────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,no_run
//! # async fn demo() -> Result<(), esav_live::LiveError> {
//! use esav_live::{LiveClient, LiveConfig};
//! use serde_json::json;
//!
//! let client = LiveClient::connect(LiveConfig::new("wss://esav.whey.party/xrpc/party.whey.esav.esSync")?);
//! let mut posts = client.query("forum:bsky.app", json!({"term": {"forum": "bsky.app"}}));
//! loop {
//!     posts.changed().await;
//!     let result = posts.snapshot();
//!     println!("{} posts", result.data.len());
//! }
//! # }
//! ```

mod connection;
mod context;
mod query;
mod subscriptions;

use std::collections::HashMap;
use std::sync::Arc;

use esav_shared::EsavDocument;
use serde_json::Value;
use tokio::sync::watch;

pub use connection::{ConnectionStatus, LiveConnection, WsHandle};
pub use context::LiveContext;
pub use query::{LiveQuery, QueryOptions, QueryResult};
pub use subscriptions::SubscriptionRegistry;

use crate::config::LiveConfig;
use crate::error::LiveError;
use crate::storage::{FileStore, SharedStore};
use crate::stores::{LogEntry, QueryStateStore};

/// Entry point for consumers: owns the shared context and the connection.
pub struct LiveClient {
    ctx: Arc<LiveContext>,
    connection: Option<LiveConnection>,
}

impl LiveClient {
    /// Start a client whose stale cache lives in memory only.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(config: LiveConfig) -> Self {
        Self::start(config, QueryStateStore::new())
    }

    /// Start a client whose stale cache is persisted to `durable`.
    pub fn connect_with_store(config: LiveConfig, durable: SharedStore) -> Self {
        Self::start(config, QueryStateStore::with_durable(durable))
    }

    /// Configure from the environment and persist the stale cache in the
    /// platform config directory when there is one.
    pub fn from_env() -> Result<Self, LiveError> {
        let config = LiveConfig::from_env()?;
        Ok(match FileStore::in_config_dir() {
            Some(store) => Self::connect_with_store(config, Arc::new(store)),
            None => Self::connect(config),
        })
    }

    fn start(config: LiveConfig, queries: QueryStateStore) -> Self {
        let ctx = Arc::new(LiveContext::new(queries, config.log_capacity));
        let connection = LiveConnection::start(ctx.clone(), config.endpoint, config.reconnect);
        Self {
            ctx,
            connection: Some(connection),
        }
    }

    /// Live results for `query_id`, enabled.
    pub fn query(&self, query_id: impl Into<String>, descriptor: Value) -> LiveQuery {
        self.query_with(query_id, descriptor, QueryOptions::default())
    }

    pub fn query_with(
        &self,
        query_id: impl Into<String>,
        descriptor: Value,
        options: QueryOptions,
    ) -> LiveQuery {
        LiveQuery::new(self.ctx.clone(), query_id, descriptor, options)
    }

    pub fn document(&self, uri: &str) -> Option<EsavDocument> {
        self.ctx.documents.get(uri)
    }

    pub fn documents<S: AsRef<str>>(&self, uris: &[S]) -> HashMap<String, EsavDocument> {
        self.ctx.documents.get_many(uris)
    }

    pub fn status(&self) -> ConnectionStatus {
        self.ctx.status()
    }

    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.ctx.watch_status()
    }

    /// Banner text to show while disconnected, `None` when open.
    pub fn banner(&self) -> Option<&'static str> {
        self.status().banner()
    }

    /// Recent protocol traffic, newest first.
    pub fn log_entries(&self) -> Vec<LogEntry> {
        self.ctx.log.entries()
    }

    pub fn context(&self) -> &Arc<LiveContext> {
        &self.ctx
    }

    /// Stop reconnecting and close the connection. Queries keep reading the
    /// stores after this, they just stop receiving updates.
    pub async fn shutdown(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.shutdown().await;
        }
    }
}
