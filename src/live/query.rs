//! Consumer-facing live query handle.

use std::sync::Arc;

use esav_shared::EsavDocument;
use serde_json::Value;
use tokio::sync::watch;

use super::connection::ConnectionStatus;
use super::context::LiveContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryOptions {
    pub enabled: bool,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// What a consumer renders from.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    /// Documents in server order; URIs not cached yet are left out.
    pub data: Vec<EsavDocument>,
    pub uris: Vec<String>,
    pub ecid: Option<String>,
    /// True until any state (live or stale) is known for the query.
    pub is_loading: bool,
    pub status: ConnectionStatus,
}

/// Interest in one live query for as long as the handle lives.
///
/// While enabled, the handle holds one reference on its query id; dropping
/// it, disabling it, or changing the descriptor gives that reference back.
pub struct LiveQuery {
    ctx: Arc<LiveContext>,
    query_id: String,
    descriptor: Value,
    held: bool,
    revision: watch::Receiver<u64>,
    status: watch::Receiver<ConnectionStatus>,
}

impl LiveQuery {
    pub fn new(
        ctx: Arc<LiveContext>,
        query_id: impl Into<String>,
        descriptor: Value,
        options: QueryOptions,
    ) -> Self {
        let revision = ctx.watch_revision();
        let status = ctx.watch_status();
        let mut query = Self {
            ctx,
            query_id: query_id.into(),
            descriptor,
            held: false,
            revision,
            status,
        };
        query.set_enabled(options.enabled);
        query
    }

    pub fn query_id(&self) -> &str {
        &self.query_id
    }

    pub fn descriptor(&self) -> &Value {
        &self.descriptor
    }

    pub fn is_enabled(&self) -> bool {
        self.held
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        match (enabled, self.held) {
            (true, false) => {
                self.ctx.acquire(&self.query_id, &self.descriptor);
                self.held = true;
            }
            (false, true) => {
                self.ctx.release(&self.query_id);
                self.held = false;
            }
            _ => {}
        }
    }

    /// Switch to a new descriptor. An equal descriptor is a no-op; a
    /// different one releases and re-acquires the query id.
    pub fn set_descriptor(&mut self, descriptor: Value) {
        if descriptor == self.descriptor {
            return;
        }
        let held = self.held;
        self.set_enabled(false);
        self.descriptor = descriptor;
        self.set_enabled(held);
    }

    pub fn snapshot(&self) -> QueryResult {
        let status = self.ctx.status();
        match self.ctx.queries.current(&self.query_id) {
            Some(state) => QueryResult {
                data: self.ctx.documents.hydrate(state.result.as_slice()),
                uris: state.result,
                ecid: Some(state.ecid),
                is_loading: false,
                status,
            },
            None => QueryResult {
                data: Vec::new(),
                uris: Vec::new(),
                ecid: None,
                is_loading: true,
                status,
            },
        }
    }

    /// Wait until the stores or the connection status change.
    pub async fn changed(&mut self) {
        // Both senders live in the context this handle keeps alive.
        tokio::select! {
            _ = self.revision.changed() => {}
            _ = self.status.changed() => {}
        }
    }
}

impl Drop for LiveQuery {
    fn drop(&mut self) {
        self.set_enabled(false);
    }
}
