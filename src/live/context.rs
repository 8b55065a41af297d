//! Shared state behind one live client.

use std::collections::HashMap;
use std::sync::Arc;

use esav_shared::{EsavDocument, QueryState};
use serde_json::{json, Value};
use tokio::sync::watch;

use super::connection::{ConnectionStatus, WsHandle};
use super::subscriptions::SubscriptionRegistry;
use crate::stores::{DiagnosticLog, DocumentStore, LogEntryKind, QueryStateStore};

/// Everything the connection task and the query handles share.
///
/// The connection task is the only writer of `documents`, `queries` and the
/// status; the registry is the only sender of subscribe/unsubscribe.
pub struct LiveContext {
    pub documents: DocumentStore,
    pub queries: QueryStateStore,
    pub subscriptions: SubscriptionRegistry,
    pub log: Arc<DiagnosticLog>,
    status: watch::Sender<ConnectionStatus>,
    revision: watch::Sender<u64>,
}

impl LiveContext {
    pub fn new(queries: QueryStateStore, log_capacity: usize) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::Closed);
        let (revision, _) = watch::channel(0);
        Self {
            documents: DocumentStore::new(),
            queries,
            subscriptions: SubscriptionRegistry::new(),
            log: Arc::new(DiagnosticLog::with_capacity(log_capacity)),
            status,
            revision,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }

    pub(crate) fn set_status(&self, status: ConnectionStatus) {
        let previous = self.status.send_replace(status);
        if previous != status {
            self.log
                .append(LogEntryKind::Status, Value::String(status.to_string()));
        }
    }

    /// Bumped every time the stores change in a way readers should see.
    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }

    pub fn watch_revision(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    fn bump_revision(&self) {
        self.revision.send_modify(|revision| *revision += 1);
    }

    /// Ingest a delta: documents first, so a reader that sees a new result
    /// list also finds its documents.
    pub(crate) fn apply_delta(
        &self,
        documents: HashMap<String, EsavDocument>,
        queries: HashMap<String, QueryState>,
    ) {
        if documents.is_empty() && queries.is_empty() {
            return;
        }
        self.documents.merge(documents);
        self.queries.apply(queries);
        self.bump_revision();
    }

    pub(crate) fn attach(&self, link: WsHandle) -> usize {
        self.subscriptions
            .attach(link, |query_id| self.queries.last_token(query_id))
    }

    /// Register interest in `query_id`, resuming from its last known token.
    pub fn acquire(&self, query_id: &str, descriptor: &Value) -> usize {
        let token = self.queries.last_token(query_id);
        self.subscriptions.acquire(query_id, descriptor, token)
    }

    /// Drop interest in `query_id`. When the last consumer leaves, the live
    /// slot is cleared and readers fall back to the stale cache.
    pub fn release(&self, query_id: &str) -> Option<usize> {
        let remaining = self.subscriptions.release(query_id)?;
        if remaining == 0 {
            self.queries.clear_live(query_id);
            self.bump_revision();
        }
        Some(remaining)
    }

    /// Status plus a summary of held queries, for operator views.
    pub fn describe(&self) -> Value {
        json!({
            "status": self.status().as_str(),
            "documents": self.documents.len(),
            "queries": self.subscriptions.active_queries(),
            "logEntries": self.log.len(),
        })
    }
}
