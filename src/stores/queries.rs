//! Per-query result state.
//!
//! Two layers per query id:
//! - the live slot, written by every delta and cleared when the last
//!   consumer lets go of the query
//! - the stale cache, the last known-good state, kept in memory and
//!   mirrored to a [`KeyValueStore`] so it survives restarts
//!
//! Readers get the live state when there is one and the stale state
//! otherwise, so a reconnect or a quick unsubscribe/resubscribe does not
//! blank out results that were already on screen.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use esav_shared::QueryState;

use crate::storage::{self, KeyValueStore, SharedStore};

/// Prefix for stale cache keys in the durable store.
pub const STALE_KEY_PREFIX: &str = "esav-query:";

#[derive(Default)]
pub struct QueryStateStore {
    live: RwLock<HashMap<String, QueryState>>,
    stale: RwLock<HashMap<String, QueryState>>,
    /// Ids already looked up in the durable store and not found there.
    missing: RwLock<HashSet<String>>,
    durable: Option<SharedStore>,
}

impl QueryStateStore {
    /// A store whose stale cache only lives in memory.
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that persists its stale cache to `durable`.
    pub fn with_durable(durable: SharedStore) -> Self {
        Self {
            durable: Some(durable),
            ..Self::default()
        }
    }

    /// Replace the live state of every query in `updates`.
    pub fn apply(&self, updates: HashMap<String, QueryState>) {
        if updates.is_empty() {
            return;
        }
        {
            let mut stale = self.stale.write().unwrap_or_else(|e| e.into_inner());
            let mut missing = self.missing.write().unwrap_or_else(|e| e.into_inner());
            for (query_id, state) in &updates {
                missing.remove(query_id);
                stale.insert(query_id.clone(), state.clone());
            }
        }
        // Written after the in-memory locks are released.
        if let Some(durable) = &self.durable {
            for (query_id, state) in &updates {
                if !storage::save(durable.as_ref(), &stale_key(query_id), state) {
                    tracing::warn!("failed to persist stale state for {}", query_id);
                }
            }
        }
        self.live
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .extend(updates);
    }

    pub fn live(&self, query_id: &str) -> Option<QueryState> {
        self.live
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(query_id)
            .cloned()
    }

    /// Last known-good state, loading it from the durable store on first use.
    pub fn stale(&self, query_id: &str) -> Option<QueryState> {
        if let Some(state) = self
            .stale
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(query_id)
        {
            return Some(state.clone());
        }

        let durable = self.durable.as_ref()?;
        if self
            .missing
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains(query_id)
        {
            return None;
        }
        let Some(state) = storage::load::<QueryState>(durable.as_ref(), &stale_key(query_id))
        else {
            self.missing
                .write()
                .unwrap_or_else(|e| e.into_inner())
                .insert(query_id.to_string());
            return None;
        };
        self.stale
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(query_id.to_string())
            .or_insert_with(|| state.clone());
        Some(state)
    }

    /// Live state, falling back to the stale cache.
    pub fn current(&self, query_id: &str) -> Option<QueryState> {
        self.live(query_id).or_else(|| self.stale(query_id))
    }

    /// Consistency token to resume `query_id` from, if any state is known.
    pub fn last_token(&self, query_id: &str) -> Option<String> {
        self.current(query_id).map(|state| state.ecid)
    }

    /// Drop the live slot; the stale cache keeps answering for it.
    pub fn clear_live(&self, query_id: &str) {
        self.live
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(query_id);
    }

    /// Remove every trace of `query_id`, including the durable copy.
    pub fn forget(&self, query_id: &str) {
        self.clear_live(query_id);
        self.stale
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(query_id);
        if let Some(durable) = &self.durable {
            durable.remove(&stale_key(query_id));
        }
    }
}

fn stale_key(query_id: &str) -> String {
    format!("{STALE_KEY_PREFIX}{query_id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{FileStore, MemoryStore};
    use std::sync::Arc;

    fn state(ecid: &str, uris: &[&str]) -> QueryState {
        QueryState {
            ecid: ecid.to_string(),
            result: uris.iter().map(|u| u.to_string()).collect(),
        }
    }

    fn updates(entries: &[(&str, QueryState)]) -> HashMap<String, QueryState> {
        entries
            .iter()
            .map(|(id, s)| (id.to_string(), s.clone()))
            .collect()
    }

    #[test]
    fn unknown_query_has_no_state() {
        let store = QueryStateStore::new();
        assert_eq!(store.current("Q1"), None);
        assert_eq!(store.last_token("Q1"), None);
    }

    #[test]
    fn delta_replaces_previous_state() {
        let store = QueryStateStore::new();
        store.apply(updates(&[("Q1", state("e1", &["at://x/1", "at://x/2"]))]));
        store.apply(updates(&[("Q1", state("e2", &["at://x/2"]))]));

        assert_eq!(store.live("Q1"), Some(state("e2", &["at://x/2"])));
        assert_eq!(store.last_token("Q1").as_deref(), Some("e2"));
    }

    #[test]
    fn stale_cache_answers_after_live_slot_cleared() {
        let store = QueryStateStore::new();
        store.apply(updates(&[("Q1", state("e1", &["at://x/1"]))]));
        store.clear_live("Q1");

        assert_eq!(store.live("Q1"), None);
        assert_eq!(store.current("Q1"), Some(state("e1", &["at://x/1"])));
    }

    #[test]
    fn stale_cache_survives_a_new_store() {
        let durable: SharedStore = Arc::new(MemoryStore::new());
        let first = QueryStateStore::with_durable(durable.clone());
        first.apply(updates(&[("forum:bsky.app", state("e9", &["at://y/1"]))]));
        assert!(durable.get("esav-query:forum:bsky.app").is_some());

        let second = QueryStateStore::with_durable(durable);
        assert_eq!(second.live("forum:bsky.app"), None);
        assert_eq!(
            second.current("forum:bsky.app"),
            Some(state("e9", &["at://y/1"]))
        );
    }

    #[test]
    fn file_backed_cache_keeps_similar_ids_apart() {
        let dir = tempfile::tempdir().unwrap();
        let durable: SharedStore = Arc::new(FileStore::new(dir.path()));
        let first = QueryStateStore::with_durable(durable.clone());
        first.apply(updates(&[("forum:a", state("e1", &["at://x/1"]))]));

        let second = QueryStateStore::with_durable(durable);
        assert_eq!(second.current("forum/a"), None);
        assert_eq!(second.last_token("forum_a"), None);
        assert_eq!(second.current("forum:a"), Some(state("e1", &["at://x/1"])));
    }

    #[test]
    fn durable_misses_are_remembered_until_a_delta_arrives() {
        let durable: SharedStore = Arc::new(MemoryStore::new());
        let store = QueryStateStore::with_durable(durable.clone());
        assert_eq!(store.current("Q1"), None);

        // Written behind the store's back; the earlier miss still stands.
        storage::save(durable.as_ref(), "esav-query:Q1", &state("e0", &[]));
        assert_eq!(store.stale("Q1"), None);

        store.apply(updates(&[("Q1", state("e1", &["at://x/1"]))]));
        store.clear_live("Q1");
        assert_eq!(store.stale("Q1"), Some(state("e1", &["at://x/1"])));
    }

    #[test]
    fn forget_removes_durable_copy() {
        let durable: SharedStore = Arc::new(MemoryStore::new());
        let store = QueryStateStore::with_durable(durable.clone());
        store.apply(updates(&[("Q1", state("e1", &[]))]));
        store.forget("Q1");

        assert_eq!(store.current("Q1"), None);
        assert!(durable.get("esav-query:Q1").is_none());
    }
}
