//! Reference-counted subscriptions.
//!
//! Any number of consumers can hold the same query id. Only the 0→1
//! transition sends `subscribe` and only the 1→0 transition sends
//! `unsubscribe`; everything in between is bookkeeping.
//!
//! The count table and the attached transport handle sit behind one mutex,
//! so a consumer joining while the connection opens is either covered by the
//! resubscribe pass or sends its own `subscribe`, never both.

use std::collections::HashMap;
use std::sync::Mutex;

use esav_shared::ClientMessage;
use serde_json::Value;

use super::connection::WsHandle;

#[derive(Debug, Clone)]
struct Subscription {
    count: usize,
    /// Descriptor sent with the 0→1 `subscribe`.
    descriptor: Value,
}

#[derive(Default)]
struct RegistryState {
    entries: HashMap<String, Subscription>,
    link: Option<WsHandle>,
}

impl RegistryState {
    fn send(&self, message: ClientMessage) {
        let Some(link) = &self.link else {
            return;
        };
        if let Err(e) = link.send(message) {
            tracing::warn!("{}", e);
        }
    }
}

#[derive(Default)]
pub struct SubscriptionRegistry {
    state: Mutex<RegistryState>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one more consumer of `query_id`. Returns the new count.
    ///
    /// The first consumer's descriptor becomes the active one and is sent
    /// (with `last_token`) if a transport is attached. Later consumers are
    /// covered by the existing subscription, whatever descriptor they carry.
    pub fn acquire(&self, query_id: &str, descriptor: &Value, last_token: Option<String>) -> usize {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = state.entries.get_mut(query_id) {
            entry.count += 1;
            return entry.count;
        }

        state.entries.insert(
            query_id.to_string(),
            Subscription {
                count: 1,
                descriptor: descriptor.clone(),
            },
        );
        if state.link.is_some() {
            tracing::debug!("Subscribing to {}", query_id);
            state.send(ClientMessage::subscribe(
                query_id,
                descriptor.clone(),
                last_token,
            ));
        }
        1
    }

    /// Drop one consumer of `query_id`. Returns the remaining count, or
    /// `None` if nobody held it.
    pub fn release(&self, query_id: &str) -> Option<usize> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let entry = state.entries.get_mut(query_id)?;
        if entry.count > 1 {
            entry.count -= 1;
            return Some(entry.count);
        }

        state.entries.remove(query_id);
        if state.link.is_some() {
            tracing::debug!("Unsubscribing from {}", query_id);
            state.send(ClientMessage::unsubscribe(query_id));
        }
        Some(0)
    }

    /// Start sending through `link` and resubscribe every held query, since
    /// a fresh connection carries no server-side interest. `token_for`
    /// supplies the token to resume each query from.
    ///
    /// Returns the number of queries resubscribed.
    pub fn attach(&self, link: WsHandle, token_for: impl Fn(&str) -> Option<String>) -> usize {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.link = Some(link);

        let mut pending: Vec<(String, Value)> = state
            .entries
            .iter()
            .filter(|(_, entry)| entry.count > 0)
            .map(|(id, entry)| (id.clone(), entry.descriptor.clone()))
            .collect();
        pending.sort_by(|a, b| a.0.cmp(&b.0));

        for (query_id, descriptor) in &pending {
            let token = token_for(query_id);
            state.send(ClientMessage::subscribe(
                query_id.as_str(),
                descriptor.clone(),
                token,
            ));
        }
        pending.len()
    }

    /// Stop sending; interest is kept for the next [`attach`](Self::attach).
    pub fn detach(&self) {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).link = None;
    }

    pub fn is_attached(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .link
            .is_some()
    }

    pub fn count(&self, query_id: &str) -> usize {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entries
            .get(query_id)
            .map_or(0, |entry| entry.count)
    }

    /// Descriptor the server was (or will be) subscribed with.
    pub fn active_descriptor(&self, query_id: &str) -> Option<Value> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entries
            .get(query_id)
            .map(|entry| entry.descriptor.clone())
    }

    /// Ids with at least one consumer, sorted.
    pub fn active_queries(&self) -> Vec<String> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let mut ids: Vec<String> = state.entries.keys().cloned().collect();
        ids.sort();
        ids
    }
}
