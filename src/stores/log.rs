//! Bounded log of recent protocol traffic, newest first.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::config::DEFAULT_LOG_CAPACITY;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogEntryKind {
    Incoming,
    Outgoing,
    Status,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub kind: LogEntryKind,
    pub payload: Value,
}

#[derive(Debug)]
pub struct DiagnosticLog {
    entries: Mutex<VecDeque<LogEntry>>,
    next_id: AtomicU64,
    capacity: usize,
}

impl Default for DiagnosticLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_LOG_CAPACITY)
    }
}

impl DiagnosticLog {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(DEFAULT_LOG_CAPACITY))),
            next_id: AtomicU64::new(0),
            capacity,
        }
    }

    /// Record an entry and return its sequence id.
    pub fn append(&self, kind: LogEntryKind, payload: Value) -> u64 {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        // Allocated under the lock so ids match insertion order.
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        entries.push_front(LogEntry {
            id,
            timestamp: Utc::now(),
            kind,
            payload,
        });
        entries.truncate(self.capacity);
        id
    }

    /// Snapshot of the log, newest entry first.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn evicts_oldest_past_capacity() {
        let log = DiagnosticLog::default();
        for n in 0..501 {
            log.append(LogEntryKind::Outgoing, json!({ "n": n }));
        }

        let entries = log.entries();
        assert_eq!(entries.len(), 500);
        assert_eq!(entries[0].payload, json!({ "n": 500 }));
        assert_eq!(entries[499].payload, json!({ "n": 1 }));
        assert!(entries.iter().all(|e| e.payload != json!({ "n": 0 })));
    }

    #[test]
    fn ids_increase_and_newest_comes_first() {
        let log = DiagnosticLog::with_capacity(3);
        let a = log.append(LogEntryKind::Status, json!("connecting"));
        let b = log.append(LogEntryKind::Incoming, json!({"type": "ping"}));
        assert!(b > a);

        let entries = log.entries();
        assert_eq!(entries[0].id, b);
        assert_eq!(entries[0].kind, LogEntryKind::Incoming);
        assert_eq!(entries[1].id, a);
        assert!(entries[0].timestamp >= entries[1].timestamp);
    }

    #[test]
    fn kinds_serialize_lowercase() {
        assert_eq!(
            serde_json::to_value(LogEntryKind::Outgoing).unwrap(),
            json!("outgoing")
        );
    }
}
