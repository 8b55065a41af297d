//! Durable key/value storage.
//!
//! The stale query cache and the identity cache only need plain
//! get/set/remove on strings, so that is all [`KeyValueStore`] offers:
//! - [`MemoryStore`]: in-process map, for tests and ephemeral clients
//! - [`FileStore`]: one JSON file per key in the platform config directory:
//!   - Linux: `~/.config/esav-live/`
//!   - macOS: `~/Library/Application Support/esav-live/`
//!   - Windows: `%APPDATA%\esav-live\`

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use serde::{de::DeserializeOwned, Serialize};

/// A get/set/remove capability with no transactional guarantees.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    /// Returns `true` if the value was stored.
    fn set(&self, key: &str, value: &str) -> bool;

    fn remove(&self, key: &str);
}

/// Shared handle to whichever store a client was built with.
pub type SharedStore = Arc<dyn KeyValueStore>;

/// Save a value as JSON. Returns `true` if the operation succeeded.
pub fn save<T: Serialize>(store: &dyn KeyValueStore, key: &str, value: &T) -> bool {
    match serde_json::to_string(value) {
        Ok(json) => store.set(key, &json),
        Err(_) => false,
    }
}

/// Load a JSON value. Returns `None` if the key doesn't exist or deserialization fails.
pub fn load<T: DeserializeOwned>(store: &dyn KeyValueStore, key: &str) -> Option<T> {
    let json = store.get(key)?;
    serde_json::from_str(&json).ok()
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    fn set(&self, key: &str, value: &str) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), value.to_string());
        true
    }

    fn remove(&self, key: &str) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
    }
}

/// Files under a directory, one per key.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Store rooted in the platform config directory, if there is one.
    pub fn in_config_dir() -> Option<Self> {
        let config_dir = dirs::config_dir()?;
        Some(Self::new(config_dir.join("esav-live")))
    }

    /// Percent-encoded, so distinct keys never share a file.
    fn file_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", urlencoding::encode(key)))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        std::fs::read_to_string(self.file_path(key)).ok()
    }

    fn set(&self, key: &str, value: &str) -> bool {
        if !self.dir.exists() {
            if let Err(e) = std::fs::create_dir_all(&self.dir) {
                tracing::warn!("failed to create {}: {}", self.dir.display(), e);
                return false;
            }
        }
        std::fs::write(self.file_path(key), value).is_ok()
    }

    fn remove(&self, key: &str) {
        let _ = std::fs::remove_file(self.file_path(key));
    }
}
