//! Normalized document cache keyed by `at://` URI.
//!
//! One body per URI, shared by every query that references it. A write for
//! a URI that is already present replaces the whole document; fields are
//! never merged.

use std::collections::HashMap;
use std::sync::RwLock;

use esav_shared::EsavDocument;

#[derive(Debug, Default)]
pub struct DocumentStore {
    documents: RwLock<HashMap<String, EsavDocument>>,
}

impl DocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, uri: &str) -> Option<EsavDocument> {
        self.documents
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(uri)
            .cloned()
    }

    /// Look up several URIs at once. Unknown URIs are left out of the result.
    pub fn get_many<S: AsRef<str>>(&self, uris: &[S]) -> HashMap<String, EsavDocument> {
        let documents = self.documents.read().unwrap_or_else(|e| e.into_inner());
        uris.iter()
            .filter_map(|uri| {
                let uri = uri.as_ref();
                documents.get(uri).map(|doc| (uri.to_string(), doc.clone()))
            })
            .collect()
    }

    /// Resolve `uris` in order, skipping any not cached yet.
    pub fn hydrate<S: AsRef<str>>(&self, uris: &[S]) -> Vec<EsavDocument> {
        let documents = self.documents.read().unwrap_or_else(|e| e.into_inner());
        uris.iter()
            .filter_map(|uri| documents.get(uri.as_ref()).cloned())
            .collect()
    }

    /// Apply a batch of document updates under a single write lock.
    pub fn merge(&self, batch: HashMap<String, EsavDocument>) {
        if batch.is_empty() {
            return;
        }
        let mut documents = self.documents.write().unwrap_or_else(|e| e.into_inner());
        documents.extend(batch);
    }

    pub fn len(&self) -> usize {
        self.documents.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.documents
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}
