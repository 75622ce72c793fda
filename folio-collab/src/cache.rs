//! Local durable cache of document bodies.
//!
//! A session loads the cached state before it tries the network, and
//! writes every local and remote update back so the document opens offline.
//! Each document is kept as one merged yrs update.

use std::collections::HashMap;
use std::sync::Mutex;

use thiserror::Error;

use crate::document::{merge_updates, DocumentError};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CacheError {
    #[error("Database error: {0}")]
    Database(String),
    #[error("Compression error: {0}")]
    Compression(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Update error: {0}")]
    Update(#[from] DocumentError),
}

impl From<rocksdb::Error> for CacheError {
    fn from(e: rocksdb::Error) -> Self {
        CacheError::Database(e.to_string())
    }
}

pub trait LocalCache: Send + Sync {
    /// Merged state for `document_id`, or `None` if never cached.
    fn load(&self, document_id: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Fold `update` into the cached state.
    fn store_update(&self, document_id: &str, update: &[u8]) -> Result<(), CacheError>;

    fn remove(&self, document_id: &str) -> Result<(), CacheError>;
}

/// Process-local cache; contents die with the process.
#[derive(Debug, Default)]
pub struct MemoryCache {
    docs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.docs.lock().map(|d| d.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>>, CacheError> {
        self.docs
            .lock()
            .map_err(|_| CacheError::Database("memory cache lock poisoned".into()))
    }
}

impl LocalCache for MemoryCache {
    fn load(&self, document_id: &str) -> Result<Option<Vec<u8>>, CacheError> {
        Ok(self.lock()?.get(document_id).cloned())
    }

    fn store_update(&self, document_id: &str, update: &[u8]) -> Result<(), CacheError> {
        let mut docs = self.lock()?;
        let merged = match docs.get(document_id) {
            Some(existing) => merge_updates(&[existing.as_slice(), update])?,
            None => merge_updates(&[update])?,
        };
        docs.insert(document_id.to_string(), merged);
        Ok(())
    }

    fn remove(&self, document_id: &str) -> Result<(), CacheError> {
        self.lock()?.remove(document_id);
        Ok(())
    }
}
