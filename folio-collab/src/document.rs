//! Replicated document body.
//!
//! Wraps a `yrs::Doc` whose body is a single text root named `content`.
//! Convergence is entirely yrs's job; this type only moves update bytes in
//! and out.
//!
//! Local edits are published to subscribers as incremental v1 updates.
//! Remote updates applied through [`ReplicatedDocument::apply_update`] are
//! not echoed back.

use std::sync::Mutex;

use thiserror::Error;
use tokio::sync::mpsc;
use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{Doc, GetString, ReadTxn, StateVector, Text, TextRef, Transact, Update};

/// Name of the text root holding the document body.
pub const CONTENT_ROOT: &str = "content";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DocumentError {
    #[error("Failed to decode update: {0}")]
    Decode(String),
    #[error("Failed to apply update: {0}")]
    Apply(String),
}

pub struct ReplicatedDocument {
    doc: Doc,
    content: TextRef,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<Vec<u8>>>>,
}

impl ReplicatedDocument {
    pub fn new() -> Self {
        let doc = Doc::new();
        let content = doc.get_or_insert_text(CONTENT_ROOT);
        Self {
            doc,
            content,
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Client id yrs stamps on this replica's operations.
    pub fn client_id(&self) -> u64 {
        self.doc.client_id()
    }

    pub fn content(&self) -> String {
        let txn = self.doc.transact();
        self.content.get_string(&txn)
    }

    pub fn len(&self) -> u32 {
        let txn = self.doc.transact();
        self.content.len(&txn)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replace the whole body. No-op when unchanged.
    pub fn set_content(&self, text: &str) {
        self.edit(|content, txn| {
            if content.get_string(&*txn) == text {
                return false;
            }
            let len = content.len(&*txn);
            content.remove_range(txn, 0, len);
            content.insert(txn, 0, text);
            true
        });
    }

    pub fn insert(&self, index: u32, text: &str) {
        self.edit(|content, txn| {
            content.insert(txn, index, text);
            true
        });
    }

    pub fn remove_range(&self, index: u32, len: u32) {
        self.edit(|content, txn| {
            content.remove_range(txn, index, len);
            true
        });
    }

    /// Integrate an update from the cache or the network.
    pub fn apply_update(&self, update: &[u8]) -> Result<(), DocumentError> {
        let update = Update::decode_v1(update).map_err(|e| DocumentError::Decode(e.to_string()))?;
        let mut txn = self.doc.transact_mut();
        txn.apply_update(update)
            .map_err(|e| DocumentError::Apply(e.to_string()))
    }

    /// Full state as a single v1 update.
    pub fn encode_state(&self) -> Vec<u8> {
        let txn = self.doc.transact();
        txn.encode_state_as_update_v1(&StateVector::default())
    }

    pub fn state_vector(&self) -> Vec<u8> {
        let txn = self.doc.transact();
        txn.state_vector().encode_v1()
    }

    /// Everything a peer with `state_vector` is missing.
    pub fn diff_since(&self, state_vector: &[u8]) -> Result<Vec<u8>, DocumentError> {
        let remote = StateVector::decode_v1(state_vector).map_err(|e| DocumentError::Decode(e.to_string()))?;
        let txn = self.doc.transact();
        Ok(txn.encode_state_as_update_v1(&remote))
    }

    /// Receive every subsequent local edit as a v1 update.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<Vec<u8>> {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.push(tx);
        }
        rx
    }

    /// Drop every subscriber; their receivers see the channel close.
    pub fn unsubscribe_all(&self) {
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.clear();
        }
    }

    /// Run `f` in one transaction and publish only what that transaction
    /// changed.
    fn edit<F>(&self, f: F)
    where
        F: FnOnce(&TextRef, &mut yrs::TransactionMut) -> bool,
    {
        let update = {
            let mut txn = self.doc.transact_mut();
            if !f(&self.content, &mut txn) {
                return;
            }
            txn.encode_update_v1()
        };
        self.publish(update);
    }

    fn publish(&self, update: Vec<u8>) {
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.retain(|tx| tx.send(update.clone()).is_ok());
        }
    }
}

impl Default for ReplicatedDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ReplicatedDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicatedDocument")
            .field("client_id", &self.client_id())
            .field("len", &self.len())
            .finish()
    }
}

/// Fold several v1 updates into one equivalent update.
pub fn merge_updates<T: AsRef<[u8]>>(updates: &[T]) -> Result<Vec<u8>, DocumentError> {
    let scratch = ReplicatedDocument::new();
    for update in updates {
        scratch.apply_update(update.as_ref())?;
    }
    Ok(scratch.encode_state())
}
