use std::collections::VecDeque;

use crate::document::{merge_updates, DocumentError};

/// Local document updates made while disconnected, replayed in order on the
/// next handshake.
///
/// At capacity the backlog and the incoming update are folded into a single
/// merged update carrying the newest clock, so no edit is ever dropped.
#[derive(Debug)]
pub struct OfflineQueue {
    pending: VecDeque<PendingUpdate>,
    capacity: usize,
}

#[derive(Debug, Clone)]
struct PendingUpdate {
    clock: u64,
    update: Vec<u8>,
}

impl OfflineQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            pending: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
        }
    }

    /// Queue `update`. Fails only when compaction hits an undecodable update,
    /// in which case the queue is left as it was.
    pub fn push(&mut self, clock: u64, update: Vec<u8>) -> Result<(), DocumentError> {
        if self.pending.len() < self.capacity {
            self.pending.push_back(PendingUpdate { clock, update });
            return Ok(());
        }

        let mut backlog: Vec<&[u8]> = self.pending.iter().map(|p| p.update.as_slice()).collect();
        backlog.push(&update);
        let merged = merge_updates(&backlog)?;
        log::debug!("Compacted {} queued updates into one", backlog.len());

        self.pending.clear();
        self.pending.push_back(PendingUpdate { clock, update: merged });
        Ok(())
    }

    /// Everything queued, oldest first, as `(clock, update)` pairs.
    pub fn take_all(&mut self) -> Vec<(u64, Vec<u8>)> {
        self.pending.drain(..).map(|p| (p.clock, p.update)).collect()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    pub fn pending_bytes(&self) -> usize {
        self.pending.iter().map(|p| p.update.len()).sum()
    }
}
