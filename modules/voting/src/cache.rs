//! CheckTx→DeliverTx vote cache
//!
//! A bounded map from tx uniq-id to the envelope produced by a successful
//! mempool check, letting DeliverTx skip signature and proof recomputation.
//! Purely a performance hint: a full cache drops new entries and a miss
//! falls back to full validation.

use dashmap::DashMap;
use scrutonet_core::{Envelope, Height};
use tracing::debug;

struct CachedVote {
    envelope: Envelope,
    /// Earliest block the checked tx can land in
    height: Height,
}

/// Bounded cache of partially-validated votes
pub struct VoteCache {
    entries: DashMap<[u8; 32], CachedVote>,
    max_entries: usize,
}

impl VoteCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            max_entries,
        }
    }

    /// Store a checked vote. Dropped silently when the cache is full.
    pub fn put(&self, id: [u8; 32], envelope: Envelope, height: Height) {
        if self.entries.len() >= self.max_entries && !self.entries.contains_key(&id) {
            debug!("vote cache full, dropping entry");
            return;
        }
        self.entries.insert(id, CachedVote { envelope, height });
    }

    /// Take a cached envelope, removing it
    pub fn take(&self, id: &[u8; 32]) -> Option<Envelope> {
        self.entries.remove(id).map(|(_, cached)| cached.envelope)
    }

    pub fn contains(&self, id: &[u8; 32]) -> bool {
        self.entries.contains_key(id)
    }

    /// Drop entries from heights older than `height`; called at BeginBlock
    pub fn purge(&self, height: Height) {
        self.entries.retain(|_, cached| cached.height >= height);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for VoteCache {
    fn default() -> Self {
        Self::new(10_000)
    }
}
