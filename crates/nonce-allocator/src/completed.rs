//! Bounded record of nonces that were finalized successfully.

use alloy_primitives::Address;
use schnellru::{ByLength, LruMap};

/// Reference capacity of the completed nonce cache.
pub const DEFAULT_COMPLETED_CAPACITY: u32 = 100_000;

/// LRU set of `(address, nonce)` pairs that were retired successfully.
///
/// A miss does not mean the nonce was never used: the pair may have been
/// evicted, at which point the committed nonce has moved past it.
pub(crate) struct CompletedNonces {
    entries: LruMap<(Address, u64), (), ByLength>,
    capacity: u32,
}

impl CompletedNonces {
    /// Creates an empty cache holding at most `capacity` pairs.
    pub(crate) fn new(capacity: u32) -> Self {
        Self {
            entries: LruMap::new(ByLength::new(capacity)),
            capacity,
        }
    }

    /// Records a finalized pair.
    ///
    /// Returns true if this evicted the least recently used pair.
    pub(crate) fn add(&mut self, address: Address, nonce: u64) -> bool {
        let key = (address, nonce);
        let evicts = self.entries.peek(&key).is_none() && self.is_full();
        self.entries.insert(key, ());
        evicts
    }

    /// Returns true if the pair is cached, refreshing its recency.
    pub(crate) fn contains(&mut self, address: Address, nonce: u64) -> bool {
        self.entries.get(&(address, nonce)).is_some()
    }

    /// Returns true if the pair is cached, leaving recency untouched.
    pub(crate) fn peek(&self, address: Address, nonce: u64) -> bool {
        self.entries.peek(&(address, nonce)).is_some()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity as usize
    }
}

impl std::fmt::Debug for CompletedNonces {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletedNonces")
            .field("len", &self.entries.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}
