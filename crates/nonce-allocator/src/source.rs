//! Read access to the authoritative committed nonce of an account.

use alloy_primitives::{Address, map::HashMap};
use auto_impl::auto_impl;
use parking_lot::RwLock;

/// Supplies the committed nonce of an account.
///
/// Implementations must return the smallest nonce that has not been finalized
/// on the authoritative ledger yet, and `0` for an account without history.
#[auto_impl(&, Arc, Box)]
pub trait CommittedNonceSource {
    /// Returns the next nonce expected by the ledger for `address`.
    fn committed_nonce(&self, address: &Address) -> u64;
}

/// A committed nonce ledger kept in memory.
///
/// Reads vastly outnumber writes: every suggestion reads the ledger while it
/// is only advanced when a block is committed.
#[derive(Debug, Default)]
pub struct InMemoryNonceLedger {
    nonces: RwLock<HashMap<Address, u64>>,
}

impl InMemoryNonceLedger {
    /// Creates an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrites the committed nonce of `address`.
    pub fn set_committed(&self, address: Address, nonce: u64) {
        self.nonces.write().insert(address, nonce);
    }

    /// Moves the committed nonce of `address` forward to `nonce`.
    ///
    /// The committed nonce never moves backwards, a lower `nonce` is ignored.
    /// Returns the committed nonce after the update.
    pub fn advance_to(&self, address: Address, nonce: u64) -> u64 {
        let mut nonces = self.nonces.write();
        let committed = nonces.entry(address).or_default();
        *committed = (*committed).max(nonce);
        *committed
    }

    /// Returns the number of accounts with a recorded nonce.
    pub fn len(&self) -> usize {
        self.nonces.read().len()
    }

    /// Returns true if no account has a recorded nonce.
    pub fn is_empty(&self) -> bool {
        self.nonces.read().is_empty()
    }
}

impl CommittedNonceSource for InMemoryNonceLedger {
    fn committed_nonce(&self, address: &Address) -> u64 {
        self.nonces.read().get(address).copied().unwrap_or_default()
    }
}
