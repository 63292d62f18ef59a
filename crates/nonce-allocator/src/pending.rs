//! Nonces reserved by admitted transactions that are not finalized yet.

use alloy_primitives::{Address, map::HashMap};

/// Per-account reservations, each kept as an ascending sequence.
///
/// An account whose sequence becomes empty is removed from the table.
#[derive(Debug, Default)]
pub(crate) struct PendingReservations {
    by_address: HashMap<Address, Vec<u64>>,
}

impl PendingReservations {
    /// Returns true if `nonce` is reserved for `address`.
    pub(crate) fn contains(&self, address: &Address, nonce: u64) -> bool {
        self.by_address
            .get(address)
            .is_some_and(|reserved| sorted_contains(reserved, nonce))
    }

    /// Reserves `nonce` for `address`, keeping the sequence ascending.
    ///
    /// Returns false if the nonce was already reserved. The duplicate is still
    /// recorded so that every reservation is matched by exactly one release.
    pub(crate) fn insert(&mut self, address: Address, nonce: u64) -> bool {
        let reserved = self.by_address.entry(address).or_default();
        let fresh = !sorted_contains(reserved, nonce);
        let idx = reserved.partition_point(|&n| n <= nonce);
        reserved.insert(idx, nonce);
        fresh
    }

    /// Releases a single reservation of `nonce`, if any.
    pub(crate) fn remove_one(&mut self, address: &Address, nonce: u64) -> bool {
        let Some(reserved) = self.by_address.get_mut(address) else {
            return false;
        };
        let Some(idx) = reserved.iter().position(|&n| n == nonce) else {
            return false;
        };
        reserved.remove(idx);
        if reserved.is_empty() {
            self.by_address.remove(address);
        }
        true
    }

    /// Drops the first reservation `>= nonce` together with everything below it.
    ///
    /// Nothing is dropped if every reservation is below `nonce`. Returns the
    /// number of dropped reservations.
    pub(crate) fn remove_prefix_through(&mut self, address: &Address, nonce: u64) -> usize {
        let Some(reserved) = self.by_address.get_mut(address) else {
            return 0;
        };
        let Some(idx) = reserved.iter().position(|&n| n >= nonce) else {
            return 0;
        };
        reserved.drain(..=idx);
        if reserved.is_empty() {
            self.by_address.remove(address);
        }
        idx + 1
    }

    /// Returns the reservations of `address` in ascending order.
    pub(crate) fn get(&self, address: &Address) -> &[u64] {
        self.by_address.get(address).map(Vec::as_slice).unwrap_or_default()
    }

    /// Number of accounts with at least one reservation.
    pub(crate) fn len(&self) -> usize {
        self.by_address.len()
    }
}

/// Scans an ascending slice for `item`, bailing as soon as a larger value shows up.
fn sorted_contains(sorted: &[u64], item: u64) -> bool {
    for &n in sorted {
        if n == item {
            return true;
        }
        if n > item {
            return false;
        }
    }
    false
}
