//! Nonce suggestion, reservation and retirement for concurrently admitted transactions.

use std::sync::Arc;

use alloy_primitives::Address;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::{
    completed::CompletedNonces,
    config::{Error as ConfigError, NonceAllocatorConfig},
    metrics::NonceAllocatorMetrics,
    pending::PendingReservations,
    source::CommittedNonceSource,
};

/// The burn address. Transactions from it are synthetic and never tracked.
pub const NULL_ADDRESS: Address = Address::ZERO;

/// Hands out per-account nonces to concurrently admitted transactions.
///
/// The allocator combines the committed nonce of an account with the nonces
/// reserved by in-flight transactions and a bounded record of recently
/// finalized nonces.
///
/// The expected flow for a transaction is:
/// 1. [`suggest_next`](Self::suggest_next) to learn the next free nonce,
/// 2. [`reserve`](Self::reserve) once the transaction is admitted,
/// 3. [`retire`](Self::retire) once its outcome is known.
///
/// A suggestion is advisory: two callers may be handed the same nonce if
/// neither reserved it in between. Use
/// [`suggest_and_reserve`](Self::suggest_and_reserve) to get a binding nonce
/// in one step.
///
/// All operations, for all accounts, are serialized under a single lock. The
/// handle is cheap to clone and clones share the same state.
///
/// # Limitations
///
/// * The record of finalized nonces is bounded. Once a pair is evicted the
///   committed nonce of the source is the only protection against reusing it,
///   which holds as long as the source has advanced past the evicted nonce.
/// * Nothing is persisted, a restart derives everything from the source again.
#[derive(Clone)]
pub struct NonceAllocator<Source> {
    /// Authoritative committed nonces.
    source: Source,
    /// Reservations and finalized nonces, one consistency domain.
    state: Arc<Mutex<AllocationState>>,
    metrics: NonceAllocatorMetrics,
}

impl<Source: CommittedNonceSource> NonceAllocator<Source> {
    /// Creates an allocator with the default configuration.
    pub fn new(source: Source) -> Self {
        Self::from_capacity(source, NonceAllocatorConfig::default().completed_capacity)
    }

    /// Creates an allocator with the given configuration.
    ///
    /// Returns an error if the configuration doesn't pass
    /// [`NonceAllocatorConfig::validate`].
    pub fn with_config(
        source: Source,
        config: NonceAllocatorConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::from_capacity(source, config.completed_capacity))
    }

    fn from_capacity(source: Source, completed_capacity: u32) -> Self {
        Self {
            source,
            state: Arc::new(Mutex::new(AllocationState {
                pending: PendingReservations::default(),
                completed: CompletedNonces::new(completed_capacity),
            })),
            metrics: NonceAllocatorMetrics::default(),
        }
    }

    /// Returns the next nonce `address` should use.
    ///
    /// Without `include_pending` this is the committed nonce of the account,
    /// which is only useful for display: concurrent callers all get the same
    /// value.
    ///
    /// With `include_pending` the first nonce at or above the committed nonce
    /// that is neither reserved nor recently finalized is returned. The nonce
    /// is not reserved. If every nonce up to `u64::MAX` is taken, `u64::MAX`
    /// is returned anyway.
    pub fn suggest_next(&self, address: &Address, include_pending: bool) -> u64 {
        let mut state = self.state.lock();
        let latest = self.source.committed_nonce(address);

        if !include_pending {
            self.metrics.latest_suggestions.increment(1);
            trace!(target: "nonce_allocator", %address, nonce = latest, "suggested committed nonce");
            return latest;
        }

        self.metrics.pending_suggestions.increment(1);
        let Some(next) = state.next_free(address, latest) else {
            warn!(target: "nonce_allocator", %address, latest, "no free nonce left");
            return u64::MAX;
        };
        trace!(target: "nonce_allocator", %address, latest, nonce = next, "suggested next free nonce");
        next
    }

    /// Reserves `nonce` for an admitted transaction of `address`.
    ///
    /// The nonce is expected to come from a fresh suggestion and is not checked
    /// against finalized nonces. No-op for [`NULL_ADDRESS`].
    pub fn reserve(&self, address: Address, nonce: u64) {
        if address == NULL_ADDRESS {
            self.metrics.ignored_null_address.increment(1);
            return;
        }

        let mut state = self.state.lock();
        state.reserve(address, nonce, &self.metrics);
    }

    /// Suggests the next free nonce of `address` and reserves it atomically.
    ///
    /// For [`NULL_ADDRESS`] the suggestion is returned without reserving it.
    ///
    /// Returns `None` if every nonce from the committed nonce up to `u64::MAX`
    /// is reserved or finalized.
    pub fn suggest_and_reserve(&self, address: Address) -> Option<u64> {
        let mut state = self.state.lock();
        let latest = self.source.committed_nonce(&address);
        self.metrics.pending_suggestions.increment(1);
        let Some(next) = state.next_free(&address, latest) else {
            warn!(target: "nonce_allocator", %address, latest, "no free nonce left");
            return None;
        };

        if address == NULL_ADDRESS {
            self.metrics.ignored_null_address.increment(1);
        } else {
            state.reserve(address, next, &self.metrics);
        }
        Some(next)
    }

    /// Resolves the reservation of `nonce` once the transaction's outcome is known.
    ///
    /// On success the nonce is recorded as finalized and every reservation up
    /// to and including the first one at or above `nonce` is dropped: nonces
    /// are sequential, so lower reservations are consumed or superseded.
    ///
    /// On failure only the reservation of `nonce` itself is released, making
    /// the nonce available to future suggestions.
    ///
    /// No-op for [`NULL_ADDRESS`].
    pub fn retire(&self, address: Address, nonce: u64, success: bool) {
        if address == NULL_ADDRESS {
            self.metrics.ignored_null_address.increment(1);
            return;
        }

        let mut state = self.state.lock();
        if success {
            self.metrics.retired_success.increment(1);
            if state.completed.add(address, nonce) {
                self.metrics.completed_evictions.increment(1);
                debug!(target: "nonce_allocator", "evicted least recently finalized nonce");
            }

            let pruned = state.pending.remove_prefix_through(&address, nonce);
            if pruned > 0 {
                self.metrics.inc_pruned(pruned);
                debug!(target: "nonce_allocator", %address, nonce, pruned, "pruned reservations below finalized nonce");
            }
            trace!(target: "nonce_allocator", %address, nonce, "finalized nonce");
        } else {
            self.metrics.retired_failure.increment(1);
            let released = state.pending.remove_one(&address, nonce);
            trace!(target: "nonce_allocator", %address, nonce, released, "released nonce");
        }
        self.metrics.set_tracked_addresses(state.pending.len());
    }

    /// Returns the reserved nonces of `address` in ascending order.
    pub fn pending_nonces(&self, address: &Address) -> Vec<u64> {
        self.state.lock().pending.get(address).to_vec()
    }

    /// Returns true if `nonce` of `address` is remembered as finalized.
    ///
    /// Unlike the lookups done while suggesting, this doesn't count as a use
    /// of the entry.
    pub fn is_completed(&self, address: Address, nonce: u64) -> bool {
        self.state.lock().completed.peek(address, nonce)
    }

    /// Returns the number of accounts with at least one reservation.
    pub fn tracked_addresses(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Returns the number of remembered finalized nonces.
    pub fn completed_len(&self) -> usize {
        self.state.lock().completed.len()
    }

    /// Returns the committed nonce source, e.g. to advance it after a block.
    pub fn source(&self) -> &Source {
        &self.source
    }
}

impl<Source> std::fmt::Debug for NonceAllocator<Source> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut debug = f.debug_struct("NonceAllocator");
        match self.state.try_lock() {
            Some(state) => debug
                .field("tracked_addresses", &state.pending.len())
                .field("completed", &state.completed),
            None => debug.field("state", &format_args!("<locked>")),
        };
        debug.finish_non_exhaustive()
    }
}

/// Everything guarded by the allocator lock.
#[derive(Debug)]
struct AllocationState {
    pending: PendingReservations,
    completed: CompletedNonces,
}

impl AllocationState {
    /// Probes upwards from `from` for the first nonce that is neither reserved
    /// nor finalized. Returns `None` once the probe runs past `u64::MAX`.
    fn next_free(&mut self, address: &Address, from: u64) -> Option<u64> {
        let mut candidate = from;
        while self.pending.contains(address, candidate)
            || self.completed.contains(*address, candidate)
        {
            candidate = candidate.checked_add(1)?;
        }
        Some(candidate)
    }

    fn reserve(&mut self, address: Address, nonce: u64, metrics: &NonceAllocatorMetrics) {
        metrics.reservations.increment(1);
        if !self.pending.insert(address, nonce) {
            metrics.duplicate_reservations.increment(1);
            warn!(target: "nonce_allocator", %address, nonce, "nonce reserved twice");
        }
        metrics.set_tracked_addresses(self.pending.len());
        trace!(target: "nonce_allocator", %address, nonce, "reserved nonce");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::InMemoryNonceLedger;

    fn allocator_at(address: Address, committed: u64) -> NonceAllocator<InMemoryNonceLedger> {
        let ledger = InMemoryNonceLedger::new();
        ledger.set_committed(address, committed);
        NonceAllocator::new(ledger)
    }

    #[test_case::test_case(0)]
    #[test_case::test_case(17)]
    fn suggests_committed_nonce_without_reservations(committed: u64) {
        let address = Address::repeat_byte(1);
        let allocator = allocator_at(address, committed);

        assert_eq!(allocator.suggest_next(&address, false), committed);
        assert_eq!(allocator.suggest_next(&address, true), committed);
    }

    #[test]
    fn unknown_account_starts_at_zero() {
        let allocator = NonceAllocator::new(InMemoryNonceLedger::new());
        assert_eq!(allocator.suggest_next(&Address::repeat_byte(3), true), 0);
    }

    #[test_case::test_case(0)]
    #[test_case::test_case(10)]
    fn skips_reserved_and_finalized_nonces(committed: u64) {
        let address = Address::repeat_byte(1);
        let allocator = allocator_at(address, committed);

        allocator.reserve(address, committed);
        allocator.reserve(address, committed + 1);
        allocator.reserve(address, committed + 3);
        {
            let mut state = allocator.state.lock();
            state.completed.add(address, committed + 2);
        }

        assert_eq!(allocator.suggest_next(&address, true), committed + 4);
        // the committed nonce ignores in-flight state
        assert_eq!(allocator.suggest_next(&address, false), committed);
    }

    #[test]
    fn suggestion_does_not_reserve() {
        let address = Address::repeat_byte(1);
        let allocator = allocator_at(address, 4);

        assert_eq!(allocator.suggest_next(&address, true), 4);
        assert_eq!(allocator.suggest_next(&address, true), 4);
        assert!(allocator.pending_nonces(&address).is_empty());
    }

    #[test]
    fn reserved_nonce_is_not_suggested_again() {
        let address = Address::repeat_byte(1);
        let allocator = allocator_at(address, 4);

        let nonce = allocator.suggest_next(&address, true);
        allocator.reserve(address, nonce);

        assert_eq!(allocator.suggest_next(&address, true), 5);
    }

    #[test]
    fn failure_releases_exactly_one_slot() {
        let address = Address::repeat_byte(1);
        let allocator = allocator_at(address, 5);
        for nonce in [5, 6, 7] {
            allocator.reserve(address, nonce);
        }

        allocator.retire(address, 6, false);

        assert_eq!(allocator.pending_nonces(&address), vec![5, 7]);
        assert!(!allocator.is_completed(address, 6));
        assert_eq!(allocator.suggest_next(&address, true), 6);
    }

    #[test]
    fn success_prunes_the_prefix() {
        let address = Address::repeat_byte(1);
        let allocator = allocator_at(address, 5);
        for nonce in [5, 6, 8] {
            allocator.reserve(address, nonce);
        }

        allocator.retire(address, 6, true);

        assert_eq!(allocator.pending_nonces(&address), vec![8]);
        assert!(allocator.is_completed(address, 6));
        // 5 was pruned, 6 is finalized, 7 is free
        assert_eq!(allocator.suggest_next(&address, true), 5);
        allocator.reserve(address, 5);
        assert_eq!(allocator.suggest_next(&address, true), 7);
    }

    #[test]
    fn success_without_reservations_only_records_completion() {
        let address = Address::repeat_byte(1);
        let other = Address::repeat_byte(2);
        let allocator = allocator_at(address, 0);
        allocator.reserve(other, 0);

        allocator.retire(address, 0, true);

        assert!(allocator.is_completed(address, 0));
        assert!(allocator.pending_nonces(&address).is_empty());
        assert_eq!(allocator.pending_nonces(&other), vec![0]);
        assert_eq!(allocator.tracked_addresses(), 1);
        assert_eq!(allocator.suggest_next(&address, true), 1);
    }

    #[test]
    fn failure_without_reservations_is_a_no_op() {
        let address = Address::repeat_byte(1);
        let allocator = allocator_at(address, 0);

        allocator.retire(address, 0, false);

        assert_eq!(allocator.completed_len(), 0);
        assert_eq!(allocator.tracked_addresses(), 0);
    }

    #[test]
    fn null_address_is_never_tracked() {
        let allocator = allocator_at(NULL_ADDRESS, 3);

        allocator.reserve(NULL_ADDRESS, 3);
        assert_eq!(allocator.suggest_next(&NULL_ADDRESS, true), 3);
        assert_eq!(allocator.tracked_addresses(), 0);

        allocator.retire(NULL_ADDRESS, 3, true);
        assert!(!allocator.is_completed(NULL_ADDRESS, 3));

        assert_eq!(allocator.suggest_and_reserve(NULL_ADDRESS), Some(3));
        assert!(allocator.pending_nonces(&NULL_ADDRESS).is_empty());
    }

    #[test]
    fn suggest_and_reserve_hands_out_distinct_nonces() {
        let address = Address::repeat_byte(1);
        let allocator = allocator_at(address, 2);

        let nonces: Vec<_> = (0..4)
            .filter_map(|_| allocator.suggest_and_reserve(address))
            .collect();

        assert_eq!(nonces, vec![2, 3, 4, 5]);
        assert_eq!(allocator.pending_nonces(&address), nonces);
    }

    #[test]
    fn evicted_completion_falls_back_to_committed_nonce() {
        let address = Address::repeat_byte(1);
        let ledger = InMemoryNonceLedger::new();
        let allocator = NonceAllocator::with_config(
            &ledger,
            NonceAllocatorConfig::default().with_completed_capacity(2),
        )
        .unwrap();

        for nonce in 0..3 {
            let next = allocator.suggest_and_reserve(address).unwrap();
            assert_eq!(next, nonce);
            allocator.retire(address, next, true);
        }

        // nonce 0 fell out of the cache and is suggested again
        assert!(!allocator.is_completed(address, 0));
        assert_eq!(allocator.completed_len(), 2);
        assert_eq!(allocator.suggest_next(&address, true), 0);

        // once the ledger caught up the floor covers it
        allocator.source().advance_to(address, 3);
        assert_eq!(ledger.committed_nonce(&address), 3);
        assert_eq!(allocator.suggest_next(&address, true), 3);
    }

    #[test]
    fn clones_share_state() {
        let address = Address::repeat_byte(1);
        let allocator = NonceAllocator::new(Arc::new(InMemoryNonceLedger::new()));
        let clone = allocator.clone();

        clone.reserve(address, 0);

        assert_eq!(allocator.suggest_next(&address, true), 1);
    }

    #[test]
    fn last_nonce_is_handed_out_once() {
        let address = Address::repeat_byte(1);
        let allocator = allocator_at(address, u64::MAX);

        assert_eq!(allocator.suggest_and_reserve(address), Some(u64::MAX));
        assert_eq!(allocator.suggest_and_reserve(address), None);
        assert_eq!(allocator.pending_nonces(&address), vec![u64::MAX]);

        // the advisory suggestion saturates
        assert_eq!(allocator.suggest_next(&address, true), u64::MAX);
    }

    #[test]
    fn rejects_zero_capacity_config() {
        let err = NonceAllocator::with_config(
            InMemoryNonceLedger::new(),
            NonceAllocatorConfig::default().with_completed_capacity(0),
        )
        .unwrap_err();

        assert!(matches!(err, ConfigError::InvalidCapacity));
    }

    #[test]
    fn debug_does_not_block_while_locked() {
        let allocator = NonceAllocator::new(InMemoryNonceLedger::new());
        allocator.reserve(Address::repeat_byte(1), 0);

        let unlocked = format!("{allocator:?}");
        assert!(unlocked.contains("tracked_addresses: 1"), "{unlocked}");

        let _guard = allocator.state.lock();
        let locked = format!("{allocator:?}");
        assert!(locked.contains("<locked>"), "{locked}");
    }
}
