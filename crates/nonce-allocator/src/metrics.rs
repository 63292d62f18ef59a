//! Nonce allocator metrics.

use metrics::{Counter, Gauge, counter, gauge};

/// Nonce allocator metrics
#[derive(Clone)]
pub struct NonceAllocatorMetrics {
    /// Number of next nonce suggestions that consulted the reservation tables
    pub pending_suggestions: Counter,

    /// Number of next nonce suggestions that only read the committed nonce
    pub latest_suggestions: Counter,

    /// Number of reserved nonces
    pub reservations: Counter,

    /// Number of reservations that were already held
    pub duplicate_reservations: Counter,

    /// Number of successfully finalized nonces
    pub retired_success: Counter,

    /// Number of released nonces of failed transactions
    pub retired_failure: Counter,

    /// Number of reservations dropped while pruning below a finalized nonce
    pub pruned_reservations: Counter,

    /// Number of finalized nonces evicted from the completed cache
    pub completed_evictions: Counter,

    /// Number of calls ignored because they targeted the null address
    pub ignored_null_address: Counter,

    /// Number of accounts with at least one reservation
    pub tracked_addresses: Gauge,
}

impl NonceAllocatorMetrics {
    /// Update the tracked address gauge
    #[inline]
    pub fn set_tracked_addresses(&self, count: usize) {
        self.tracked_addresses.set(count as f64);
    }

    /// Increment the pruned reservations counter
    #[inline]
    pub fn inc_pruned(&self, count: usize) {
        self.pruned_reservations.increment(count as u64);
    }
}

impl Default for NonceAllocatorMetrics {
    fn default() -> Self {
        Self {
            pending_suggestions: counter!(scoped("suggestions"), "mode" => "pending"),
            latest_suggestions: counter!(scoped("suggestions"), "mode" => "latest"),
            reservations: counter!(scoped("reservations")),
            duplicate_reservations: counter!(scoped("duplicate_reservations")),
            retired_success: counter!(scoped("retired"), "outcome" => "success"),
            retired_failure: counter!(scoped("retired"), "outcome" => "failure"),
            pruned_reservations: counter!(scoped("pruned_reservations")),
            completed_evictions: counter!(scoped("completed_evictions")),
            ignored_null_address: counter!(scoped("ignored_null_address")),
            tracked_addresses: gauge!(scoped("tracked_addresses")),
        }
    }
}

/// Prefix shared by every nonce allocator metric.
const SCOPE: &str = "nonce_allocator";

fn scoped(name: &str) -> String {
    format!("{SCOPE}.{name}")
}
