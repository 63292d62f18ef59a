//! Per-account nonce allocation and deduplication for concurrent transaction admission.
//!
//! The [`NonceAllocator`] suggests the next free nonce of an account, tracks
//! the nonces reserved by in-flight transactions and remembers recently
//! finalized nonces so they are not handed out again before the committed
//! nonce catches up.

#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

pub mod allocator;
pub mod config;
pub mod metrics;
pub mod source;

mod completed;
mod pending;

pub use allocator::{NULL_ADDRESS, NonceAllocator};
pub use completed::DEFAULT_COMPLETED_CAPACITY;
pub use config::NonceAllocatorConfig;
pub use crate::metrics::NonceAllocatorMetrics;
pub use source::{CommittedNonceSource, InMemoryNonceLedger};
