//! Epoch issuance for asynchronous computed flows.

use std::sync::atomic::{AtomicU64, Ordering};

/// Issues strictly increasing epoch numbers for one async computed flow.
pub(crate) struct EpochCounter(AtomicU64);

impl EpochCounter {
    pub(crate) fn new() -> Self { Self(AtomicU64::new(0)) }

    /// The epoch of the most recently started computation (0 if none yet).
    pub(crate) fn current(&self) -> u64 { self.0.load(Ordering::Acquire) }

    pub(crate) fn next(&self) -> u64 { self.0.fetch_add(1, Ordering::AcqRel) + 1 }
}
