//! Lamport clock source
//!
//! Produces monotonically increasing logical timestamps for locally authored
//! transactions and folds in observed remote timestamps (update-on-receive
//! rule). Never blocks, never fails: the counter is a single atomic.
//!
//! The high-water mark is persisted inside every ledger-mutating write batch
//! and restored on open, so monotonicity survives restarts.

use crate::types::LogicalTimestamp;
use std::sync::atomic::{AtomicU64, Ordering};

/// Per-node Lamport clock
#[derive(Debug)]
pub struct LamportClock {
    counter: AtomicU64,
}

impl LamportClock {
    /// Create a clock resuming from a persisted high-water mark
    pub fn new(high_water: u64) -> Self {
        Self {
            counter: AtomicU64::new(high_water),
        }
    }

    /// Issue a timestamp strictly greater than any issued or observed before
    pub fn tick(&self) -> LogicalTimestamp {
        LogicalTimestamp(self.counter.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Fold in a timestamp observed on a merged remote transaction
    pub fn observe(&self, remote: LogicalTimestamp) {
        self.counter.fetch_max(remote.as_u64(), Ordering::SeqCst);
    }

    /// Current high-water mark (persisted alongside mutations)
    pub fn current(&self) -> u64 {
        self.counter.load(Ordering::SeqCst)
    }
}
