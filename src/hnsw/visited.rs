//! Visited-slot tracking for graph traversal.
//!
//! An epoch array instead of a `HashSet`: marking is one store, membership is
//! one load, and "clearing" bumps the epoch counter so repeated searches pay
//! nothing to reset. Sets are pooled per thread because queries run
//! concurrently under the read lock.

use std::cell::RefCell;

const POOL_LIMIT: usize = 4;

thread_local! {
    static POOL: RefCell<Vec<EpochArray>> = const { RefCell::new(Vec::new()) };
}

#[derive(Default)]
struct EpochArray {
    epochs: Vec<u32>,
    epoch: u32,
}

impl EpochArray {
    fn advance(&mut self) {
        self.epoch = self.epoch.wrapping_add(1);
        if self.epoch == 0 {
            // wraparound: stale marks from 2^32 searches ago would alias
            self.epochs.fill(0);
            self.epoch = 1;
        }
    }
}

/// Borrowed visited set; returns to the thread-local pool on drop.
pub(crate) struct VisitedSet {
    inner: EpochArray,
}

impl VisitedSet {
    /// Fetch a cleared set sized for at least `capacity` slots.
    pub fn acquire(capacity: usize) -> Self {
        let mut inner = POOL
            .with(|pool| pool.borrow_mut().pop())
            .unwrap_or_default();
        if inner.epochs.len() < capacity {
            inner.epochs.resize(capacity.next_power_of_two().max(1024), 0);
        }
        inner.advance();
        Self { inner }
    }

    /// Mark `slot` visited. Returns `true` the first time, `false` after.
    #[inline]
    pub fn insert(&mut self, slot: usize) -> bool {
        if slot >= self.inner.epochs.len() {
            let grown = (slot + 1).next_power_of_two().max(1024);
            self.inner.epochs.resize(grown, 0);
        }
        if self.inner.epochs[slot] == self.inner.epoch {
            return false;
        }
        self.inner.epochs[slot] = self.inner.epoch;
        true
    }
}

impl Drop for VisitedSet {
    fn drop(&mut self) {
        let inner = std::mem::take(&mut self.inner);
        POOL.with(|pool| {
            let mut pool = pool.borrow_mut();
            if pool.len() < POOL_LIMIT {
                pool.push(inner);
            }
        });
    }
}
