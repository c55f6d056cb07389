//! Index statistics.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Counters for one index.
///
/// Lookups are counted through a shared reference so that readers holding
/// only a read lock can record them.
#[derive(Debug, Default)]
pub struct IndexStats {
    entries: AtomicUsize,
    lookups: AtomicU64,
}

impl IndexStats {
    /// Creates a new empty stats instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of key-row pairs.
    pub fn entries(&self) -> usize {
        self.entries.load(Ordering::Relaxed)
    }

    /// Returns the number of lookups served.
    pub fn lookups(&self) -> u64 {
        self.lookups.load(Ordering::Relaxed)
    }

    /// Increments the entry count.
    pub fn add_entries(&self, count: usize) {
        self.entries.fetch_add(count, Ordering::Relaxed);
    }

    /// Decrements the entry count.
    pub fn remove_entries(&self, count: usize) {
        self.entries.fetch_sub(count, Ordering::Relaxed);
    }

    /// Records one lookup.
    pub fn record_lookup(&self) {
        self.lookups.fetch_add(1, Ordering::Relaxed);
    }

    /// Resets the entry count to zero.
    pub fn clear(&self) {
        self.entries.store(0, Ordering::Relaxed);
    }
}

impl Clone for IndexStats {
    fn clone(&self) -> Self {
        Self {
            entries: AtomicUsize::new(self.entries()),
            lookups: AtomicU64::new(self.lookups()),
        }
    }
}
