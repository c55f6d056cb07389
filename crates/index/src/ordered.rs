//! Ordered index for range lookups.

use crate::stats::IndexStats;
use crate::traits::{Index, KeyRange, RangeIndex, RowId};
use std::collections::BTreeMap;
use std::ops::Bound;

/// An ordered index backed by a `BTreeMap`.
#[derive(Debug)]
pub struct OrderedIndex<K> {
    map: BTreeMap<K, Vec<RowId>>,
    stats: IndexStats,
}

impl<K: Ord + Clone> OrderedIndex<K> {
    /// Creates a new ordered index.
    pub fn new() -> Self {
        Self {
            map: BTreeMap::new(),
            stats: IndexStats::new(),
        }
    }

    /// Returns the statistics for this index.
    pub fn stats(&self) -> &IndexStats {
        &self.stats
    }

    /// Returns the smallest key.
    pub fn min_key(&self) -> Option<&K> {
        self.map.keys().next()
    }

    /// Returns the largest key.
    pub fn max_key(&self) -> Option<&K> {
        self.map.keys().next_back()
    }

    /// Returns all row IDs in key order.
    pub fn row_ids(&self) -> Vec<RowId> {
        self.map.values().flatten().copied().collect()
    }
}

impl<K: Ord + Clone> Default for OrderedIndex<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Ord + Clone> Index<K> for OrderedIndex<K> {
    fn add(&mut self, key: K, row: RowId) {
        self.map.entry(key).or_default().push(row);
        self.stats.add_entries(1);
    }

    fn remove(&mut self, key: &K, row: RowId) {
        if let Some(rows) = self.map.get_mut(key) {
            if let Some(pos) = rows.iter().position(|&r| r == row) {
                rows.remove(pos);
                self.stats.remove_entries(1);
            }
            if rows.is_empty() {
                self.map.remove(key);
            }
        }
    }

    fn get(&self, key: &K) -> Vec<RowId> {
        self.stats.record_lookup();
        self.map.get(key).cloned().unwrap_or_default()
    }

    fn contains_key(&self, key: &K) -> bool {
        self.map.contains_key(key)
    }

    fn len(&self) -> usize {
        self.stats.entries()
    }

    fn clear(&mut self) {
        self.map.clear();
        self.stats.clear();
    }
}

impl<K: Ord + Clone> RangeIndex<K> for OrderedIndex<K> {
    fn get_range(&self, range: &KeyRange<K>) -> Vec<RowId> {
        self.stats.record_lookup();
        let (lower, upper) = match range {
            KeyRange::All => (Bound::Unbounded, Bound::Unbounded),
            KeyRange::Only(k) => (Bound::Included(k), Bound::Included(k)),
            KeyRange::LowerBound { value, exclusive } => (bound(value, *exclusive), Bound::Unbounded),
            KeyRange::UpperBound { value, exclusive } => (Bound::Unbounded, bound(value, *exclusive)),
            KeyRange::Bound {
                lower,
                upper,
                lower_exclusive,
                upper_exclusive,
            } => {
                // BTreeMap::range panics on inverted bounds
                if lower > upper || (lower == upper && (*lower_exclusive || *upper_exclusive)) {
                    return Vec::new();
                }
                (bound(lower, *lower_exclusive), bound(upper, *upper_exclusive))
            }
        };
        self.map
            .range::<K, _>((lower, upper))
            .flat_map(|(_, rows)| rows.iter().copied())
            .collect()
    }
}

fn bound<K>(value: &K, exclusive: bool) -> Bound<&K> {
    if exclusive {
        Bound::Excluded(value)
    } else {
        Bound::Included(value)
    }
}
