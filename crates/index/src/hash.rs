//! Hash index for equality lookups.

use crate::stats::IndexStats;
use crate::traits::{Index, RowId};
use hashbrown::HashMap;
use std::hash::Hash;

/// A hash-based index for point queries.
#[derive(Debug)]
pub struct HashIndex<K> {
    map: HashMap<K, Vec<RowId>>,
    stats: IndexStats,
}

impl<K: Eq + Hash + Clone> HashIndex<K> {
    /// Creates a new hash index.
    pub fn new() -> Self {
        Self {
            map: HashMap::new(),
            stats: IndexStats::new(),
        }
    }

    /// Returns the statistics for this index.
    pub fn stats(&self) -> &IndexStats {
        &self.stats
    }

    /// Returns the number of distinct keys.
    pub fn key_count(&self) -> usize {
        self.map.len()
    }

    /// Returns all row IDs in the index.
    pub fn row_ids(&self) -> Vec<RowId> {
        self.map.values().flatten().copied().collect()
    }
}

impl<K: Eq + Hash + Clone> Default for HashIndex<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash + Clone> Index<K> for HashIndex<K> {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_index_non_unique() {
        let mut index: HashIndex<i32> = HashIndex::new();
        index.add(1, 100);
        index.add(1, 101);
        index.add(2, 200);

        assert_eq!(index.get(&1), vec![100, 101]);
        assert_eq!(index.get(&2), vec![200]);
        assert_eq!(index.get(&3), Vec::<RowId>::new());
        assert_eq!(index.len(), 3);
        assert_eq!(index.key_count(), 2);
    }

    #[test]
    fn test_hash_index_remove() {
        let mut index: HashIndex<i32> = HashIndex::new();
        index.add(1, 100);
        index.add(1, 101);

        index.remove(&1, 100);
        assert_eq!(index.get(&1), vec![101]);

        // removing an absent pair is a no-op
        index.remove(&1, 999);
        assert_eq!(index.len(), 1);

        index.remove(&1, 101);
        assert!(!index.contains_key(&1));
        assert!(index.is_empty());
    }

    #[test]
    fn test_hash_index_composite_key() {
        let mut index: HashIndex<Vec<String>> = HashIndex::new();
        index.add(vec!["a".into(), "x".into()], 1);
        index.add(vec!["a".into(), "y".into()], 2);
        assert_eq!(index.get(&vec!["a".into(), "y".into()]), vec![2]);
        assert_eq!(index.stats().lookups(), 1);

        index.clear();
        assert!(index.is_empty());
    }
}
