//! Incremental changes.
//!
//! [`RowDelta`] is the insert/remove pair produced by one evaluation step of a
//! statement. [`Delta`] is a single weighted change, used where contributions
//! are counted (aggregation tables).

use crate::row::{Row, RowKey};
use hashbrown::HashMap;

/// A weighted change to a data item.
///
/// The `diff` field indicates the multiplicity of the change:
/// - `+1` means insertion
/// - `-1` means deletion
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Delta<T> {
    /// The data being changed
    pub data: T,
    /// The differential: +1 for insert, -1 for delete
    pub diff: i32,
}

impl<T> Delta<T> {
    /// Creates an insertion delta (+1).
    #[inline]
    pub fn insert(data: T) -> Self {
        Self { data, diff: 1 }
    }

    /// Creates a deletion delta (-1).
    #[inline]
    pub fn delete(data: T) -> Self {
        Self { data, diff: -1 }
    }

    /// Returns true if this is an insertion (diff > 0).
    #[inline]
    pub fn is_insert(&self) -> bool {
        self.diff > 0
    }

    /// Maps the data to a new type.
    #[inline]
    pub fn map<U, F>(self, f: F) -> Delta<U>
    where
        F: FnOnce(T) -> U,
    {
        Delta {
            data: f(self.data),
            diff: self.diff,
        }
    }
}

/// One atomic change to a statement's result.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RowDelta {
    pub inserted: Vec<Row>,
    pub removed: Vec<Row>,
}

impl RowDelta {
    /// Creates an empty delta.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a delta from its two sides.
    pub fn from_parts(inserted: Vec<Row>, removed: Vec<Row>) -> Self {
        Self { inserted, removed }
    }

    /// Returns true if nothing was inserted or removed.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.removed.is_empty()
    }

    /// Returns the total number of rows on both sides.
    #[inline]
    pub fn len(&self) -> usize {
        self.inserted.len() + self.removed.len()
    }

    /// Appends another delta of the same boundary.
    pub fn merge(&mut self, other: RowDelta) {
        self.inserted.extend(other.inserted);
        self.removed.extend(other.removed);
    }

    /// Drops rows that appear on both sides.
    ///
    /// Matching is one-for-one: a row inserted twice and removed once keeps
    /// one insertion. Relative order of the surviving rows is unchanged.
    pub fn elide(&mut self) {
        if self.inserted.is_empty() || self.removed.is_empty() {
            return;
        }
        let mut removed_counts: HashMap<RowKey, Vec<usize>> = HashMap::new();
        for (i, row) in self.removed.iter().enumerate() {
            removed_counts.entry(row.key()).or_default().push(i);
        }

        let mut drop_removed = vec![false; self.removed.len()];
        let mut drop_inserted = vec![false; self.inserted.len()];
        for (i, row) in self.inserted.iter().enumerate() {
            if let Some(candidates) = removed_counts.get_mut(&row.key()) {
                if let Some(pos) = candidates
                    .iter()
                    .position(|&r| !drop_removed[r] && self.removed[r] == *row)
                {
                    let r = candidates.remove(pos);
                    drop_removed[r] = true;
                    drop_inserted[i] = true;
                }
            }
        }

        let mut i = 0;
        self.inserted.retain(|_| {
            let keep = !drop_inserted[i];
            i += 1;
            keep
        });
        let mut r = 0;
        self.removed.retain(|_| {
            let keep = !drop_removed[r];
            r += 1;
            keep
        });
    }
}
