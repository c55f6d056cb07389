//! Index trait definitions.

use eddy_core::{DataType, Error, EventId};
use thiserror::Error as ThisError;

/// Identity of an indexed row.
pub type RowId = EventId;

/// A key range for index queries.
#[derive(Clone, Debug, PartialEq)]
pub enum KeyRange<K> {
    /// All keys
    All,
    /// A single key (equality)
    Only(K),
    /// Keys >= lower bound
    LowerBound { value: K, exclusive: bool },
    /// Keys <= upper bound
    UpperBound { value: K, exclusive: bool },
    /// Keys between lower and upper bounds
    Bound {
        lower: K,
        upper: K,
        lower_exclusive: bool,
        upper_exclusive: bool,
    },
}

impl<K: Clone + Ord> KeyRange<K> {
    /// Creates a range for a single key.
    pub fn only(key: K) -> Self {
        KeyRange::Only(key)
    }

    /// Creates a range with a lower bound.
    pub fn lower_bound(value: K, exclusive: bool) -> Self {
        KeyRange::LowerBound { value, exclusive }
    }

    /// Creates a range with an upper bound.
    pub fn upper_bound(value: K, exclusive: bool) -> Self {
        KeyRange::UpperBound { value, exclusive }
    }

    /// Creates a range with both bounds.
    pub fn bound(lower: K, upper: K, lower_exclusive: bool, upper_exclusive: bool) -> Self {
        KeyRange::Bound {
            lower,
            upper,
            lower_exclusive,
            upper_exclusive,
        }
    }

    /// Returns true if this range represents all values (unbounded).
    pub fn is_all(&self) -> bool {
        matches!(self, KeyRange::All)
    }

    /// Returns the bound values of this range.
    pub fn bounds(&self) -> impl Iterator<Item = &K> {
        let (a, b) = match self {
            KeyRange::All => (None, None),
            KeyRange::Only(k) => (Some(k), None),
            KeyRange::LowerBound { value, .. } | KeyRange::UpperBound { value, .. } => {
                (Some(value), None)
            }
            KeyRange::Bound { lower, upper, .. } => (Some(lower), Some(upper)),
        };
        a.into_iter().chain(b)
    }

    /// Maps the bound values to another key type.
    pub fn map<U, F: Fn(&K) -> U>(&self, f: F) -> KeyRange<U> {
        match self {
            KeyRange::All => KeyRange::All,
            KeyRange::Only(k) => KeyRange::Only(f(k)),
            KeyRange::LowerBound { value, exclusive } => KeyRange::LowerBound {
                value: f(value),
                exclusive: *exclusive,
            },
            KeyRange::UpperBound { value, exclusive } => KeyRange::UpperBound {
                value: f(value),
                exclusive: *exclusive,
            },
            KeyRange::Bound {
                lower,
                upper,
                lower_exclusive,
                upper_exclusive,
            } => KeyRange::Bound {
                lower: f(lower),
                upper: f(upper),
                lower_exclusive: *lower_exclusive,
                upper_exclusive: *upper_exclusive,
            },
        }
    }

    /// Checks if a key is within this range.
    pub fn contains(&self, key: &K) -> bool {
        match self {
            KeyRange::All => true,
            KeyRange::Only(k) => key == k,
            KeyRange::LowerBound { value, exclusive } => {
                if *exclusive {
                    key > value
                } else {
                    key >= value
                }
            }
            KeyRange::UpperBound { value, exclusive } => {
                if *exclusive {
                    key < value
                } else {
                    key <= value
                }
            }
            KeyRange::Bound {
                lower,
                upper,
                lower_exclusive,
                upper_exclusive,
            } => {
                let lower_ok = if *lower_exclusive {
                    key > lower
                } else {
                    key >= lower
                };
                let upper_ok = if *upper_exclusive {
                    key < upper
                } else {
                    key <= upper
                };
                lower_ok && upper_ok
            }
        }
    }
}

/// Core trait for all index implementations.
pub trait Index<K> {
    /// Adds a key-row pair to the index.
    fn add(&mut self, key: K, row: RowId);

    /// Removes one key-row pair. Missing pairs are ignored.
    fn remove(&mut self, key: &K, row: RowId);

    /// Gets all row IDs associated with a key, in insertion order.
    fn get(&self, key: &K) -> Vec<RowId>;

    /// Checks if the index contains the given key.
    fn contains_key(&self, key: &K) -> bool;

    /// Returns the number of key-row pairs in the index.
    fn len(&self) -> usize;

    /// Returns true if the index is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clears all entries from the index.
    fn clear(&mut self);
}

/// Trait for indexes that support range queries.
pub trait RangeIndex<K>: Index<K> {
    /// Gets all row IDs within the given key range, in key order.
    fn get_range(&self, range: &KeyRange<K>) -> Vec<RowId>;
}

/// Error type for index operations.
#[derive(Clone, Debug, PartialEq, ThisError)]
pub enum IndexError {
    /// The handle does not refer to a live index.
    #[error("index {0} is not registered")]
    UnknownHandle(u64),
    /// A lookup supplied the wrong number of key components.
    #[error("index expects {expected} key components, got {got}")]
    KeyArity { expected: usize, got: usize },
    /// A range lookup was issued against an equality-only index.
    #[error("index over [{0}] does not support range lookups")]
    NotRanged(String),
    /// The key shape names a field the schema does not have.
    #[error("unknown index field '{0}'")]
    UnknownField(String),
    /// A key component cannot be compared with the indexed field.
    #[error("key for '{field}' must be comparable with {expected:?}, got {got:?}")]
    TypeMismatch {
        field: String,
        expected: DataType,
        got: DataType,
    },
}

impl From<IndexError> for Error {
    fn from(err: IndexError) -> Self {
        match err {
            IndexError::TypeMismatch {
                field,
                expected,
                got,
            } => Error::type_mismatch(field, expected, got),
            IndexError::UnknownField(field) => Error::unknown_field("index", field),
            other => Error::invalid_operation(other.to_string()),
        }
    }
}
