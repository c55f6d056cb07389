//! Data type definitions for event fields.

use serde::Deserialize;

/// Supported field types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    /// Boolean type (true/false)
    Boolean,
    /// 32-bit signed integer
    Int32,
    /// 64-bit signed integer
    Int64,
    /// 64-bit floating point number
    Float64,
    /// UTF-8 string
    String,
    /// Date and time stored as Unix timestamp (milliseconds)
    DateTime,
}

impl DataType {
    /// Returns whether this is a numeric type.
    #[inline]
    pub fn is_numeric(&self) -> bool {
        matches!(self, DataType::Int32 | DataType::Int64 | DataType::Float64)
    }

    /// Returns whether this type can carry a logical timestamp.
    #[inline]
    pub fn is_temporal(&self) -> bool {
        matches!(self, DataType::Int32 | DataType::Int64 | DataType::DateTime)
    }

    /// Returns whether values of the two types can be compared without loss.
    ///
    /// Identical types, any two numeric types, and `DateTime` against an
    /// integer type are comparable.
    pub fn is_comparable_with(&self, other: DataType) -> bool {
        if *self == other {
            return true;
        }
        if self.is_numeric() && other.is_numeric() {
            return true;
        }
        matches!(
            (self, other),
            (DataType::DateTime, DataType::Int32 | DataType::Int64)
                | (DataType::Int32 | DataType::Int64, DataType::DateTime)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_types() {
        assert!(DataType::Int32.is_numeric());
        assert!(DataType::Float64.is_numeric());
        assert!(!DataType::String.is_numeric());
        assert!(!DataType::DateTime.is_numeric());
    }

    #[test]
    fn test_comparable() {
        assert!(DataType::Int32.is_comparable_with(DataType::Float64));
        assert!(DataType::DateTime.is_comparable_with(DataType::Int64));
        assert!(DataType::String.is_comparable_with(DataType::String));
        assert!(!DataType::String.is_comparable_with(DataType::Int32));
        assert!(!DataType::Boolean.is_comparable_with(DataType::Int64));
        assert!(!DataType::DateTime.is_comparable_with(DataType::Float64));
    }
}
