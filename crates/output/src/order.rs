//! Ordering of rows within a boundary.

use eddy_core::{FieldPath, Result, Row, RowSchema};
use serde::Deserialize;
use std::cmp::Ordering;

/// One sort key of an order-by list.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct OrderKey {
    pub field: String,
    #[serde(default)]
    pub descending: bool,
}

impl OrderKey {
    /// Ascending key.
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: false,
        }
    }

    /// Descending key.
    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: true,
        }
    }
}

/// An order-by list resolved against a row schema.
#[derive(Clone, Debug, Default)]
pub(crate) struct RowOrder {
    keys: Vec<(FieldPath, bool)>,
}

impl RowOrder {
    pub(crate) fn resolve(keys: &[OrderKey], schema: &RowSchema) -> Result<Self> {
        let keys = keys
            .iter()
            .map(|k| schema.resolve(&k.field).map(|path| (path, k.descending)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { keys })
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    fn compare(&self, a: &Row, b: &Row) -> Ordering {
        for (path, descending) in &self.keys {
            let ord = a.value(*path).cmp(b.value(*path));
            let ord = if *descending { ord.reverse() } else { ord };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }

    /// Stable sort; rows with equal keys keep their production order.
    pub(crate) fn sort(&self, rows: &mut [Row]) {
        if !self.is_empty() {
            rows.sort_by(|a, b| self.compare(a, b));
        }
    }
}
