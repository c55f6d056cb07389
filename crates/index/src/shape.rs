//! Key shapes.

use std::fmt;

/// The field layout an index is keyed on.
///
/// Equality fields are kept sorted so that predicates naming the same fields
/// in a different order map to the same shape.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct KeyShape {
    equality: Vec<String>,
    range: Option<String>,
}

impl KeyShape {
    /// Creates a shape from equality fields and an optional range field.
    pub fn new<I, S, R>(equality: I, range: Option<R>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        R: Into<String>,
    {
        let mut equality: Vec<String> = equality.into_iter().map(Into::into).collect();
        equality.sort();
        equality.dedup();
        Self {
            equality,
            range: range.map(Into::into),
        }
    }

    /// Creates an equality-only shape.
    pub fn equality<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(fields, None::<String>)
    }

    /// Creates a range shape with no equality prefix.
    pub fn range(field: impl Into<String>) -> Self {
        Self::new(Vec::<String>::new(), Some(field))
    }

    /// Returns the equality fields in key order.
    #[inline]
    pub fn equality_fields(&self) -> &[String] {
        &self.equality
    }

    /// Returns the range field.
    #[inline]
    pub fn range_field(&self) -> Option<&str> {
        self.range.as_deref()
    }

    /// Returns whether an index built for `self` can serve `requested`.
    pub fn serves(&self, requested: &KeyShape) -> bool {
        self.equality == requested.equality
            && (requested.range.is_none() || self.range == requested.range)
    }
}

impl fmt::Display for KeyShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.equality.join(","))?;
        if let Some(range) = &self.range {
            write!(f, " range {}", range)?;
        }
        Ok(())
    }
}
