//! Reader predicate shapes.

use eddy_core::{Error, EventType, Result, Value};
use eddy_index::{KeyRange, KeyShape};
use serde::Deserialize;

/// An in-list term: a row matches when any of `fields` equals any of the
/// values a lookup supplies for the term.
///
/// `a in (x, y)` is one field with two values; `x in (a, b)` is two fields
/// with one value.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct InTerm {
    pub fields: Vec<String>,
}

impl InTerm {
    /// Creates a term over dataset fields.
    pub fn new<I>(fields: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }
}

/// The value-free shape of a reader's lookup predicate.
///
/// Each trigger supplies a [`Probe`] with one value per equality field, one
/// range per range field and one value list per in-list term, in declaration
/// order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct PredicateShape {
    #[serde(default)]
    pub equality: Vec<String>,
    #[serde(default)]
    pub ranges: Vec<String>,
    #[serde(default)]
    pub in_terms: Vec<InTerm>,
}

impl PredicateShape {
    /// Creates a shape.
    pub fn new<E, R>(equality: E, ranges: R) -> Self
    where
        E: IntoIterator,
        E::Item: Into<String>,
        R: IntoIterator,
        R::Item: Into<String>,
    {
        Self {
            equality: equality.into_iter().map(Into::into).collect(),
            ranges: ranges.into_iter().map(Into::into).collect(),
            in_terms: Vec::new(),
        }
    }

    /// Adds an in-list term over `fields`.
    pub fn with_in<I>(mut self, fields: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.in_terms.push(InTerm::new(fields));
        self
    }

    /// Returns true if the predicate has no terms.
    pub fn is_empty(&self) -> bool {
        self.equality.is_empty() && self.ranges.is_empty() && self.in_terms.is_empty()
    }

    /// Checks that every field exists in the dataset schema.
    pub fn validate(&self, schema: &EventType) -> Result<()> {
        for field in self.equality.iter().chain(self.ranges.iter()) {
            schema.require_field(field)?;
        }
        let mut seen = self.equality.clone();
        seen.sort();
        seen.dedup();
        if seen.len() != self.equality.len() {
            return Err(Error::config("equality predicate names a field twice"));
        }
        for term in &self.in_terms {
            let Some(first) = term.fields.first() else {
                return Err(Error::config("in-list term names no field"));
            };
            let expected = schema.fields()[schema.require_field(first)?].data_type;
            let mut names = Vec::with_capacity(term.fields.len());
            for field in &term.fields {
                let ty = schema.fields()[schema.require_field(field)?].data_type;
                if !ty.is_comparable_with(expected) {
                    return Err(Error::type_mismatch(field, expected, ty));
                }
                if names.contains(&field) {
                    return Err(Error::config(format!("in-list term names '{}' twice", field)));
                }
                names.push(field);
            }
        }
        if let Some(driving) = self.in_terms.first() {
            if let Some(field) = driving.fields.iter().find(|f| self.equality.contains(*f)) {
                return Err(Error::config(format!(
                    "field '{}' is both an equality and an in-list term",
                    field
                )));
            }
        }
        Ok(())
    }

    /// The indexes this predicate needs. All equality fields plus the first
    /// range field make one index; a first in-list term over several fields
    /// needs one such index per field, each also keyed on that field.
    /// Further range and in-list terms are filtered after lookup.
    pub fn index_shapes(&self) -> Vec<KeyShape> {
        if self.is_empty() {
            return Vec::new();
        }
        let range = self.ranges.first().cloned();
        match self.in_terms.first() {
            None => vec![KeyShape::new(self.equality.iter().cloned(), range)],
            Some(driving) => driving
                .fields
                .iter()
                .map(|f| {
                    KeyShape::new(
                        self.equality.iter().chain(std::iter::once(f)).cloned(),
                        range.clone(),
                    )
                })
                .collect(),
        }
    }

    pub(crate) fn check_probe(&self, probe: &Probe) -> Result<()> {
        if probe.equality.len() != self.equality.len()
            || probe.ranges.len() != self.ranges.len()
            || probe.in_values.len() != self.in_terms.len()
        {
            return Err(Error::invalid_operation(format!(
                "lookup supplies {} equality values, {} ranges and {} in-lists, \
                 predicate expects {}, {} and {}",
                probe.equality.len(),
                probe.ranges.len(),
                probe.in_values.len(),
                self.equality.len(),
                self.ranges.len(),
                self.in_terms.len()
            )));
        }
        Ok(())
    }
}

/// Values bound to a [`PredicateShape`] for one lookup.
#[derive(Clone, Debug, Default)]
pub struct Probe {
    pub equality: Vec<Value>,
    pub ranges: Vec<KeyRange<Value>>,
    pub in_values: Vec<Vec<Value>>,
}

impl Probe {
    /// Creates a probe.
    pub fn new(equality: Vec<Value>, ranges: Vec<KeyRange<Value>>) -> Self {
        Self {
            equality,
            ranges,
            in_values: Vec::new(),
        }
    }

    /// Adds the values of the next in-list term.
    pub fn with_in(mut self, values: Vec<Value>) -> Self {
        self.in_values.push(values);
        self
    }
}
