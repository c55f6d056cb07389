//! Result rows.
//!
//! A [`Row`] holds one slot per joined stream. A slot is either an event or
//! null; nulls are tracked in a [`NullMask`] so that outer-join padding can be
//! tested without touching the slots. Rows may also carry derived values such
//! as aggregates.

use crate::error::{Error, Result};
use crate::event::{EventId, EventType, SharedEvent};
use crate::types::DataType;
use crate::value::Value;
use std::sync::Arc;

/// Maximum number of slots a row can carry.
pub const MAX_SLOTS: usize = 64;

/// Identity of a row: the event id in each slot.
pub type RowKey = Vec<Option<EventId>>;

static NULL: Value = Value::Null;

/// Bitmap of null slots.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct NullMask(u64);

impl NullMask {
    /// Returns a mask with no null slots.
    #[inline]
    pub const fn empty() -> Self {
        NullMask(0)
    }

    /// Marks slot `index` as null.
    #[inline]
    pub fn set(&mut self, index: usize) {
        self.0 |= 1 << index;
    }

    /// Returns whether slot `index` is null.
    #[inline]
    pub fn is_null(&self, index: usize) -> bool {
        self.0 & (1 << index) != 0
    }

    /// Returns the number of null slots.
    #[inline]
    pub fn count(&self) -> u32 {
        self.0.count_ones()
    }

    /// Returns the raw bits.
    #[inline]
    pub fn bits(&self) -> u64 {
        self.0
    }
}

/// One result row.
#[derive(Clone, Debug)]
pub struct Row {
    slots: Vec<Option<SharedEvent>>,
    nulls: NullMask,
    derived: Vec<Value>,
}

impl Row {
    /// Creates a row from its slots.
    pub fn from_slots(slots: Vec<Option<SharedEvent>>) -> Self {
        debug_assert!(slots.len() <= MAX_SLOTS);
        let mut nulls = NullMask::empty();
        for (i, slot) in slots.iter().enumerate() {
            if slot.is_none() {
                nulls.set(i);
            }
        }
        Self {
            slots,
            nulls,
            derived: Vec::new(),
        }
    }

    /// Creates a single-slot row.
    pub fn single(event: SharedEvent) -> Self {
        Self::from_slots(vec![Some(event)])
    }

    /// Attaches derived values.
    pub fn with_derived(mut self, derived: Vec<Value>) -> Self {
        self.derived = derived;
        self
    }

    /// Returns the number of slots.
    #[inline]
    pub fn width(&self) -> usize {
        self.slots.len()
    }

    /// Returns the event in slot `index`, or None if the slot is null.
    #[inline]
    pub fn slot(&self, index: usize) -> Option<&SharedEvent> {
        self.slots.get(index).and_then(|s| s.as_ref())
    }

    /// Returns all slots.
    #[inline]
    pub fn slots(&self) -> &[Option<SharedEvent>] {
        &self.slots
    }

    /// Returns the null bitmap.
    #[inline]
    pub fn nulls(&self) -> NullMask {
        self.nulls
    }

    /// Returns whether slot `index` is null.
    #[inline]
    pub fn is_null(&self, index: usize) -> bool {
        self.nulls.is_null(index)
    }

    /// Returns the derived values.
    #[inline]
    pub fn derived(&self) -> &[Value] {
        &self.derived
    }

    /// Returns the row identity.
    pub fn key(&self) -> RowKey {
        self.slots.iter().map(|s| s.as_ref().map(|e| e.id())).collect()
    }

    /// Returns whether any slot holds the given event.
    pub fn contains(&self, id: EventId) -> bool {
        self.slots.iter().flatten().any(|e| e.id() == id)
    }

    /// Returns the value at a resolved field path. Null slots yield Null.
    pub fn value(&self, path: FieldPath) -> &Value {
        match path {
            FieldPath::Slot { slot, field } => self
                .slot(slot)
                .and_then(|e| e.get(field))
                .unwrap_or(&NULL),
            FieldPath::Derived(idx) => self.derived.get(idx).unwrap_or(&NULL),
        }
    }
}

impl PartialEq for Row {
    fn eq(&self, other: &Self) -> bool {
        self.nulls == other.nulls
            && self.slots.len() == other.slots.len()
            && self
                .slots
                .iter()
                .zip(other.slots.iter())
                .all(|(a, b)| a.as_ref().map(|e| e.id()) == b.as_ref().map(|e| e.id()))
            && self.derived == other.derived
    }
}

impl Eq for Row {}

/// A resolved field reference within a row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FieldPath {
    /// Field `field` of the event in slot `slot`.
    Slot { slot: usize, field: usize },
    /// Derived value at this position.
    Derived(usize),
}

/// Shape of the rows a statement produces.
#[derive(Clone, Debug)]
pub struct RowSchema {
    slots: Vec<(String, Arc<EventType>)>,
    derived: Vec<(String, DataType)>,
}

impl RowSchema {
    /// Creates a schema from `(alias, event type)` pairs.
    pub fn new(slots: Vec<(String, Arc<EventType>)>) -> Self {
        Self {
            slots,
            derived: Vec::new(),
        }
    }

    /// Adds a derived field.
    pub fn with_derived(mut self, name: impl Into<String>, data_type: DataType) -> Self {
        self.derived.push((name.into(), data_type));
        self
    }

    /// Returns the number of slots.
    #[inline]
    pub fn width(&self) -> usize {
        self.slots.len()
    }

    /// Returns the alias of a slot.
    pub fn alias(&self, slot: usize) -> Option<&str> {
        self.slots.get(slot).map(|(a, _)| a.as_str())
    }

    /// Returns the event type of a slot.
    pub fn event_type(&self, slot: usize) -> Option<&Arc<EventType>> {
        self.slots.get(slot).map(|(_, t)| t)
    }

    /// Returns the slot position of an alias.
    pub fn slot_of(&self, alias: &str) -> Option<usize> {
        self.slots.iter().position(|(a, _)| a == alias)
    }

    /// Resolves `alias.field` or an unqualified `field`.
    ///
    /// An unqualified name must match exactly one slot field or derived
    /// field.
    pub fn resolve(&self, reference: &str) -> Result<FieldPath> {
        let reference = reference.trim();
        if let Some((alias, field)) = reference.split_once('.') {
            let slot = self.slot_of(alias).ok_or_else(|| Error::UnknownStream {
                name: alias.to_string(),
            })?;
            let field = self.slots[slot].1.require_field(field)?;
            return Ok(FieldPath::Slot { slot, field });
        }

        let mut found = None;
        for (slot, (_, ty)) in self.slots.iter().enumerate() {
            if let Some(field) = ty.field_index(reference) {
                if found.is_some() {
                    return Err(Error::AmbiguousField {
                        field: reference.to_string(),
                    });
                }
                found = Some(FieldPath::Slot { slot, field });
            }
        }
        if let Some(idx) = self.derived.iter().position(|(n, _)| n == reference) {
            if found.is_some() {
                return Err(Error::AmbiguousField {
                    field: reference.to_string(),
                });
            }
            found = Some(FieldPath::Derived(idx));
        }
        found.ok_or_else(|| Error::unknown_field("any stream", reference))
    }

    /// Returns the declared type at a resolved path.
    pub fn field_type(&self, path: FieldPath) -> Option<DataType> {
        match path {
            FieldPath::Slot { slot, field } => self
                .slots
                .get(slot)
                .and_then(|(_, ty)| ty.fields().get(field))
                .map(|f| f.data_type),
            FieldPath::Derived(idx) => self.derived.get(idx).map(|(_, t)| *t),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Event, EventTypeBuilder};

    fn stream(name: &str, field: &str) -> Arc<EventType> {
        EventTypeBuilder::new(name)
            .unwrap()
            .field("id", DataType::String)
            .unwrap()
            .field(field, DataType::Int32)
            .unwrap()
            .build()
    }

    #[test]
    fn test_null_mask() {
        let ty = stream("S0", "p00");
        let e = Arc::new(Event::from_pairs(ty, [("p00", 1)]).unwrap());
        let row = Row::from_slots(vec![Some(e.clone()), None, Some(e), None]);
        assert!(!row.is_null(0));
        assert!(row.is_null(1));
        assert!(row.is_null(3));
        assert_eq!(row.nulls().count(), 2);
        assert_eq!(row.key()[1], None);
    }

    #[test]
    fn test_row_equality_by_identity() {
        let ty = stream("S0", "p00");
        let a = Arc::new(Event::from_pairs(ty.clone(), [("p00", 1)]).unwrap());
        let b = Arc::new(Event::from_pairs(ty, [("p00", 1)]).unwrap());
        assert_eq!(Row::single(a.clone()), Row::single(a.clone()));
        assert_ne!(Row::single(a), Row::single(b));
    }

    #[test]
    fn test_schema_resolve() {
        let schema = RowSchema::new(vec![
            ("s0".into(), stream("S0", "p00")),
            ("s1".into(), stream("S1", "p10")),
        ])
        .with_derived("total", DataType::Int64);

        assert_eq!(
            schema.resolve("s1.p10").unwrap(),
            FieldPath::Slot { slot: 1, field: 1 }
        );
        assert_eq!(
            schema.resolve("p00").unwrap(),
            FieldPath::Slot { slot: 0, field: 1 }
        );
        assert_eq!(schema.resolve("total").unwrap(), FieldPath::Derived(0));
        assert!(matches!(
            schema.resolve("id"),
            Err(Error::AmbiguousField { .. })
        ));
        assert!(matches!(
            schema.resolve("dummy"),
            Err(Error::UnknownField { .. })
        ));
        assert!(matches!(
            schema.resolve("s9.p00"),
            Err(Error::UnknownStream { .. })
        ));
    }

    #[test]
    fn test_row_value_of_null_slot() {
        let ty = stream("S0", "p00");
        let e = Arc::new(Event::from_pairs(ty, [("p00", 7)]).unwrap());
        let row = Row::from_slots(vec![None, Some(e)]);
        assert_eq!(row.value(FieldPath::Slot { slot: 0, field: 1 }), &Value::Null);
        assert_eq!(
            row.value(FieldPath::Slot { slot: 1, field: 1 }),
            &Value::Int32(7)
        );
    }
}
