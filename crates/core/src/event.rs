//! Event types and events.
//!
//! An [`EventType`] is a named, ordered list of typed fields. An [`Event`] is an
//! immutable value of some event type, shared as [`SharedEvent`] once it has
//! been dispatched.

use crate::error::{Error, Result};
use crate::types::DataType;
use crate::value::Value;
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Unique identifier for an event instance.
pub type EventId = u64;

/// An event shared between windows, join stores and datasets.
pub type SharedEvent = Arc<Event>;

/// Global event ID counter.
static NEXT_EVENT_ID: AtomicU64 = AtomicU64::new(1);

/// Gets the next unique event ID.
pub fn next_event_id() -> EventId {
    NEXT_EVENT_ID.fetch_add(1, Ordering::Relaxed)
}

/// A named, typed field of an event type.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: DataType,
}

/// Schema of an event stream or dataset.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventType {
    name: String,
    fields: Vec<Field>,
}

impl EventType {
    /// Returns the event type name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns all fields in declaration order.
    #[inline]
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Returns the number of fields.
    #[inline]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns true if the type declares no fields.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Returns the position of a field.
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Returns the declared type of a field.
    pub fn field_type(&self, name: &str) -> Option<DataType> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.data_type)
    }

    /// Resolves a field name, failing with a configuration error.
    pub fn require_field(&self, name: &str) -> Result<usize> {
        self.field_index(name)
            .ok_or_else(|| Error::unknown_field(self.name.as_str(), name))
    }
}

/// Builder for [`EventType`].
#[derive(Debug)]
pub struct EventTypeBuilder {
    name: String,
    fields: Vec<Field>,
}

impl EventTypeBuilder {
    /// Creates a new builder.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        check_naming_rules(&name)?;
        Ok(Self {
            name,
            fields: Vec::new(),
        })
    }

    /// Adds a field.
    pub fn field(mut self, name: impl Into<String>, data_type: DataType) -> Result<Self> {
        let name = name.into();
        check_naming_rules(&name)?;
        if self.fields.iter().any(|f| f.name == name) {
            return Err(Error::DuplicateName { kind: "field", name });
        }
        self.fields.push(Field { name, data_type });
        Ok(self)
    }

    /// Builds the event type.
    pub fn build(self) -> Arc<EventType> {
        Arc::new(EventType {
            name: self.name,
            fields: self.fields,
        })
    }
}

fn check_naming_rules(name: &str) -> Result<()> {
    let mut chars = name.chars();
    match chars.next() {
        None => Err(Error::config("name cannot be empty")),
        Some(first) if !first.is_ascii_alphabetic() && first != '_' => Err(Error::config(
            format!("name must start with letter or underscore: {}", name),
        )),
        Some(_) if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') => Err(Error::config(
            format!("name contains invalid characters: {}", name),
        )),
        Some(_) => Ok(()),
    }
}

/// An immutable event.
///
/// Values are positional and follow the field order of the event type. Only
/// the arity is checked on construction; a value may disagree with the
/// declared field type, which surfaces later as a runtime type mismatch.
#[derive(Clone, Debug)]
pub struct Event {
    id: EventId,
    event_type: Arc<EventType>,
    values: Vec<Value>,
}

impl Event {
    /// Creates a new event with a fresh identity.
    pub fn new(event_type: Arc<EventType>, values: Vec<Value>) -> Result<Self> {
        if values.len() != event_type.len() {
            return Err(Error::invalid_operation(format!(
                "event of type '{}' expects {} values, got {}",
                event_type.name(),
                event_type.len(),
                values.len()
            )));
        }
        Ok(Self {
            id: next_event_id(),
            event_type,
            values,
        })
    }

    /// Creates an event from named values; unnamed fields are Null.
    pub fn from_pairs<I, K, V>(event_type: Arc<EventType>, pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        let mut values = vec![Value::Null; event_type.len()];
        for (name, value) in pairs {
            let idx = event_type.require_field(name.as_ref())?;
            values[idx] = value.into();
        }
        Self::new(event_type, values)
    }

    /// Returns the event identity.
    #[inline]
    pub fn id(&self) -> EventId {
        self.id
    }

    /// Returns the event type.
    #[inline]
    pub fn event_type(&self) -> &Arc<EventType> {
        &self.event_type
    }

    /// Returns all values.
    #[inline]
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Returns the value at a field position.
    #[inline]
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Returns the value of a named field.
    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        self.event_type
            .field_index(name)
            .and_then(|idx| self.values.get(idx))
    }

    /// Returns a copy of this event carrying a new identity.
    pub fn rekeyed(&self) -> Self {
        Self {
            id: next_event_id(),
            event_type: self.event_type.clone(),
            values: self.values.clone(),
        }
    }

    /// Returns an event with the same identity and type carrying new values.
    pub fn replace_values(&self, values: Vec<Value>) -> Result<Self> {
        let mut event = Self::new(self.event_type.clone(), values)?;
        event.id = self.id;
        Ok(event)
    }

    /// Checks that the value at `index` can be compared with `expected`.
    pub fn check_comparable(&self, index: usize, expected: DataType) -> Result<()> {
        let value = self.values.get(index).unwrap_or(&Value::Null);
        match value.data_type() {
            Some(got) if !got.is_comparable_with(expected) => Err(Error::type_mismatch(
                self.event_type.fields[index].name.as_str(),
                expected,
                got,
            )),
            _ => Ok(()),
        }
    }
}
