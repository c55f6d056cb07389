//! Shared aggregation tables.
//!
//! An aggregation table is a dataset whose value is a fixed set of aggregate
//! columns rather than a row set. Any number of writers contribute weighted
//! events to it; each contribution is applied under the dataset's write lock,
//! and readers always see every column at the same point in the commit order.

use eddy_core::{DataType, Delta, Error, EventType, Result, SharedEvent, Value};
use hashbrown::HashMap;
use serde::Deserialize;
use std::collections::BTreeMap;

/// Identifier of a registered writer.
pub type WriterId = u64;

/// Aggregate function of a column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateFunction {
    /// All contributing events.
    Window,
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

/// One column of an aggregation table.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct AggregateColumn {
    pub name: String,
    pub function: AggregateFunction,
    /// Field of the contributing event; required except for `window` and `count`.
    #[serde(default)]
    pub field: Option<String>,
}

impl AggregateColumn {
    /// Creates a column.
    pub fn new(name: impl Into<String>, function: AggregateFunction, field: Option<&str>) -> Self {
        Self {
            name: name.into(),
            function,
            field: field.map(str::to_string),
        }
    }
}

/// Current value of one aggregate column.
#[derive(Clone, Debug)]
pub enum AggregateValue {
    Events(Vec<SharedEvent>),
    Scalar(Value),
}

impl AggregateValue {
    /// Returns the events of a `window` column.
    pub fn as_events(&self) -> Option<&[SharedEvent]> {
        match self {
            AggregateValue::Events(events) => Some(events),
            AggregateValue::Scalar(_) => None,
        }
    }

    /// Returns the value of a scalar column.
    pub fn as_scalar(&self) -> Option<&Value> {
        match self {
            AggregateValue::Scalar(v) => Some(v),
            AggregateValue::Events(_) => None,
        }
    }
}

/// A consistent reading of every column.
#[derive(Clone, Debug, Default)]
pub struct AggregateSnapshot {
    columns: Vec<(String, AggregateValue)>,
}

impl AggregateSnapshot {
    /// Returns the value of a column by name.
    pub fn get(&self, name: &str) -> Option<&AggregateValue> {
        self.columns.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Returns all columns in declaration order.
    pub fn columns(&self) -> &[(String, AggregateValue)] {
        &self.columns
    }
}

#[derive(Debug)]
enum AggregateState {
    Window { events: Vec<SharedEvent> },
    Count { count: i64 },
    Sum { int: i64, float: f64, integral: bool, count: i64 },
    Avg { sum: f64, count: i64 },
    Min { values: BTreeMap<Value, i32> },
    Max { values: BTreeMap<Value, i32> },
}

impl AggregateState {
    fn new(function: AggregateFunction, field_type: Option<DataType>) -> Self {
        match function {
            AggregateFunction::Window => AggregateState::Window { events: Vec::new() },
            AggregateFunction::Count => AggregateState::Count { count: 0 },
            AggregateFunction::Sum => AggregateState::Sum {
                int: 0,
                float: 0.0,
                integral: matches!(field_type, Some(DataType::Int32 | DataType::Int64)),
                count: 0,
            },
            AggregateFunction::Avg => AggregateState::Avg { sum: 0.0, count: 0 },
            AggregateFunction::Min => AggregateState::Min { values: BTreeMap::new() },
            AggregateFunction::Max => AggregateState::Max { values: BTreeMap::new() },
        }
    }

    /// Applies one weighted contribution. `value` is None for columns
    /// without a field.
    fn apply(&mut self, event: &SharedEvent, value: Option<&Value>, diff: i32) {
        if let AggregateState::Count { count } = self {
            if !value.is_some_and(Value::is_null) {
                *count += diff as i64;
            }
            return;
        }
        let value = value.unwrap_or(&Value::Null);
        match self {
            AggregateState::Window { events } => {
                if diff > 0 {
                    for _ in 0..diff {
                        events.push(event.clone());
                    }
                } else {
                    for _ in 0..(-diff) {
                        if let Some(pos) = events.iter().position(|e| e.id() == event.id()) {
                            events.remove(pos);
                        }
                    }
                }
            }
            AggregateState::Count { .. } => {}
            AggregateState::Sum { int, float, integral, count } => {
                if value.is_null() {
                    return;
                }
                if *integral {
                    *int += value.as_i64().unwrap_or_default() * diff as i64;
                } else {
                    *float += value.as_f64().unwrap_or_default() * diff as f64;
                }
                *count += diff as i64;
            }
            AggregateState::Avg { sum, count } => {
                if let Some(v) = value.as_f64() {
                    *sum += v * diff as f64;
                    *count += diff as i64;
                }
            }
            AggregateState::Min { values } | AggregateState::Max { values } => {
                if value.is_null() {
                    return;
                }
                let key = value.index_key();
                let entry = values.entry(key.clone()).or_insert(0);
                *entry += diff;
                if *entry <= 0 {
                    values.remove(&key);
                }
            }
        }
    }

    fn value(&self) -> AggregateValue {
        let scalar = match self {
            AggregateState::Window { events } => return AggregateValue::Events(events.clone()),
            AggregateState::Count { count } => Value::Int64(*count),
            AggregateState::Sum { int, float, integral, count } => {
                if *count == 0 {
                    Value::Null
                } else if *integral {
                    Value::Int64(*int)
                } else {
                    Value::Float64(*float)
                }
            }
            AggregateState::Avg { sum, count } => {
                if *count == 0 {
                    Value::Null
                } else {
                    Value::Float64(*sum / *count as f64)
                }
            }
            AggregateState::Min { values } => values.keys().next().cloned().unwrap_or(Value::Null),
            AggregateState::Max { values } => {
                values.keys().next_back().cloned().unwrap_or(Value::Null)
            }
        };
        AggregateValue::Scalar(scalar)
    }
}

#[derive(Debug)]
struct ColumnState {
    column: AggregateColumn,
    field: Option<usize>,
    state: AggregateState,
}

/// The columns of an aggregation table.
#[derive(Debug)]
pub struct AggregateTable {
    columns: Vec<ColumnState>,
    contributions: HashMap<WriterId, i64>,
}

impl AggregateTable {
    /// Creates a table whose contributions are events of `schema`.
    pub fn new(schema: &EventType, columns: Vec<AggregateColumn>) -> Result<Self> {
        if columns.is_empty() {
            return Err(Error::config(format!(
                "aggregation table over '{}' declares no columns",
                schema.name()
            )));
        }
        let mut states = Vec::with_capacity(columns.len());
        for column in columns {
            if states.iter().any(|c: &ColumnState| c.column.name == column.name) {
                return Err(Error::DuplicateName {
                    kind: "column",
                    name: column.name,
                });
            }
            let field = match (&column.field, column.function) {
                (Some(name), _) => Some(schema.require_field(name)?),
                (None, AggregateFunction::Window | AggregateFunction::Count) => None,
                (None, function) => {
                    return Err(Error::config(format!(
                        "aggregate column '{}' needs a field for {:?}",
                        column.name, function
                    )))
                }
            };
            let field_type = field.map(|idx| schema.fields()[idx].data_type);
            if matches!(column.function, AggregateFunction::Sum | AggregateFunction::Avg)
                && !field_type.is_some_and(|t| t.is_numeric())
            {
                return Err(Error::config(format!(
                    "aggregate column '{}' needs a numeric field",
                    column.name
                )));
            }
            states.push(ColumnState {
                state: AggregateState::new(column.function, field_type),
                column,
                field,
            });
        }
        Ok(Self {
            columns: states,
            contributions: HashMap::new(),
        })
    }

    /// Applies one writer's weighted events to every column.
    pub fn apply(&mut self, writer: WriterId, deltas: &[Delta<SharedEvent>]) {
        for delta in deltas {
            for column in &mut self.columns {
                let value = column
                    .field
                    .map(|idx| delta.data.get(idx).unwrap_or(&Value::Null));
                column.state.apply(&delta.data, value, delta.diff);
            }
            *self.contributions.entry(writer).or_insert(0) += delta.diff as i64;
        }
    }

    /// Returns the net number of events a writer currently contributes.
    pub fn contributed(&self, writer: WriterId) -> i64 {
        self.contributions.get(&writer).copied().unwrap_or(0)
    }

    /// Returns the column definitions in declaration order.
    pub fn definitions(&self) -> impl Iterator<Item = &AggregateColumn> {
        self.columns.iter().map(|c| &c.column)
    }

    /// Forgets a writer's bookkeeping. Its contributions stay applied.
    pub fn forget_writer(&mut self, writer: WriterId) {
        self.contributions.remove(&writer);
    }

    /// Reads every column.
    pub fn snapshot(&self) -> AggregateSnapshot {
        AggregateSnapshot {
            columns: self
                .columns
                .iter()
                .map(|c| (c.column.name.clone(), c.state.value()))
                .collect(),
        }
    }
}
