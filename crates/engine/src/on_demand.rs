//! On-demand statements.
//!
//! An on-demand statement fires once per trigger event: it binds its
//! predicate from the trigger's fields, looks the matching rows up through
//! shared dataset indexes, and either aggregates them into one row or deletes
//! them. A statement over an aggregation table reads its columns instead.

use crate::boundary::{Delivery, ErrorBoundary, ErrorReport};
use crate::statement::{ResolvedFilter, StatementId, StreamSource, StreamSpec};
use eddy_core::{
    DataType, Delta, Error, Event, EventType, Result, Row, RowSchema, SharedEvent, Value,
};
use eddy_dataset::{
    AggregateColumn, AggregateFunction, AggregateTable, NamedDataset, PredicateShape, Probe,
    ReaderHandle,
};
use eddy_index::KeyRange;
use eddy_output::{DeliveredBatch, SubscriptionManager};
use std::sync::Arc;
use tracing::trace;

/// One end of a range term, taken from a trigger field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RangeBound {
    pub trigger_field: String,
    pub inclusive: bool,
}

/// A range term over a dataset field. At least one bound is required.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RangeTerm {
    pub field: String,
    pub lower: Option<RangeBound>,
    pub upper: Option<RangeBound>,
}

impl RangeTerm {
    /// `field between low and high`, both ends inclusive.
    pub fn between(
        field: impl Into<String>,
        low: impl Into<String>,
        high: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            lower: Some(RangeBound {
                trigger_field: low.into(),
                inclusive: true,
            }),
            upper: Some(RangeBound {
                trigger_field: high.into(),
                inclusive: true,
            }),
        }
    }
}

/// An in-list term: matches when any of the dataset fields equals any of the
/// trigger fields.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InListTerm {
    pub dataset_fields: Vec<String>,
    pub trigger_fields: Vec<String>,
}

/// What an on-demand statement does with the matched rows.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OnDemandAction {
    /// Delivers one row per trigger: the trigger event plus one derived
    /// value per column.
    Select(Vec<AggregateColumn>),
    /// Deletes the matched rows and delivers them.
    Delete,
    /// Reads the named columns of an aggregation table. Scalar columns become
    /// derived values; a `window` column contributes one row per event.
    ReadTable(Vec<String>),
}

/// Declarative description of an on-demand statement.
#[derive(Clone, Debug)]
pub struct OnDemandSpec {
    pub name: String,
    /// Trigger input. Must be an event type; its window is ignored.
    pub trigger: StreamSpec,
    pub dataset: String,
    /// `(dataset field, trigger field)` equality terms.
    pub equality: Vec<(String, String)>,
    pub ranges: Vec<RangeTerm>,
    pub in_lists: Vec<InListTerm>,
    pub action: OnDemandAction,
}

impl OnDemandSpec {
    /// `on <trigger> select <columns> from <dataset>`.
    pub fn select(
        name: impl Into<String>,
        trigger: StreamSpec,
        dataset: impl Into<String>,
        columns: Vec<AggregateColumn>,
    ) -> Self {
        Self::new(name, trigger, dataset, OnDemandAction::Select(columns))
    }

    /// `on <trigger> delete from <dataset>`.
    pub fn delete(name: impl Into<String>, trigger: StreamSpec, dataset: impl Into<String>) -> Self {
        Self::new(name, trigger, dataset, OnDemandAction::Delete)
    }

    /// `on <trigger> select <table>.<columns> from <table>`.
    pub fn read_table<I>(
        name: impl Into<String>,
        trigger: StreamSpec,
        table: impl Into<String>,
        columns: I,
    ) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        let columns = columns.into_iter().map(Into::into).collect();
        Self::new(name, trigger, table, OnDemandAction::ReadTable(columns))
    }

    fn new(
        name: impl Into<String>,
        trigger: StreamSpec,
        dataset: impl Into<String>,
        action: OnDemandAction,
    ) -> Self {
        Self {
            name: name.into(),
            trigger,
            dataset: dataset.into(),
            equality: Vec::new(),
            ranges: Vec::new(),
            in_lists: Vec::new(),
            action,
        }
    }

    /// Adds `dataset_field = trigger.trigger_field`.
    pub fn equals(mut self, dataset_field: impl Into<String>, trigger_field: impl Into<String>) -> Self {
        self.equality.push((dataset_field.into(), trigger_field.into()));
        self
    }

    pub fn range(mut self, term: RangeTerm) -> Self {
        self.ranges.push(term);
        self
    }

    /// Adds `dataset_field in (trigger.f1, trigger.f2, ...)`.
    pub fn field_in<I>(mut self, dataset_field: impl Into<String>, trigger_fields: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.in_lists.push(InListTerm {
            dataset_fields: vec![dataset_field.into()],
            trigger_fields: trigger_fields.into_iter().map(Into::into).collect(),
        });
        self
    }

    /// Adds `trigger.trigger_field in (d1, d2, ...)` over dataset fields.
    pub fn value_in<I>(mut self, trigger_field: impl Into<String>, dataset_fields: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.in_lists.push(InListTerm {
            dataset_fields: dataset_fields.into_iter().map(Into::into).collect(),
            trigger_fields: vec![trigger_field.into()],
        });
        self
    }

    fn has_predicate(&self) -> bool {
        !(self.equality.is_empty() && self.ranges.is_empty() && self.in_lists.is_empty())
    }

    /// Name of the trigger event type.
    pub fn trigger_type(&self) -> Result<&str> {
        match &self.trigger.source {
            StreamSource::EventType(name) => Ok(name.as_str()),
            StreamSource::Dataset(name) => Err(Error::config(format!(
                "on-demand statement '{}' cannot be triggered by dataset '{}'",
                self.name, name
            ))),
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct BoundField {
    field: usize,
    inclusive: bool,
}

#[derive(Clone, Copy, Debug)]
struct RangeBinding {
    lower: Option<BoundField>,
    upper: Option<BoundField>,
}

impl RangeBinding {
    fn bind(&self, trigger: &Event) -> KeyRange<Value> {
        let value = |b: BoundField| trigger.get(b.field).cloned().unwrap_or(Value::Null);
        match (self.lower, self.upper) {
            (Some(l), Some(u)) => KeyRange::bound(value(l), value(u), !l.inclusive, !u.inclusive),
            (Some(l), None) => KeyRange::lower_bound(value(l), !l.inclusive),
            (None, Some(u)) => KeyRange::upper_bound(value(u), !u.inclusive),
            (None, None) => KeyRange::All,
        }
    }
}

#[derive(Debug)]
enum Action {
    Select(Vec<AggregateColumn>),
    Delete,
    ReadTable {
        window: Option<String>,
        scalars: Vec<String>,
    },
}

/// Runtime state of one on-demand statement. Guarded by its own mutex.
pub(crate) struct OnDemandStatement {
    id: StatementId,
    name: String,
    reader: ReaderHandle,
    filters: Vec<ResolvedFilter>,
    equality: Vec<usize>,
    ranges: Vec<RangeBinding>,
    /// Trigger field positions of each in-list term.
    in_lists: Vec<Vec<usize>>,
    action: Action,
    schema: RowSchema,
    subscriptions: SubscriptionManager,
    boundary: ErrorBoundary,
}

impl OnDemandStatement {
    /// Validates the statement definition against the trigger type and dataset, then
    /// registers the reader. Nothing is registered if validation fails.
    pub(crate) fn create(
        id: StatementId,
        spec: &OnDemandSpec,
        trigger: &Arc<EventType>,
        dataset: &Arc<NamedDataset>,
    ) -> Result<Self> {
        let target = dataset.schema();
        let reads_table = matches!(spec.action, OnDemandAction::ReadTable(_));
        if dataset.is_aggregate() != reads_table {
            return Err(Error::config(if reads_table {
                format!(
                    "on-demand statement '{}' reads columns of '{}', which is not an aggregation table",
                    spec.name,
                    dataset.name()
                )
            } else {
                format!(
                    "on-demand statement '{}' can only read columns of aggregation table '{}'",
                    spec.name,
                    dataset.name()
                )
            }));
        }
        if reads_table && spec.has_predicate() {
            return Err(Error::config(format!(
                "on-demand statement '{}' reads the whole aggregation table '{}' and takes no predicate",
                spec.name,
                dataset.name()
            )));
        }

        let filters = spec
            .trigger
            .filters
            .iter()
            .map(|f| ResolvedFilter::resolve(f, trigger))
            .collect::<Result<Vec<_>>>()?;

        let mut equality = Vec::with_capacity(spec.equality.len());
        for (field, trigger_field) in &spec.equality {
            equality.push(bind_field(&spec.name, target, field, trigger, trigger_field)?);
        }

        let mut ranges = Vec::with_capacity(spec.ranges.len());
        for term in &spec.ranges {
            if term.lower.is_none() && term.upper.is_none() {
                return Err(Error::config(format!(
                    "range term on '{}' in on-demand statement '{}' has no bound",
                    term.field, spec.name
                )));
            }
            let bind = |bound: &Option<RangeBound>| -> Result<Option<BoundField>> {
                bound
                    .as_ref()
                    .map(|b| {
                        bind_field(&spec.name, target, &term.field, trigger, &b.trigger_field)
                            .map(|field| BoundField {
                                field,
                                inclusive: b.inclusive,
                            })
                    })
                    .transpose()
            };
            ranges.push(RangeBinding {
                lower: bind(&term.lower)?,
                upper: bind(&term.upper)?,
            });
        }

        let mut in_lists = Vec::with_capacity(spec.in_lists.len());
        for term in &spec.in_lists {
            if term.dataset_fields.is_empty() || term.trigger_fields.is_empty() {
                return Err(Error::config(format!(
                    "in-list term in on-demand statement '{}' is empty",
                    spec.name
                )));
            }
            let mut positions = Vec::with_capacity(term.trigger_fields.len());
            for trigger_field in &term.trigger_fields {
                for field in &term.dataset_fields {
                    bind_field(&spec.name, target, field, trigger, trigger_field)?;
                }
                positions.push(trigger.require_field(trigger_field)?);
            }
            in_lists.push(positions);
        }

        let (action, schema) = match &spec.action {
            OnDemandAction::Select(columns) => {
                let mut schema = RowSchema::new(vec![(spec.trigger.alias.clone(), trigger.clone())]);
                for column in columns {
                    schema = schema.with_derived(column.name.as_str(), column_type(column, target)?);
                }
                AggregateTable::new(target, columns.clone())?;
                (Action::Select(columns.clone()), schema)
            }
            OnDemandAction::Delete => (
                Action::Delete,
                RowSchema::new(vec![(dataset.name().to_string(), target.clone())]),
            ),
            OnDemandAction::ReadTable(names) => table_columns(spec, trigger, dataset, names)?,
        };

        let shape = spec.in_lists.iter().fold(
            PredicateShape::new(
                spec.equality.iter().map(|(f, _)| f.clone()),
                spec.ranges.iter().map(|r| r.field.clone()),
            ),
            |shape, term| shape.with_in(term.dataset_fields.iter().cloned()),
        );
        let reader = dataset.register_reader(shape)?;

        Ok(Self {
            id,
            name: spec.name.clone(),
            reader,
            filters,
            equality,
            ranges,
            in_lists,
            action,
            schema,
            subscriptions: SubscriptionManager::new(),
            boundary: ErrorBoundary::new(spec.name.as_str()),
        })
    }

    pub(crate) fn id(&self) -> StatementId {
        self.id
    }

    pub(crate) fn schema(&self) -> &RowSchema {
        &self.schema
    }

    pub(crate) fn dataset(&self) -> &Arc<NamedDataset> {
        self.reader.dataset()
    }

    pub(crate) fn subscriptions(&mut self) -> &mut SubscriptionManager {
        &mut self.subscriptions
    }

    pub(crate) fn errors(&self) -> &[ErrorReport] {
        self.boundary.reports()
    }

    /// Unregisters the statement's reader, giving back its indexes.
    pub(crate) fn release(&mut self) -> Result<()> {
        self.reader.release()
    }

    fn probe(&self, trigger: &Event) -> Probe {
        let value = |i: usize| trigger.get(i).cloned().unwrap_or(Value::Null);
        self.in_lists.iter().fold(
            Probe::new(
                self.equality.iter().map(|&i| value(i)).collect(),
                self.ranges.iter().map(|r| r.bind(trigger)).collect(),
            ),
            |probe, positions| probe.with_in(positions.iter().map(|&i| value(i)).collect()),
        )
    }

    /// Runs the statement for one trigger event.
    pub(crate) fn on_trigger(&mut self, trigger: SharedEvent, now: i64) -> Result<Delivery> {
        if !self.filters.iter().all(|f| f.accepts(&trigger)) {
            return Ok(Delivery::default());
        }
        let result = self.execute(trigger);
        self.boundary.guard(result, now)
    }

    fn execute(&self, trigger: SharedEvent) -> Result<Delivery> {
        let probe = self.probe(&trigger);
        let inserted = match &self.action {
            Action::Select(columns) => {
                let rows = self.reader.lookup(&probe)?;
                trace!(statement = %self.name, matched = rows.len(), "on-demand select");
                let mut table = AggregateTable::new(self.reader.dataset().schema(), columns.clone())?;
                let deltas: Vec<Delta<SharedEvent>> = rows.into_iter().map(Delta::insert).collect();
                table.apply(0, &deltas);
                let derived = table
                    .snapshot()
                    .columns()
                    .iter()
                    .map(|(_, v)| v.as_scalar().cloned().unwrap_or(Value::Null))
                    .collect();
                vec![Row::single(trigger).with_derived(derived)]
            }
            Action::Delete => {
                let change = self.reader.delete(&probe)?;
                trace!(statement = %self.name, deleted = change.removed.len(), "on-demand delete");
                change.removed.into_iter().map(Row::single).collect()
            }
            Action::ReadTable { window, scalars } => {
                let snapshot = self.reader.aggregate_snapshot()?;
                let derived: Vec<Value> = scalars
                    .iter()
                    .map(|c| {
                        snapshot
                            .get(c)
                            .and_then(|v| v.as_scalar())
                            .cloned()
                            .unwrap_or(Value::Null)
                    })
                    .collect();
                match window {
                    None => vec![Row::single(trigger).with_derived(derived)],
                    Some(column) => {
                        let events = snapshot.get(column).and_then(|v| v.as_events()).unwrap_or(&[]);
                        trace!(statement = %self.name, events = events.len(), "on-demand table read");
                        if events.is_empty() {
                            vec![Row::from_slots(vec![Some(trigger), None]).with_derived(derived)]
                        } else {
                            events
                                .iter()
                                .map(|e| {
                                    Row::from_slots(vec![Some(trigger.clone()), Some(e.clone())])
                                        .with_derived(derived.clone())
                                })
                                .collect()
                        }
                    }
                }
            }
        };
        if inserted.is_empty() {
            return Ok(Delivery::default());
        }
        Ok(Delivery::new(
            &self.subscriptions,
            vec![DeliveredBatch {
                inserted,
                ..Default::default()
            }],
        ))
    }
}

fn bind_field(
    statement: &str,
    target: &EventType,
    field: &str,
    trigger: &EventType,
    trigger_field: &str,
) -> Result<usize> {
    let declared = target.field_type(field).ok_or_else(|| Error::UnknownField {
        scope: target.name().to_string(),
        field: field.to_string(),
    })?;
    let pos = trigger.require_field(trigger_field)?;
    let supplied = trigger.fields()[pos].data_type;
    if !supplied.is_comparable_with(declared) {
        return Err(Error::config(format!(
            "on-demand statement '{}' compares {}.{} ({:?}) with {}.{} ({:?})",
            statement,
            target.name(),
            field,
            declared,
            trigger.name(),
            trigger_field,
            supplied
        )));
    }
    Ok(pos)
}

/// Resolves the columns a table read selects. At most one may be a `window`
/// column; its events take the second slot after the trigger.
fn table_columns(
    spec: &OnDemandSpec,
    trigger: &Arc<EventType>,
    table: &NamedDataset,
    names: &[String],
) -> Result<(Action, RowSchema)> {
    let declared = table.aggregate_columns().unwrap_or_default();
    let mut window = None;
    let mut scalars = Vec::new();
    let mut derived = Vec::new();
    for name in names {
        let column = declared
            .iter()
            .find(|c| &c.name == name)
            .ok_or_else(|| Error::UnknownField {
                scope: table.name().to_string(),
                field: name.clone(),
            })?;
        if column.function == AggregateFunction::Window {
            if window.replace(name.clone()).is_some() {
                return Err(Error::config(format!(
                    "on-demand statement '{}' selects more than one window column",
                    spec.name
                )));
            }
        } else {
            derived.push((name.as_str(), column_type(column, table.schema())?));
            scalars.push(name.clone());
        }
    }
    let mut slots = vec![(spec.trigger.alias.clone(), trigger.clone())];
    if window.is_some() {
        slots.push((table.name().to_string(), table.schema().clone()));
    }
    let schema = derived
        .into_iter()
        .fold(RowSchema::new(slots), |schema, (name, ty)| schema.with_derived(name, ty));
    Ok((Action::ReadTable { window, scalars }, schema))
}

fn column_type(column: &AggregateColumn, schema: &EventType) -> Result<DataType> {
    let field_type = match &column.field {
        Some(field) => Some(schema.field_type(field).ok_or_else(|| Error::UnknownField {
            scope: schema.name().to_string(),
            field: field.clone(),
        })?),
        None => None,
    };
    match (column.function, field_type) {
        (AggregateFunction::Window, _) => Err(Error::config(format!(
            "column '{}': window aggregates are only available on aggregation tables",
            column.name
        ))),
        (AggregateFunction::Count, _) => Ok(DataType::Int64),
        (AggregateFunction::Sum, Some(DataType::Int32 | DataType::Int64)) => Ok(DataType::Int64),
        (AggregateFunction::Sum | AggregateFunction::Avg, _) => Ok(DataType::Float64),
        (AggregateFunction::Min | AggregateFunction::Max, Some(ty)) => Ok(ty),
        (function, None) => Err(Error::config(format!(
            "aggregate column '{}' needs a field for {:?}",
            column.name, function
        ))),
    }
}
