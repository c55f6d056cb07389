//! Continuous statements.
//!
//! A statement joins one or more inputs, turns every collection boundary
//! into delivered batches and optionally feeds its inserted rows into a
//! dataset. Inputs are event streams routed by type name or datasets whose
//! committed changes the statement consumes.

use crate::boundary::{Delivery, ErrorBoundary, ErrorReport};
use eddy_core::{
    Delta, Error, Event, EventType, EventTypeBuilder, FieldPath, Result, Row, RowDelta, RowSchema,
    SharedEvent, Value,
};
use eddy_dataset::{DatasetChange, NamedDataset, WriterHandle, WriterSpec};
use eddy_join::{CompareOp, JoinEdge, JoinProcessor, StreamIndex};
use eddy_output::{DeliveryDescriptor, OrderKey, OutputProcessor, SubscriptionManager};
use eddy_window::WindowPolicy;
use std::sync::Arc;
use tracing::{debug, trace};

/// Identifier of a statement.
pub type StatementId = u64;

/// Where a statement input takes its events from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamSource {
    /// Events sent to the engine under this event type name.
    EventType(String),
    /// Changes committed to this dataset.
    Dataset(String),
}

/// A constant comparison applied to every event of an input before it
/// reaches the join, e.g. `theString = 'E0'`.
#[derive(Clone, Debug)]
pub struct StreamFilter {
    pub field: String,
    pub op: CompareOp,
    pub value: Value,
}

/// One input of a statement.
#[derive(Clone, Debug)]
pub struct StreamSpec {
    pub alias: String,
    pub source: StreamSource,
    /// Ignored for dataset inputs, whose retention belongs to the dataset.
    pub window: WindowPolicy,
    pub filters: Vec<StreamFilter>,
}

impl StreamSpec {
    /// An input fed by events of a registered type.
    pub fn event_type(alias: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            source: StreamSource::EventType(name.into()),
            window: WindowPolicy::KeepAll,
            filters: Vec::new(),
        }
    }

    /// An input fed by the changes of a dataset.
    pub fn dataset(alias: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            source: StreamSource::Dataset(name.into()),
            window: WindowPolicy::KeepAll,
            filters: Vec::new(),
        }
    }

    pub fn window(mut self, window: WindowPolicy) -> Self {
        self.window = window;
        self
    }

    pub fn filter(mut self, field: impl Into<String>, op: CompareOp, value: impl Into<Value>) -> Self {
        self.filters.push(StreamFilter {
            field: field.into(),
            op,
            value: value.into(),
        });
        self
    }
}

/// What a statement does with its result besides notifying listeners.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum StatementTarget {
    #[default]
    Listener,
    /// Inserted rows go into the named dataset. For an aggregation table,
    /// inserted rows contribute `+1` and removed rows `-1`.
    Into(String),
}

/// Declarative description of a continuous statement.
#[derive(Clone, Debug)]
pub struct StatementSpec {
    pub name: String,
    pub streams: Vec<StreamSpec>,
    pub edges: Vec<JoinEdge>,
    pub delivery: DeliveryDescriptor,
    pub order_by: Vec<OrderKey>,
    pub target: StatementTarget,
    /// Overrides the engine-wide empty-boundary default.
    pub deliver_empty: Option<bool>,
}

impl StatementSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            streams: Vec::new(),
            edges: Vec::new(),
            delivery: DeliveryDescriptor::immediate(),
            order_by: Vec::new(),
            target: StatementTarget::Listener,
            deliver_empty: None,
        }
    }

    pub fn stream(mut self, stream: StreamSpec) -> Self {
        self.streams.push(stream);
        self
    }

    pub fn join(mut self, edge: JoinEdge) -> Self {
        self.edges.push(edge);
        self
    }

    pub fn delivery(mut self, delivery: DeliveryDescriptor) -> Self {
        self.delivery = delivery;
        self
    }

    pub fn order_by(mut self, key: OrderKey) -> Self {
        self.order_by.push(key);
        self
    }

    pub fn into_dataset(mut self, dataset: impl Into<String>) -> Self {
        self.target = StatementTarget::Into(dataset.into());
        self
    }

    pub fn deliver_empty(mut self, deliver: bool) -> Self {
        self.deliver_empty = Some(deliver);
        self
    }

    /// Names of the datasets this statement reads from.
    pub fn input_datasets(&self) -> impl Iterator<Item = &str> {
        self.streams.iter().filter_map(|s| match &s.source {
            StreamSource::Dataset(name) => Some(name.as_str()),
            StreamSource::EventType(_) => None,
        })
    }
}

#[derive(Clone, Debug)]
pub(crate) struct ResolvedFilter {
    field: usize,
    op: CompareOp,
    value: Value,
}

impl ResolvedFilter {
    pub(crate) fn resolve(filter: &StreamFilter, schema: &EventType) -> Result<Self> {
        let field = schema.require_field(&filter.field)?;
        let declared = schema.fields()[field].data_type;
        match filter.value.data_type() {
            None => Err(Error::config(format!(
                "filter on '{}.{}' compares with null",
                schema.name(),
                filter.field
            ))),
            Some(ty) if !ty.is_comparable_with(declared) => Err(Error::config(format!(
                "filter on '{}.{}' compares {:?} with {:?}",
                schema.name(),
                filter.field,
                declared,
                ty
            ))),
            Some(_) => Ok(Self {
                field,
                op: filter.op,
                value: filter.value.clone(),
            }),
        }
    }

    pub(crate) fn accepts(&self, event: &Event) -> bool {
        event
            .get(self.field)
            .is_some_and(|v| self.op.eval(v, &self.value))
    }
}

/// Where a statement's result goes besides its listeners.
#[derive(Debug)]
pub(crate) enum Target {
    Listener,
    Rows {
        handle: WriterHandle,
        /// Dataset fields as resolved in the statement's row schema.
        projection: Vec<FieldPath>,
        output: Arc<EventType>,
    },
    Aggregate {
        handle: WriterHandle,
    },
}

impl Target {
    /// Registers the statement as a writer of `dataset`.
    ///
    /// Row datasets take every dataset field by name from the result row.
    /// Aggregation tables need a single-input statement over the table's
    /// own schema so that contributions keep their event identity.
    pub(crate) fn into_dataset(
        statement: &str,
        dataset: &Arc<NamedDataset>,
        schema: &RowSchema,
    ) -> Result<Self> {
        if dataset.is_aggregate() {
            let source = match (schema.width(), schema.event_type(0)) {
                (1, Some(ty)) => ty.clone(),
                _ => {
                    return Err(Error::config(format!(
                        "statement '{}' joins {} inputs and cannot contribute to aggregation table '{}'",
                        statement,
                        schema.width(),
                        dataset.name()
                    )))
                }
            };
            let handle = dataset.register_writer(WriterSpec::new(statement, source))?;
            return Ok(Target::Aggregate { handle });
        }

        let mut projection = Vec::with_capacity(dataset.schema().len());
        let mut builder = EventTypeBuilder::new(format!("{}_insert", dataset.schema().name()))?;
        for field in dataset.schema().fields() {
            let path = schema.resolve(&field.name)?;
            let ty = schema.field_type(path).ok_or_else(|| {
                Error::unknown_field(statement, field.name.as_str())
            })?;
            projection.push(path);
            builder = builder.field(field.name.as_str(), ty)?;
        }
        let output = builder.build();
        let handle = dataset.register_writer(WriterSpec::new(statement, output.clone()))?;
        Ok(Target::Rows {
            handle,
            projection,
            output,
        })
    }

    pub(crate) fn dataset(&self) -> Option<&Arc<NamedDataset>> {
        match self {
            Target::Listener => None,
            Target::Rows { handle, .. } | Target::Aggregate { handle } => Some(handle.dataset()),
        }
    }

    fn write(&self, delta: &RowDelta) -> Result<()> {
        match self {
            Target::Listener => Ok(()),
            Target::Rows {
                handle,
                projection,
                output,
            } => {
                if delta.inserted.is_empty() {
                    return Ok(());
                }
                let events = delta
                    .inserted
                    .iter()
                    .map(|row| {
                        let values = projection.iter().map(|p| row.value(*p).clone()).collect();
                        Event::new(output.clone(), values).map(Arc::new)
                    })
                    .collect::<Result<Vec<SharedEvent>>>()?;
                handle.insert(&events)?;
                Ok(())
            }
            Target::Aggregate { handle } => {
                let deltas: Vec<Delta<SharedEvent>> = delta
                    .inserted
                    .iter()
                    .filter_map(|row| row.slot(0).cloned().map(Delta::insert))
                    .chain(
                        delta
                            .removed
                            .iter()
                            .filter_map(|row| row.slot(0).cloned().map(Delta::delete)),
                    )
                    .collect();
                if deltas.is_empty() {
                    return Ok(());
                }
                handle.contribute(&deltas)
            }
        }
    }
}

/// Runtime state of one continuous statement. Guarded by its own mutex.
pub(crate) struct ContinuousStatement {
    id: StatementId,
    name: String,
    join: JoinProcessor,
    output: OutputProcessor,
    filters: Vec<Vec<ResolvedFilter>>,
    target: Target,
    subscriptions: SubscriptionManager,
    boundary: ErrorBoundary,
}

impl ContinuousStatement {
    pub(crate) fn new(
        id: StatementId,
        name: String,
        join: JoinProcessor,
        output: OutputProcessor,
        filters: Vec<Vec<ResolvedFilter>>,
        target: Target,
    ) -> Self {
        Self {
            id,
            boundary: ErrorBoundary::new(name.as_str()),
            name,
            join,
            output,
            filters,
            target,
            subscriptions: SubscriptionManager::new(),
        }
    }

    pub(crate) fn id(&self) -> StatementId {
        self.id
    }

    pub(crate) fn schema(&self) -> &RowSchema {
        self.join.schema()
    }

    pub(crate) fn rows(&self) -> Vec<Row> {
        self.join.rows()
    }

    pub(crate) fn target_dataset(&self) -> Option<&Arc<NamedDataset>> {
        self.target.dataset()
    }

    pub(crate) fn subscriptions(&mut self) -> &mut SubscriptionManager {
        &mut self.subscriptions
    }

    pub(crate) fn errors(&self) -> &[ErrorReport] {
        self.boundary.reports()
    }

    fn accepts(&self, stream: StreamIndex, event: &Event) -> bool {
        self.filters[stream].iter().all(|f| f.accepts(event))
    }

    /// Processes one routed event as its own boundary.
    pub(crate) fn on_event(
        &mut self,
        stream: StreamIndex,
        event: SharedEvent,
        now: i64,
    ) -> Result<Delivery> {
        if !self.accepts(stream, &event) {
            trace!(statement = %self.name, stream, "event filtered");
            return Ok(Delivery::default());
        }
        let result = self
            .join
            .on_event(stream, event, now)
            .and_then(|delta| self.emit_change(delta));
        self.boundary.guard(result, now)
    }

    /// Processes one committed change of a dataset input.
    pub(crate) fn on_change(
        &mut self,
        stream: StreamIndex,
        change: &DatasetChange,
        now: i64,
    ) -> Result<Delivery> {
        let inserted: Vec<SharedEvent> = change
            .inserted
            .iter()
            .filter(|e| self.accepts(stream, e))
            .cloned()
            .collect();
        let removed: Vec<SharedEvent> = change
            .removed
            .iter()
            .filter(|e| self.accepts(stream, e))
            .cloned()
            .collect();
        if inserted.is_empty() && removed.is_empty() {
            return Ok(Delivery::default());
        }
        let result = self
            .join
            .on_change(stream, inserted, removed)
            .and_then(|delta| self.emit_change(delta));
        self.boundary.guard(result, now)
    }

    /// Loads the rows a dataset input holds when the statement starts.
    /// Nothing is delivered for them.
    pub(crate) fn seed(&mut self, stream: StreamIndex, rows: Vec<SharedEvent>) -> Result<()> {
        let rows: Vec<SharedEvent> = rows
            .into_iter()
            .filter(|e| self.accepts(stream, e))
            .collect();
        debug!(statement = %self.name, stream, rows = rows.len(), "seeding dataset input");
        self.join.on_change(stream, rows, Vec::new()).map(|_| ())
    }

    /// Advances every input window; each window output is its own boundary.
    pub(crate) fn advance_time(&mut self, now: i64) -> Result<Delivery> {
        let result = self.join.advance_time(now).and_then(|deltas| {
            let mut delivery = Delivery::default();
            for delta in deltas {
                delivery.append(self.emit(delta)?);
            }
            Ok(delivery)
        });
        self.boundary.guard(result, now)
    }

    /// Event-driven changes count as a boundary only when the result moved.
    /// Empty boundaries are reserved for time-driven window flushes.
    fn emit_change(&self, delta: RowDelta) -> Result<Delivery> {
        if delta.is_empty() {
            return Ok(Delivery::default());
        }
        self.emit(delta)
    }

    fn emit(&self, mut delta: RowDelta) -> Result<Delivery> {
        delta.elide();
        self.target.write(&delta)?;
        let batches = self.output.consume(delta);
        Ok(Delivery::new(&self.subscriptions, batches))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eddy_core::DataType;
    use eddy_dataset::DatasetRegistry;
    use eddy_join::{Condition, JoinGraph, JoinKind, JoinStream};

    fn bean() -> Arc<EventType> {
        EventTypeBuilder::new("SupportBean")
            .unwrap()
            .field("theString", DataType::String)
            .unwrap()
            .field("intPrimitive", DataType::Int32)
            .unwrap()
            .build()
    }

    fn event(ty: &Arc<EventType>, s: &str, i: i32) -> SharedEvent {
        Arc::new(Event::new(ty.clone(), vec![s.into(), i.into()]).unwrap())
    }

    fn statement(graph: JoinGraph, target: Target, filters: Vec<Vec<ResolvedFilter>>) -> ContinuousStatement {
        let join = JoinProcessor::new(graph).unwrap();
        let output =
            OutputProcessor::new(join.schema(), &DeliveryDescriptor::immediate(), &[], false).unwrap();
        ContinuousStatement::new(1, "s".into(), join, output, filters, target)
    }

    fn single(ty: &Arc<EventType>) -> JoinGraph {
        JoinGraph::single(JoinStream::new("s0", ty.clone(), WindowPolicy::Length { size: 2 })).unwrap()
    }

    #[test]
    fn test_filter_resolution() {
        let ty = bean();
        let ok = StreamFilter {
            field: "intPrimitive".into(),
            op: CompareOp::Gt,
            value: Value::Int64(3),
        };
        let filter = ResolvedFilter::resolve(&ok, &ty).unwrap();
        assert!(filter.accepts(&event(&ty, "E1", 4)));
        assert!(!filter.accepts(&event(&ty, "E1", 3)));

        let wrong_type = StreamFilter {
            field: "intPrimitive".into(),
            op: CompareOp::Eq,
            value: Value::from("x"),
        };
        assert!(matches!(
            ResolvedFilter::resolve(&wrong_type, &ty),
            Err(Error::Config { .. })
        ));
        let null = StreamFilter {
            field: "theString".into(),
            op: CompareOp::Eq,
            value: Value::Null,
        };
        assert!(ResolvedFilter::resolve(&null, &ty).is_err());
    }

    #[test]
    fn test_insert_into_projects_by_name() {
        let ty = bean();
        let narrow = EventTypeBuilder::new("Narrow")
            .unwrap()
            .field("intPrimitive", DataType::Int64)
            .unwrap()
            .build();
        let registry = DatasetRegistry::new();
        let dataset = registry
            .create_dataset("W", narrow, WindowPolicy::KeepAll)
            .unwrap();
        let target = Target::into_dataset("s", &dataset, &single(&ty).row_schema()).unwrap();
        assert_eq!(dataset.writer_count(), 1);

        let mut stmt = statement(single(&ty), target, vec![Vec::new()]);
        stmt.on_event(0, event(&ty, "E1", 7), 0).unwrap();
        let rows = dataset.scan();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].values(), &[Value::Int32(7)]);

        drop(stmt);
        assert_eq!(dataset.writer_count(), 0);
    }

    #[test]
    fn test_filtered_events_never_reach_the_join() {
        let ty = bean();
        let filter = ResolvedFilter::resolve(
            &StreamFilter {
                field: "theString".into(),
                op: CompareOp::Eq,
                value: "E0".into(),
            },
            &ty,
        )
        .unwrap();
        let mut stmt = statement(single(&ty), Target::Listener, vec![vec![filter]]);
        stmt.on_event(0, event(&ty, "E1", 1), 0).unwrap();
        stmt.on_event(0, event(&ty, "E0", 2), 0).unwrap();
        assert_eq!(stmt.rows().len(), 1);
    }

    #[test]
    fn test_type_mismatch_is_isolated() {
        let ty = bean();
        let graph = JoinGraph::new(
            vec![
                JoinStream::new("a", ty.clone(), WindowPolicy::KeepAll),
                JoinStream::new("b", ty.clone(), WindowPolicy::KeepAll),
            ],
            vec![JoinEdge::new(
                "a",
                JoinKind::Inner,
                "b",
                vec![Condition::equals("intPrimitive", "intPrimitive")],
            )],
        )
        .unwrap();
        let mut stmt = statement(graph, Target::Listener, vec![Vec::new(), Vec::new()]);

        let bad = Arc::new(Event::new(ty.clone(), vec!["E1".into(), "seven".into()]).unwrap());
        let delivery = stmt.on_event(0, bad, 5).unwrap();
        assert!(delivery.is_empty());
        assert_eq!(stmt.errors().len(), 1);
        assert_eq!(stmt.errors()[0].time, 5);

        stmt.on_event(0, event(&ty, "E1", 7), 6).unwrap();
        stmt.on_event(1, event(&ty, "E2", 7), 6).unwrap();
        assert_eq!(stmt.rows().len(), 1);
    }
}
