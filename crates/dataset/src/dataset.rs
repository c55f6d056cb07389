//! Named datasets.
//!
//! A [`NamedDataset`] is a retained collection shared by every statement that
//! names it. Its rows, retention window, indexes and (for aggregation tables)
//! aggregate columns live behind one `RwLock`: mutations take the write side
//! and apply row changes and index maintenance as one unit; scans and lookups
//! share the read side. Writers are additionally serialized by a commit lock
//! that is held until the committed change has reached every consumer, so
//! consumers observe commits in commit order.

use crate::aggregate::{AggregateColumn, AggregateSnapshot, AggregateTable, WriterId};
use crate::commit::CommitLock;
use crate::consumer::{ChangeCallback, ConsumerId, ConsumerList, DatasetChange};
use crate::handle::{ReaderHandle, WriterHandle, WriterSpec};
use crate::predicate::PredicateShape;
use eddy_core::{Delta, Error, Event, EventType, Result, SharedEvent, Value};
use eddy_index::{IndexHandle, IndexRegistry, KeyShape, RowId};
use eddy_window::{Window, WindowOutput, WindowPolicy};
use hashbrown::HashSet;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, error};

/// Identifier of a dataset.
pub type DatasetId = u64;

/// One row-level mutation.
#[derive(Clone, Debug)]
pub enum Mutation {
    /// Inserts a row given its values in schema order.
    Insert(Vec<Value>),
    /// Deletes a row. Deleting an absent row is a no-op.
    Delete(RowId),
    /// Replaces the values of an existing row, keeping its identity.
    Update(RowId, Vec<Value>),
}

pub(crate) struct DatasetState {
    pub(crate) rows: BTreeMap<RowId, SharedEvent>,
    retention: Window,
    pub(crate) indexes: IndexRegistry,
    aggregate: Option<AggregateTable>,
    now: i64,
}

impl DatasetState {
    fn admit(&mut self, row: SharedEvent, change: &mut DatasetChange) -> Result<()> {
        let output = self.retention.admit(row, self.now)?;
        self.apply_window(output, change);
        Ok(())
    }

    fn apply_window(&mut self, output: WindowOutput, change: &mut DatasetChange) {
        for row in output.inserted {
            self.indexes.insert(&row);
            self.rows.insert(row.id(), row.clone());
            change.inserted.push(row);
        }
        for row in output.expired {
            self.remove(row.id(), change);
        }
    }

    fn remove(&mut self, id: RowId, change: &mut DatasetChange) -> bool {
        match self.rows.remove(&id) {
            Some(current) => {
                self.indexes.delete(&current);
                change.removed.push(current);
                true
            }
            None => false,
        }
    }

    fn replace(&mut self, row: SharedEvent, change: &mut DatasetChange) {
        if let Some(old) = self.rows.insert(row.id(), row.clone()) {
            self.indexes.delete(&old);
            change.removed.push(old);
        }
        self.indexes.insert(&row);
        change.inserted.push(row);
    }
}

/// A shared, continuously mutated, indexable collection.
pub struct NamedDataset {
    id: DatasetId,
    name: String,
    schema: Arc<EventType>,
    retention: WindowPolicy,
    state: RwLock<DatasetState>,
    commit: CommitLock,
    consumers: ConsumerList,
    writers: AtomicUsize,
    readers: AtomicUsize,
    next_writer: AtomicU64,
    dropped: AtomicBool,
}

impl std::fmt::Debug for NamedDataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamedDataset")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("retention", &self.retention)
            .finish_non_exhaustive()
    }
}

impl NamedDataset {
    pub(crate) fn new(
        id: DatasetId,
        name: String,
        schema: Arc<EventType>,
        retention: WindowPolicy,
        aggregate: Option<Vec<AggregateColumn>>,
    ) -> Result<Self> {
        if matches!(retention, WindowPolicy::ExternallyTimed { .. }) {
            return Err(Error::config(format!(
                "dataset '{}' cannot use an externally timed retention policy",
                name
            )));
        }
        let window = Window::new(retention.clone(), &schema)?;
        let aggregate = aggregate
            .map(|columns| AggregateTable::new(&schema, columns))
            .transpose()?;
        Ok(Self {
            id,
            state: RwLock::new(DatasetState {
                rows: BTreeMap::new(),
                retention: window,
                indexes: IndexRegistry::new(schema.clone()),
                aggregate,
                now: 0,
            }),
            name,
            schema,
            retention,
            commit: CommitLock::default(),
            consumers: ConsumerList::default(),
            writers: AtomicUsize::new(0),
            readers: AtomicUsize::new(0),
            next_writer: AtomicU64::new(1),
            dropped: AtomicBool::new(false),
        })
    }

    /// Returns the dataset id.
    #[inline]
    pub fn id(&self) -> DatasetId {
        self.id
    }

    /// Returns the dataset name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the row schema.
    #[inline]
    pub fn schema(&self) -> &Arc<EventType> {
        &self.schema
    }

    /// Returns the retention policy.
    #[inline]
    pub fn retention(&self) -> &WindowPolicy {
        &self.retention
    }

    /// Returns whether this dataset is an aggregation table.
    pub fn is_aggregate(&self) -> bool {
        self.read_state().aggregate.is_some()
    }

    pub(crate) fn read_state(&self) -> RwLockReadGuard<'_, DatasetState> {
        self.state.read().expect("dataset lock poisoned")
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, DatasetState> {
        self.state.write().expect("dataset lock poisoned")
    }

    fn ensure_live(&self) -> Result<()> {
        if self.dropped.load(Ordering::Acquire) {
            return Err(Error::UnknownDataset {
                name: self.name.clone(),
            });
        }
        Ok(())
    }

    pub(crate) fn mark_dropped(&self) {
        self.dropped.store(true, Ordering::Release);
    }

    /// Inserts one row. Returns the change the insert caused, which may
    /// include rows evicted by the retention policy.
    pub fn insert(&self, values: Vec<Value>) -> Result<DatasetChange> {
        self.apply(vec![Mutation::Insert(values)])
    }

    /// Deletes one row. Returns true if it was present.
    pub fn delete(&self, id: RowId) -> Result<bool> {
        let change = self.apply(vec![Mutation::Delete(id)])?;
        Ok(!change.removed.is_empty())
    }

    /// Replaces the values of an existing row.
    pub fn update(&self, id: RowId, values: Vec<Value>) -> Result<()> {
        self.apply(vec![Mutation::Update(id, values)]).map(|_| ())
    }

    /// Applies a batch of mutations as one atomic commit.
    ///
    /// The batch is validated before anything is applied: a failing batch
    /// leaves the dataset unchanged.
    pub fn apply(&self, mutations: Vec<Mutation>) -> Result<DatasetChange> {
        self.ensure_live()?;
        let _commit = self.commit.enter(&self.name)?;
        let change = {
            let mut state = self.write_state();
            if state.aggregate.is_some() {
                return Err(Error::invalid_operation(format!(
                    "dataset '{}' is an aggregation table and accepts contributions only",
                    self.name
                )));
            }

            // Everything that can fail happens here, before the first row moves.
            let mut prepared = Vec::with_capacity(mutations.len());
            let mut deleted = HashSet::new();
            for mutation in mutations {
                prepared.push(match mutation {
                    Mutation::Insert(values) => {
                        let row = Arc::new(Event::new(self.schema.clone(), values)?);
                        state.retention.check(&row)?;
                        Prepared::Insert(row)
                    }
                    Mutation::Delete(id) => {
                        deleted.insert(id);
                        Prepared::Delete(id)
                    }
                    Mutation::Update(id, values) => {
                        let current = state
                            .rows
                            .get(&id)
                            .filter(|_| !deleted.contains(&id))
                            .ok_or(Error::NotFound { kind: "row", id })?;
                        Prepared::Update(Arc::new(current.replace_values(values)?))
                    }
                });
            }

            let mut change = DatasetChange::default();
            for mutation in prepared {
                match mutation {
                    Prepared::Insert(row) => state.admit(row, &mut change)?,
                    Prepared::Delete(id) => {
                        state.retention.remove(id);
                        state.remove(id, &mut change);
                    }
                    Prepared::Update(row) => state.replace(row, &mut change),
                }
            }
            change
        };
        debug!(
            dataset = %self.name,
            inserted = change.inserted.len(),
            removed = change.removed.len(),
            "NamedDataset: committed"
        );
        self.consumers.dispatch(&self.name, &change)?;
        Ok(change)
    }

    /// Advances the retention clock, expiring or releasing rows.
    pub fn advance_time(&self, now: i64) -> Result<DatasetChange> {
        self.ensure_live()?;
        let _commit = self.commit.enter(&self.name)?;
        let change = {
            let mut state = self.write_state();
            state.now = now;
            let mut change = DatasetChange::default();
            for output in state.retention.advance_time(now) {
                state.apply_window(output, &mut change);
            }
            change
        };
        if !change.is_empty() {
            debug!(
                dataset = %self.name,
                now,
                inserted = change.inserted.len(),
                removed = change.removed.len(),
                "NamedDataset: retention advanced"
            );
        }
        self.consumers.dispatch(&self.name, &change)?;
        Ok(change)
    }

    /// Applies one writer's weighted contributions to an aggregation table.
    pub fn contribute(&self, writer: WriterId, deltas: &[Delta<SharedEvent>]) -> Result<()> {
        self.ensure_live()?;
        let _commit = self.commit.enter(&self.name)?;
        let mut state = self.write_state();
        let table = state.aggregate.as_mut().ok_or_else(|| {
            Error::invalid_operation(format!("dataset '{}' is not an aggregation table", self.name))
        })?;
        table.apply(writer, deltas);
        debug!(dataset = %self.name, writer, contributions = deltas.len(), "NamedDataset: aggregated");
        Ok(())
    }

    /// Returns the column definitions of an aggregation table.
    pub fn aggregate_columns(&self) -> Option<Vec<AggregateColumn>> {
        self.read_state()
            .aggregate
            .as_ref()
            .map(|t| t.definitions().cloned().collect())
    }

    /// Reads every aggregate column at one point in the commit order.
    pub fn aggregate_snapshot(&self) -> Result<AggregateSnapshot> {
        let state = self.read_state();
        state
            .aggregate
            .as_ref()
            .map(AggregateTable::snapshot)
            .ok_or_else(|| {
                Error::invalid_operation(format!("dataset '{}' is not an aggregation table", self.name))
            })
    }

    /// Returns the net number of events a writer contributes to an
    /// aggregation table.
    pub fn contributed(&self, writer: WriterId) -> i64 {
        self.read_state()
            .aggregate
            .as_ref()
            .map(|t| t.contributed(writer))
            .unwrap_or(0)
    }

    /// Returns all visible rows in insertion order.
    pub fn scan(&self) -> Vec<SharedEvent> {
        self.read_state().rows.values().cloned().collect()
    }

    /// Returns one row by identity.
    pub fn get(&self, id: RowId) -> Option<SharedEvent> {
        self.read_state().rows.get(&id).cloned()
    }

    /// Returns the number of visible rows.
    pub fn len(&self) -> usize {
        self.read_state().rows.len()
    }

    /// Returns true if no row is visible.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the number of live indexes.
    pub fn index_count(&self) -> usize {
        self.read_state().indexes.len()
    }

    /// Returns the shapes of the live indexes.
    pub fn index_shapes(&self) -> Vec<KeyShape> {
        self.read_state().indexes.shapes()
    }

    /// Returns the number of readers sharing the index with this shape.
    pub fn index_ref_count(&self, shape: &KeyShape) -> Option<usize> {
        self.read_state().indexes.ref_count(shape)
    }

    /// Registers a reader, creating or sharing the indexes its predicate
    /// needs. Nothing stays registered if any index cannot be built.
    pub fn register_reader(self: &Arc<Self>, shape: PredicateShape) -> Result<ReaderHandle> {
        self.ensure_live()?;
        shape.validate(&self.schema)?;
        let mut handles = Vec::new();
        {
            let mut guard = self.write_state();
            let state = &mut *guard;
            for key_shape in shape.index_shapes() {
                match state
                    .indexes
                    .get_or_create(key_shape, state.rows.values().map(|r| r.as_ref()))
                {
                    Ok(handle) => handles.push(handle),
                    Err(err) => {
                        for handle in handles {
                            state.indexes.release(handle)?;
                        }
                        return Err(err.into());
                    }
                }
            }
        }
        self.readers.fetch_add(1, Ordering::AcqRel);
        debug!(
            dataset = %self.name,
            readers = self.reader_count(),
            indexes = handles.len(),
            "NamedDataset: reader registered"
        );
        ReaderHandle::new(self.clone(), shape, handles)
    }

    /// Gives a reader's indexes back. A handle the registry does not know
    /// means its reference counts are broken, which is fatal.
    pub(crate) fn release_reader(&self, handles: Vec<IndexHandle>) -> Result<()> {
        let mut failure = None;
        {
            let mut state = self.write_state();
            for handle in handles {
                if let Err(err) = state.indexes.release(handle) {
                    failure.get_or_insert(err);
                }
            }
        }
        self.readers.fetch_sub(1, Ordering::AcqRel);
        match failure {
            None => Ok(()),
            Some(err) => {
                error!(dataset = %self.name, error = %err, "index release failed");
                Err(Error::concurrency_violation(format!(
                    "dataset '{}': {}",
                    self.name, err
                )))
            }
        }
    }

    /// Registers a writer.
    pub fn register_writer(self: &Arc<Self>, spec: WriterSpec) -> Result<WriterHandle> {
        self.ensure_live()?;
        spec.validate(self)?;
        let id = self.next_writer.fetch_add(1, Ordering::Relaxed);
        self.writers.fetch_add(1, Ordering::AcqRel);
        debug!(dataset = %self.name, writer = id, source = %spec.name, "NamedDataset: writer registered");
        Ok(WriterHandle::new(self.clone(), id, spec))
    }

    pub(crate) fn release_writer(&self, id: WriterId) {
        if let Some(table) = self.write_state().aggregate.as_mut() {
            table.forget_writer(id);
        }
        self.writers.fetch_sub(1, Ordering::AcqRel);
    }

    /// Returns the number of registered writers.
    pub fn writer_count(&self) -> usize {
        self.writers.load(Ordering::Acquire)
    }

    /// Returns the number of registered readers.
    pub fn reader_count(&self) -> usize {
        self.readers.load(Ordering::Acquire)
    }

    /// Registers a consumer of committed changes.
    pub fn subscribe(&self, callback: ChangeCallback) -> ConsumerId {
        self.consumers.subscribe(callback)
    }

    /// Registers a consumer and returns the rows visible at that point in
    /// the commit order. The consumer receives every later commit.
    pub fn subscribe_with_snapshot(
        &self,
        callback: ChangeCallback,
    ) -> Result<(ConsumerId, Vec<SharedEvent>)> {
        self.ensure_live()?;
        let _commit = self.commit.enter(&self.name)?;
        let rows = self.scan();
        Ok((self.consumers.subscribe(callback), rows))
    }

    /// Removes a consumer.
    pub fn unsubscribe(&self, id: ConsumerId) -> bool {
        self.consumers.unsubscribe(id)
    }

    /// Returns the number of consumers.
    pub fn consumer_count(&self) -> usize {
        self.consumers.len()
    }
}

enum Prepared {
    Insert(SharedEvent),
    Delete(RowId),
    Update(SharedEvent),
}
