//! Reader and writer registrations.

use crate::aggregate::{AggregateSnapshot, WriterId};
use crate::consumer::DatasetChange;
use crate::dataset::{Mutation, NamedDataset};
use crate::predicate::{PredicateShape, Probe};
use eddy_core::{DataType, Delta, Error, Event, EventType, Result, SharedEvent, Value};
use eddy_index::{IndexHandle, KeyRange, KeyShape};
use hashbrown::HashSet;
use std::sync::Arc;

/// Describes the events a writer feeds into a dataset.
#[derive(Clone, Debug)]
pub struct WriterSpec {
    /// Name of the writing statement, used in diagnostics.
    pub name: String,
    /// Schema of the events the writer produces.
    pub source: Arc<EventType>,
}

impl WriterSpec {
    /// Creates a writer spec.
    pub fn new(name: impl Into<String>, source: Arc<EventType>) -> Self {
        Self {
            name: name.into(),
            source,
        }
    }

    /// Checks that the writer can populate every dataset field.
    pub(crate) fn validate(&self, dataset: &NamedDataset) -> Result<()> {
        let schema = dataset.schema();
        if dataset.is_aggregate() {
            if self.source.fields() != schema.fields() {
                return Err(Error::config(format!(
                    "writer '{}' produces '{}' but aggregation table '{}' aggregates '{}'",
                    self.name,
                    self.source.name(),
                    dataset.name(),
                    schema.name()
                )));
            }
            return Ok(());
        }
        for field in schema.fields() {
            let Some(ty) = self.source.field_type(&field.name) else {
                return Err(Error::UnknownField {
                    scope: self.source.name().to_string(),
                    field: field.name.clone(),
                });
            };
            if !ty.is_comparable_with(field.data_type) {
                return Err(Error::config(format!(
                    "writer '{}' field '{}' is {:?}, dataset '{}' declares {:?}",
                    self.name,
                    field.name,
                    ty,
                    dataset.name(),
                    field.data_type
                )));
            }
        }
        Ok(())
    }

    fn projection(&self, schema: &EventType) -> Vec<usize> {
        schema
            .fields()
            .iter()
            .filter_map(|f| self.source.field_index(&f.name))
            .collect()
    }
}

/// A registered writer of a dataset.
///
/// Dropping the handle unregisters the writer.
#[derive(Debug)]
pub struct WriterHandle {
    dataset: Arc<NamedDataset>,
    id: WriterId,
    spec: WriterSpec,
    projection: Vec<usize>,
}

impl WriterHandle {
    pub(crate) fn new(dataset: Arc<NamedDataset>, id: WriterId, spec: WriterSpec) -> Self {
        let projection = spec.projection(dataset.schema());
        Self {
            dataset,
            id,
            spec,
            projection,
        }
    }

    /// Returns the writer id.
    #[inline]
    pub fn id(&self) -> WriterId {
        self.id
    }

    /// Returns the target dataset.
    #[inline]
    pub fn dataset(&self) -> &Arc<NamedDataset> {
        &self.dataset
    }

    /// Returns the writer's source description.
    #[inline]
    pub fn spec(&self) -> &WriterSpec {
        &self.spec
    }

    fn project(&self, event: &Event) -> Vec<Value> {
        self.projection
            .iter()
            .map(|&i| event.get(i).cloned().unwrap_or(Value::Null))
            .collect()
    }

    /// Inserts the projection of each source event in one commit.
    pub fn insert(&self, events: &[SharedEvent]) -> Result<DatasetChange> {
        let mutations = events
            .iter()
            .map(|e| Mutation::Insert(self.project(e)))
            .collect();
        self.dataset.apply(mutations)
    }

    /// Applies raw mutations in one commit.
    pub fn apply(&self, mutations: Vec<Mutation>) -> Result<DatasetChange> {
        self.dataset.apply(mutations)
    }

    /// Contributes weighted events to an aggregation table.
    pub fn contribute(&self, deltas: &[Delta<SharedEvent>]) -> Result<()> {
        self.dataset.contribute(self.id, deltas)
    }

    /// Returns the net number of events this writer contributes.
    pub fn contributed(&self) -> i64 {
        self.dataset.contributed(self.id)
    }
}

impl Drop for WriterHandle {
    fn drop(&mut self) {
        self.dataset.release_writer(self.id);
    }
}

/// Where each column of an index key comes from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum KeyPart {
    /// Position in the lookup's equality values.
    Equality(usize),
    /// One value of the driving in-list term.
    InValue,
}

#[derive(Debug)]
struct IndexPlan {
    handle: IndexHandle,
    key: Vec<KeyPart>,
}

/// A registered reader of a dataset.
///
/// The reader owns one reference to each index serving its predicate. An
/// equality and range predicate needs one index; an in-list term over several
/// dataset fields needs one per field, and lookups union their results.
/// [`ReaderHandle::release`] gives the indexes back and reports a broken
/// reference count; dropping an unreleased handle releases it as well.
#[derive(Debug)]
pub struct ReaderHandle {
    dataset: Arc<NamedDataset>,
    shape: PredicateShape,
    plans: Vec<IndexPlan>,
    equality_types: Vec<DataType>,
    ranges: Vec<(usize, DataType)>,
    /// Field positions and common type of each in-list term.
    in_terms: Vec<(Vec<usize>, DataType)>,
    released: bool,
}

impl ReaderHandle {
    pub(crate) fn new(
        dataset: Arc<NamedDataset>,
        shape: PredicateShape,
        handles: Vec<IndexHandle>,
    ) -> Result<Self> {
        let plans = handles
            .into_iter()
            .map(|handle| {
                let key = handle
                    .shape()
                    .equality_fields()
                    .iter()
                    .map(|f| match shape.equality.iter().position(|e| e == f) {
                        Some(i) => KeyPart::Equality(i),
                        None => KeyPart::InValue,
                    })
                    .collect();
                IndexPlan { handle, key }
            })
            .collect();
        let schema = dataset.schema().clone();
        // from here on a failure drops `reader`, which releases the indexes
        let mut reader = Self {
            dataset,
            shape,
            plans,
            equality_types: Vec::new(),
            ranges: Vec::new(),
            in_terms: Vec::new(),
            released: false,
        };
        for field in &reader.shape.equality {
            let pos = schema.require_field(field)?;
            reader.equality_types.push(schema.fields()[pos].data_type);
        }
        for field in &reader.shape.ranges {
            let pos = schema.require_field(field)?;
            reader.ranges.push((pos, schema.fields()[pos].data_type));
        }
        for term in &reader.shape.in_terms {
            let positions = term
                .fields
                .iter()
                .map(|f| schema.require_field(f))
                .collect::<Result<Vec<_>>>()?;
            let ty = positions
                .first()
                .map(|&p| schema.fields()[p].data_type)
                .ok_or_else(|| Error::config("in-list term names no field"))?;
            reader.in_terms.push((positions, ty));
        }
        Ok(reader)
    }

    /// Returns the dataset this reader reads.
    #[inline]
    pub fn dataset(&self) -> &Arc<NamedDataset> {
        &self.dataset
    }

    /// Returns the predicate shape.
    #[inline]
    pub fn shape(&self) -> &PredicateShape {
        &self.shape
    }

    /// Returns the shapes of the indexes serving this reader.
    pub fn index_shapes(&self) -> Vec<&KeyShape> {
        self.plans.iter().map(|p| p.handle.shape()).collect()
    }

    /// Reads every aggregate column of the table this reader reads.
    pub fn aggregate_snapshot(&self) -> Result<AggregateSnapshot> {
        self.ensure_registered()?;
        self.dataset.aggregate_snapshot()
    }

    /// Unregisters the reader and releases its indexes. Releasing twice is a
    /// no-op; lookups after release fail.
    pub fn release(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        let handles = self.plans.drain(..).map(|p| p.handle).collect();
        self.dataset.release_reader(handles)
    }

    fn ensure_registered(&self) -> Result<()> {
        if self.released {
            return Err(Error::invalid_operation(format!(
                "reader of dataset '{}' was released",
                self.dataset.name()
            )));
        }
        Ok(())
    }

    fn check_types(&self, probe: &Probe) -> Result<()> {
        for ((value, ty), field) in probe
            .equality
            .iter()
            .zip(&self.equality_types)
            .zip(&self.shape.equality)
        {
            check_value(field, value, *ty)?;
        }
        for ((range, (_, ty)), field) in probe.ranges.iter().zip(&self.ranges).zip(&self.shape.ranges) {
            for bound in range.bounds() {
                check_value(field, bound, *ty)?;
            }
        }
        for ((values, (_, ty)), term) in probe
            .in_values
            .iter()
            .zip(&self.in_terms)
            .zip(&self.shape.in_terms)
        {
            for value in values {
                check_value(&term.fields[0], value, *ty)?;
            }
        }
        Ok(())
    }

    /// Returns the rows matching the probe.
    ///
    /// A null equality value or range bound matches nothing; a null in-list
    /// value matches nothing but leaves the other values of its list in play.
    pub fn lookup(&self, probe: &Probe) -> Result<Vec<SharedEvent>> {
        self.ensure_registered()?;
        self.shape.check_probe(probe)?;
        self.check_types(probe)?;
        if probe.equality.iter().any(Value::is_null)
            || probe.ranges.iter().any(|r| r.bounds().any(Value::is_null))
        {
            return Ok(Vec::new());
        }

        let state = self.dataset.read_state();
        let candidates: Vec<SharedEvent> = if self.plans.is_empty() {
            state.rows.values().cloned().collect()
        } else {
            let driving: Vec<Option<&Value>> = match probe.in_values.first() {
                Some(values) => values.iter().filter(|v| !v.is_null()).map(Some).collect(),
                None => vec![None],
            };
            let mut seen = HashSet::new();
            let mut ids = Vec::new();
            for plan in &self.plans {
                for value in &driving {
                    let key: Vec<Value> = plan
                        .key
                        .iter()
                        .map(|part| match part {
                            KeyPart::Equality(i) => probe.equality[*i].clone(),
                            KeyPart::InValue => value.map_or(Value::Null, Clone::clone),
                        })
                        .collect();
                    let found = match probe.ranges.first() {
                        Some(range) => state.indexes.lookup_range(&plan.handle, &key, range)?,
                        None => state.indexes.lookup(&plan.handle, &key)?,
                    };
                    ids.extend(found.into_iter().filter(|id| seen.insert(*id)));
                }
            }
            if self.plans.len() > 1 || driving.len() > 1 {
                ids.sort_unstable();
            }
            ids.iter().filter_map(|id| state.rows.get(id).cloned()).collect()
        };
        drop(state);

        if probe.ranges.len() <= 1 && probe.in_values.len() <= 1 {
            return Ok(candidates);
        }
        let residual_ranges: Vec<(usize, KeyRange<Value>)> = self
            .ranges
            .iter()
            .zip(&probe.ranges)
            .skip(1)
            .map(|((pos, _), range)| (*pos, range.map(Value::index_key)))
            .collect();
        let residual_in: Vec<(&[usize], Vec<Value>)> = self
            .in_terms
            .iter()
            .zip(&probe.in_values)
            .skip(1)
            .map(|((positions, _), values)| {
                let keys = values
                    .iter()
                    .filter(|v| !v.is_null())
                    .map(Value::index_key)
                    .collect();
                (positions.as_slice(), keys)
            })
            .collect();
        Ok(candidates
            .into_iter()
            .filter(|row| {
                residual_ranges.iter().all(|(pos, range)| match row.get(*pos) {
                    Some(v) if !v.is_null() => range.contains(&v.index_key()),
                    _ => false,
                }) && residual_in.iter().all(|(positions, keys)| {
                    positions.iter().any(|pos| match row.get(*pos) {
                        Some(v) if !v.is_null() => keys.contains(&v.index_key()),
                        _ => false,
                    })
                })
            })
            .collect())
    }

    /// Deletes the rows matching the probe in one commit.
    pub fn delete(&self, probe: &Probe) -> Result<DatasetChange> {
        let rows = self.lookup(probe)?;
        if rows.is_empty() {
            return Ok(DatasetChange::default());
        }
        self.dataset
            .apply(rows.iter().map(|r| Mutation::Delete(r.id())).collect())
    }
}

fn check_value(field: &str, value: &Value, expected: DataType) -> Result<()> {
    match value.data_type() {
        Some(got) if !got.is_comparable_with(expected) => {
            Err(Error::type_mismatch(field, expected, got))
        }
        _ => Ok(()),
    }
}

impl Drop for ReaderHandle {
    fn drop(&mut self) {
        // a broken reference count must not go unnoticed
        if let Err(err) = self.release() {
            if !std::thread::panicking() {
                panic!("{}", err);
            }
        }
    }
}
