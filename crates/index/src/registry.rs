//! The index registry.
//!
//! An [`IndexRegistry`] owns every secondary index over one collection of
//! rows. Indexes are created on demand from a [`KeyShape`], shared between
//! all requesters whose shape an existing index can serve, and dropped when
//! the last [`IndexHandle`] for them is released.
//!
//! The registry performs no locking of its own; the owner (a dataset or a
//! join store) serializes mutation and index maintenance.

use crate::hash::HashIndex;
use crate::ordered::OrderedIndex;
use crate::shape::KeyShape;
use crate::stats::IndexStats;
use crate::traits::{Index, IndexError, KeyRange, RangeIndex, RowId};
use eddy_core::{DataType, Event, EventType, Value};
use hashbrown::HashMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Identifier of an index within its registry.
pub type IndexId = u64;

/// A claim on one index.
///
/// Handles are deliberately not `Clone`: each one accounts for exactly one
/// reference and must be given back through [`IndexRegistry::release`].
#[derive(Debug, PartialEq, Eq)]
pub struct IndexHandle {
    id: IndexId,
    shape: KeyShape,
}

impl IndexHandle {
    /// Returns the index this handle refers to.
    #[inline]
    pub fn id(&self) -> IndexId {
        self.id
    }

    /// Returns the shape that was requested.
    #[inline]
    pub fn shape(&self) -> &KeyShape {
        &self.shape
    }
}

#[derive(Debug)]
enum ShapeIndex {
    Equality(HashIndex<Vec<Value>>),
    Ranged {
        partitions: HashMap<Vec<Value>, OrderedIndex<Value>>,
        stats: IndexStats,
    },
}

#[derive(Debug)]
struct IndexSlot {
    shape: KeyShape,
    equality: Vec<(usize, DataType)>,
    range: Option<(usize, DataType)>,
    refs: usize,
    index: ShapeIndex,
}

impl IndexSlot {
    fn equality_key(&self, row: &Event) -> Vec<Value> {
        self.equality
            .iter()
            .map(|(pos, _)| row.get(*pos).map(Value::index_key).unwrap_or(Value::Null))
            .collect()
    }

    fn range_key(&self, row: &Event) -> Value {
        self.range
            .and_then(|(pos, _)| row.get(pos).map(Value::index_key))
            .unwrap_or(Value::Null)
    }

    fn insert(&mut self, row: &Event) {
        let key = self.equality_key(row);
        let range_key = self.range_key(row);
        match &mut self.index {
            ShapeIndex::Equality(index) => index.add(key, row.id()),
            ShapeIndex::Ranged { partitions, stats } => {
                partitions.entry(key).or_default().add(range_key, row.id());
                stats.add_entries(1);
            }
        }
    }

    fn delete(&mut self, row: &Event) {
        let key = self.equality_key(row);
        let range_key = self.range_key(row);
        match &mut self.index {
            ShapeIndex::Equality(index) => index.remove(&key, row.id()),
            ShapeIndex::Ranged { partitions, stats } => {
                if let Some(partition) = partitions.get_mut(&key) {
                    let before = partition.len();
                    partition.remove(&range_key, row.id());
                    if partition.len() < before {
                        stats.remove_entries(1);
                    }
                    if partition.is_empty() {
                        partitions.remove(&key);
                    }
                }
            }
        }
    }

    fn entries(&self) -> usize {
        match &self.index {
            ShapeIndex::Equality(index) => index.len(),
            ShapeIndex::Ranged { stats, .. } => stats.entries(),
        }
    }

    fn stats(&self) -> &IndexStats {
        match &self.index {
            ShapeIndex::Equality(index) => index.stats(),
            ShapeIndex::Ranged { stats, .. } => stats,
        }
    }

    /// Normalizes and type-checks the equality key of a lookup.
    ///
    /// Returns None when a component is Null; nothing equals Null.
    fn probe_key(&self, key: &[Value]) -> Result<Option<Vec<Value>>, IndexError> {
        if key.len() != self.equality.len() {
            return Err(IndexError::KeyArity {
                expected: self.equality.len(),
                got: key.len(),
            });
        }
        let mut probe = Vec::with_capacity(key.len());
        for ((value, (_, ty)), name) in key
            .iter()
            .zip(self.equality.iter())
            .zip(self.shape.equality_fields())
        {
            check_comparable(name, value, *ty)?;
            if value.is_null() {
                return Ok(None);
            }
            probe.push(value.index_key());
        }
        Ok(Some(probe))
    }
}

fn check_comparable(field: &str, value: &Value, expected: DataType) -> Result<(), IndexError> {
    match value.data_type() {
        Some(got) if !got.is_comparable_with(expected) => Err(IndexError::TypeMismatch {
            field: field.to_string(),
            expected,
            got,
        }),
        _ => Ok(()),
    }
}

/// Narrows an open-ended range so that it never reaches the Null keys,
/// which sort below every other value.
fn exclude_null(range: KeyRange<Value>) -> KeyRange<Value> {
    match range {
        KeyRange::All => KeyRange::lower_bound(Value::Null, true),
        KeyRange::UpperBound { value, exclusive } => KeyRange::bound(Value::Null, value, true, exclusive),
        other => other,
    }
}

/// Registry of the secondary indexes over one row collection.
#[derive(Debug)]
pub struct IndexRegistry {
    schema: Arc<EventType>,
    slots: BTreeMap<IndexId, IndexSlot>,
    next_id: IndexId,
}

impl IndexRegistry {
    /// Creates an empty registry over rows of `schema`.
    pub fn new(schema: Arc<EventType>) -> Self {
        Self {
            schema,
            slots: BTreeMap::new(),
            next_id: 1,
        }
    }

    /// Returns the row schema.
    pub fn schema(&self) -> &Arc<EventType> {
        &self.schema
    }

    /// Returns a handle to an index serving `shape`, building one if needed.
    ///
    /// A new index is populated by scanning `rows` once.
    pub fn get_or_create<'a, I>(&mut self, shape: KeyShape, rows: I) -> Result<IndexHandle, IndexError>
    where
        I: IntoIterator<Item = &'a Event>,
    {
        if let Some((&id, slot)) = self.slots.iter_mut().find(|(_, s)| s.shape.serves(&shape)) {
            slot.refs += 1;
            debug!(index = id, shape = %slot.shape, refs = slot.refs, "IndexRegistry: reusing index");
            return Ok(IndexHandle { id, shape });
        }

        let equality = shape
            .equality_fields()
            .iter()
            .map(|f| self.resolve(f))
            .collect::<Result<Vec<_>, _>>()?;
        let range = shape.range_field().map(|f| self.resolve(f)).transpose()?;
        let index = if range.is_some() {
            ShapeIndex::Ranged {
                partitions: HashMap::new(),
                stats: IndexStats::new(),
            }
        } else {
            ShapeIndex::Equality(HashIndex::new())
        };

        let mut slot = IndexSlot {
            shape: shape.clone(),
            equality,
            range,
            refs: 1,
            index,
        };
        for row in rows {
            slot.insert(row);
        }

        let id = self.next_id;
        self.next_id += 1;
        debug!(index = id, shape = %shape, entries = slot.entries(), "IndexRegistry: created index");
        self.slots.insert(id, slot);
        Ok(IndexHandle { id, shape })
    }

    fn resolve(&self, field: &str) -> Result<(usize, DataType), IndexError> {
        let pos = self
            .schema
            .field_index(field)
            .ok_or_else(|| IndexError::UnknownField(field.to_string()))?;
        Ok((pos, self.schema.fields()[pos].data_type))
    }

    /// Gives a handle back. Returns true if the index was dropped.
    pub fn release(&mut self, handle: IndexHandle) -> Result<bool, IndexError> {
        let slot = self
            .slots
            .get_mut(&handle.id)
            .ok_or(IndexError::UnknownHandle(handle.id))?;
        slot.refs -= 1;
        if slot.refs > 0 {
            return Ok(false);
        }
        self.slots.remove(&handle.id);
        debug!(index = handle.id, shape = %handle.shape, "IndexRegistry: dropped index");
        Ok(true)
    }

    /// Returns the rows whose equality fields match `key`.
    ///
    /// `key` follows the order of the handle's equality fields. On a ranged
    /// index the whole partition is returned in range-key order.
    pub fn lookup(&self, handle: &IndexHandle, key: &[Value]) -> Result<Vec<RowId>, IndexError> {
        let slot = self.slot(handle)?;
        let Some(probe) = slot.probe_key(key)? else {
            return Ok(Vec::new());
        };
        Ok(match &slot.index {
            ShapeIndex::Equality(index) => index.get(&probe),
            ShapeIndex::Ranged { partitions, stats } => {
                stats.record_lookup();
                partitions
                    .get(&probe)
                    .map(|p| p.row_ids())
                    .unwrap_or_default()
            }
        })
    }

    /// Returns the rows matching `key` whose range field lies in `range`.
    pub fn lookup_range(
        &self,
        handle: &IndexHandle,
        key: &[Value],
        range: &KeyRange<Value>,
    ) -> Result<Vec<RowId>, IndexError> {
        let slot = self.slot(handle)?;
        let ShapeIndex::Ranged { partitions, stats } = &slot.index else {
            return Err(IndexError::NotRanged(slot.shape.to_string()));
        };
        if let Some((_, ty)) = slot.range {
            let field = slot.shape.range_field().unwrap_or_default();
            for bound in range.bounds() {
                check_comparable(field, bound, ty)?;
            }
        }
        let Some(probe) = slot.probe_key(key)? else {
            return Ok(Vec::new());
        };
        if range.bounds().any(Value::is_null) {
            return Ok(Vec::new());
        }
        stats.record_lookup();
        let normalized = exclude_null(range.map(Value::index_key));
        Ok(partitions
            .get(&probe)
            .map(|p| p.get_range(&normalized))
            .unwrap_or_default())
    }

    fn slot(&self, handle: &IndexHandle) -> Result<&IndexSlot, IndexError> {
        self.slots
            .get(&handle.id)
            .ok_or(IndexError::UnknownHandle(handle.id))
    }

    /// Adds a row to every index.
    pub fn insert(&mut self, row: &Event) {
        for slot in self.slots.values_mut() {
            slot.insert(row);
        }
    }

    /// Removes a row from every index.
    pub fn delete(&mut self, row: &Event) {
        for slot in self.slots.values_mut() {
            slot.delete(row);
        }
    }

    /// Returns the number of live indexes.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns true if no index exists.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Returns the shapes of all live indexes.
    pub fn shapes(&self) -> Vec<KeyShape> {
        self.slots.values().map(|s| s.shape.clone()).collect()
    }

    /// Returns the reference count of the index with exactly this shape.
    pub fn ref_count(&self, shape: &KeyShape) -> Option<usize> {
        self.slots
            .values()
            .find(|s| &s.shape == shape)
            .map(|s| s.refs)
    }

    /// Returns the number of entries of the index behind a handle.
    pub fn entries(&self, handle: &IndexHandle) -> Result<usize, IndexError> {
        self.slot(handle).map(IndexSlot::entries)
    }

    /// Returns the lookup count of the index behind a handle.
    pub fn lookups(&self, handle: &IndexHandle) -> Result<u64, IndexError> {
        self.slot(handle).map(|s| s.stats().lookups())
    }
}
