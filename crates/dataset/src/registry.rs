//! Dataset registry.

use crate::aggregate::AggregateColumn;
use crate::dataset::NamedDataset;
use crate::handle::{ReaderHandle, WriterHandle, WriterSpec};
use crate::predicate::PredicateShape;
use eddy_core::{Error, EventType, Result};
use eddy_window::WindowPolicy;
use hashbrown::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::info;

/// Owns every named dataset of an engine.
#[derive(Debug, Default)]
pub struct DatasetRegistry {
    datasets: RwLock<HashMap<String, Arc<NamedDataset>>>,
    next_id: AtomicU64,
}

impl DatasetRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a row dataset.
    pub fn create_dataset(
        &self,
        name: &str,
        schema: Arc<EventType>,
        retention: WindowPolicy,
    ) -> Result<Arc<NamedDataset>> {
        self.create(name, schema, retention, None)
    }

    /// Creates an aggregation table over events of `schema`.
    pub fn create_aggregate_table(
        &self,
        name: &str,
        schema: Arc<EventType>,
        columns: Vec<AggregateColumn>,
    ) -> Result<Arc<NamedDataset>> {
        self.create(name, schema, WindowPolicy::KeepAll, Some(columns))
    }

    fn create(
        &self,
        name: &str,
        schema: Arc<EventType>,
        retention: WindowPolicy,
        aggregate: Option<Vec<AggregateColumn>>,
    ) -> Result<Arc<NamedDataset>> {
        if name.trim().is_empty() {
            return Err(Error::config("dataset name must not be empty"));
        }
        let mut datasets = self.datasets.write().expect("dataset registry lock poisoned");
        if datasets.contains_key(name) {
            return Err(Error::DuplicateName {
                kind: "dataset",
                name: name.to_string(),
            });
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let dataset = Arc::new(NamedDataset::new(
            id,
            name.to_string(),
            schema,
            retention,
            aggregate,
        )?);
        info!(
            dataset = name,
            schema = dataset.schema().name(),
            aggregate = dataset.is_aggregate(),
            "dataset created"
        );
        datasets.insert(name.to_string(), dataset.clone());
        Ok(dataset)
    }

    /// Drops a dataset. Fails while any reader or writer is registered.
    pub fn drop_dataset(&self, name: &str) -> Result<()> {
        let mut datasets = self.datasets.write().expect("dataset registry lock poisoned");
        let dataset = datasets.get(name).ok_or_else(|| Error::UnknownDataset {
            name: name.to_string(),
        })?;
        if dataset.writer_count() > 0 || dataset.reader_count() > 0 {
            return Err(Error::invalid_operation(format!(
                "dataset '{}' is in use by {} writers and {} readers",
                name,
                dataset.writer_count(),
                dataset.reader_count()
            )));
        }
        dataset.mark_dropped();
        datasets.remove(name);
        info!(dataset = name, "dataset dropped");
        Ok(())
    }

    /// Returns a dataset by name.
    pub fn get(&self, name: &str) -> Result<Arc<NamedDataset>> {
        self.datasets
            .read()
            .expect("dataset registry lock poisoned")
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownDataset {
                name: name.to_string(),
            })
    }

    /// Registers a writer on a dataset.
    pub fn register_writer(&self, name: &str, spec: WriterSpec) -> Result<WriterHandle> {
        self.get(name)?.register_writer(spec)
    }

    /// Registers a reader on a dataset.
    pub fn register_reader(&self, name: &str, shape: PredicateShape) -> Result<ReaderHandle> {
        self.get(name)?.register_reader(shape)
    }

    /// Returns the dataset names in sorted order.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .datasets
            .read()
            .expect("dataset registry lock poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Returns the number of datasets.
    pub fn len(&self) -> usize {
        self.datasets.read().expect("dataset registry lock poisoned").len()
    }

    /// Returns true if no dataset exists.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
