//! Consumers of dataset changes.
//!
//! Statements that select from a dataset register a callback here. Every
//! committed change is handed to all callbacks in registration order.

use eddy_core::{Result, SharedEvent};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::warn;

/// Unique identifier for a consumer.
pub type ConsumerId = u64;

/// The rows one commit made visible and the rows it removed.
#[derive(Clone, Debug, Default)]
pub struct DatasetChange {
    pub inserted: Vec<SharedEvent>,
    pub removed: Vec<SharedEvent>,
}

impl DatasetChange {
    /// Returns true if there are no changes.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.removed.is_empty()
    }

    /// Appends another change.
    pub fn merge(&mut self, other: DatasetChange) {
        self.inserted.extend(other.inserted);
        self.removed.extend(other.removed);
    }
}

/// Callback invoked for every committed change.
pub type ChangeCallback = Arc<dyn Fn(&DatasetChange) -> Result<()> + Send + Sync>;

pub(crate) struct ConsumerList {
    consumers: RwLock<Vec<(ConsumerId, ChangeCallback)>>,
    next_id: AtomicU64,
}

impl Default for ConsumerList {
    fn default() -> Self {
        Self {
            consumers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }
}

impl std::fmt::Debug for ConsumerList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerList")
            .field("len", &self.len())
            .finish()
    }
}

impl ConsumerList {
    pub(crate) fn subscribe(&self, callback: ChangeCallback) -> ConsumerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.consumers
            .write()
            .expect("consumer list lock poisoned")
            .push((id, callback));
        id
    }

    pub(crate) fn unsubscribe(&self, id: ConsumerId) -> bool {
        let mut consumers = self.consumers.write().expect("consumer list lock poisoned");
        let before = consumers.len();
        consumers.retain(|(c, _)| *c != id);
        consumers.len() < before
    }

    pub(crate) fn len(&self) -> usize {
        self.consumers.read().expect("consumer list lock poisoned").len()
    }

    /// Hands a change to every consumer.
    ///
    /// Consumers isolate their own runtime errors; anything else is logged
    /// here, except fatal errors which abort the dispatch.
    pub(crate) fn dispatch(&self, dataset: &str, change: &DatasetChange) -> Result<()> {
        if change.is_empty() {
            return Ok(());
        }
        let callbacks: Vec<(ConsumerId, ChangeCallback)> = self
            .consumers
            .read()
            .expect("consumer list lock poisoned")
            .clone();
        for (id, callback) in callbacks {
            if let Err(err) = callback(change) {
                if err.is_fatal() {
                    return Err(err);
                }
                warn!(dataset, consumer = id, error = %err, "dataset consumer failed");
            }
        }
        Ok(())
    }
}
