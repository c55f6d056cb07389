//! Subscription management for statement output.
//!
//! This module provides subscription IDs and a manager that holds the
//! callbacks registered on a statement.

use crate::processor::DeliveredBatch;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Unique identifier for a subscription.
pub type SubscriptionId = u64;

/// Callback type for delivered batches.
pub type BatchCallback = Arc<dyn Fn(&DeliveredBatch) + Send + Sync>;

/// Manages the subscriptions of one statement.
///
/// Batches reach subscribers in subscription order.
pub struct SubscriptionManager {
    callbacks: BTreeMap<SubscriptionId, BatchCallback>,
    next_id: SubscriptionId,
}

impl std::fmt::Debug for SubscriptionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionManager")
            .field("subscriptions", &self.callbacks.keys().collect::<Vec<_>>())
            .field("next_id", &self.next_id)
            .finish()
    }
}

impl Default for SubscriptionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriptionManager {
    /// Creates a new subscription manager.
    pub fn new() -> Self {
        Self {
            callbacks: BTreeMap::new(),
            next_id: 1,
        }
    }

    /// Subscribes to delivered batches.
    ///
    /// Returns the subscription ID that can be used to unsubscribe.
    pub fn subscribe<F>(&mut self, callback: F) -> SubscriptionId
    where
        F: Fn(&DeliveredBatch) + Send + Sync + 'static,
    {
        let id = self.next_id;
        self.next_id += 1;
        self.callbacks.insert(id, Arc::new(callback));
        id
    }

    /// Unsubscribes by ID.
    ///
    /// Returns true if the subscription was found and removed.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.callbacks.remove(&id).is_some()
    }

    /// Returns the callbacks in subscription order. Delivery runs them
    /// outside the statement lock.
    pub fn callbacks(&self) -> Vec<BatchCallback> {
        self.callbacks.values().cloned().collect()
    }
}
