//! Per-statement error isolation and deferred listener delivery.

use eddy_core::{Error, ErrorKind, Result};
use eddy_output::{BatchCallback, DeliveredBatch, SubscriptionManager};
use tracing::{error, warn};

/// A runtime error retained on the statement that raised it.
#[derive(Clone, Debug)]
pub struct ErrorReport {
    pub statement: String,
    /// Logical time at which the error was raised.
    pub time: i64,
    pub error: Error,
}

impl ErrorReport {
    #[inline]
    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }
}

/// Collects the runtime errors of one statement.
///
/// Non-fatal errors are logged and retained; the statement keeps running.
/// Fatal errors pass through to the caller.
#[derive(Debug)]
pub(crate) struct ErrorBoundary {
    statement: String,
    reports: Vec<ErrorReport>,
}

impl ErrorBoundary {
    pub(crate) fn new(statement: impl Into<String>) -> Self {
        Self {
            statement: statement.into(),
            reports: Vec::new(),
        }
    }

    pub(crate) fn guard<T: Default>(&mut self, result: Result<T>, now: i64) -> Result<T> {
        match result {
            Ok(value) => Ok(value),
            Err(err) if err.is_fatal() => {
                error!(statement = %self.statement, error = %err, "fatal statement error");
                Err(err)
            }
            Err(err) => {
                warn!(statement = %self.statement, time = now, error = %err, "statement error isolated");
                self.reports.push(ErrorReport {
                    statement: self.statement.clone(),
                    time: now,
                    error: err,
                });
                Ok(T::default())
            }
        }
    }

    pub(crate) fn reports(&self) -> &[ErrorReport] {
        &self.reports
    }
}

/// Batches waiting to be handed to listeners once the statement lock is
/// released.
#[derive(Default)]
pub(crate) struct Delivery {
    callbacks: Vec<BatchCallback>,
    batches: Vec<DeliveredBatch>,
}

impl Delivery {
    pub(crate) fn new(subscriptions: &SubscriptionManager, batches: Vec<DeliveredBatch>) -> Self {
        if batches.is_empty() {
            return Self::default();
        }
        Self {
            callbacks: subscriptions.callbacks(),
            batches,
        }
    }

    /// Appends the batches of a later boundary of the same statement.
    pub(crate) fn append(&mut self, mut other: Delivery) {
        if self.callbacks.is_empty() {
            self.callbacks = other.callbacks;
        }
        self.batches.append(&mut other.batches);
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.batches.is_empty() || self.callbacks.is_empty()
    }

    /// Calls every listener with every batch, batch by batch.
    pub(crate) fn run(self) {
        for batch in &self.batches {
            for callback in &self.callbacks {
                callback(batch);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_runtime_errors_are_retained() {
        let mut boundary = ErrorBoundary::new("s1");
        let out: Result<Vec<u8>> = Err(Error::invalid_operation("bad row"));
        assert_eq!(boundary.guard(out, 10).unwrap(), Vec::<u8>::new());
        assert_eq!(boundary.reports().len(), 1);
        assert_eq!(boundary.reports()[0].time, 10);
        assert_eq!(boundary.reports()[0].kind(), ErrorKind::Runtime);
    }

    #[test]
    fn test_fatal_errors_propagate() {
        let mut boundary = ErrorBoundary::new("s1");
        let out: Result<()> = Err(Error::concurrency_violation("re-entrant"));
        assert!(boundary.guard(out, 0).is_err());
        assert!(boundary.reports().is_empty());
    }

    #[test]
    fn test_delivery_calls_listeners_in_batch_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut subs = SubscriptionManager::new();
        let s = seen.clone();
        subs.subscribe(move |b: &DeliveredBatch| s.lock().unwrap().push(b.group.clone()));

        let batch = |g: i64| DeliveredBatch {
            group: Some(vec![g.into()]),
            ..Default::default()
        };
        let mut delivery = Delivery::new(&subs, vec![batch(1)]);
        delivery.append(Delivery::new(&subs, vec![batch(2)]));
        assert!(!delivery.is_empty());
        delivery.run();
        assert_eq!(
            *seen.lock().unwrap(),
            vec![Some(vec![1i64.into()]), Some(vec![2i64.into()])]
        );
    }
}
