//! Per-dataset commit serialization.
//!
//! Writers of one dataset commit one at a time, and each commit is handed to
//! the dataset's consumers before the next writer may start. A thread that
//! tries to commit while it is already committing to the same dataset hits
//! [`Error::ConcurrencyViolation`] instead of deadlocking.

use eddy_core::{Error, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use tracing::error;

static NEXT_THREAD_TOKEN: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_TOKEN: u64 = NEXT_THREAD_TOKEN.fetch_add(1, Ordering::Relaxed);
}

fn thread_token() -> u64 {
    THREAD_TOKEN.with(|t| *t)
}

#[derive(Debug, Default)]
pub(crate) struct CommitLock {
    lock: Mutex<()>,
    owner: AtomicU64,
}

pub(crate) struct CommitGuard<'a> {
    owner: &'a AtomicU64,
    _guard: MutexGuard<'a, ()>,
}

impl CommitLock {
    pub(crate) fn enter(&self, dataset: &str) -> Result<CommitGuard<'_>> {
        let me = thread_token();
        if self.owner.load(Ordering::Acquire) == me {
            error!(dataset, "re-entrant write detected");
            return Err(Error::concurrency_violation(format!(
                "re-entrant write to dataset '{}'",
                dataset
            )));
        }
        let guard = self.lock.lock().expect("dataset commit lock poisoned");
        self.owner.store(me, Ordering::Release);
        Ok(CommitGuard {
            owner: &self.owner,
            _guard: guard,
        })
    }
}

impl Drop for CommitGuard<'_> {
    fn drop(&mut self) {
        self.owner.store(0, Ordering::Release);
    }
}
