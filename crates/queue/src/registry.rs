//! Registry of every task the pool has scheduled.
//!
//! Worker loops, backoff releases and the compaction task are tracked here
//! so shutdown can cancel each of them deterministically.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use emoqueue_core::JobId;

use crate::store::JobStore;

#[derive(Debug, Default)]
struct RegistryState {
    /// Cancelled when the current run is stopped.
    token: CancellationToken,
    /// Set by `shutdown`; new backoffs release immediately while closed.
    closed: bool,
    workers: Vec<JoinHandle<()>>,
    backoffs: HashMap<JobId, JoinHandle<()>>,
    maintenance: Option<JoinHandle<()>>,
}

#[derive(Debug, Default)]
pub(crate) struct TaskRegistry {
    state: Mutex<RegistryState>,
}

impl TaskRegistry {
    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open a new run and return its cancellation token.
    pub(crate) fn begin_run(&self) -> CancellationToken {
        let mut state = self.lock();
        state.token = CancellationToken::new();
        state.closed = false;
        state.workers.retain(|h| !h.is_finished());
        state.token.clone()
    }

    pub(crate) fn track_worker(&self, handle: JoinHandle<()>) {
        self.lock().workers.push(handle);
    }

    pub(crate) fn track_maintenance(&self, handle: JoinHandle<()>) {
        if let Some(previous) = self.lock().maintenance.replace(handle) {
            previous.abort();
        }
    }

    /// Hold `id` back for `delay`, then make it claimable again.
    ///
    /// If the registry is shutting down the job is released right away.
    pub(crate) fn schedule_backoff(&self, store: &Arc<JobStore>, id: JobId, delay: Duration) {
        let mut state = self.lock();

        if state.closed {
            store.release_backoff(&id);
            debug!(job_id = %id, "pool stopping; released job without backoff");
            return;
        }

        state.backoffs.retain(|_, h| !h.is_finished());

        let store = Arc::clone(store);
        let job_id = id.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if store.release_backoff(&job_id) {
                debug!(job_id = %job_id, "backoff elapsed; job claimable again");
            }
        });

        if let Some(previous) = state.backoffs.insert(id, handle) {
            previous.abort();
        }
    }

    pub(crate) fn pending_backoffs(&self) -> usize {
        self.lock()
            .backoffs
            .values()
            .filter(|h| !h.is_finished())
            .count()
    }

    pub(crate) fn worker_count(&self) -> usize {
        self.lock()
            .workers
            .iter()
            .filter(|h| !h.is_finished())
            .count()
    }

    /// Cancel the current run.
    ///
    /// Signals workers, aborts compaction and every pending backoff timer.
    /// Jobs held by an aborted backoff are released. Worker tasks are not
    /// aborted: a job already executing runs to completion. Returns the
    /// number of backoffs cancelled.
    pub(crate) fn shutdown(&self, store: &JobStore) -> usize {
        let mut state = self.lock();
        state.closed = true;
        state.token.cancel();

        if let Some(handle) = state.maintenance.take() {
            handle.abort();
        }

        let mut cancelled = 0;
        for (id, handle) in state.backoffs.drain() {
            if handle.is_finished() {
                continue;
            }
            handle.abort();
            store.release_backoff(&id);
            cancelled += 1;
        }

        // Detach workers; they exit at their next poll.
        state.workers.clear();
        cancelled
    }
}
