//! Job storage: records, insertion order and the in-flight set.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use emoqueue_core::{ContentItemId, JobId};

use crate::in_flight::InFlightSet;
use crate::types::{JobDescriptor, JobRecord, JobStats, JobStatus, RetryPolicy};

/// Result of recording a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Back to `pending`; the job stays in flight until `delay` elapses.
    Retry { attempts: u32, delay: Duration },
    /// Retries exhausted; the job is `failed` and no longer in flight.
    Exhausted { attempts: u32 },
}

/// Internal storage keeping insertion order for scans and a map for lookups.
#[derive(Debug, Default)]
struct StoreState {
    /// Job ids, oldest first.
    order: Vec<JobId>,
    records: HashMap<JobId, JobRecord>,
    in_flight: InFlightSet,
    next_seq: u64,
}

impl StoreState {
    fn iter(&self) -> impl Iterator<Item = &JobRecord> + '_ {
        self.order.iter().filter_map(|id| self.records.get(id))
    }

    /// Release `id` and clear its backoff marker.
    fn release(&mut self, id: &JobId) -> bool {
        if let Some(record) = self.records.get_mut(id) {
            record.next_attempt_at = None;
        }
        self.in_flight.release(id)
    }
}

/// In-memory job store.
///
/// Single source of truth for status queries. Every mutation happens under
/// one write guard, so a scan-and-hold is atomic with respect to other
/// workers regardless of the runtime's threading model.
#[derive(Debug, Default)]
pub struct JobStore {
    state: RwLock<StoreState>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a new `pending` job and return its id. Never blocks on processing.
    pub fn submit(&self, descriptor: JobDescriptor) -> JobId {
        let now = Utc::now();
        let mut state = self.write();

        let seq = state.next_seq;
        state.next_seq += 1;
        let id = JobId::compose(&descriptor.content_item_id, now.timestamp_millis(), seq);

        state.order.push(id.clone());
        state
            .records
            .insert(id.clone(), JobRecord::new(id.clone(), descriptor, now));
        id
    }

    /// Get a job by ID.
    pub fn get(&self, id: &JobId) -> Option<JobRecord> {
        self.read().records.get(id).cloned()
    }

    /// First job for `content_item_id` in submission order.
    ///
    /// When several jobs exist for the same item this is the oldest one still
    /// retained, not the most recent.
    pub fn find_by_content_item(&self, content_item_id: &ContentItemId) -> Option<JobRecord> {
        self.read()
            .iter()
            .find(|r| &r.content_item_id == content_item_id)
            .cloned()
    }

    /// All jobs for `content_item_id`, oldest first.
    pub fn list_by_content_item(&self, content_item_id: &ContentItemId) -> Vec<JobRecord> {
        self.read()
            .iter()
            .filter(|r| &r.content_item_id == content_item_id)
            .cloned()
            .collect()
    }

    /// Claim the first `pending` job that is not in flight.
    ///
    /// The job is added to the in-flight set and marked `processing` before
    /// the guard is dropped. Returns `None` if nothing is claimable.
    pub fn claim_next(&self) -> Option<JobRecord> {
        let mut state = self.write();

        let id = state
            .iter()
            .find(|r| r.status == JobStatus::Pending && !state.in_flight.contains(&r.id))
            .map(|r| r.id.clone())?;

        if !state.in_flight.try_hold(&id) {
            return None;
        }

        let record = state.records.get_mut(&id)?;
        record.mark_processing(Utc::now());
        Some(record.clone())
    }

    /// Mark a `processing` job as completed and release it.
    pub fn complete(&self, id: &JobId) -> Option<JobRecord> {
        let mut state = self.write();

        let record = state.records.get_mut(id)?;
        if record.status != JobStatus::Processing {
            debug!(job_id = %id, status = %record.status, "ignoring completion of job not in processing");
            return None;
        }
        record.mark_completed(Utc::now());
        let record = record.clone();

        state.release(id);
        Some(record)
    }

    /// Record a failed attempt of a `processing` job and apply `policy`.
    ///
    /// On retry the job goes back to `pending` but stays in flight; the
    /// caller is responsible for releasing it once the backoff elapses.
    pub fn record_failure(
        &self,
        id: &JobId,
        error: impl Into<String>,
        policy: &RetryPolicy,
    ) -> Option<FailureOutcome> {
        let mut state = self.write();
        let now = Utc::now();

        let record = state.records.get_mut(id)?;
        if record.status != JobStatus::Processing {
            debug!(job_id = %id, status = %record.status, "ignoring failure of job not in processing");
            return None;
        }

        record.attempts = record.attempts.saturating_add(1);
        let attempts = record.attempts;

        if policy.should_retry(attempts) {
            let delay = policy.delay_for_attempt(attempts);
            let next = chrono::Duration::from_std(delay)
                .ok()
                .and_then(|d| now.checked_add_signed(d))
                .unwrap_or(DateTime::<Utc>::MAX_UTC);
            record.mark_retrying(error.into(), next);
            Some(FailureOutcome::Retry { attempts, delay })
        } else {
            record.mark_failed(error.into(), now);
            state.release(id);
            Some(FailureOutcome::Exhausted { attempts })
        }
    }

    /// Release a job held by a retry backoff so it becomes claimable.
    ///
    /// Only `pending` jobs are released; a job that has been reclaimed since
    /// stays with its worker.
    pub fn release_backoff(&self, id: &JobId) -> bool {
        let mut state = self.write();
        let releasable = state
            .records
            .get(id)
            .is_some_and(|r| r.status == JobStatus::Pending);
        releasable && state.release(id)
    }

    pub fn is_in_flight(&self, id: &JobId) -> bool {
        self.read().in_flight.contains(id)
    }

    pub fn in_flight_len(&self) -> usize {
        self.read().in_flight.len()
    }

    pub fn len(&self) -> usize {
        self.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Counts by status. O(n), computed on demand.
    pub fn stats(&self) -> JobStats {
        let state = self.read();
        let mut stats = JobStats {
            in_flight: state.in_flight.len(),
            ..JobStats::default()
        };

        for record in state.records.values() {
            stats.total += 1;
            match record.status {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::Processing => stats.processing += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
            }
        }

        stats
    }

    /// Drop terminal jobs that finished before `cutoff`.
    ///
    /// Jobs still in flight are kept. Returns the number removed.
    pub fn compact(&self, cutoff: DateTime<Utc>) -> usize {
        let mut state = self.write();
        let StoreState {
            order,
            records,
            in_flight,
            ..
        } = &mut *state;

        let before = records.len();
        records.retain(|id, r| {
            let expired = r.status.is_terminal() && r.finished_at.is_some_and(|at| at < cutoff);
            !expired || in_flight.contains(id)
        });
        order.retain(|id| records.contains_key(id));

        before - records.len()
    }
}
