//! Core job types and policies.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use emoqueue_core::{ContentItemId, JobId};
use emoqueue_detection::AnalysisRequest;

/// Job execution status.
///
/// Transitions: `Pending -> Processing` on claim, then `Processing ->
/// Completed`, `Processing -> Pending` (retry scheduled) or `Processing ->
/// Failed` (retries exhausted). Nothing leaves a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Queued, or waiting out a backoff before the next attempt
    Pending,
    /// Claimed by a worker
    Processing,
    /// Classified (or already classified)
    Completed,
    /// Exhausted retries
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        })
    }
}

/// What a producer submits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub content_item_id: ContentItemId,
    /// Bypass the idempotent skip when results already exist.
    #[serde(default)]
    pub force: bool,
}

impl JobDescriptor {
    pub fn new(content_item_id: ContentItemId) -> Self {
        Self {
            content_item_id,
            force: false,
        }
    }

    pub fn forced(mut self) -> Self {
        self.force = true;
        self
    }
}

/// Retry policy: capped exponential backoff.
///
/// The delay after the k-th failed attempt is `min(2^k * base_delay, max_delay)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts a job may consume.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    /// Delay to wait after `attempts` failed attempts.
    pub fn delay_for_attempt(&self, attempts: u32) -> Duration {
        let max_ms = self.max_delay.as_millis();
        let delay_ms = 2u128
            .checked_pow(attempts)
            .and_then(|factor| self.base_delay.as_millis().checked_mul(factor))
            .map_or(max_ms, |ms| ms.min(max_ms));

        Duration::from_millis(u64::try_from(delay_ms).unwrap_or(u64::MAX))
    }

    /// Whether another attempt is allowed after `attempts` failures.
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_retries
    }
}

/// A queued classification job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub content_item_id: ContentItemId,
    pub force: bool,
    pub status: JobStatus,
    /// Failed attempts so far
    pub attempts: u32,
    /// Last failure message
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Most recent claim by a worker
    pub processed_at: Option<DateTime<Utc>>,
    /// Entry into a terminal state
    pub finished_at: Option<DateTime<Utc>>,
    /// Set while the job is held back by a retry backoff
    pub next_attempt_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    pub fn new(id: JobId, descriptor: JobDescriptor, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            content_item_id: descriptor.content_item_id,
            force: descriptor.force,
            status: JobStatus::Pending,
            attempts: 0,
            error: None,
            created_at,
            processed_at: None,
            finished_at: None,
            next_attempt_at: None,
        }
    }

    /// The read-only view handed to the detection collaborator.
    pub fn request(&self) -> AnalysisRequest {
        AnalysisRequest {
            content_item_id: self.content_item_id.clone(),
            force: self.force,
        }
    }

    /// Whether a retry backoff is currently holding this job.
    pub fn is_backing_off(&self) -> bool {
        self.status == JobStatus::Pending && self.next_attempt_at.is_some()
    }

    pub(crate) fn mark_processing(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Processing;
        self.next_attempt_at = None;
        self.processed_at = Some(now);
    }

    pub(crate) fn mark_completed(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Completed;
        self.finished_at = Some(now);
    }

    pub(crate) fn mark_retrying(&mut self, error: String, next_attempt_at: DateTime<Utc>) {
        self.status = JobStatus::Pending;
        self.error = Some(error);
        self.next_attempt_at = Some(next_attempt_at);
    }

    pub(crate) fn mark_failed(&mut self, error: String, now: DateTime<Utc>) {
        self.status = JobStatus::Failed;
        self.error = Some(error);
        self.finished_at = Some(now);
        self.next_attempt_at = None;
    }
}

/// Counts of job records by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStats {
    pub total: usize,
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    /// Jobs held by a worker or a backoff timer
    pub in_flight: usize,
}
