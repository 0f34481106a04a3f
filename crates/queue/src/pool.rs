//! Worker pool and lifecycle controller.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use emoqueue_core::{ContentItemId, JobId};
use emoqueue_detection::DetectionService;

use crate::config::QueueConfig;
use crate::error::JobError;
use crate::processor::{JobProcessor, ProcessOutcome};
use crate::registry::TaskRegistry;
use crate::store::{FailureOutcome, JobStore};
use crate::types::{JobDescriptor, JobRecord, JobStats};

/// How often `stop` re-checks the in-flight set while draining.
const DRAIN_CHECK_INTERVAL: Duration = Duration::from_millis(100);

/// Longest pause between two compaction passes.
const MAX_COMPACTION_INTERVAL: Duration = Duration::from_secs(60);

/// Outcome of [`WorkerPool::stop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    /// The in-flight set emptied before the timeout
    pub drained: bool,
    /// Jobs still in flight when `stop` returned
    pub in_flight: usize,
    /// Backoff timers cancelled (their jobs were released as `pending`)
    pub cancelled_backoffs: usize,
}

struct PoolInner {
    store: Arc<JobStore>,
    processor: JobProcessor,
    config: QueueConfig,
    running: AtomicBool,
    tasks: TaskRegistry,
}

/// Bounded pool of polling workers over a [`JobStore`].
///
/// Owned by the host's composition root: construct it at startup, call
/// [`start`](Self::start), and [`stop`](Self::stop) it during graceful
/// shutdown. Cloning yields another handle to the same pool.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("config", &self.inner.config)
            .field("running", &self.is_running())
            .field("jobs", &self.inner.store.len())
            .finish()
    }
}

impl WorkerPool {
    /// Create a stopped pool with an empty store.
    pub fn new(detection: Arc<dyn DetectionService>, config: QueueConfig) -> Self {
        Self::with_store(Arc::new(JobStore::new()), detection, config)
    }

    /// Create a stopped pool over an existing store.
    pub fn with_store(
        store: Arc<JobStore>,
        detection: Arc<dyn DetectionService>,
        config: QueueConfig,
    ) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                store,
                processor: JobProcessor::new(detection),
                config,
                running: AtomicBool::new(false),
                tasks: TaskRegistry::default(),
            }),
        }
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.inner.store
    }

    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }

    /// Enqueue a job. Returns immediately; processing happens on a worker.
    pub fn submit(&self, descriptor: JobDescriptor) -> JobId {
        let content_item_id = descriptor.content_item_id.clone();
        let force = descriptor.force;
        let id = self.inner.store.submit(descriptor);
        debug!(job_id = %id, content_item_id = %content_item_id, force, "job submitted");
        id
    }

    pub fn status(&self, id: &JobId) -> Option<JobRecord> {
        self.inner.store.get(id)
    }

    pub fn find_by_content_item(&self, content_item_id: &ContentItemId) -> Option<JobRecord> {
        self.inner.store.find_by_content_item(content_item_id)
    }

    pub fn stats(&self) -> JobStats {
        self.inner.store.stats()
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Worker loops of the current run that have not exited.
    pub fn active_workers(&self) -> usize {
        self.inner.tasks.worker_count()
    }

    /// Backoff timers currently holding a job.
    pub fn pending_backoffs(&self) -> usize {
        self.inner.tasks.pending_backoffs()
    }

    /// Launch the worker loops.
    ///
    /// Must be called from within a tokio runtime. A second call while
    /// running logs a warning and does nothing.
    pub fn start(&self) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            warn!("worker pool already running");
            return;
        }

        let token = self.inner.tasks.begin_run();
        let concurrency = self.inner.config.concurrency.max(1);

        for worker in 0..concurrency {
            let inner = Arc::clone(&self.inner);
            let token = token.clone();
            let handle = tokio::spawn(async move { inner.worker_loop(worker, token).await });
            self.inner.tasks.track_worker(handle);
        }

        if let Some(retention) = self.inner.config.retention {
            let inner = Arc::clone(&self.inner);
            let token = token.clone();
            let handle = tokio::spawn(async move { inner.compaction_loop(retention, token).await });
            self.inner.tasks.track_maintenance(handle);
        }

        info!(
            concurrency,
            max_retries = self.inner.config.retry.max_retries,
            poll_interval_ms = self.inner.config.poll_interval.as_millis() as u64,
            "worker pool started"
        );
    }

    /// Stop claiming new jobs and wait for in-flight work to drain.
    ///
    /// Cancels every pending backoff and poll timer, then checks the
    /// in-flight set every 100 ms until it is empty or the shutdown timeout
    /// elapses. Jobs already executing are never interrupted; if any remain
    /// at the deadline this logs a warning and returns anyway.
    pub async fn stop(&self) -> ShutdownReport {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            debug!("worker pool stop requested while not running");
        }

        let cancelled_backoffs = self.inner.tasks.shutdown(&self.inner.store);
        let deadline = Instant::now() + self.inner.config.shutdown_timeout;

        loop {
            let in_flight = self.inner.store.in_flight_len();
            if in_flight == 0 {
                info!(cancelled_backoffs, "worker pool stopped; all jobs drained");
                return ShutdownReport {
                    drained: true,
                    in_flight,
                    cancelled_backoffs,
                };
            }

            let now = Instant::now();
            if now >= deadline {
                warn!(
                    in_flight,
                    timeout_ms = self.inner.config.shutdown_timeout.as_millis() as u64,
                    "worker pool shutdown timed out with jobs still in flight"
                );
                return ShutdownReport {
                    drained: false,
                    in_flight,
                    cancelled_backoffs,
                };
            }

            tokio::time::sleep(DRAIN_CHECK_INTERVAL.min(deadline - now)).await;
        }
    }
}

impl PoolInner {
    async fn worker_loop(&self, worker: usize, token: CancellationToken) {
        debug!(worker, "worker started");

        loop {
            if token.is_cancelled() {
                break;
            }

            if let Some(job) = self.store.claim_next() {
                self.execute(worker, job).await;
            }

            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }

        debug!(worker, "worker stopped");
    }

    async fn execute(&self, worker: usize, job: JobRecord) {
        debug!(
            worker,
            job_id = %job.id,
            content_item_id = %job.content_item_id,
            attempt = job.attempts + 1,
            "claimed job"
        );

        match self.processor.execute(&job).await {
            Ok(outcome) => {
                if self.store.complete(&job.id).is_none() {
                    warn!(job_id = %job.id, "completed job was no longer processing");
                    return;
                }
                match outcome {
                    ProcessOutcome::Classified(analysis) => info!(
                        worker,
                        job_id = %job.id,
                        content_item_id = %job.content_item_id,
                        emotion = %analysis.emotion,
                        confidence = analysis.confidence,
                        "job completed"
                    ),
                    ProcessOutcome::AlreadyAnalyzed => info!(
                        worker,
                        job_id = %job.id,
                        content_item_id = %job.content_item_id,
                        "job completed; existing results reused"
                    ),
                }
            }
            Err(err) => self.handle_failure(worker, &job, err),
        }
    }

    fn handle_failure(&self, worker: usize, job: &JobRecord, err: JobError) {
        let message = err.to_string();

        match self
            .store
            .record_failure(&job.id, message.clone(), &self.config.retry)
        {
            Some(FailureOutcome::Retry { attempts, delay }) => {
                warn!(
                    worker,
                    job_id = %job.id,
                    content_item_id = %job.content_item_id,
                    attempts,
                    max_retries = self.config.retry.max_retries,
                    retry_in_ms = delay.as_millis() as u64,
                    error = %message,
                    "job failed; retry scheduled"
                );
                self.tasks
                    .schedule_backoff(&self.store, job.id.clone(), delay);
            }
            Some(FailureOutcome::Exhausted { attempts }) => {
                error!(
                    worker,
                    job_id = %job.id,
                    content_item_id = %job.content_item_id,
                    attempts,
                    error = %message,
                    "job failed permanently"
                );
            }
            None => {
                warn!(job_id = %job.id, error = %message, "failed job was no longer processing");
            }
        }
    }

    async fn compaction_loop(&self, retention: Duration, token: CancellationToken) {
        let every = retention.min(MAX_COMPACTION_INTERVAL);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(every) => {}
            }

            let Ok(ttl) = chrono::Duration::from_std(retention) else {
                continue;
            };
            let Some(cutoff) = Utc::now().checked_sub_signed(ttl) else {
                continue;
            };
            let removed = self.store.compact(cutoff);
            if removed > 0 {
                info!(removed, retention_secs = retention.as_secs(), "compacted finished jobs");
            }
        }
    }
}
