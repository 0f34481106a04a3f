//! End-to-end behaviour of the worker pool against scripted collaborators.
//!
//! Most tests run on tokio's paused clock, so backoffs and timeouts elapse
//! instantly while keeping their relative ordering.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use emoqueue_core::{ContentItemId, JobId};
use emoqueue_detection::{
    AnalysisRequest, DetectionError, DetectionService, EmotionAnalysis, EmotionLabel,
};
use emoqueue_queue::{JobDescriptor, JobRecord, JobStatus, QueueConfig, WorkerPool};

/// Detection collaborator whose behaviour is set per test.
#[derive(Default)]
struct ScriptedDetection {
    missing: HashSet<String>,
    panic_on: HashSet<String>,
    hang: bool,
    latency: Duration,
    stored: Mutex<HashMap<ContentItemId, EmotionAnalysis>>,
    failures_left: Mutex<HashMap<ContentItemId, u32>>,
    calls_by_item: Mutex<HashMap<ContentItemId, usize>>,
    active: Mutex<HashSet<ContentItemId>>,
    concurrent: AtomicUsize,
    max_concurrent: AtomicUsize,
    overlaps: AtomicUsize,
}

impl ScriptedDetection {
    fn new() -> Self {
        Self::default()
    }

    fn missing(mut self, item: &str) -> Self {
        self.missing.insert(item.to_string());
        self
    }

    fn panics_on(mut self, item: &str) -> Self {
        self.panic_on.insert(item.to_string());
        self
    }

    fn hanging(mut self) -> Self {
        self.hang = true;
        self
    }

    fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn with_completed_results(self, item: &str) -> Self {
        self.stored.lock().unwrap().insert(
            ContentItemId::new(item),
            EmotionAnalysis::completed(EmotionLabel::Sad),
        );
        self
    }

    fn failing_first(self, item: &str, times: u32) -> Self {
        self.failures_left
            .lock()
            .unwrap()
            .insert(ContentItemId::new(item), times);
        self
    }

    fn analyze_calls(&self, item: &str) -> usize {
        self.calls_by_item
            .lock()
            .unwrap()
            .get(&ContentItemId::new(item))
            .copied()
            .unwrap_or(0)
    }

    fn total_analyze_calls(&self) -> usize {
        self.calls_by_item.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl DetectionService for ScriptedDetection {
    async fn validate_item(&self, id: &ContentItemId) -> Result<bool, DetectionError> {
        Ok(!self.missing.contains(id.as_str()))
    }

    async fn get_results(
        &self,
        id: &ContentItemId,
    ) -> Result<Option<EmotionAnalysis>, DetectionError> {
        Ok(self.stored.lock().unwrap().get(id).cloned())
    }

    async fn analyze(&self, request: &AnalysisRequest) -> Result<EmotionAnalysis, DetectionError> {
        let item = request.content_item_id.clone();
        *self
            .calls_by_item
            .lock()
            .unwrap()
            .entry(item.clone())
            .or_insert(0) += 1;

        if self.panic_on.contains(item.as_str()) {
            panic!("classifier crashed on {item}");
        }

        let first_holder = self.active.lock().unwrap().insert(item.clone());
        if !first_holder {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        let now = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent.fetch_max(now, Ordering::SeqCst);

        if self.hang {
            std::future::pending::<()>().await;
        }
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        self.concurrent.fetch_sub(1, Ordering::SeqCst);
        self.active.lock().unwrap().remove(&item);

        let fail = {
            let mut failures = self.failures_left.lock().unwrap();
            match failures.get_mut(&item) {
                Some(left) if *left > 0 => {
                    *left -= 1;
                    true
                }
                _ => false,
            }
        };

        if fail {
            Err(DetectionError::InferenceFailed("worker process crashed".into()))
        } else {
            Ok(EmotionAnalysis::completed(EmotionLabel::Happy))
        }
    }

    async fn save_results(
        &self,
        id: &ContentItemId,
        analysis: &EmotionAnalysis,
    ) -> Result<(), DetectionError> {
        self.stored.lock().unwrap().insert(id.clone(), analysis.clone());
        Ok(())
    }
}

fn pool(detection: &Arc<ScriptedDetection>, config: QueueConfig) -> WorkerPool {
    WorkerPool::new(detection.clone(), config)
}

fn submit(pool: &WorkerPool, item: &str) -> JobId {
    pool.submit(JobDescriptor::new(ContentItemId::new(item)))
}

async fn wait_for_terminal(pool: &WorkerPool, id: &JobId, within: Duration) -> JobRecord {
    let deadline = Instant::now() + within;
    loop {
        let record = pool.status(id).expect("job should exist");
        if record.status.is_terminal() {
            return record;
        }
        assert!(
            Instant::now() < deadline,
            "job {id} still {} after {within:?}",
            record.status
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test(start_paused = true)]
async fn job_moves_from_pending_through_processing_to_completed() {
    let detection = Arc::new(ScriptedDetection::new().with_latency(Duration::from_millis(500)));
    let pool = pool(&detection, QueueConfig::default());

    let id = submit(&pool, "J1");
    assert_eq!(pool.status(&id).unwrap().status, JobStatus::Pending);

    pool.start();
    tokio::time::sleep(Duration::from_millis(100)).await;
    let record = pool.status(&id).unwrap();
    assert_eq!(record.status, JobStatus::Processing);
    assert!(record.processed_at.is_some());

    let record = wait_for_terminal(&pool, &id, Duration::from_secs(5)).await;
    assert_eq!(record.status, JobStatus::Completed);
    assert_eq!(record.attempts, 0);
    assert!(record.error.is_none());
    assert_eq!(detection.analyze_calls("J1"), 1);
    assert!(detection.stored.lock().unwrap().contains_key(&ContentItemId::new("J1")));

    pool.stop().await;
}

#[tokio::test(start_paused = true)]
async fn missing_item_retries_then_fails_with_the_same_error() {
    let detection = Arc::new(ScriptedDetection::new().missing("J1"));
    let pool = pool(&detection, QueueConfig::default());

    let id = submit(&pool, "J1");
    pool.start();

    tokio::time::sleep(Duration::from_millis(100)).await;
    let record = pool.status(&id).unwrap();
    assert_eq!(record.status, JobStatus::Pending);
    assert_eq!(record.attempts, 1);
    assert_eq!(record.error.as_deref(), Some("item J1 not found"));
    assert!(record.is_backing_off());
    assert!(pool.store().is_in_flight(&id));

    let record = wait_for_terminal(&pool, &id, Duration::from_secs(30)).await;
    assert_eq!(record.status, JobStatus::Failed);
    assert_eq!(record.attempts, 3);
    assert_eq!(record.error.as_deref(), Some("item J1 not found"));
    assert!(!pool.store().is_in_flight(&id));
    assert_eq!(detection.total_analyze_calls(), 0);

    pool.stop().await;
}

#[tokio::test(start_paused = true)]
async fn transient_failures_recover_within_the_retry_budget() {
    let detection = Arc::new(ScriptedDetection::new().failing_first("J1", 2));
    let pool = pool(&detection, QueueConfig::default());

    let id = submit(&pool, "J1");
    pool.start();

    let record = wait_for_terminal(&pool, &id, Duration::from_secs(30)).await;
    assert_eq!(record.status, JobStatus::Completed);
    assert_eq!(record.attempts, 2);
    assert_eq!(detection.analyze_calls("J1"), 3);

    pool.stop().await;
}

#[tokio::test(start_paused = true)]
async fn second_attempt_waits_for_the_backoff() {
    let detection = Arc::new(ScriptedDetection::new().failing_first("J1", 1));
    let pool = pool(&detection, QueueConfig::default());

    let id = submit(&pool, "J1");
    pool.start();

    // First failure backs off for 2^1 * 1000 ms
    tokio::time::sleep(Duration::from_millis(1_900)).await;
    assert_eq!(detection.analyze_calls("J1"), 1);
    assert!(pool.status(&id).unwrap().is_backing_off());

    let record = wait_for_terminal(&pool, &id, Duration::from_secs(5)).await;
    assert_eq!(record.status, JobStatus::Completed);
    assert_eq!(detection.analyze_calls("J1"), 2);

    pool.stop().await;
}

#[tokio::test(start_paused = true)]
async fn existing_results_skip_classification() {
    let detection = Arc::new(ScriptedDetection::new().with_completed_results("J1"));
    let pool = pool(&detection, QueueConfig::default());

    let id = submit(&pool, "J1");
    pool.start();

    let record = wait_for_terminal(&pool, &id, Duration::from_secs(5)).await;
    assert_eq!(record.status, JobStatus::Completed);
    assert_eq!(detection.analyze_calls("J1"), 0);

    pool.stop().await;
}

#[tokio::test(start_paused = true)]
async fn force_bypasses_existing_results() {
    let detection = Arc::new(ScriptedDetection::new().with_completed_results("J1"));
    let pool = pool(&detection, QueueConfig::default());

    let id = pool.submit(JobDescriptor::new(ContentItemId::new("J1")).forced());
    pool.start();

    let record = wait_for_terminal(&pool, &id, Duration::from_secs(5)).await;
    assert_eq!(record.status, JobStatus::Completed);
    assert!(record.force);
    assert_eq!(detection.analyze_calls("J1"), 1);

    pool.stop().await;
}

#[tokio::test(start_paused = true)]
async fn two_workers_process_two_jobs_concurrently() {
    let detection = Arc::new(ScriptedDetection::new().with_latency(Duration::from_secs(1)));
    let pool = pool(&detection, QueueConfig::default().with_concurrency(2));

    let a = submit(&pool, "A");
    let b = submit(&pool, "B");
    pool.start();

    // Serialized execution would need at least two seconds.
    tokio::time::sleep(Duration::from_millis(1_500)).await;
    assert_eq!(pool.status(&a).unwrap().status, JobStatus::Completed);
    assert_eq!(pool.status(&b).unwrap().status, JobStatus::Completed);
    assert_eq!(detection.max_concurrent.load(Ordering::SeqCst), 2);

    pool.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn no_job_is_held_by_two_workers_at_once() {
    let detection = Arc::new(ScriptedDetection::new().with_latency(Duration::from_millis(20)));
    let config = QueueConfig::default()
        .with_concurrency(4)
        .with_poll_interval(Duration::from_millis(5));
    let pool = pool(&detection, config);

    let items: Vec<String> = (0..20).map(|i| format!("item-{i}")).collect();
    let ids: Vec<JobId> = items.iter().map(|item| submit(&pool, item)).collect();
    pool.start();

    for id in &ids {
        let record = wait_for_terminal(&pool, id, Duration::from_secs(10)).await;
        assert_eq!(record.status, JobStatus::Completed);
    }

    assert_eq!(detection.overlaps.load(Ordering::SeqCst), 0);
    for item in &items {
        assert_eq!(detection.analyze_calls(item), 1, "{item} classified more than once");
    }
    assert!(detection.max_concurrent.load(Ordering::SeqCst) <= 4);

    let report = pool.stop().await;
    assert!(report.drained);
}

#[tokio::test(start_paused = true)]
async fn stop_gives_up_after_the_shutdown_timeout() {
    let detection = Arc::new(ScriptedDetection::new().hanging());
    let pool = pool(&detection, QueueConfig::default().with_concurrency(1));

    let id = submit(&pool, "J1");
    pool.start();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(pool.status(&id).unwrap().status, JobStatus::Processing);

    let started = Instant::now();
    let report = pool.stop().await;
    let elapsed = started.elapsed();

    assert!(!report.drained);
    assert_eq!(report.in_flight, 1);
    assert!(elapsed >= Duration::from_secs(30));
    assert!(elapsed < Duration::from_secs(31), "stop took {elapsed:?}");
    assert!(!pool.is_running());
}

#[tokio::test(start_paused = true)]
async fn stop_waits_for_an_executing_job_to_finish() {
    let detection = Arc::new(ScriptedDetection::new().with_latency(Duration::from_secs(2)));
    let pool = pool(&detection, QueueConfig::default());

    let id = submit(&pool, "J1");
    pool.start();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let report = pool.stop().await;

    assert!(report.drained);
    assert_eq!(report.in_flight, 0);
    assert_eq!(pool.status(&id).unwrap().status, JobStatus::Completed);
}

#[tokio::test(start_paused = true)]
async fn stop_cancels_backoffs_and_releases_their_jobs() {
    let detection = Arc::new(ScriptedDetection::new().missing("J1"));
    let pool = pool(&detection, QueueConfig::default());

    let id = submit(&pool, "J1");
    pool.start();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(pool.pending_backoffs(), 1);

    let started = Instant::now();
    let report = pool.stop().await;

    assert!(report.drained);
    assert_eq!(report.cancelled_backoffs, 1);
    assert!(started.elapsed() < Duration::from_secs(1));

    let record = pool.status(&id).unwrap();
    assert_eq!(record.status, JobStatus::Pending);
    assert_eq!(record.attempts, 1);
    assert!(!record.is_backing_off());
    assert_eq!(pool.pending_backoffs(), 0);
}

#[tokio::test(start_paused = true)]
async fn start_is_idempotent_and_restart_resumes_processing() {
    let detection = Arc::new(ScriptedDetection::new());
    let pool = pool(&detection, QueueConfig::default().with_concurrency(3));

    pool.start();
    pool.start();
    tokio::task::yield_now().await;
    assert!(pool.is_running());
    assert_eq!(pool.active_workers(), 3);

    pool.stop().await;
    assert!(!pool.is_running());

    let id = submit(&pool, "later");
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(pool.status(&id).unwrap().status, JobStatus::Pending);

    pool.start();
    let record = wait_for_terminal(&pool, &id, Duration::from_secs(5)).await;
    assert_eq!(record.status, JobStatus::Completed);

    pool.stop().await;
}

#[tokio::test(start_paused = true)]
async fn a_panicking_collaborator_does_not_kill_the_worker() {
    let detection = Arc::new(ScriptedDetection::new().panics_on("bad"));
    let config = QueueConfig::default().with_concurrency(1).with_max_retries(1);
    let pool = pool(&detection, config);

    let bad = submit(&pool, "bad");
    let good = submit(&pool, "good");
    pool.start();

    let record = wait_for_terminal(&pool, &bad, Duration::from_secs(5)).await;
    assert_eq!(record.status, JobStatus::Failed);
    assert_eq!(
        record.error.as_deref(),
        Some("job panicked: classifier crashed on bad")
    );

    let record = wait_for_terminal(&pool, &good, Duration::from_secs(5)).await;
    assert_eq!(record.status, JobStatus::Completed);

    pool.stop().await;
}

#[tokio::test(start_paused = true)]
async fn stats_and_lookup_by_content_item() {
    let detection = Arc::new(ScriptedDetection::new().missing("gone"));
    let config = QueueConfig::default().with_max_retries(1);
    let pool = pool(&detection, config);

    assert!(pool.find_by_content_item(&ContentItemId::new("J1")).is_none());

    let ok = submit(&pool, "J1");
    let gone = submit(&pool, "gone");
    submit(&pool, "J3");

    let found = pool.find_by_content_item(&ContentItemId::new("J1")).unwrap();
    assert_eq!(found.id, ok);

    let stats = pool.stats();
    assert_eq!(stats.total, 3);
    assert_eq!(stats.pending, 3);

    pool.start();
    wait_for_terminal(&pool, &gone, Duration::from_secs(10)).await;
    tokio::time::sleep(Duration::from_secs(3)).await;

    let stats = pool.stats();
    assert_eq!(stats.total, 3);
    assert_eq!(stats.completed, 2);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.pending, 0);
    assert_eq!(stats.in_flight, 0);

    pool.stop().await;
}

#[tokio::test]
async fn retention_compacts_finished_jobs() {
    let detection = Arc::new(ScriptedDetection::new());
    let config = QueueConfig::default()
        .with_poll_interval(Duration::from_millis(10))
        .with_retention(Duration::from_millis(200));
    let pool = pool(&detection, config);

    let id = submit(&pool, "J1");
    pool.start();
    wait_for_terminal(&pool, &id, Duration::from_secs(2)).await;

    let deadline = Instant::now() + Duration::from_secs(5);
    while pool.status(&id).is_some() {
        assert!(Instant::now() < deadline, "finished job was never compacted");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(pool.store().is_empty());

    pool.stop().await;
}
