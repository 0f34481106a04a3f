//! One processing attempt against the detection collaborator.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tracing::debug;

use emoqueue_detection::{DetectionError, DetectionService, EmotionAnalysis};

use crate::error::JobError;
use crate::types::JobRecord;

/// What a successful attempt did.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    /// Classification ran and its result was saved.
    Classified(EmotionAnalysis),
    /// Completed results already existed and `force` was not set.
    AlreadyAnalyzed,
}

/// Runs a claimed job through validate → (skip) → analyze → save.
#[derive(Clone)]
pub struct JobProcessor {
    detection: Arc<dyn DetectionService>,
}

impl std::fmt::Debug for JobProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobProcessor")
            .field("detection", &"<dyn DetectionService>")
            .finish()
    }
}

impl JobProcessor {
    pub fn new(detection: Arc<dyn DetectionService>) -> Self {
        Self { detection }
    }

    /// Process `job`, converting a panic in any collaborator call into a
    /// [`JobError::Panicked`].
    pub async fn execute(&self, job: &JobRecord) -> Result<ProcessOutcome, JobError> {
        match AssertUnwindSafe(self.process(job)).catch_unwind().await {
            Ok(result) => result,
            Err(payload) => Err(JobError::Panicked(panic_message(payload.as_ref()))),
        }
    }

    async fn process(&self, job: &JobRecord) -> Result<ProcessOutcome, JobError> {
        let item = &job.content_item_id;

        // Absence is a regular failure: it goes through the retry policy.
        if !self.detection.validate_item(item).await? {
            return Err(DetectionError::ItemNotFound(item.clone()).into());
        }

        if !job.force {
            if let Some(existing) = self.detection.get_results(item).await? {
                if existing.is_complete() {
                    debug!(job_id = %job.id, content_item_id = %item, "results already present; skipping classification");
                    return Ok(ProcessOutcome::AlreadyAnalyzed);
                }
            }
        }

        let analysis = self.detection.analyze(&job.request()).await?;
        self.detection.save_results(item, &analysis).await?;

        Ok(ProcessOutcome::Classified(analysis))
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
