use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use emoqueue_core::ContentItemId;

use crate::emotion::{EmotionLabel, EmotionScores};

/// Lifecycle of a stored analysis on the collaborator's side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisStatus {
    Pending,
    Completed,
    Failed,
}

/// Result of an emotion classification.
///
/// This is what the collaborator persists and what `get_results` reports
/// back. The queue only inspects [`EmotionAnalysis::is_complete`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmotionAnalysis {
    pub status: AnalysisStatus,

    /// Dominant emotion.
    pub emotion: EmotionLabel,

    /// Confidence in \[0, 1\] (model-specific; not enforced).
    pub confidence: f64,

    pub scores: EmotionScores,

    pub analyzed_at: DateTime<Utc>,
}

impl EmotionAnalysis {
    /// A completed analysis with all mass on `emotion`.
    pub fn completed(emotion: EmotionLabel) -> Self {
        Self {
            status: AnalysisStatus::Completed,
            emotion,
            confidence: 1.0,
            scores: EmotionScores::certain(emotion),
            analyzed_at: Utc::now(),
        }
    }

    /// A completed analysis derived from raw model output.
    pub fn from_model_output(raw_label: &str, confidence: f64, probabilities: &[f64]) -> Self {
        Self {
            status: AnalysisStatus::Completed,
            emotion: EmotionLabel::normalize(raw_label),
            confidence,
            scores: EmotionScores::from_probabilities(probabilities),
            analyzed_at: Utc::now(),
        }
    }

    pub fn with_status(mut self, status: AnalysisStatus) -> Self {
        self.status = status;
        self
    }

    pub fn is_complete(&self) -> bool {
        self.status == AnalysisStatus::Completed
    }
}

/// Errors surfaced by a detection collaborator.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DetectionError {
    /// The referenced content item does not exist.
    #[error("item {0} not found")]
    ItemNotFound(ContentItemId),

    #[error("detection service unavailable: {0}")]
    Unavailable(String),

    #[error("inference failed: {0}")]
    InferenceFailed(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl DetectionError {
    /// Whether the item is known to be absent.
    ///
    /// The queue does not act on this (every failure goes through the same
    /// retry policy) but it is useful in logs.
    pub fn is_validation(&self) -> bool {
        matches!(self, DetectionError::ItemNotFound(_))
    }
}
