use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use emoqueue_core::ContentItemId;

use crate::result::{DetectionError, EmotionAnalysis};

/// Read-only projection of a queued job handed to the collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub content_item_id: ContentItemId,

    /// Re-run classification even when completed results already exist.
    pub force: bool,
}

impl AnalysisRequest {
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

/// The emotion detection collaborator.
///
/// Implementations may call out to another process or thread pool; the
/// queue awaits each call and never cancels one that is in progress.
#[async_trait]
pub trait DetectionService: Send + Sync + 'static {
    /// Whether the content item exists.
    async fn validate_item(&self, id: &ContentItemId) -> Result<bool, DetectionError>;

    /// Previously stored results for the item, if any.
    async fn get_results(&self, id: &ContentItemId)
    -> Result<Option<EmotionAnalysis>, DetectionError>;

    /// Run classification.
    async fn analyze(&self, request: &AnalysisRequest) -> Result<EmotionAnalysis, DetectionError>;

    /// Persist a classification for the item.
    async fn save_results(
        &self,
        id: &ContentItemId,
        analysis: &EmotionAnalysis,
    ) -> Result<(), DetectionError>;
}
