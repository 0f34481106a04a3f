use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use emoqueue_core::ContentItemId;

use crate::emotion::EmotionLabel;
use crate::result::{DetectionError, EmotionAnalysis};
use crate::service::{AnalysisRequest, DetectionService};

#[derive(Debug)]
struct State {
    items: HashSet<ContentItemId>,
    results: HashMap<ContentItemId, EmotionAnalysis>,
    outcome: Result<EmotionAnalysis, DetectionError>,
}

/// In-memory detection collaborator for tests/dev.
///
/// Every registered item classifies to the configured outcome (neutral by
/// default) after an optional simulated latency.
#[derive(Debug)]
pub struct InMemoryDetectionService {
    state: Mutex<State>,
    latency: Duration,
    analyze_calls: AtomicUsize,
    save_calls: AtomicUsize,
}

impl Default for InMemoryDetectionService {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryDetectionService {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                items: HashSet::new(),
                results: HashMap::new(),
                outcome: Ok(EmotionAnalysis::completed(EmotionLabel::Neutral)),
            }),
            latency: Duration::ZERO,
            analyze_calls: AtomicUsize::new(0),
            save_calls: AtomicUsize::new(0),
        }
    }

    /// Delay applied to every `analyze` call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_item(self, id: impl Into<String>) -> Self {
        self.add_item(ContentItemId::new(id));
        self
    }

    pub fn with_results(self, id: impl Into<String>, analysis: EmotionAnalysis) -> Self {
        self.state()
            .results
            .insert(ContentItemId::new(id), analysis);
        self
    }

    pub fn with_outcome(self, outcome: Result<EmotionAnalysis, DetectionError>) -> Self {
        self.state().outcome = outcome;
        self
    }

    pub fn add_item(&self, id: ContentItemId) {
        self.state().items.insert(id);
    }

    pub fn results(&self, id: &ContentItemId) -> Option<EmotionAnalysis> {
        self.state().results.get(id).cloned()
    }

    pub fn analyze_calls(&self) -> usize {
        self.analyze_calls.load(Ordering::SeqCst)
    }

    pub fn save_calls(&self) -> usize {
        self.save_calls.load(Ordering::SeqCst)
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl DetectionService for InMemoryDetectionService {
    async fn validate_item(&self, id: &ContentItemId) -> Result<bool, DetectionError> {
        Ok(self.state().items.contains(id))
    }

    async fn get_results(
        &self,
        id: &ContentItemId,
    ) -> Result<Option<EmotionAnalysis>, DetectionError> {
        Ok(self.state().results.get(id).cloned())
    }

    async fn analyze(&self, _request: &AnalysisRequest) -> Result<EmotionAnalysis, DetectionError> {
        self.analyze_calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.state().outcome.clone()
    }

    async fn save_results(
        &self,
        id: &ContentItemId,
        analysis: &EmotionAnalysis,
    ) -> Result<(), DetectionError> {
        self.save_calls.fetch_add(1, Ordering::SeqCst);
        self.state().results.insert(id.clone(), analysis.clone());
        Ok(())
    }
}
