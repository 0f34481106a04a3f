//! `emoqueue-detection`
//!
//! **Responsibility:** boundary to the emotion detection collaborator.
//!
//! The queue treats detection as an opaque dependency:
//! - It validates that a content item exists.
//! - It reports stored results (for the idempotent skip).
//! - It classifies an item and persists the outcome.
//!
//! Latency and failure modes are outside the queue's control; every error
//! surfaces as a [`DetectionError`] and is handled by the queue's retry policy.

pub mod emotion;
pub mod memory;
pub mod result;
pub mod service;

pub use emotion::{EmotionLabel, EmotionScores};
pub use memory::InMemoryDetectionService;
pub use result::{AnalysisStatus, DetectionError, EmotionAnalysis};
pub use service::{AnalysisRequest, DetectionService};
