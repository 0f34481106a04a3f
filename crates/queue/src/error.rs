//! Errors raised by a single job attempt.

use thiserror::Error;

use emoqueue_detection::DetectionError;

/// Failure of one processing attempt.
///
/// Every variant is handled the same way by the retry policy; the rendered
/// message is what ends up in the job record's `error` field.
#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Detection(#[from] DetectionError),

    /// A collaborator call panicked; caught at the dispatch boundary.
    #[error("job panicked: {0}")]
    Panicked(String),
}
