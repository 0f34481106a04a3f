//! In-process background queue for emotion classification jobs.
//!
//! ## Design
//!
//! - Jobs reference a content item; the queue never owns the item
//! - A bounded pool of workers polls the store and claims one job per tick
//! - Claiming is atomic: a job is held by at most one worker at a time
//! - Failures retry with capped exponential backoff, then settle as `failed`
//! - State lives in process memory only and does not survive a restart
//!
//! ## Components
//!
//! - `JobStore`: job records, the in-flight set, stats and compaction
//! - `JobProcessor`: one attempt against the detection collaborator
//! - `WorkerPool`: worker lifecycle, backoff timers, graceful shutdown
//! - `QueueConfig`: concurrency, retry and timing knobs

pub mod config;
pub mod error;
pub mod in_flight;
pub mod pool;
pub mod processor;
mod registry;
pub mod store;
pub mod types;

pub use config::{ConfigError, QueueConfig};
pub use error::JobError;
pub use in_flight::InFlightSet;
pub use pool::{ShutdownReport, WorkerPool};
pub use processor::{JobProcessor, ProcessOutcome};
pub use store::{FailureOutcome, JobStore};
pub use types::{JobDescriptor, JobRecord, JobStats, JobStatus, RetryPolicy};
