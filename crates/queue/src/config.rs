//! Queue configuration.
//!
//! Only worker concurrency, the retry budget and the retention TTL are read
//! from the environment. Poll interval, shutdown timeout and backoff timing
//! are fixed defaults that embedders may override in code.

use std::time::Duration;

use thiserror::Error;

use crate::types::RetryPolicy;

pub const ENV_CONCURRENCY: &str = "EMOTION_QUEUE_CONCURRENCY";
pub const ENV_MAX_RETRIES: &str = "EMOTION_QUEUE_MAX_RETRIES";
pub const ENV_RETENTION_SECS: &str = "EMOTION_QUEUE_RETENTION_SECS";

/// Invalid configuration value.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key}={value:?} is not a valid number")]
    NotANumber { key: &'static str, value: String },

    #[error("{key} must be at least {min}, got {value}")]
    TooSmall {
        key: &'static str,
        value: u64,
        min: u64,
    },
}

/// Worker pool configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// Number of worker loops
    pub concurrency: usize,
    pub retry: RetryPolicy,
    /// Delay between two scans by the same worker
    pub poll_interval: Duration,
    /// Upper bound on how long `stop` waits for in-flight jobs
    pub shutdown_timeout: Duration,
    /// Terminal jobs older than this are compacted away; `None` keeps them forever
    pub retention: Option<Duration>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency: 2,
            retry: RetryPolicy::default(),
            poll_interval: Duration::from_millis(1000),
            shutdown_timeout: Duration::from_millis(30_000),
            retention: None,
        }
    }
}

impl QueueConfig {
    /// Load from the process environment, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using `lookup` to resolve variables.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(n) = parse(&lookup, ENV_CONCURRENCY, 1)? {
            config.concurrency = usize::try_from(n).unwrap_or(usize::MAX);
        }
        if let Some(n) = parse(&lookup, ENV_MAX_RETRIES, 1)? {
            config.retry.max_retries = u32::try_from(n).unwrap_or(u32::MAX);
        }
        if let Some(secs) = parse(&lookup, ENV_RETENTION_SECS, 1)? {
            config.retention = Some(Duration::from_secs(secs));
        }

        Ok(config)
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.retry.max_retries = max_retries;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = Some(retention);
        self
    }
}

fn parse<F>(lookup: &F, key: &'static str, min: u64) -> Result<Option<u64>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    let value: u64 = trimmed.parse().map_err(|_| ConfigError::NotANumber {
        key,
        value: raw.clone(),
    })?;
    if value < min {
        return Err(ConfigError::TooSmall { key, value, min });
    }
    Ok(Some(value))
}
