//! Strongly-typed identifiers used across the queue.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::IdError;

/// Identifier of a content item owned by the host application.
///
/// The queue never owns the item; it only carries the reference to the
/// detection collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentItemId(String);

/// Identifier of a queued job.
///
/// Derived from the content item id plus the submission time, with a
/// store-local sequence number so ids submitted in the same millisecond
/// stay distinct.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

macro_rules! impl_string_newtype {
    ($t:ty, $name:literal) => {
        impl $t {
            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $t {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl From<$t> for String {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl FromStr for $t {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                validate($name, s)?;
                Ok(Self(s.to_string()))
            }
        }

        impl TryFrom<String> for $t {
            type Error = IdError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                validate($name, &value)?;
                Ok(Self(value))
            }
        }
    };
}

impl_string_newtype!(ContentItemId, "ContentItemId");
impl_string_newtype!(JobId, "JobId");

fn validate(kind: &'static str, s: &str) -> Result<(), IdError> {
    if s.trim().is_empty() {
        return Err(IdError::Empty(kind));
    }
    if let Some(c) = s.chars().find(|c| c.is_whitespace() || c.is_control()) {
        return Err(IdError::malformed(kind, format!("unexpected character {c:?}")));
    }
    Ok(())
}

impl ContentItemId {
    /// Build an id from a trusted value.
    ///
    /// Use `parse`/`try_from` for untrusted input.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }
}

impl JobId {
    /// Compose a job id from its content item, submission time (unix millis)
    /// and a store-local sequence number.
    pub fn compose(item: &ContentItemId, submitted_at_ms: i64, seq: u64) -> Self {
        Self(format!("{}-{}-{}", item.0, submitted_at_ms, seq))
    }
}
