//! The set of job ids currently held by a worker or a backoff timer.

use std::collections::HashSet;

use emoqueue_core::JobId;

/// Jobs that must not be claimed.
///
/// A job is a member while a worker executes it or while it waits out a
/// retry backoff. Membership is what makes a claim exclusive.
#[derive(Debug, Default, Clone)]
pub struct InFlightSet {
    ids: HashSet<JobId>,
}

impl InFlightSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of `id`. Returns `false` if it is already held.
    pub fn try_hold(&mut self, id: &JobId) -> bool {
        self.ids.insert(id.clone())
    }

    /// Drop ownership of `id`. Returns `false` if it was not held.
    pub fn release(&mut self, id: &JobId) -> bool {
        self.ids.remove(id)
    }

    pub fn contains(&self, id: &JobId) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
