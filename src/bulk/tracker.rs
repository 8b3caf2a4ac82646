//! Closed job bookkeeping
//!
//! Closing a job twice is an error on the platform, and the fallback path can
//! reach the same close from more than one branch.

use std::collections::HashSet;
use std::sync::Mutex;

/// Set of job ids already closed during this run
#[derive(Debug, Default)]
pub struct JobTracker {
    closed: Mutex<HashSet<String>>,
}

impl JobTracker {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `job_id` as closed; false if it already was
    pub fn mark_closed(&self, job_id: &str) -> bool {
        let mut closed = self.closed.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        closed.insert(job_id.to_string())
    }

    /// Whether `job_id` has been closed
    pub fn is_closed(&self, job_id: &str) -> bool {
        let closed = self.closed.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        closed.contains(job_id)
    }

    /// Number of closed jobs
    pub fn closed_count(&self) -> usize {
        let closed = self.closed.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        closed.len()
    }
}
