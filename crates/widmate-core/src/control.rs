//! Cancellation tokens for running extractions.
//!
//! The runner registers each job it starts; `JobRunner::cancel` flips the token
//! and the extractor polls it between output lines and kills its child.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use crate::jobs::JobId;

/// Registry of job id -> abort token.
#[derive(Default)]
pub struct JobControl {
    jobs: RwLock<HashMap<JobId, Arc<AtomicBool>>>,
}

impl JobControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a running job; returns the token handed to the extractor.
    pub fn register(&self, job_id: JobId) -> Arc<AtomicBool> {
        let token = Arc::new(AtomicBool::new(false));
        self.jobs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(job_id, Arc::clone(&token));
        token
    }

    /// Drop the token once the job's task is done, success or failure.
    pub fn unregister(&self, job_id: JobId) {
        self.jobs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&job_id);
    }

    /// Signal the job's extractor to stop. Returns false when the job has no
    /// live extraction (still queued or already finished).
    pub fn request_abort(&self, job_id: JobId) -> bool {
        match self
            .jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&job_id)
        {
            Some(token) => {
                token.store(true, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    /// Signal every live extraction to stop; returns how many were signalled.
    pub fn abort_all(&self) -> usize {
        let jobs = self.jobs.read().unwrap_or_else(PoisonError::into_inner);
        for token in jobs.values() {
            token.store(true, Ordering::Relaxed);
        }
        jobs.len()
    }

    pub fn active(&self) -> usize {
        self.jobs.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}
