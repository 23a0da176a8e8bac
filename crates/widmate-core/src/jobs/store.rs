//! In-memory authoritative job store.
//!
//! All mutations go through [`JobStore::update`], which runs the caller's
//! mutator on a copy, validates it and commits it whole. Every committed change
//! is pushed onto the optional persistence journal while the lock is still held,
//! so the journal sees mutations in commit order.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

use super::types::{JobId, JobRecord, JobStatus};
use crate::error::{ServiceError, ServiceResult};

/// Error recorded on jobs that were still in flight when the service stopped.
pub const INTERRUPTED_ERROR: &str = "interrupted by service restart";

/// Change notification sent to the persistence worker.
#[derive(Debug, Clone, PartialEq)]
pub enum PersistOp {
    Upsert(JobRecord),
    Delete(Vec<JobId>),
}

#[derive(Default)]
pub struct JobStore {
    jobs: Mutex<HashMap<JobId, JobRecord>>,
    journal: Option<UnboundedSender<PersistOp>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that forwards every committed change to `journal`.
    pub fn with_journal(journal: UnboundedSender<PersistOp>) -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            journal: Some(journal),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<JobId, JobRecord>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn journal(&self, op: PersistOp) {
        if let Some(tx) = &self.journal {
            if tx.send(op).is_err() {
                tracing::debug!("persistence journal closed; change not persisted");
            }
        }
    }

    /// Create a new pending job and return its id.
    pub fn create(&self, source_url: &str) -> JobId {
        let mut jobs = self.lock();
        let mut id = Uuid::new_v4();
        while jobs.contains_key(&id) {
            id = Uuid::new_v4();
        }
        let record = JobRecord::new(id, source_url);
        self.journal(PersistOp::Upsert(record.clone()));
        jobs.insert(id, record);
        id
    }

    pub fn get(&self, id: JobId) -> ServiceResult<JobRecord> {
        self.lock()
            .get(&id)
            .cloned()
            .ok_or_else(|| ServiceError::job_not_found(id))
    }

    /// Snapshot of all jobs, oldest first.
    pub fn list(&self) -> Vec<JobRecord> {
        let mut out: Vec<JobRecord> = self.lock().values().cloned().collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        out
    }

    /// Apply `mutate` atomically. The mutator sees a copy; nothing is committed
    /// unless the result passes validation and differs from the stored record.
    pub fn update<F>(&self, id: JobId, mutate: F) -> ServiceResult<JobRecord>
    where
        F: FnOnce(&mut JobRecord),
    {
        let mut jobs = self.lock();
        let current = jobs.get(&id).ok_or_else(|| ServiceError::job_not_found(id))?;
        if current.is_terminal() {
            return Err(ServiceError::InvalidTransition {
                id,
                status: current.status,
                reason: "job is already finished".to_string(),
            });
        }

        let mut next = current.clone();
        mutate(&mut next);
        validate(current, &mut next)?;
        if next == *current {
            return Ok(next);
        }
        next.touch();

        self.journal(PersistOp::Upsert(next.clone()));
        jobs.insert(id, next.clone());
        Ok(next)
    }

    /// Claim a pending job for execution.
    pub fn mark_running(&self, id: JobId) -> ServiceResult<JobRecord> {
        self.update(id, |job| job.status = JobStatus::Running)
    }

    pub fn cancel(&self, id: JobId) -> ServiceResult<JobRecord> {
        self.update(id, |job| job.status = JobStatus::Cancelled)
    }

    pub fn complete(&self, id: JobId, output_path: Option<String>) -> ServiceResult<JobRecord> {
        self.update(id, |job| {
            job.status = JobStatus::Completed;
            job.progress = 100.0;
            job.output_path = output_path;
        })
    }

    pub fn fail(&self, id: JobId, error: impl Into<String>) -> ServiceResult<JobRecord> {
        let error = error.into();
        self.update(id, |job| {
            job.status = JobStatus::Failed;
            job.error = Some(error);
        })
    }

    /// Remove a finished job. Returns `InvalidTransition` while it is still active.
    pub fn delete_if_terminal(&self, id: JobId) -> ServiceResult<bool> {
        let mut jobs = self.lock();
        let job = jobs.get(&id).ok_or_else(|| ServiceError::job_not_found(id))?;
        if !job.is_terminal() {
            return Err(ServiceError::InvalidTransition {
                id,
                status: job.status,
                reason: "only finished jobs can be removed".to_string(),
            });
        }
        jobs.remove(&id);
        self.journal(PersistOp::Delete(vec![id]));
        Ok(true)
    }

    /// Remove every finished job; returns how many were removed.
    pub fn purge_terminal(&self) -> usize {
        let mut jobs = self.lock();
        let ids: Vec<JobId> = jobs
            .values()
            .filter(|j| j.is_terminal())
            .map(|j| j.id)
            .collect();
        for id in &ids {
            jobs.remove(id);
        }
        let n = ids.len();
        if n > 0 {
            self.journal(PersistOp::Delete(ids));
        }
        n
    }

    /// Load records from a previous run. Jobs that had not finished are marked
    /// failed since downloads cannot be resumed. Returns how many were marked.
    pub fn restore(&self, records: Vec<JobRecord>) -> usize {
        let mut jobs = self.lock();
        let mut interrupted = 0;
        for mut record in records {
            if !record.is_terminal() {
                record.status = JobStatus::Failed;
                record.error = Some(INTERRUPTED_ERROR.to_string());
                record.output_path = None;
                record.speed = None;
                record.eta = None;
                record.touch();
                self.journal(PersistOp::Upsert(record.clone()));
                interrupted += 1;
            }
            jobs.insert(record.id, record);
        }
        interrupted
    }

    /// Jobs that are pending or running.
    pub fn count_active(&self) -> usize {
        self.lock().values().filter(|j| !j.is_terminal()).count()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

fn validate(current: &JobRecord, next: &mut JobRecord) -> ServiceResult<()> {
    let reject = |reason: &str| ServiceError::InvalidTransition {
        id: current.id,
        status: current.status,
        reason: reason.to_string(),
    };

    if next.id != current.id
        || next.source_url != current.source_url
        || next.created_at != current.created_at
    {
        return Err(reject("id, source_url and created_at are immutable"));
    }
    if !current.status.can_transition_to(next.status) {
        return Err(reject(&format!("cannot move to {}", next.status)));
    }
    let has = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.is_empty());
    if has(&next.output_path) && next.status != JobStatus::Completed {
        return Err(reject("output_path is only set on completion"));
    }
    if has(&next.error) && next.status != JobStatus::Failed {
        return Err(reject("error is only set on failure"));
    }
    if !next.progress.is_finite() {
        next.progress = current.progress;
    }
    next.progress = next.progress.clamp(0.0, 100.0);
    if next.progress < current.progress {
        next.progress = current.progress;
    }
    if next.status.is_terminal() {
        next.speed = None;
        next.eta = None;
    }
    Ok(())
}
