//! Progress events from the extractor and their translation into store updates.

use std::sync::Arc;

use crate::error::ServiceError;
use crate::jobs::{JobId, JobStatus, JobStore};

/// Error recorded when the extractor fails without saying why.
pub const UNKNOWN_EXTRACTION_ERROR: &str = "unknown extraction error";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressPhase {
    Downloading,
    Finished,
    Error,
}

/// One raw event from the extractor.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEvent {
    pub phase: ProgressPhase,
    pub percent: Option<f64>,
    pub speed: Option<String>,
    pub eta: Option<String>,
    pub downloaded_bytes: Option<u64>,
    pub total_bytes: Option<u64>,
    pub filename: Option<String>,
    pub error_message: Option<String>,
}

impl ProgressEvent {
    pub fn downloading() -> Self {
        Self {
            phase: ProgressPhase::Downloading,
            percent: None,
            speed: None,
            eta: None,
            downloaded_bytes: None,
            total_bytes: None,
            filename: None,
            error_message: None,
        }
    }

    pub fn finished(filename: Option<String>) -> Self {
        Self {
            phase: ProgressPhase::Finished,
            filename,
            ..Self::downloading()
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            phase: ProgressPhase::Error,
            error_message: Some(message.into()),
            ..Self::downloading()
        }
    }

    /// Reported percent, or one computed from the byte counters.
    pub fn effective_percent(&self) -> Option<f64> {
        if let Some(p) = self.percent.filter(|p| p.is_finite()) {
            return Some(p);
        }
        match (self.downloaded_bytes, self.total_bytes) {
            (Some(done), Some(total)) if total > 0 => Some(done as f64 * 100.0 / total as f64),
            _ => None,
        }
    }
}

/// Callback handed to the extractor. Called from the blocking pool.
pub trait ProgressSink: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Applies events for one job to the store.
pub struct ProgressReporter {
    store: Arc<JobStore>,
    id: JobId,
}

impl ProgressReporter {
    pub fn new(store: Arc<JobStore>, id: JobId) -> Self {
        Self { store, id }
    }

    pub fn job_id(&self) -> JobId {
        self.id
    }
}

impl ProgressSink for ProgressReporter {
    fn report(&self, event: ProgressEvent) {
        let id = self.id;
        let result = match event.phase {
            ProgressPhase::Downloading => {
                let percent = event.effective_percent();
                self.store.update(id, |job| {
                    if job.status != JobStatus::Running {
                        return;
                    }
                    if let Some(p) = percent {
                        job.progress = p;
                    }
                    if event.speed.is_some() {
                        job.speed = event.speed;
                    }
                    if event.eta.is_some() {
                        job.eta = event.eta;
                    }
                    if let Some(n) = event.downloaded_bytes {
                        job.downloaded_bytes = n;
                    }
                    if event.total_bytes.is_some() {
                        job.total_bytes = event.total_bytes;
                    }
                })
            }
            ProgressPhase::Finished => self.store.complete(id, event.filename),
            ProgressPhase::Error => {
                let message = event
                    .error_message
                    .filter(|m| !m.trim().is_empty())
                    .unwrap_or_else(|| UNKNOWN_EXTRACTION_ERROR.to_string());
                tracing::error!(job_id = %id, error = %message, "download failed");
                self.store.fail(id, message)
            }
        };

        match result {
            Ok(job) if job.status.is_terminal() && event.phase == ProgressPhase::Finished => {
                tracing::info!(job_id = %id, output = ?job.output_path, "download completed");
            }
            Ok(_) => {}
            Err(e @ (ServiceError::NotFound(_) | ServiceError::InvalidTransition { .. })) => {
                tracing::debug!(job_id = %id, error = %e, "dropping progress event");
            }
            Err(e) => tracing::warn!(job_id = %id, error = %e, "progress update failed"),
        }
    }
}
