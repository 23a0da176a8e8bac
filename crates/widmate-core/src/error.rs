//! Service error taxonomy shared by the job core, the updater and the HTTP layer.
//!
//! Request-local kinds (`NotFound`, `InvalidTransition`, `RateLimited`,
//! `ConfigValidation`, `InvalidRequest`) are reported straight to the caller.
//! `UpstreamFailure` and `ChecksumMismatch` come from external collaborators
//! and are recorded on the job or the updater status rather than propagated.

use thiserror::Error;

use crate::jobs::{JobId, JobStatus};

pub type ServiceResult<T> = Result<T, ServiceError>;

#[derive(Debug, Error)]
pub enum ServiceError {
    /// Unknown job or resource.
    #[error("{0} not found")]
    NotFound(String),

    /// Mutation attempted on a terminal job, or one that would break a record invariant.
    #[error("invalid transition for job {id} (status {status}): {reason}")]
    InvalidTransition {
        id: JobId,
        status: JobStatus,
        reason: String,
    },

    /// The extraction tool or the package registry failed.
    #[error("upstream failure: {0}")]
    UpstreamFailure(String),

    /// Downloaded update package did not match its published digest.
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("rate limit exceeded")]
    RateLimited,

    /// Malformed updater settings.
    #[error("invalid configuration: {0}")]
    ConfigValidation(String),

    /// Malformed request field (URL, playlist selector, output path).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    pub fn job_not_found(id: JobId) -> Self {
        ServiceError::NotFound(format!("job {id}"))
    }

    pub fn upstream(msg: impl Into<String>) -> Self {
        ServiceError::UpstreamFailure(msg.into())
    }
}

impl From<std::io::Error> for ServiceError {
    fn from(e: std::io::Error) -> Self {
        ServiceError::Internal(e.to_string())
    }
}

impl From<anyhow::Error> for ServiceError {
    fn from(e: anyhow::Error) -> Self {
        ServiceError::Internal(format!("{e:#}"))
    }
}
