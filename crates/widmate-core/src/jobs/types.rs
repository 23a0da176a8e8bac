//! Types for download jobs.

use std::path::{Component, Path};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ServiceError, ServiceResult};

/// Job identifier.
pub type JobId = Uuid;

/// Lifecycle state of a job, stored as a lowercase string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// Unknown strings map to `Failed` so a corrupt row never looks runnable.
    pub fn from_str(s: &str) -> Self {
        match s {
            "pending" => JobStatus::Pending,
            "running" => JobStatus::Running,
            "completed" => JobStatus::Completed,
            "cancelled" => JobStatus::Cancelled,
            _ => JobStatus::Failed,
        }
    }

    /// Completed, failed and cancelled jobs accept no further mutation.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Whether `self -> next` is a legal step. Staying in the same non-terminal
    /// state is allowed (progress updates).
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        match (self, next) {
            (Pending, Pending) | (Running, Running) => true,
            (Pending, Running | Cancelled | Failed) => true,
            (Running, Completed | Failed | Cancelled) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One download job as owned by the [`JobStore`](super::JobStore).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub source_url: String,
    pub status: JobStatus,
    /// Percent complete, 0.0..=100.0.
    pub progress: f64,
    pub speed: Option<String>,
    pub eta: Option<String>,
    pub downloaded_bytes: u64,
    pub total_bytes: Option<u64>,
    pub output_path: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn new(id: JobId, source_url: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            source_url: source_url.into(),
            status: JobStatus::Pending,
            progress: 0.0,
            speed: None,
            eta: None,
            downloaded_bytes: 0,
            total_bytes: None,
            output_path: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Advance `updated_at`, strictly later than the previous stamp even if the
    /// wall clock stalls or steps backwards.
    pub(crate) fn touch(&mut self) {
        let now = Utc::now();
        self.updated_at = if now > self.updated_at {
            now
        } else {
            self.updated_at + Duration::microseconds(1)
        };
    }
}

/// Per-request download options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadOptions {
    #[serde(default)]
    pub format_id: Option<String>,
    /// `480p`, `720p`, `1080p` or `audio-only`.
    #[serde(default)]
    pub quality: Option<String>,
    #[serde(default)]
    pub audio_only: bool,
    /// yt-dlp playlist selector such as `1-5` or `1,3,5`.
    #[serde(default)]
    pub playlist_items: Option<String>,
    /// Sub-directory of the download directory.
    #[serde(default)]
    pub output_path: Option<String>,
}

impl DownloadOptions {
    /// Reject playlist selectors with anything but digits, `,`, `-`, `:` and
    /// output sub-directories that are absolute or climb out with `..`.
    pub fn validate(&self) -> ServiceResult<()> {
        if let Some(items) = self.playlist_items.as_deref() {
            let ok = !items.is_empty()
                && items
                    .chars()
                    .all(|c| c.is_ascii_digit() || matches!(c, ',' | '-' | ':'));
            if !ok {
                return Err(ServiceError::InvalidRequest(format!(
                    "invalid playlist_items: {items:?}"
                )));
            }
        }
        if let Some(sub) = self.output_path.as_deref() {
            let path = Path::new(sub);
            let escapes = path
                .components()
                .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
            if sub.is_empty() || escapes {
                return Err(ServiceError::InvalidRequest(format!(
                    "output_path must be a relative sub-directory: {sub:?}"
                )));
            }
        }
        Ok(())
    }

    /// yt-dlp format selector for these options.
    pub fn format_selector(&self) -> String {
        let quality = self.quality.as_deref().unwrap_or("720p");
        if self.audio_only || quality == "audio-only" {
            return "bestaudio/best".to_string();
        }
        if let Some(id) = self.format_id.as_deref().map(str::trim) {
            if !id.is_empty() && id != "best" {
                return id.to_string();
            }
        }
        match quality {
            "480p" => "best[height<=480]",
            "720p" => "best[height<=720]",
            "1080p" => "best[height<=1080]",
            _ => "best",
        }
        .to_string()
    }
}
