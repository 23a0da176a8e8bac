//! Updater status machine state and its serializable snapshot.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::cycle::UNKNOWN_VERSION;
use super::settings::UpdaterSettings;

/// Message left behind by a cycle abandoned on shutdown.
pub const INTERRUPTED_MESSAGE: &str = "Update check interrupted by shutdown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateStatus {
    Idle,
    Checking,
    Updating,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateState {
    pub status: UpdateStatus,
    /// 0.0..=1.0 within an update cycle.
    pub progress: f64,
    pub message: String,
    pub error: Option<String>,
    pub last_check: Option<DateTime<Utc>>,
    pub last_update: Option<DateTime<Utc>>,
    pub next_check: Option<DateTime<Utc>>,
    pub installed_version: Option<String>,
    pub latest_version: Option<String>,
}

impl Default for UpdateState {
    fn default() -> Self {
        Self {
            status: UpdateStatus::Idle,
            progress: 0.0,
            message: String::new(),
            error: None,
            last_check: None,
            last_update: None,
            next_check: None,
            installed_version: None,
            latest_version: None,
        }
    }
}

impl UpdateState {
    /// Enter `status` with the per-cycle fields cleared.
    pub(crate) fn begin(&mut self, status: UpdateStatus, message: &str) {
        self.status = status;
        self.progress = 0.0;
        self.message = message.to_string();
        self.error = None;
    }

    pub(crate) fn settle(&mut self, status: UpdateStatus, message: impl Into<String>) {
        self.status = status;
        self.message = message.into();
    }

    /// Settle a cycle that was dropped before it finished.
    pub(crate) fn interrupt(&mut self) {
        if matches!(self.status, UpdateStatus::Checking | UpdateStatus::Updating) {
            self.settle(UpdateStatus::Idle, INTERRUPTED_MESSAGE);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusBlock {
    pub status: UpdateStatus,
    pub progress: f64,
    pub message: String,
    pub error: Option<String>,
    pub last_update: Option<DateTime<Utc>>,
    pub next_check: Option<DateTime<Utc>>,
}

/// Body of `GET /auto-updater/status`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpdaterSnapshot {
    pub is_running: bool,
    pub auto_update_enabled: bool,
    pub silent_updates: bool,
    pub notify_on_update: bool,
    pub update_on_startup: bool,
    pub check_interval_hours: f64,
    pub last_check: Option<DateTime<Utc>>,
    pub next_check: Option<DateTime<Utc>>,
    pub installed_version: Option<String>,
    pub latest_version: Option<String>,
    pub update_status: StatusBlock,
}

impl UpdaterSnapshot {
    pub(crate) fn new(is_running: bool, settings: &UpdaterSettings, state: &UpdateState) -> Self {
        Self {
            is_running,
            auto_update_enabled: settings.enabled,
            silent_updates: settings.silent,
            notify_on_update: settings.notify,
            update_on_startup: settings.update_on_startup,
            check_interval_hours: settings.check_interval as f64 / 3600.0,
            last_check: state.last_check,
            next_check: state.next_check,
            installed_version: state.installed_version.clone(),
            latest_version: state.latest_version.clone(),
            update_status: StatusBlock {
                status: state.status,
                progress: state.progress,
                message: state.message.clone(),
                error: state.error.clone(),
                last_update: state.last_update,
                next_check: state.next_check,
            },
        }
    }
}

/// Compact version view served under `/version/*`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VersionInfo {
    pub current_version: String,
    pub latest_version: String,
    pub update_available: bool,
    pub update_status: UpdateStatus,
    pub update_progress: f64,
    pub update_message: String,
    pub error: Option<String>,
}

impl VersionInfo {
    pub(crate) fn new(state: &UpdateState) -> Self {
        let known = |v: &Option<String>| {
            v.clone()
                .filter(|v| v != UNKNOWN_VERSION)
                .unwrap_or_else(|| UNKNOWN_VERSION.to_string())
        };
        let current_version = known(&state.installed_version);
        let latest_version = known(&state.latest_version);
        Self {
            update_available: latest_version != UNKNOWN_VERSION && current_version != latest_version,
            current_version,
            latest_version,
            update_status: state.status,
            update_progress: state.progress,
            update_message: state.message.clone(),
            error: state.error.clone(),
        }
    }
}
