//! One check cycle, optionally followed by an update cycle.
//!
//! Collaborator calls run on the blocking pool; the state lock is only taken
//! for short field updates in between.

use chrono::Utc;

use super::registry::Release;
use super::scheduler::Inner;
use super::state::UpdateStatus;
use crate::checksum::verify_sha256;
use crate::error::{ServiceError, ServiceResult};

/// Message shown when the latest release could not be determined.
pub const LOOKUP_FAILED_MESSAGE: &str = "Could not check for updates";

/// Version reported when the installer cannot tell.
pub const UNKNOWN_VERSION: &str = "unknown";

async fn blocking<T, F>(f: F) -> ServiceResult<T>
where
    F: FnOnce() -> ServiceResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ServiceError::Internal(format!("updater task failed: {e}")))?
}

async fn installed_version(inner: &Inner) -> String {
    let installer = inner.installer.clone();
    match blocking(move || installer.installed_version()).await {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, "could not determine installed yt-dlp version");
            UNKNOWN_VERSION.to_string()
        }
    }
}

/// Refresh the installed and latest versions only. Status and message are
/// left alone and nothing is installed.
pub(crate) async fn run_version_lookup(inner: &Inner) {
    let installed = installed_version(inner).await;
    let index = inner.index.clone();
    let latest = match blocking(move || index.latest_release()).await {
        Ok(release) => Some(release.version),
        Err(e) => {
            tracing::warn!(error = %e, "latest yt-dlp release lookup failed");
            None
        }
    };
    tracing::info!(installed = %installed, latest = ?latest, "yt-dlp version lookup");
    inner.with_state(|s| {
        s.installed_version = Some(installed);
        if latest.is_some() {
            s.latest_version = latest;
        }
        s.last_check = Some(Utc::now());
    });
}

/// How the loop should schedule the next check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CycleOutcome {
    /// Next check after the configured interval.
    Done,
    /// The cycle could not run; retry after the short backoff.
    RetrySoon,
}

/// Run a check cycle. With `force_install` an available update is installed
/// regardless of the `enabled`/`silent` settings.
///
/// `next_check` belongs to the scheduler loop and is left untouched here.
pub(crate) async fn run_check_cycle(inner: &Inner, force_install: bool) -> CycleOutcome {
    inner.with_state(|s| {
        s.begin(UpdateStatus::Checking, "Checking for updates...");
        s.last_check = Some(Utc::now());
    });

    let installed = installed_version(inner).await;
    let index = inner.index.clone();
    let release = match blocking(move || index.latest_release()).await {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(error = %e, "latest yt-dlp release lookup failed");
            inner.with_state(|s| {
                s.installed_version = Some(installed);
                s.settle(UpdateStatus::Idle, LOOKUP_FAILED_MESSAGE);
            });
            return CycleOutcome::RetrySoon;
        }
    };

    let settings = inner.settings();
    inner.with_state(|s| {
        s.installed_version = Some(installed.clone());
        s.latest_version = Some(release.version.clone());
    });

    if installed == release.version {
        tracing::info!(version = %installed, "yt-dlp is up to date");
        inner.with_state(|s| {
            s.settle(UpdateStatus::Idle, format!("yt-dlp is up to date (v{installed})"));
        });
    } else if force_install || (settings.enabled && settings.silent) {
        tracing::info!(from = %installed, to = %release.version, "starting yt-dlp update");
        run_update_cycle(inner, release).await;
    } else if !settings.enabled {
        inner.with_state(|s| {
            s.settle(
                UpdateStatus::Idle,
                format!(
                    "Update available ({installed} -> {}) but auto-update disabled",
                    release.version
                ),
            );
        });
    } else {
        tracing::info!(from = %installed, to = %release.version, "yt-dlp update available");
        inner.with_state(|s| {
            s.settle(
                UpdateStatus::Idle,
                format!("Update available: {installed} -> {}", release.version),
            );
        });
        if settings.notify {
            inner.notifier.update_available(&installed, &release.version);
        }
    }

    CycleOutcome::Done
}

async fn run_update_cycle(inner: &Inner, release: Release) {
    inner.with_state(|s| s.begin(UpdateStatus::Updating, "Updating yt-dlp..."));

    match install_release(inner, &release).await {
        Ok(version) => {
            tracing::info!(version = %version, "yt-dlp updated");
            inner.with_state(|s| {
                s.progress = 1.0;
                s.settle(UpdateStatus::Completed, "Update completed successfully");
                s.last_update = Some(Utc::now());
                s.installed_version = Some(version.clone());
            });
            if inner.settings().notify {
                inner.notifier.update_installed(&version);
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "yt-dlp update failed");
            inner.with_state(|s| {
                s.error = Some(e.to_string());
                s.settle(UpdateStatus::Failed, format!("Update failed: {e}"));
            });
        }
    }
}

/// Fetch, verify and install; returns the version installed afterwards.
async fn install_release(inner: &Inner, release: &Release) -> ServiceResult<String> {
    let expected = release.sha256.clone().ok_or_else(|| {
        ServiceError::upstream(format!(
            "release {} publishes no SHA-256 digest",
            release.version
        ))
    })?;

    let staging = tempfile::Builder::new()
        .prefix("widmate-update-")
        .tempdir()
        .map_err(|e| ServiceError::Internal(format!("create staging directory: {e}")))?;
    let dest_dir = staging.path().to_path_buf();

    let index = inner.index.clone();
    let to_fetch = release.clone();
    let package = blocking(move || index.fetch(&to_fetch, &dest_dir)).await?;
    inner.with_state(|s| {
        s.progress = 0.2;
        s.message = "Verifying package...".to_string();
    });

    let to_verify = package.clone();
    blocking(move || verify_sha256(&to_verify, &expected)).await?;
    inner.with_state(|s| {
        s.progress = 0.4;
        s.message = "Installing update...".to_string();
    });

    let installer = inner.installer.clone();
    blocking(move || installer.install(&package)).await?;

    let installer = inner.installer.clone();
    let version = blocking(move || installer.installed_version())
        .await
        .unwrap_or_else(|_| release.version.clone());
    drop(staging);
    Ok(version)
}
