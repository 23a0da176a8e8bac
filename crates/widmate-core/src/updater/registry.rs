//! Collaborators of the update cycle: package index, installer, notifier.
//!
//! All methods are blocking; the scheduler calls them on the blocking pool.

use std::path::{Path, PathBuf};

use crate::error::ServiceResult;

/// Latest published release of the tool's package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Release {
    pub version: String,
    /// Source distribution download URL, when the index publishes one.
    pub package_url: Option<String>,
    /// Lowercase hex SHA-256 of the package, when published.
    pub sha256: Option<String>,
}

pub trait PackageIndex: Send + Sync {
    fn latest_release(&self) -> ServiceResult<Release>;

    /// Download the release's package into `dest_dir`; returns the file path.
    fn fetch(&self, release: &Release, dest_dir: &Path) -> ServiceResult<PathBuf>;
}

pub trait ToolInstaller: Send + Sync {
    fn installed_version(&self) -> ServiceResult<String>;

    fn install(&self, package: &Path) -> ServiceResult<()>;
}

pub trait Notifier: Send + Sync {
    fn update_available(&self, current: &str, latest: &str);

    fn update_installed(&self, version: &str);
}

/// Notifier that only emits log events.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn update_available(&self, current: &str, latest: &str) {
        tracing::info!(current, latest, "yt-dlp update available");
    }

    fn update_installed(&self, version: &str) {
        tracing::info!(version, "yt-dlp update installed");
    }
}
