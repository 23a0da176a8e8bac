//! Background self-updater for the yt-dlp package.
//!
//! The [`UpdateScheduler`] runs check cycles on startup, on a timer and on
//! demand. A cycle compares the installed version with the latest release and,
//! depending on [`UpdaterSettings`], reports availability or fetches, verifies
//! and installs the new package.

mod cycle;
pub mod pypi;
pub mod registry;
mod scheduler;
pub mod settings;
pub mod state;

#[cfg(test)]
mod tests;

pub use cycle::{LOOKUP_FAILED_MESSAGE, UNKNOWN_VERSION};
pub use pypi::{PipInstaller, PypiIndex};
pub use registry::{LogNotifier, Notifier, PackageIndex, Release, ToolInstaller};
pub use scheduler::{TriggerOutcome, UpdateScheduler, VERSION_LOOKUP_MAX_AGE};
pub use settings::{SettingsPatch, UpdaterSettings, MAX_CHECK_INTERVAL_SECS, MIN_CHECK_INTERVAL_SECS};
pub use state::{UpdateStatus, UpdaterSnapshot, VersionInfo};
