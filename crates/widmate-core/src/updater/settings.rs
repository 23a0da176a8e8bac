//! Persisted updater settings (`~/.config/widmate/auto_update.toml`) and the
//! validated patch accepted by `configure`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{ServiceError, ServiceResult};

/// Checks are never scheduled more often than hourly.
pub const MIN_CHECK_INTERVAL_SECS: u64 = 3600;
/// Upper bound on the interval: one year.
pub const MAX_CHECK_INTERVAL_SECS: u64 = 365 * 24 * 3600;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdaterSettings {
    /// Apply available updates automatically (subject to `silent`).
    pub enabled: bool,
    /// Install without waiting for a manual trigger.
    pub silent: bool,
    /// Emit notifications on availability and completion.
    pub notify: bool,
    /// Seconds between scheduled checks.
    pub check_interval: u64,
    pub update_on_startup: bool,
}

impl Default for UpdaterSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            silent: false,
            notify: false,
            check_interval: 24 * 60 * 60,
            update_on_startup: true,
        }
    }
}

impl UpdaterSettings {
    pub fn validate(&self) -> ServiceResult<()> {
        if !(MIN_CHECK_INTERVAL_SECS..=MAX_CHECK_INTERVAL_SECS).contains(&self.check_interval) {
            return Err(ServiceError::ConfigValidation(format!(
                "check_interval must be between {MIN_CHECK_INTERVAL_SECS} and {MAX_CHECK_INTERVAL_SECS} seconds"
            )));
        }
        Ok(())
    }

    pub fn apply(&mut self, patch: &SettingsPatch) {
        if let Some(v) = patch.enabled {
            self.enabled = v;
        }
        if let Some(hours) = patch.check_interval_hours {
            self.check_interval = hours.saturating_mul(3600);
        }
        if let Some(v) = patch.notify_on_update {
            self.notify = v;
        }
        if let Some(v) = patch.update_on_startup {
            self.update_on_startup = v;
        }
        if let Some(v) = patch.silent_updates {
            self.silent = v;
        }
    }

    pub fn check_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(
            self.check_interval
                .clamp(MIN_CHECK_INTERVAL_SECS, MAX_CHECK_INTERVAL_SECS),
        )
    }

    pub fn save_at(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let toml = toml::to_string_pretty(self)?;
        fs::write(path, toml).with_context(|| format!("write {}", path.display()))?;
        Ok(())
    }
}

pub fn settings_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("widmate")?;
    Ok(xdg_dirs.place_config_file("auto_update.toml")?)
}

/// Load settings, writing defaults when the file is missing. A file that does
/// not parse or validate is logged and replaced by defaults in memory.
pub fn load_or_init_at(path: &Path) -> Result<UpdaterSettings> {
    if !path.exists() {
        let settings = UpdaterSettings::default();
        settings.save_at(path)?;
        tracing::info!("created default updater settings at {}", path.display());
        return Ok(settings);
    }
    let data = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let parsed = toml::from_str::<UpdaterSettings>(&data)
        .map_err(|e| e.to_string())
        .and_then(|s| s.validate().map(|_| s).map_err(|e| e.to_string()));
    match parsed {
        Ok(settings) => Ok(settings),
        Err(e) => {
            tracing::error!(path = %path.display(), error = %e, "invalid updater settings; using defaults");
            Ok(UpdaterSettings::default())
        }
    }
}

/// Partial update from `POST /auto-updater/configure`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SettingsPatch {
    pub enabled: Option<bool>,
    pub check_interval_hours: Option<u64>,
    pub notify_on_update: Option<bool>,
    pub update_on_startup: Option<bool>,
    pub silent_updates: Option<bool>,
}

impl SettingsPatch {
    /// Decode and validate a JSON body. Wrong types, unknown fields and an
    /// interval under one hour are all `ConfigValidation`.
    pub fn from_json(value: serde_json::Value) -> ServiceResult<Self> {
        let patch: SettingsPatch = serde_json::from_value(value)
            .map_err(|e| ServiceError::ConfigValidation(e.to_string()))?;
        patch.validate()?;
        Ok(patch)
    }

    pub fn validate(&self) -> ServiceResult<()> {
        if let Some(hours) = self.check_interval_hours {
            if !(1..=MAX_CHECK_INTERVAL_SECS / 3600).contains(&hours) {
                return Err(ServiceError::ConfigValidation(format!(
                    "check_interval_hours must be an integer between 1 and {}",
                    MAX_CHECK_INTERVAL_SECS / 3600
                )));
            }
        }
        Ok(())
    }
}
