//! Long-lived update scheduler task.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::Result;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::cycle::{run_check_cycle, run_version_lookup, CycleOutcome};
use super::pypi::{PipInstaller, PypiIndex};
use super::registry::{LogNotifier, Notifier, PackageIndex, ToolInstaller};
use super::settings::{self, SettingsPatch, UpdaterSettings, MAX_CHECK_INTERVAL_SECS};
use super::state::{UpdateState, UpdaterSnapshot, VersionInfo};
use crate::config::UpdaterConfig;
use crate::error::{ServiceError, ServiceResult};
use crate::retry::RetryPolicy;

/// A version lookup younger than this is served from state unless forced.
pub const VERSION_LOOKUP_MAX_AGE: Duration = Duration::from_secs(30 * 60);

/// Result of a manual trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    Started,
    AlreadyInProgress,
}

pub(crate) struct Inner {
    settings: Mutex<UpdaterSettings>,
    settings_path: Option<PathBuf>,
    state: Mutex<UpdateState>,
    /// Serializes cycles; `try_lock` failure means one is in progress.
    cycle_lock: Arc<tokio::sync::Mutex<()>>,
    wake: Notify,
    retry_backoff: Duration,
    pub(crate) index: Arc<dyn PackageIndex>,
    pub(crate) installer: Arc<dyn ToolInstaller>,
    pub(crate) notifier: Arc<dyn Notifier>,
}

impl Inner {
    pub(crate) fn settings(&self) -> UpdaterSettings {
        self.settings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn state(&self) -> MutexGuard<'_, UpdateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&mut UpdateState) -> R) -> R {
        f(&mut self.state())
    }
}

struct LoopHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Periodically checks for yt-dlp releases and applies them per settings.
///
/// Owns its own status state; never touches the job store.
pub struct UpdateScheduler {
    inner: Arc<Inner>,
    running: Mutex<Option<LoopHandle>>,
}

impl UpdateScheduler {
    pub fn new(
        settings: UpdaterSettings,
        settings_path: Option<PathBuf>,
        index: Arc<dyn PackageIndex>,
        installer: Arc<dyn ToolInstaller>,
        notifier: Arc<dyn Notifier>,
        retry_backoff: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                settings: Mutex::new(settings),
                settings_path,
                state: Mutex::new(UpdateState::default()),
                cycle_lock: Arc::new(tokio::sync::Mutex::new(())),
                wake: Notify::new(),
                retry_backoff: retry_backoff.min(Duration::from_secs(MAX_CHECK_INTERVAL_SECS)),
                index,
                installer,
                notifier,
            }),
            running: Mutex::new(None),
        }
    }

    /// PyPI + pip scheduler with settings from `~/.config/widmate/auto_update.toml`.
    pub fn from_config(cfg: &UpdaterConfig, retry: RetryPolicy) -> Result<Self> {
        let path = settings::settings_path()?;
        let loaded = settings::load_or_init_at(&path)?;
        Ok(Self::new(
            loaded,
            Some(path),
            Arc::new(PypiIndex::new(&cfg.index_url, &cfg.package, retry)),
            Arc::new(PipInstaller::new(&cfg.python, &cfg.package)),
            Arc::new(LogNotifier),
            Duration::from_secs(cfg.retry_backoff_secs),
        ))
    }

    fn handle(&self) -> MutexGuard<'_, Option<LoopHandle>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_running(&self) -> bool {
        self.handle().is_some()
    }

    /// Spawn the background loop. A second call while running is a no-op.
    pub fn start(&self) {
        let mut handle = self.handle();
        if handle.is_some() {
            tracing::warn!("update scheduler already running");
            return;
        }
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(run_loop(self.inner.clone(), rx));
        *handle = Some(LoopHandle { shutdown: tx, task });
        tracing::info!("update scheduler started");
    }

    /// Stop the loop and wait for it to exit.
    pub async fn stop(&self) {
        let Some(LoopHandle { shutdown, task }) = self.handle().take() else {
            return;
        };
        let _ = shutdown.send(true);
        if let Err(e) = task.await {
            tracing::warn!(error = %e, "update scheduler task ended abnormally");
        }
        tracing::info!("update scheduler stopped");
    }

    fn trigger(&self, force_install: bool) -> TriggerOutcome {
        let Ok(guard) = self.inner.cycle_lock.clone().try_lock_owned() else {
            return TriggerOutcome::AlreadyInProgress;
        };
        let inner = self.inner.clone();
        tokio::spawn(async move {
            let _guard = guard;
            run_check_cycle(&inner, force_install).await;
        });
        TriggerOutcome::Started
    }

    /// Start a check cycle in the background.
    pub fn force_check(&self) -> TriggerOutcome {
        self.trigger(false)
    }

    /// Start a cycle that installs an available update regardless of settings.
    pub fn force_update(&self) -> TriggerOutcome {
        self.trigger(true)
    }

    /// Run a check cycle to completion, waiting for any cycle in progress.
    pub async fn check_now(&self) {
        let _guard = self.inner.cycle_lock.lock().await;
        run_check_cycle(&self.inner, false).await;
    }

    /// Run a forced update cycle to completion.
    pub async fn update_now(&self) {
        let _guard = self.inner.cycle_lock.lock().await;
        run_check_cycle(&self.inner, true).await;
    }

    /// Validate, apply and persist a settings patch, then let the loop
    /// recompute its next due time.
    pub fn configure(&self, patch: &SettingsPatch) -> ServiceResult<UpdaterSettings> {
        patch.validate()?;
        let mut next = self.inner.settings();
        next.apply(patch);
        next.validate()?;
        if let Some(path) = &self.inner.settings_path {
            next.save_at(path)
                .map_err(|e| ServiceError::Internal(format!("save updater settings: {e:#}")))?;
        }
        *self
            .inner
            .settings
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = next.clone();
        self.inner.wake.notify_one();
        tracing::info!(settings = ?next, "updater reconfigured");
        Ok(next)
    }

    pub fn settings(&self) -> UpdaterSettings {
        self.inner.settings()
    }

    #[cfg(test)]
    pub(crate) async fn cycle_lock_for_test(&self) -> tokio::sync::OwnedMutexGuard<()> {
        self.inner.cycle_lock.clone().lock_owned().await
    }

    /// Refresh installed/latest versions when stale or `force`d, without
    /// installing anything. A cycle in progress is not waited for.
    pub async fn lookup_versions(&self, force: bool) -> VersionInfo {
        let max_age = chrono::Duration::seconds(VERSION_LOOKUP_MAX_AGE.as_secs() as i64);
        let fresh = self
            .inner
            .with_state(|s| s.last_check)
            .is_some_and(|at| chrono::Utc::now() - at < max_age);
        if force || !fresh {
            match self.inner.cycle_lock.clone().try_lock_owned() {
                Ok(_guard) => run_version_lookup(&self.inner).await,
                Err(_) => tracing::debug!("update cycle running; serving current versions"),
            }
        }
        self.version_info()
    }

    pub fn version_info(&self) -> VersionInfo {
        self.inner.with_state(|s| VersionInfo::new(s))
    }

    pub fn status(&self) -> UpdaterSnapshot {
        let settings = self.inner.settings();
        let running = self.is_running();
        self.inner
            .with_state(|s| UpdaterSnapshot::new(running, &settings, s))
    }
}

/// Publish a loop deadline as wall-clock `next_check`.
fn publish_next_check(inner: &Inner, due: Instant) {
    let remaining = due.saturating_duration_since(Instant::now());
    let wall = chrono::Utc::now()
        + chrono::Duration::from_std(remaining).unwrap_or(chrono::Duration::zero());
    inner.with_state(|s| s.next_check = Some(wall));
}

/// Resolves once `stop` has been requested or the handle is gone.
async fn stop_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

async fn run_loop(inner: Arc<Inner>, mut shutdown: watch::Receiver<bool>) {
    let started = Instant::now();
    let mut last_run: Option<Instant> = None;
    // Set while the short retry backoff is pending; reconfiguring keeps it.
    let mut retry_pending = false;
    let mut next_due = if inner.settings().update_on_startup {
        started
    } else {
        started + inner.settings().check_interval()
    };
    publish_next_check(&inner, next_due);

    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(next_due) => {
                let ran_at = Instant::now();
                let cycle = async {
                    let _guard = inner.cycle_lock.lock().await;
                    run_check_cycle(&inner, false).await
                };
                let outcome = tokio::select! {
                    biased;
                    _ = stop_requested(&mut shutdown) => {
                        inner.with_state(|s| s.interrupt());
                        tracing::info!("update cycle abandoned on shutdown");
                        break;
                    }
                    outcome = cycle => outcome,
                };
                last_run = Some(ran_at);
                retry_pending = outcome == CycleOutcome::RetrySoon;
                next_due = match outcome {
                    CycleOutcome::Done => ran_at + inner.settings().check_interval(),
                    CycleOutcome::RetrySoon => Instant::now() + inner.retry_backoff,
                };
                publish_next_check(&inner, next_due);
            }
            _ = inner.wake.notified() => {
                // A pending startup check or retry stays pending.
                if !retry_pending && (last_run.is_some() || next_due > started) {
                    next_due = last_run.unwrap_or(started) + inner.settings().check_interval();
                    publish_next_check(&inner, next_due);
                }
                tracing::debug!("update scheduler rescheduled");
            }
            _ = stop_requested(&mut shutdown) => break,
        }
    }
}
