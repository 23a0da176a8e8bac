use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;

use super::*;
use crate::error::{ServiceError, ServiceResult};

#[derive(Default)]
struct FakeIndex {
    release: Mutex<Option<Release>>,
    /// Bytes written by `fetch`.
    payload: Vec<u8>,
    fetches: AtomicUsize,
}

impl PackageIndex for FakeIndex {
    fn latest_release(&self) -> ServiceResult<Release> {
        self.release
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| ServiceError::upstream("index unreachable"))
    }

    fn fetch(&self, release: &Release, dest_dir: &Path) -> ServiceResult<PathBuf> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let path = dest_dir.join(format!("yt-dlp-{}.tar.gz", release.version));
        std::fs::write(&path, &self.payload)?;
        Ok(path)
    }
}

struct FakeInstaller {
    version: Mutex<String>,
    installs: AtomicUsize,
}

impl FakeInstaller {
    fn at(version: &str) -> Self {
        Self {
            version: Mutex::new(version.to_string()),
            installs: AtomicUsize::new(0),
        }
    }
}

impl ToolInstaller for FakeInstaller {
    fn installed_version(&self) -> ServiceResult<String> {
        Ok(self.version.lock().unwrap().clone())
    }

    fn install(&self, package: &Path) -> ServiceResult<()> {
        self.installs.fetch_add(1, Ordering::SeqCst);
        let name = package.file_name().unwrap().to_string_lossy().to_string();
        let version = name
            .trim_start_matches("yt-dlp-")
            .trim_end_matches(".tar.gz")
            .to_string();
        *self.version.lock().unwrap() = version;
        Ok(())
    }
}

#[derive(Default)]
struct CountingNotifier {
    available: AtomicUsize,
    installed: AtomicUsize,
}

impl Notifier for CountingNotifier {
    fn update_available(&self, _current: &str, _latest: &str) {
        self.available.fetch_add(1, Ordering::SeqCst);
    }

    fn update_installed(&self, _version: &str) {
        self.installed.fetch_add(1, Ordering::SeqCst);
    }
}

const PAYLOAD: &[u8] = b"hello\n";
const PAYLOAD_SHA: &str = "5891b5b522d5df086d0ff0b110fbd9d21bb4fc7163af34d08286a2e846f6be03";

fn release(version: &str, sha: Option<&str>) -> Release {
    Release {
        version: version.to_string(),
        package_url: Some(format!("https://files.example/yt-dlp-{version}.tar.gz")),
        sha256: sha.map(str::to_string),
    }
}

struct Harness {
    index: Arc<FakeIndex>,
    installer: Arc<FakeInstaller>,
    notifier: Arc<CountingNotifier>,
    scheduler: UpdateScheduler,
    _dir: tempfile::TempDir,
    settings_path: PathBuf,
}

fn harness(settings: UpdaterSettings, installed: &str, latest: Option<Release>) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let settings_path = dir.path().join("auto_update.toml");
    let index = Arc::new(FakeIndex {
        release: Mutex::new(latest),
        payload: PAYLOAD.to_vec(),
        fetches: AtomicUsize::new(0),
    });
    let installer = Arc::new(FakeInstaller::at(installed));
    let notifier = Arc::new(CountingNotifier::default());
    let scheduler = UpdateScheduler::new(
        settings,
        Some(settings_path.clone()),
        index.clone(),
        installer.clone(),
        notifier.clone(),
        Duration::from_millis(50),
    );
    Harness {
        index,
        installer,
        notifier,
        scheduler,
        _dir: dir,
        settings_path,
    }
}

fn silent() -> UpdaterSettings {
    UpdaterSettings {
        silent: true,
        notify: true,
        ..Default::default()
    }
}

#[tokio::test]
async fn up_to_date_cycle_goes_idle_without_fetch() {
    let h = harness(silent(), "2025.01.15", Some(release("2025.01.15", Some(PAYLOAD_SHA))));
    h.scheduler.check_now().await;

    let status = h.scheduler.status();
    assert_eq!(status.update_status.status, UpdateStatus::Idle);
    assert_eq!(status.update_status.message, "yt-dlp is up to date (v2025.01.15)");
    // Only the running loop schedules checks.
    assert!(status.next_check.is_none());
    assert!(status.last_check.is_some());
    assert_eq!(h.index.fetches.load(Ordering::SeqCst), 0);
    assert_eq!(h.installer.installs.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn silent_update_installs_verified_package() {
    let h = harness(silent(), "2024.12.23", Some(release("2025.01.15", Some(PAYLOAD_SHA))));
    h.scheduler.check_now().await;

    let status = h.scheduler.status();
    assert_eq!(status.update_status.status, UpdateStatus::Completed);
    assert_eq!(status.update_status.progress, 1.0);
    assert!(status.update_status.last_update.is_some());
    assert_eq!(status.installed_version.as_deref(), Some("2025.01.15"));
    assert_eq!(h.notifier.installed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn checksum_mismatch_fails_without_install_and_next_cycle_runs() {
    let bad = "00".repeat(32);
    let h = harness(silent(), "2024.12.23", Some(release("2025.01.15", Some(&bad))));
    h.scheduler.check_now().await;

    let status = h.scheduler.status();
    assert_eq!(status.update_status.status, UpdateStatus::Failed);
    assert!(status.update_status.error.as_deref().unwrap().contains("checksum mismatch"));
    assert!(status.update_status.message.starts_with("Update failed:"));
    assert_eq!(h.installer.installs.load(Ordering::SeqCst), 0);

    // Fixed digest: the next cycle starts from scratch and succeeds.
    *h.index.release.lock().unwrap() = Some(release("2025.01.15", Some(PAYLOAD_SHA)));
    h.scheduler.check_now().await;
    let status = h.scheduler.status();
    assert_eq!(status.update_status.status, UpdateStatus::Completed);
    assert!(status.update_status.error.is_none());
    assert_eq!(h.installer.installs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn missing_digest_fails_update() {
    let h = harness(silent(), "2024.12.23", Some(release("2025.01.15", None)));
    h.scheduler.check_now().await;
    let status = h.scheduler.status();
    assert_eq!(status.update_status.status, UpdateStatus::Failed);
    assert_eq!(h.index.fetches.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn non_silent_flags_availability_and_notifies() {
    let settings = UpdaterSettings {
        notify: true,
        ..Default::default()
    };
    let h = harness(settings, "2024.12.23", Some(release("2025.01.15", Some(PAYLOAD_SHA))));
    h.scheduler.check_now().await;

    let status = h.scheduler.status();
    assert_eq!(status.update_status.status, UpdateStatus::Idle);
    assert_eq!(
        status.update_status.message,
        "Update available: 2024.12.23 -> 2025.01.15"
    );
    assert_eq!(status.latest_version.as_deref(), Some("2025.01.15"));
    assert_eq!(h.notifier.available.load(Ordering::SeqCst), 1);
    assert_eq!(h.installer.installs.load(Ordering::SeqCst), 0);

    // Manual trigger installs it.
    h.scheduler.update_now().await;
    assert_eq!(h.scheduler.status().update_status.status, UpdateStatus::Completed);
}

#[tokio::test]
async fn disabled_updates_only_report() {
    let settings = UpdaterSettings {
        enabled: false,
        silent: true,
        ..Default::default()
    };
    let h = harness(settings, "1.0", Some(release("2.0", Some(PAYLOAD_SHA))));
    h.scheduler.check_now().await;
    let status = h.scheduler.status();
    assert_eq!(status.update_status.status, UpdateStatus::Idle);
    assert!(status.update_status.message.contains("auto-update disabled"));
    assert_eq!(h.index.fetches.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn force_update_when_current_does_not_download() {
    let h = harness(UpdaterSettings::default(), "2.0", Some(release("2.0", Some(PAYLOAD_SHA))));
    h.scheduler.update_now().await;
    let status = h.scheduler.status();
    assert_eq!(status.update_status.status, UpdateStatus::Idle);
    assert!(status.update_status.message.contains("up to date"));
    assert_eq!(h.index.fetches.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn lookup_failure_is_not_fatal() {
    let h = harness(silent(), "1.0", None);
    h.scheduler.check_now().await;
    let status = h.scheduler.status();
    assert_eq!(status.update_status.status, UpdateStatus::Idle);
    assert_eq!(status.update_status.message, LOOKUP_FAILED_MESSAGE);
    assert_eq!(status.installed_version.as_deref(), Some("1.0"));
}

#[tokio::test]
async fn version_lookup_reports_without_installing() {
    let h = harness(silent(), "1.0", Some(release("2.0", Some(PAYLOAD_SHA))));
    let before = h.scheduler.version_info();
    assert_eq!(before.current_version, UNKNOWN_VERSION);
    assert!(!before.update_available);

    let info = h.scheduler.lookup_versions(false).await;
    assert_eq!(info.current_version, "1.0");
    assert_eq!(info.latest_version, "2.0");
    assert!(info.update_available);
    assert_eq!(info.update_status, UpdateStatus::Idle);
    assert_eq!(h.index.fetches.load(Ordering::SeqCst), 0);
    assert_eq!(h.installer.installs.load(Ordering::SeqCst), 0);

    // A fresh lookup is served from state until forced.
    *h.index.release.lock().unwrap() = Some(release("3.0", None));
    assert_eq!(h.scheduler.lookup_versions(false).await.latest_version, "2.0");
    assert_eq!(h.scheduler.lookup_versions(true).await.latest_version, "3.0");

    // Lookup failure keeps the last known release.
    *h.index.release.lock().unwrap() = None;
    assert_eq!(h.scheduler.lookup_versions(true).await.latest_version, "3.0");
}

#[tokio::test]
async fn configure_validates_and_persists() {
    let h = harness(UpdaterSettings::default(), "1.0", None);

    let zero = SettingsPatch::from_json(json!({"check_interval_hours": 0}));
    assert!(matches!(zero, Err(ServiceError::ConfigValidation(_))));

    let patch = SettingsPatch::from_json(json!({"check_interval_hours": 2, "notify_on_update": true}))
        .unwrap();
    h.scheduler.configure(&patch).unwrap();

    let status = h.scheduler.status();
    assert_eq!(status.check_interval_hours, 2.0);
    assert!(status.notify_on_update);

    let persisted = settings::load_or_init_at(&h.settings_path).unwrap();
    assert_eq!(persisted.check_interval, 7200);
    assert!(persisted.notify);
}

#[tokio::test]
async fn trigger_while_cycle_runs_reports_in_progress() {
    let h = harness(UpdaterSettings::default(), "1.0", Some(release("1.0", None)));
    let guard = h.scheduler_lock_for_test().await;
    assert_eq!(h.scheduler.force_check(), TriggerOutcome::AlreadyInProgress);
    assert_eq!(h.scheduler.force_update(), TriggerOutcome::AlreadyInProgress);
    drop(guard);
    assert_eq!(h.scheduler.force_check(), TriggerOutcome::Started);
}

#[tokio::test]
async fn loop_runs_startup_check_and_stops() {
    let h = harness(UpdaterSettings::default(), "3.0", Some(release("3.0", None)));
    h.scheduler.start();
    h.scheduler.start();
    assert!(h.scheduler.is_running());

    let mut checked = false;
    for _ in 0..200 {
        if h.scheduler.status().update_status.message.contains("up to date") {
            checked = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(checked, "startup check never ran");

    // Reconfigure wakes the loop without breaking it.
    let patch = SettingsPatch::from_json(json!({"check_interval_hours": 3})).unwrap();
    h.scheduler.configure(&patch).unwrap();

    tokio::time::timeout(Duration::from_secs(5), h.scheduler.stop())
        .await
        .expect("stop hung");
    assert!(!h.scheduler.is_running());
    assert!(!h.scheduler.status().is_running);
}

#[tokio::test]
async fn manual_check_keeps_loop_schedule() {
    let settings = UpdaterSettings {
        update_on_startup: false,
        ..Default::default()
    };
    let h = harness(settings, "1.0", Some(release("1.0", None)));
    h.scheduler.start();
    let scheduled = h.scheduler.status().next_check.expect("loop publishes next check");

    h.scheduler.check_now().await;
    assert_eq!(h.scheduler.force_check(), TriggerOutcome::Started);
    h.scheduler.check_now().await;

    let status = h.scheduler.status();
    assert!(status.update_status.message.contains("up to date"));
    assert_eq!(status.next_check, Some(scheduled));
    h.scheduler.stop().await;
}

#[tokio::test(start_paused = true)]
async fn failed_update_is_retried_by_next_scheduled_cycle() {
    let bad = "00".repeat(32);
    let h = harness(silent(), "2024.12.23", Some(release("2025.01.15", Some(&bad))));
    h.scheduler.start();
    assert!(h.wait_for(|s| s.update_status.status == UpdateStatus::Failed).await);
    assert_eq!(h.installer.installs.load(Ordering::SeqCst), 0);

    *h.index.release.lock().unwrap() = Some(release("2025.01.15", Some(PAYLOAD_SHA)));
    tokio::time::advance(h.scheduler.settings().check_interval()).await;

    assert!(h.wait_for(|s| s.update_status.status == UpdateStatus::Completed).await);
    let status = h.scheduler.status();
    assert!(status.update_status.error.is_none());
    assert_eq!(status.installed_version.as_deref(), Some("2025.01.15"));
    assert_eq!(h.installer.installs.load(Ordering::SeqCst), 1);
    h.scheduler.stop().await;
}

#[tokio::test(start_paused = true)]
async fn lookup_failure_retries_after_backoff() {
    let h = harness(silent(), "1.0", None);
    h.scheduler.start();
    assert!(h.wait_for(|s| s.update_status.message == LOOKUP_FAILED_MESSAGE).await);

    // Reconfiguring while the retry is pending keeps the short backoff.
    let patch = SettingsPatch::from_json(json!({"check_interval_hours": 2})).unwrap();
    h.scheduler.configure(&patch).unwrap();
    tokio::task::yield_now().await;
    let next = h.scheduler.status().next_check.unwrap();
    assert!(next < chrono::Utc::now() + chrono::Duration::minutes(1));

    *h.index.release.lock().unwrap() = Some(release("1.0", None));
    assert!(h.wait_for(|s| s.update_status.message.contains("up to date")).await);
    assert!(h.wait_for(|s| s.next_check.is_some_and(|n| n > chrono::Utc::now() + chrono::Duration::minutes(90))).await);
    h.scheduler.stop().await;
}

/// Index whose lookup blocks well past any reasonable stop deadline.
struct StalledIndex;

impl PackageIndex for StalledIndex {
    fn latest_release(&self) -> ServiceResult<Release> {
        std::thread::sleep(Duration::from_secs(3));
        Err(ServiceError::upstream("index timed out"))
    }

    fn fetch(&self, _release: &Release, _dest_dir: &Path) -> ServiceResult<PathBuf> {
        Err(ServiceError::upstream("unused"))
    }
}

#[tokio::test]
async fn stop_does_not_wait_for_running_cycle() {
    let scheduler = UpdateScheduler::new(
        UpdaterSettings::default(),
        None,
        Arc::new(StalledIndex),
        Arc::new(FakeInstaller::at("1.0")),
        Arc::new(CountingNotifier::default()),
        Duration::from_millis(50),
    );
    scheduler.start();
    for _ in 0..200 {
        if scheduler.status().update_status.status == UpdateStatus::Checking {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(scheduler.status().update_status.status, UpdateStatus::Checking);

    tokio::time::timeout(Duration::from_secs(1), scheduler.stop())
        .await
        .expect("stop waited for the cycle");
    let status = scheduler.status();
    assert!(!status.is_running);
    assert_eq!(status.update_status.status, UpdateStatus::Idle);
    assert_eq!(status.update_status.message, state::INTERRUPTED_MESSAGE);
}

impl Harness {
    /// Poll the status until `pred` holds; time auto-advances when paused.
    async fn wait_for(&self, pred: impl Fn(&UpdaterSnapshot) -> bool) -> bool {
        for _ in 0..500 {
            if pred(&self.scheduler.status()) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    async fn scheduler_lock_for_test(&self) -> tokio::sync::OwnedMutexGuard<()> {
        self.scheduler.cycle_lock_for_test().await
    }
}
