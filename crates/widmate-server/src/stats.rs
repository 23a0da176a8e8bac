//! Host resource snapshot for `GET /system/stats`.

use std::path::Path;
use std::sync::{Mutex, PoisonError};

use serde::Serialize;
use sysinfo::{Disks, System};

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DiskUsage {
    pub total: u64,
    pub used: u64,
    pub free: u64,
    pub percent: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HostSnapshot {
    pub cpu_percent: f32,
    pub memory_percent: f64,
    pub disk_usage: Option<DiskUsage>,
}

/// Keeps one `System` alive so CPU usage is measured between calls.
pub struct HostStats {
    system: Mutex<System>,
}

impl Default for HostStats {
    fn default() -> Self {
        Self::new()
    }
}

impl HostStats {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu_usage();
        Self {
            system: Mutex::new(system),
        }
    }

    /// Blocking; sysinfo reads procfs.
    pub fn snapshot(&self, download_dir: &Path) -> HostSnapshot {
        let (cpu_percent, memory_percent) = {
            let mut sys = self.system.lock().unwrap_or_else(PoisonError::into_inner);
            sys.refresh_cpu_usage();
            sys.refresh_memory();
            let total = sys.total_memory();
            let mem = if total == 0 {
                0.0
            } else {
                sys.used_memory() as f64 * 100.0 / total as f64
            };
            let cpu = sys.global_cpu_usage();
            (if cpu.is_finite() { cpu } else { 0.0 }, mem)
        };
        HostSnapshot {
            cpu_percent,
            memory_percent,
            disk_usage: disk_usage_for(download_dir),
        }
    }
}

/// Usage of the disk whose mount point is the longest prefix of `dir`.
fn disk_usage_for(dir: &Path) -> Option<DiskUsage> {
    let dir = dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf());
    let disks = Disks::new_with_refreshed_list();
    let disk = disks
        .iter()
        .filter(|d| dir.starts_with(d.mount_point()))
        .max_by_key(|d| d.mount_point().as_os_str().len())?;
    let total = disk.total_space();
    let free = disk.available_space();
    let used = total.saturating_sub(free);
    let percent = if total == 0 {
        0.0
    } else {
        used as f64 * 100.0 / total as f64
    };
    Some(DiskUsage {
        total,
        used,
        free,
        percent,
    })
}
