use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Retry policy for package-index requests (optional section in config.toml).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts per request (including the first).
    pub max_attempts: u32,
    /// Base delay in seconds for exponential backoff (e.g. 0.25 = 250ms).
    pub base_delay_secs: f64,
    /// Maximum backoff delay in seconds.
    pub max_delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay_secs: 0.5,
            max_delay_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractorConfig {
    /// yt-dlp executable, looked up on PATH unless absolute.
    pub binary: String,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            binary: "yt-dlp".to_string(),
        }
    }
}

/// Where the self-updater looks for and installs new yt-dlp releases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdaterConfig {
    pub python: String,
    pub package: String,
    pub index_url: String,
    /// Delay before retrying after a cycle could not run at all.
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_secs: u64,
}

fn default_retry_backoff() -> u64 {
    300
}

fn default_search_limit() -> u32 {
    60
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            python: "python3".to_string(),
            package: "yt-dlp".to_string(),
            index_url: "https://pypi.org/pypi".to_string(),
            retry_backoff_secs: default_retry_backoff(),
        }
    }
}

/// Requests per client per minute, by endpoint class.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub info: u32,
    pub download: u32,
    pub status: u32,
    pub configure: u32,
    pub check: u32,
    pub update: u32,
    #[serde(default = "default_search_limit")]
    pub search: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            info: 30,
            download: 10,
            status: 120,
            configure: 5,
            check: 3,
            update: 2,
            search: default_search_limit(),
        }
    }
}

/// Service configuration loaded from `~/.config/widmate/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub server: ServerConfig,
    /// Download directory; defaults to `~/.local/share/widmate/downloads`.
    #[serde(default)]
    pub download_dir: Option<PathBuf>,
    /// Upper bound on extractions running at once.
    pub max_concurrent_jobs: usize,
    #[serde(default)]
    pub extractor: ExtractorConfig,
    #[serde(default)]
    pub updater: UpdaterConfig,
    #[serde(default)]
    pub rate_limits: RateLimitConfig,
    /// Optional retry policy; if missing, built-in defaults are used.
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            download_dir: None,
            max_concurrent_jobs: 4,
            extractor: ExtractorConfig::default(),
            updater: UpdaterConfig::default(),
            rate_limits: RateLimitConfig::default(),
            retry: None,
        }
    }
}

impl ServiceConfig {
    /// Configured download directory, or the XDG data default.
    pub fn resolve_download_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.download_dir {
            return Ok(dir.clone());
        }
        let xdg_dirs = xdg::BaseDirectories::with_prefix("widmate")?;
        Ok(xdg_dirs.get_data_home().join("downloads"))
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("widmate")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<ServiceConfig> {
    load_or_init_at(&config_path()?)
}

pub fn load_or_init_at(path: &Path) -> Result<ServiceConfig> {
    if !path.exists() {
        let default_cfg = ServiceConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml).with_context(|| format!("write {}", path.display()))?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: ServiceConfig =
        toml::from_str(&data).with_context(|| format!("parse {}", path.display()))?;
    Ok(cfg)
}
