//! PyPI-backed package index and pip-based installer.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use serde::Deserialize;

use super::registry::{PackageIndex, Release, ToolInstaller};
use crate::error::{ServiceError, ServiceResult};
use crate::retry::{run_with_retry, FetchError, RetryPolicy};

/// Reads `<index_url>/<package>/json` and downloads source distributions.
#[derive(Debug, Clone)]
pub struct PypiIndex {
    index_url: String,
    package: String,
    retry: RetryPolicy,
}

impl PypiIndex {
    pub fn new(index_url: impl Into<String>, package: impl Into<String>, retry: RetryPolicy) -> Self {
        Self {
            index_url: index_url.into(),
            package: package.into(),
            retry,
        }
    }

    fn metadata_url(&self) -> String {
        format!("{}/{}/json", self.index_url.trim_end_matches('/'), self.package)
    }
}

/// GET `url` into memory. Runs in the current thread.
fn http_get(url: &str, timeout: Duration) -> Result<Vec<u8>, FetchError> {
    let mut body = Vec::new();
    let mut easy = curl::easy::Easy::new();
    easy.url(url)?;
    easy.follow_location(true)?;
    easy.useragent(concat!("widmate/", env!("CARGO_PKG_VERSION")))?;
    easy.connect_timeout(Duration::from_secs(15))?;
    easy.timeout(timeout)?;
    {
        let mut transfer = easy.transfer();
        transfer.write_function(|data| {
            body.extend_from_slice(data);
            Ok(data.len())
        })?;
        transfer.perform()?;
    }
    let code = easy.response_code()?;
    if !(200..300).contains(&code) {
        return Err(FetchError::Http(code));
    }
    Ok(body)
}

#[derive(Deserialize)]
struct PypiDocument {
    info: PypiInfo,
    #[serde(default)]
    releases: std::collections::HashMap<String, Vec<PypiFile>>,
    /// Files of the current version; present on both the project and version endpoints.
    #[serde(default)]
    urls: Vec<PypiFile>,
}

#[derive(Deserialize)]
struct PypiInfo {
    version: String,
}

#[derive(Deserialize)]
struct PypiFile {
    packagetype: String,
    url: String,
    #[serde(default)]
    digests: PypiDigests,
}

#[derive(Deserialize, Default)]
struct PypiDigests {
    sha256: Option<String>,
}

/// Pick the sdist of `info.version` from a PyPI JSON document.
pub fn parse_pypi_json(body: &[u8]) -> ServiceResult<Release> {
    let doc: PypiDocument = serde_json::from_slice(body)
        .map_err(|e| ServiceError::upstream(format!("unreadable package index response: {e}")))?;
    let version = doc.info.version;
    let files = doc
        .releases
        .get(&version)
        .filter(|files| !files.is_empty())
        .unwrap_or(&doc.urls);
    let sdist = files.iter().find(|f| f.packagetype == "sdist");
    Ok(Release {
        version,
        package_url: sdist.map(|f| f.url.clone()),
        sha256: sdist
            .and_then(|f| f.digests.sha256.clone())
            .map(|d| d.to_ascii_lowercase()),
    })
}

impl PackageIndex for PypiIndex {
    fn latest_release(&self) -> ServiceResult<Release> {
        let url = self.metadata_url();
        let body = run_with_retry(&self.retry, || http_get(&url, Duration::from_secs(30)))?;
        parse_pypi_json(&body)
    }

    fn fetch(&self, release: &Release, dest_dir: &Path) -> ServiceResult<PathBuf> {
        let package_url = release.package_url.as_deref().ok_or_else(|| {
            ServiceError::upstream(format!("no source package published for {}", release.version))
        })?;
        let parsed = url::Url::parse(package_url)
            .map_err(|e| ServiceError::upstream(format!("bad package URL {package_url}: {e}")))?;
        let file_name = parsed
            .path_segments()
            .and_then(|mut s| s.next_back())
            .filter(|n| !n.is_empty() && *n != "..")
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}-{}.tar.gz", self.package, release.version));
        let dest = dest_dir.join(file_name);

        run_with_retry(&self.retry, || {
            let body = http_get(package_url, Duration::from_secs(300))?;
            std::fs::write(&dest, body).map_err(FetchError::Io)
        })?;
        tracing::debug!(path = %dest.display(), "fetched update package");
        Ok(dest)
    }
}

/// Queries and installs the package with `<python> -m pip`.
#[derive(Debug, Clone)]
pub struct PipInstaller {
    python: String,
    package: String,
}

impl PipInstaller {
    pub fn new(python: impl Into<String>, package: impl Into<String>) -> Self {
        Self {
            python: python.into(),
            package: package.into(),
        }
    }

    fn pip(&self, args: &[&str]) -> ServiceResult<std::process::Output> {
        Command::new(&self.python)
            .args(["-m", "pip"])
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| ServiceError::upstream(format!("failed to run {} -m pip: {e}", self.python)))
    }
}

/// Extract `Version:` from `pip show` output.
pub fn parse_pip_show(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .find_map(|l| l.strip_prefix("Version:"))
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn stderr_tail(output: &std::process::Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let tail: Vec<&str> = stderr.lines().rev().take(5).collect();
    tail.into_iter().rev().collect::<Vec<_>>().join("\n")
}

impl ToolInstaller for PipInstaller {
    fn installed_version(&self) -> ServiceResult<String> {
        let output = self.pip(&["show", &self.package])?;
        if !output.status.success() {
            return Err(ServiceError::upstream(format!(
                "{} is not installed: {}",
                self.package,
                stderr_tail(&output)
            )));
        }
        parse_pip_show(&String::from_utf8_lossy(&output.stdout))
            .ok_or_else(|| ServiceError::upstream("pip show printed no version"))
    }

    fn install(&self, package: &Path) -> ServiceResult<()> {
        let path = package.to_string_lossy();
        let output = self.pip(&["install", "--upgrade", "--no-input", path.as_ref()])?;
        if !output.status.success() {
            return Err(ServiceError::upstream(format!(
                "pip install failed: {}",
                stderr_tail(&output)
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"{
        "info": {"version": "2025.01.15"},
        "releases": {
            "2024.12.23": [],
            "2025.01.15": [
                {"packagetype": "bdist_wheel", "url": "https://files.example/yt_dlp-2025.01.15-py3-none-any.whl",
                 "digests": {"sha256": "aaaa"}},
                {"packagetype": "sdist", "url": "https://files.example/yt_dlp-2025.01.15.tar.gz",
                 "digests": {"sha256": "ABCDEF"}}
            ]
        }
    }"#;

    #[test]
    fn picks_sdist_of_latest_version() {
        let r = parse_pypi_json(DOC.as_bytes()).unwrap();
        assert_eq!(r.version, "2025.01.15");
        assert_eq!(
            r.package_url.as_deref(),
            Some("https://files.example/yt_dlp-2025.01.15.tar.gz")
        );
        assert_eq!(r.sha256.as_deref(), Some("abcdef"));
    }

    #[test]
    fn missing_sdist_has_no_digest() {
        let doc = r#"{"info": {"version": "1.0"}, "releases": {"1.0": [
            {"packagetype": "bdist_wheel", "url": "https://x/a.whl", "digests": {"sha256": "aa"}}
        ]}}"#;
        let r = parse_pypi_json(doc.as_bytes()).unwrap();
        assert_eq!(r.version, "1.0");
        assert!(r.sha256.is_none());
        assert!(r.package_url.is_none());
    }

    #[test]
    fn malformed_document_is_upstream_failure() {
        assert!(matches!(
            parse_pypi_json(b"{}"),
            Err(ServiceError::UpstreamFailure(_))
        ));
    }

    #[test]
    fn pip_show_version_line() {
        let out = "Name: yt-dlp\nVersion: 2024.12.23\nSummary: x\n";
        assert_eq!(parse_pip_show(out).as_deref(), Some("2024.12.23"));
        assert_eq!(parse_pip_show("Name: yt-dlp\n"), None);
    }
}
