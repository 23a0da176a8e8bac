//! `yt-dlp` process driver.

use std::io::{BufRead, BufReader, Read};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use super::parse::{
    parse_media_info, parse_progress_line, parse_search_results, OUTPUT_PREFIX, PROGRESS_TEMPLATE,
};
use super::{ExtractRequest, Extractor, MediaInfo, SearchResult, MAX_SEARCH_RESULTS};
use crate::error::{ServiceError, ServiceResult};
use crate::progress::{ProgressEvent, ProgressSink};

/// How often the output loop wakes to check the abort token.
const ABORT_POLL: Duration = Duration::from_millis(250);

enum Line {
    Out(String),
    Err(String),
}

/// Runs the `yt-dlp` executable.
#[derive(Debug, Clone)]
pub struct YtDlp {
    binary: String,
}

impl YtDlp {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn download_args(request: &ExtractRequest) -> Vec<String> {
        let mut args: Vec<String> = [
            "--newline",
            "--progress",
            "--no-colors",
            "--no-simulate",
            "--progress-template",
            PROGRESS_TEMPLATE,
            "--print",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        args.push(format!("after_move:{OUTPUT_PREFIX}%(filepath)s"));
        args.extend(["-f".to_string(), request.format.clone()]);
        args.extend(["-o".to_string(), request.output_template.clone()]);
        if let Some(items) = &request.playlist_items {
            args.extend(["--playlist-items".to_string(), items.clone()]);
        }
        args.push("--write-info-json".to_string());
        args.push("--".to_string());
        args.push(request.url.clone());
        args
    }

    fn search_args(query: &str, limit: usize) -> Vec<String> {
        let limit = limit.clamp(1, MAX_SEARCH_RESULTS);
        vec![
            "-J".to_string(),
            "--flat-playlist".to_string(),
            "--no-warnings".to_string(),
            "--".to_string(),
            format!("ytsearch{limit}:{}", query.trim()),
        ]
    }

    /// Run a metadata-only invocation and return its stdout.
    fn run_json(&self, args: &[String]) -> ServiceResult<String> {
        let output = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| ServiceError::upstream(format!("failed to start {}: {e}", self.binary)))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let msg = stderr
                .lines()
                .filter_map(error_line)
                .last()
                .unwrap_or_else(|| format!("yt-dlp exited with {}", output.status));
            return Err(ServiceError::upstream(msg));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn spawn(&self, args: &[String]) -> ServiceResult<Child> {
        Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ServiceError::upstream(format!("failed to start {}: {e}", self.binary)))
    }
}

impl Default for YtDlp {
    fn default() -> Self {
        Self::new("yt-dlp")
    }
}

fn forward_lines<R, F>(reader: R, tx: mpsc::Sender<Line>, wrap: F) -> thread::JoinHandle<()>
where
    R: Read + Send + 'static,
    F: Fn(String) -> Line + Send + 'static,
{
    thread::spawn(move || {
        for line in BufReader::new(reader).lines() {
            let Ok(line) = line else { break };
            if tx.send(wrap(line)).is_err() {
                break;
            }
        }
    })
}

fn error_line(line: &str) -> Option<String> {
    line.trim()
        .strip_prefix("ERROR:")
        .map(|m| m.trim().to_string())
        .filter(|m| !m.is_empty())
}

impl Extractor for YtDlp {
    fn probe(&self, url: &str, playlist: bool) -> ServiceResult<MediaInfo> {
        let mut args = vec!["-J".to_string(), "--no-warnings".to_string()];
        if playlist {
            args.push("--flat-playlist".to_string());
        }
        args.push("--".to_string());
        args.push(url.to_string());
        parse_media_info(&self.run_json(&args)?)
    }

    fn search(&self, query: &str, limit: usize) -> ServiceResult<Vec<SearchResult>> {
        let json = self.run_json(&Self::search_args(query, limit))?;
        let mut results = parse_search_results(&json)?;
        results.truncate(limit);
        Ok(results)
    }

    fn download(
        &self,
        request: &ExtractRequest,
        sink: &dyn ProgressSink,
        abort: &AtomicBool,
    ) -> ServiceResult<()> {
        if abort.load(Ordering::Relaxed) {
            return Err(ServiceError::upstream("download cancelled"));
        }
        let mut child = self.spawn(&Self::download_args(request))?;
        tracing::debug!(url = %request.url, format = %request.format, "yt-dlp started");

        let (tx, rx) = mpsc::channel();
        let mut readers = Vec::new();
        if let Some(out) = child.stdout.take() {
            readers.push(forward_lines(out, tx.clone(), Line::Out));
        }
        if let Some(err) = child.stderr.take() {
            readers.push(forward_lines(err, tx.clone(), Line::Err));
        }
        drop(tx);

        let mut final_path = None;
        let mut last_error = None;
        loop {
            if abort.load(Ordering::Relaxed) {
                let _ = child.kill();
                let _ = child.wait();
                tracing::info!(url = %request.url, "yt-dlp killed on cancel");
                return Err(ServiceError::upstream("download cancelled"));
            }
            match rx.recv_timeout(ABORT_POLL) {
                Ok(Line::Out(line)) => {
                    if let Some(event) = parse_progress_line(&line) {
                        sink.report(event);
                    } else if let Some(path) = line.trim().strip_prefix(OUTPUT_PREFIX) {
                        final_path = Some(path.trim().to_string());
                    }
                }
                Ok(Line::Err(line)) => {
                    if let Some(msg) = error_line(&line) {
                        last_error = Some(msg);
                    }
                    tracing::debug!(target: "widmate::ytdlp", "{}", line);
                }
                Err(mpsc::RecvTimeoutError::Timeout) => continue,
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }
        for reader in readers {
            let _ = reader.join();
        }

        let status = child.wait()?;
        if !status.success() {
            let msg = last_error.unwrap_or_else(|| format!("yt-dlp exited with {status}"));
            sink.report(ProgressEvent::error(msg.clone()));
            return Err(ServiceError::upstream(msg));
        }
        sink.report(ProgressEvent::finished(final_path));
        Ok(())
    }
}
