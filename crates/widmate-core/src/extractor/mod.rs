//! External media-extraction collaborator.
//!
//! [`Extractor`] is blocking: the runner and the HTTP layer call it from the
//! tokio blocking pool. [`YtDlp`] drives the `yt-dlp` executable.

mod parse;
mod ytdlp;

use std::path::Path;
use std::sync::atomic::AtomicBool;

use serde::Serialize;

use crate::error::ServiceResult;
use crate::jobs::{DownloadOptions, JobId};
use crate::progress::ProgressSink;

pub use parse::{
    parse_media_info, parse_progress_line, parse_search_results, OUTPUT_PREFIX, PROGRESS_PREFIX,
};
pub use ytdlp::YtDlp;

/// Playlist listings are truncated to this many entries.
pub const MAX_PLAYLIST_ENTRIES: usize = 50;

/// Upper bound for a search's result count.
pub const MAX_SEARCH_RESULTS: usize = 50;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FormatInfo {
    pub format_id: String,
    pub ext: String,
    /// `<width>x<height>`, `0` for unknown dimensions.
    pub resolution: String,
    pub fps: Option<f64>,
    pub filesize: Option<u64>,
    /// Format note such as `720p` or `DASH video`.
    pub quality: String,
    pub vcodec: String,
    pub acodec: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PlaylistEntry {
    /// 1-based position in the playlist.
    pub index: usize,
    pub id: String,
    pub title: String,
    pub duration: Option<f64>,
    pub thumbnail: Option<String>,
    pub url: String,
}

/// Metadata for a single media item or a playlist.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MediaInfo {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub duration: Option<f64>,
    pub thumbnail: Option<String>,
    pub uploader: Option<String>,
    pub upload_date: Option<String>,
    pub view_count: Option<u64>,
    pub formats: Vec<FormatInfo>,
    pub is_playlist: bool,
    pub playlist_count: Option<usize>,
    pub playlist_entries: Vec<PlaylistEntry>,
}

/// One hit of a site search.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SearchResult {
    pub id: String,
    pub title: String,
    pub description: String,
    pub duration: Option<f64>,
    pub thumbnail: Option<String>,
    pub uploader: String,
    pub upload_date: String,
    pub view_count: Option<u64>,
    pub url: String,
    pub webpage_url: String,
}

/// Everything the extractor needs to run one download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractRequest {
    pub url: String,
    pub format: String,
    pub output_template: String,
    pub playlist_items: Option<String>,
}

impl ExtractRequest {
    /// Build the request for job `id`; files land in
    /// `<download_dir>[/<sub>]/<id>_<title>.<ext>`.
    pub fn for_job(id: JobId, url: &str, download_dir: &Path, options: &DownloadOptions) -> Self {
        let dir = match options.output_path.as_deref() {
            Some(sub) => download_dir.join(sub),
            None => download_dir.to_path_buf(),
        };
        let template = dir.join(format!("{id}_%(title)s.%(ext)s"));
        Self {
            url: url.to_string(),
            format: options.format_selector(),
            output_template: template.to_string_lossy().into_owned(),
            playlist_items: options.playlist_items.clone(),
        }
    }
}

pub trait Extractor: Send + Sync {
    /// Fetch metadata without downloading. `playlist` lists entries flat.
    fn probe(&self, url: &str, playlist: bool) -> ServiceResult<MediaInfo>;

    /// Search for `query`, returning at most `limit` hits.
    fn search(&self, query: &str, limit: usize) -> ServiceResult<Vec<SearchResult>>;

    /// Run a download to completion, reporting through `sink`. Must return
    /// promptly once `abort` is set.
    fn download(
        &self,
        request: &ExtractRequest,
        sink: &dyn ProgressSink,
        abort: &AtomicBool,
    ) -> ServiceResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_uses_job_id_template_and_subdir() {
        let id = uuid::Uuid::new_v4();
        let opts = DownloadOptions {
            quality: Some("480p".into()),
            playlist_items: Some("1-3".into()),
            output_path: Some("music".into()),
            ..Default::default()
        };
        let req = ExtractRequest::for_job(id, "https://example.com/v", Path::new("/d"), &opts);
        assert_eq!(req.format, "best[height<=480]");
        assert_eq!(req.output_template, format!("/d/music/{id}_%(title)s.%(ext)s"));
        assert_eq!(req.playlist_items.as_deref(), Some("1-3"));
    }
}
