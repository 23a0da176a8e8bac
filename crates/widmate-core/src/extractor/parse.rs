//! Parsers for yt-dlp output: templated progress lines and `-J` metadata.

use serde::Deserialize;

use super::{FormatInfo, MediaInfo, PlaylistEntry, SearchResult, MAX_PLAYLIST_ENTRIES};
use crate::error::{ServiceError, ServiceResult};
use crate::progress::ProgressEvent;

/// Marker for lines produced by our `--progress-template`.
pub const PROGRESS_PREFIX: &str = "widmate-progress:";
/// Marker for the `--print after_move:` line carrying the final file path.
pub const OUTPUT_PREFIX: &str = "widmate-output:";

/// Template fields, `|`-separated, matching [`parse_progress_line`].
pub(crate) const PROGRESS_TEMPLATE: &str = "download:widmate-progress:%(progress.status)s|%(progress.downloaded_bytes)s|%(progress.total_bytes)s|%(progress.total_bytes_estimate)s|%(progress._percent_str)s|%(progress._speed_str)s|%(progress._eta_str)s";

fn field(s: &str) -> Option<&str> {
    let s = s.trim();
    if s.is_empty() || s == "NA" || s.eq_ignore_ascii_case("unknown") || s == "None" {
        None
    } else {
        Some(s)
    }
}

fn number(s: &str) -> Option<u64> {
    let s = field(s)?;
    s.parse::<u64>()
        .ok()
        .or_else(|| s.parse::<f64>().ok().filter(|f| *f >= 0.0).map(|f| f as u64))
}

/// Parse one progress line. Per-file `finished` lines are reported as
/// downloading at 100%; the job only completes when the process exits.
pub fn parse_progress_line(line: &str) -> Option<ProgressEvent> {
    let rest = line.trim().strip_prefix(PROGRESS_PREFIX)?;
    let parts: Vec<&str> = rest.split('|').collect();
    if parts.len() < 7 {
        return None;
    }
    let status = parts[0].trim();
    let mut event = ProgressEvent::downloading();
    event.downloaded_bytes = number(parts[1]);
    event.total_bytes = number(parts[2]).or_else(|| number(parts[3]));
    event.percent = field(parts[4])
        .and_then(|p| p.trim_end_matches('%').trim().parse::<f64>().ok());
    event.speed = field(parts[5]).map(str::to_string);
    event.eta = field(parts[6]).map(str::to_string);
    match status {
        "downloading" => Some(event),
        "finished" => {
            event.percent = Some(100.0);
            event.eta = None;
            Some(event)
        }
        _ => None,
    }
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawFormat {
    format_id: Option<String>,
    ext: Option<String>,
    width: Option<u64>,
    height: Option<u64>,
    fps: Option<f64>,
    filesize: Option<f64>,
    format_note: Option<String>,
    vcodec: Option<String>,
    acodec: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawEntry {
    id: Option<String>,
    title: Option<String>,
    description: Option<String>,
    duration: Option<f64>,
    thumbnail: Option<String>,
    /// Flat listings carry a `thumbnails` array instead.
    thumbnails: Option<Vec<RawThumbnail>>,
    uploader: Option<String>,
    channel: Option<String>,
    upload_date: Option<String>,
    view_count: Option<u64>,
    url: Option<String>,
    webpage_url: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawThumbnail {
    url: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawInfo {
    id: Option<String>,
    title: Option<String>,
    description: Option<String>,
    duration: Option<f64>,
    thumbnail: Option<String>,
    uploader: Option<String>,
    upload_date: Option<String>,
    view_count: Option<u64>,
    formats: Option<Vec<RawFormat>>,
    entries: Option<Vec<Option<RawEntry>>>,
}

/// Parse the JSON document printed by `yt-dlp -J`.
pub fn parse_media_info(json: &str) -> ServiceResult<MediaInfo> {
    let raw: RawInfo = serde_json::from_str(json)
        .map_err(|e| ServiceError::upstream(format!("unreadable metadata from yt-dlp: {e}")))?;

    let mut info = MediaInfo {
        id: raw.id.unwrap_or_default(),
        title: String::new(),
        description: raw.description,
        duration: raw.duration,
        thumbnail: raw.thumbnail,
        uploader: raw.uploader,
        upload_date: raw.upload_date,
        view_count: raw.view_count,
        ..MediaInfo::default()
    };

    if let Some(entries) = raw.entries {
        info.title = raw.title.unwrap_or_else(|| "Unknown Playlist".to_string());
        info.duration = None;
        info.is_playlist = true;
        info.playlist_entries = entries
            .into_iter()
            .take(MAX_PLAYLIST_ENTRIES)
            .enumerate()
            .filter_map(|(i, e)| e.map(|e| (i, e)))
            .map(|(i, e)| PlaylistEntry {
                index: i + 1,
                id: e.id.unwrap_or_default(),
                title: e.title.unwrap_or_else(|| "Unknown".to_string()),
                duration: e.duration,
                thumbnail: e.thumbnail,
                url: e.webpage_url.or(e.url).unwrap_or_default(),
            })
            .collect();
        info.playlist_count = Some(info.playlist_entries.len());
        return Ok(info);
    }

    info.title = raw.title.unwrap_or_else(|| "Unknown".to_string());
    info.formats = raw
        .formats
        .unwrap_or_default()
        .into_iter()
        .filter(|f| f.vcodec.as_deref() != Some("none"))
        .map(|f| FormatInfo {
            format_id: f.format_id.unwrap_or_default(),
            ext: f.ext.unwrap_or_default(),
            resolution: format!("{}x{}", f.width.unwrap_or(0), f.height.unwrap_or(0)),
            fps: f.fps,
            filesize: f.filesize.filter(|n| *n >= 0.0).map(|n| n as u64),
            quality: f.format_note.unwrap_or_default(),
            vcodec: f.vcodec.unwrap_or_default(),
            acodec: f.acodec.unwrap_or_default(),
        })
        .collect();
    Ok(info)
}

/// Parse the flat listing printed by `yt-dlp -J --flat-playlist ytsearchN:...`.
pub fn parse_search_results(json: &str) -> ServiceResult<Vec<SearchResult>> {
    let raw: RawInfo = serde_json::from_str(json)
        .map_err(|e| ServiceError::upstream(format!("unreadable search results from yt-dlp: {e}")))?;
    let results = raw
        .entries
        .unwrap_or_default()
        .into_iter()
        .flatten()
        .map(|e| {
            let url = e.url.unwrap_or_default();
            SearchResult {
                id: e.id.unwrap_or_default(),
                title: e.title.unwrap_or_else(|| "Unknown".to_string()),
                description: e.description.unwrap_or_default(),
                duration: e.duration,
                thumbnail: e.thumbnail.or_else(|| {
                    e.thumbnails
                        .unwrap_or_default()
                        .into_iter()
                        .filter_map(|t| t.url)
                        .last()
                }),
                uploader: e.uploader.or(e.channel).unwrap_or_default(),
                upload_date: e.upload_date.unwrap_or_default(),
                view_count: e.view_count,
                webpage_url: e.webpage_url.unwrap_or_else(|| url.clone()),
                url,
            }
        })
        .collect();
    Ok(results)
}
