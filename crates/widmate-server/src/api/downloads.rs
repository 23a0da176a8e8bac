//! Job endpoints: probe, submit, status, file, cancel, list, purge.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::{ConnectInfo, Path, State};
use axum::http::{header, StatusCode};
use axum::response::Response;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_util::io::ReaderStream;
use url::Url;
use widmate_core::extractor::MediaInfo;
use widmate_core::files::resolve_output_file;
use widmate_core::jobs::{DownloadOptions, JobId, JobRecord, JobStatus};
use widmate_core::ServiceError;

use super::{json_body, parse_job_id};
use crate::error::ApiResult;
use crate::rate_limit::EndpointClass;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct InfoRequest {
    pub url: String,
    #[serde(default)]
    pub playlist_info: bool,
}

#[derive(Debug, Deserialize)]
pub struct DownloadRequest {
    pub url: String,
    #[serde(flatten)]
    pub options: DownloadOptions,
}

#[derive(Debug, Serialize)]
pub struct DownloadResponse {
    pub download_id: JobId,
    pub status: JobStatus,
    pub message: String,
}

/// Only absolute http(s) URLs are handed to the extractor.
fn validate_source_url(raw: &str) -> Result<String, ServiceError> {
    let url = Url::parse(raw.trim())
        .map_err(|e| ServiceError::InvalidRequest(format!("invalid url {raw:?}: {e}")))?;
    match url.scheme() {
        "http" | "https" if url.host().is_some() => Ok(url.to_string()),
        _ => Err(ServiceError::InvalidRequest(format!(
            "url must be http or https: {raw:?}"
        ))),
    }
}

pub async fn get_info(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    payload: Result<Json<InfoRequest>, JsonRejection>,
) -> ApiResult<Json<MediaInfo>> {
    state.limiter.check(addr.ip(), EndpointClass::Info)?;
    let req = json_body(payload)?;
    let url = validate_source_url(&req.url)?;

    let extractor = state.extractor.clone();
    let info = tokio::task::spawn_blocking(move || extractor.probe(&url, req.playlist_info))
        .await
        .map_err(|e| ServiceError::Internal(format!("probe task failed: {e}")))??;
    Ok(Json(info))
}

pub async fn start_download(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    payload: Result<Json<DownloadRequest>, JsonRejection>,
) -> ApiResult<Json<DownloadResponse>> {
    state.limiter.check(addr.ip(), EndpointClass::Download)?;
    let req = json_body(payload)?;
    let url = validate_source_url(&req.url)?;
    req.options.validate()?;

    let id = state.store.create(&url);
    state.runner.submit(id, url, req.options);
    tracing::info!(job_id = %id, "download queued");
    Ok(Json(DownloadResponse {
        download_id: id,
        status: JobStatus::Pending,
        message: "Download started".to_string(),
    }))
}

pub async fn get_status(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path(id): Path<String>,
) -> ApiResult<Json<JobRecord>> {
    state.limiter.check(addr.ip(), EndpointClass::Status)?;
    let id = parse_job_id(&id)?;
    Ok(Json(state.store.get(id)?))
}

pub async fn get_file(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    state.limiter.check(addr.ip(), EndpointClass::Status)?;
    let id = parse_job_id(&id)?;
    let job = state.store.get(id)?;
    if job.status != JobStatus::Completed {
        return Err(ServiceError::InvalidRequest("download not completed".to_string()).into());
    }
    let stored = job
        .output_path
        .ok_or_else(|| ServiceError::NotFound("file".to_string()))?;

    let download_dir = state.download_dir.clone();
    let path = tokio::task::spawn_blocking(move || resolve_output_file(&download_dir, &stored))
        .await
        .map_err(|e| ServiceError::Internal(format!("resolve task failed: {e}")))??;

    let file = tokio::fs::File::open(&path)
        .await
        .map_err(|_| ServiceError::NotFound("file".to_string()))?;
    let len = file.metadata().await.map_err(ServiceError::from)?.len();
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().replace(['"', '\\'], "_"))
        .unwrap_or_else(|| "download".to_string());

    tracing::debug!(job_id = %id, path = %path.display(), "serving file");
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(header::CONTENT_LENGTH, len)
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{filename}\""),
        )
        .body(Body::from_stream(ReaderStream::new(file)))
        .map_err(|e| ServiceError::Internal(format!("build response: {e}")).into())
}

pub async fn cancel_download(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path(id): Path<String>,
) -> ApiResult<Json<DownloadResponse>> {
    state.limiter.check(addr.ip(), EndpointClass::Download)?;
    let id = parse_job_id(&id)?;
    let job = state.runner.cancel(id)?;
    Ok(Json(DownloadResponse {
        download_id: job.id,
        status: job.status,
        message: "Download cancelled".to_string(),
    }))
}

pub async fn list_downloads(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> ApiResult<Json<Vec<JobRecord>>> {
    state.limiter.check(addr.ip(), EndpointClass::Status)?;
    Ok(Json(state.store.list()))
}

pub async fn clear_downloads(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> ApiResult<Json<Value>> {
    state.limiter.check(addr.ip(), EndpointClass::Download)?;
    let cleared = state.store.purge_terminal();
    tracing::info!(cleared, "cleared finished downloads");
    Ok(Json(json!({
        "message": format!("Cleared {cleared} downloads"),
        "cleared_count": cleared,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_url_must_be_http() {
        assert!(validate_source_url("https://example.com/watch?v=1").is_ok());
        assert!(validate_source_url("  http://example.com/v  ").is_ok());
        for bad in ["file:///etc/passwd", "ftp://example.com/x", "not a url", "https://"] {
            assert!(
                matches!(validate_source_url(bad), Err(ServiceError::InvalidRequest(_))),
                "{bad} accepted"
            );
        }
    }
}
