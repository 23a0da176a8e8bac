//! HTTP routes.

mod downloads;
mod search;
mod system;
mod updater;
mod version;


use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use widmate_core::jobs::JobId;
use widmate_core::ServiceError;

use crate::error::ApiResult;
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(system::root))
        .route("/system/stats", get(system::stats))
        .merge(download_router())
        .route("/search", post(search::search))
        .nest("/auto-updater", updater_router())
        .nest("/version", version_router())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn download_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/info", post(downloads::get_info))
        .route("/download", post(downloads::start_download))
        .route("/download/{id}", delete(downloads::cancel_download))
        .route("/status/{id}", get(downloads::get_status))
        .route("/file/{id}", get(downloads::get_file))
        .route(
            "/downloads",
            get(downloads::list_downloads).delete(downloads::clear_downloads),
        )
}

fn updater_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/status", get(updater::status))
        .route("/configure", post(updater::configure))
        .route("/check", post(updater::check))
        .route("/update", post(updater::update))
}

fn version_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/status", get(version::status))
        .route("/check", get(version::check))
        .route("/update", post(version::update))
}

/// Unwrap a JSON body, turning axum's rejection into a 400 `{"detail"}`.
pub(crate) fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    payload
        .map(|Json(v)| v)
        .map_err(|e| ServiceError::InvalidRequest(e.body_text()).into())
}

/// Job IDs that do not parse cannot name a job.
pub(crate) fn parse_job_id(raw: &str) -> ApiResult<JobId> {
    raw.parse::<JobId>()
        .map_err(|_| ServiceError::NotFound(format!("job {raw}")).into())
}
