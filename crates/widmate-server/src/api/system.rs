use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, State};
use axum::Json;
use serde::Serialize;
use serde_json::{json, Value};
use widmate_core::ServiceError;

use crate::error::ApiResult;
use crate::rate_limit::EndpointClass;
use crate::state::AppState;
use crate::stats::HostSnapshot;

pub async fn root(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "message": "WidMate Video Downloader API",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
        "active_downloads": state.store.count_active(),
    }))
}

#[derive(Debug, Serialize)]
pub struct SystemStats {
    #[serde(flatten)]
    pub host: HostSnapshot,
    pub active_downloads: usize,
    pub total_downloads: usize,
}

pub async fn stats(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> ApiResult<Json<SystemStats>> {
    state.limiter.check(addr.ip(), EndpointClass::Status)?;
    let sampler = state.clone();
    let host = tokio::task::spawn_blocking(move || sampler.stats.snapshot(&sampler.download_dir))
        .await
        .map_err(|e| ServiceError::Internal(format!("stats task failed: {e}")))?;
    Ok(Json(SystemStats {
        host,
        active_downloads: state.store.count_active(),
        total_downloads: state.store.len(),
    }))
}
