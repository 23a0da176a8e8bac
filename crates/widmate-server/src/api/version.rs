//! `/version/*`: compact views over the update scheduler.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use widmate_core::updater::{TriggerOutcome, VersionInfo};

use crate::error::ApiResult;
use crate::rate_limit::EndpointClass;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct CheckQuery {
    #[serde(default)]
    pub force: bool,
}

pub async fn status(State(state): State<Arc<AppState>>) -> Json<VersionInfo> {
    Json(state.updater.version_info())
}

pub async fn check(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(query): Query<CheckQuery>,
) -> ApiResult<Json<VersionInfo>> {
    state.limiter.check(addr.ip(), EndpointClass::Check)?;
    Ok(Json(state.updater.lookup_versions(query.force).await))
}

pub async fn update(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> ApiResult<Json<Value>> {
    state.limiter.check(addr.ip(), EndpointClass::Update)?;
    if !state.updater.version_info().update_available {
        return Ok(Json(json!({ "message": "Already up to date" })));
    }
    let outcome = state.updater.force_update();
    let info = state.updater.version_info();
    Ok(Json(match outcome {
        TriggerOutcome::Started => json!({
            "message": "Update started",
            "status": info.update_status,
            "progress": info.update_progress,
        }),
        TriggerOutcome::AlreadyInProgress => json!({
            "message": "Update already in progress",
            "status": info.update_status,
        }),
    }))
}
