//! `/auto-updater/*` endpoints.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{ConnectInfo, State};
use axum::Json;
use serde_json::{json, Value};
use widmate_core::updater::{SettingsPatch, TriggerOutcome, UpdaterSnapshot};
use widmate_core::ServiceError;

use crate::error::ApiResult;
use crate::rate_limit::EndpointClass;
use crate::state::AppState;

pub async fn status(State(state): State<Arc<AppState>>) -> Json<UpdaterSnapshot> {
    Json(state.updater.status())
}

pub async fn configure(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    state.limiter.check(addr.ip(), EndpointClass::Configure)?;
    let Json(body) = payload.map_err(|e| ServiceError::ConfigValidation(e.body_text()))?;
    let patch = SettingsPatch::from_json(body)?;
    let settings = state.updater.configure(&patch)?;
    Ok(Json(json!({
        "message": "Auto-updater configuration updated",
        "config": settings,
    })))
}

fn trigger_reply(outcome: TriggerOutcome, started: &str) -> Json<Value> {
    let message = match outcome {
        TriggerOutcome::Started => started,
        TriggerOutcome::AlreadyInProgress => "Update already in progress",
    };
    Json(json!({ "message": message }))
}

pub async fn check(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> ApiResult<Json<Value>> {
    state.limiter.check(addr.ip(), EndpointClass::Check)?;
    Ok(trigger_reply(state.updater.force_check(), "Update check triggered"))
}

pub async fn update(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> ApiResult<Json<Value>> {
    state.limiter.check(addr.ip(), EndpointClass::Update)?;
    Ok(trigger_reply(state.updater.force_update(), "Update triggered"))
}
