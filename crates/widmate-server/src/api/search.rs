//! `POST /search`: site search through the extractor.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::rejection::JsonRejection;
use axum::extract::{ConnectInfo, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use widmate_core::extractor::{SearchResult, MAX_SEARCH_RESULTS};
use widmate_core::ServiceError;

use super::json_body;
use crate::error::ApiResult;
use crate::rate_limit::EndpointClass;
use crate::state::AppState;

fn default_limit() -> usize {
    10
}

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub results: Vec<SearchResult>,
    pub total: usize,
    /// Seconds spent in the extractor.
    pub search_time: f64,
}

impl SearchRequest {
    fn validate(&self) -> Result<(), ServiceError> {
        if self.query.trim().is_empty() {
            return Err(ServiceError::InvalidRequest("query must not be empty".to_string()));
        }
        if !(1..=MAX_SEARCH_RESULTS).contains(&self.limit) {
            return Err(ServiceError::InvalidRequest(format!(
                "limit must be between 1 and {MAX_SEARCH_RESULTS}"
            )));
        }
        Ok(())
    }
}

pub async fn search(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    payload: Result<Json<SearchRequest>, JsonRejection>,
) -> ApiResult<Json<SearchResponse>> {
    state.limiter.check(addr.ip(), EndpointClass::Search)?;
    let req = json_body(payload)?;
    req.validate()?;

    let started = Instant::now();
    let extractor = state.extractor.clone();
    let query = req.query.trim().to_string();
    let limit = req.limit;
    let results = tokio::task::spawn_blocking(move || extractor.search(&query, limit))
        .await
        .map_err(|e| ServiceError::Internal(format!("search task failed: {e}")))??;
    tracing::debug!(query = %req.query, hits = results.len(), "search finished");

    Ok(Json(SearchResponse {
        total: results.len(),
        results,
        query: req.query,
        search_time: started.elapsed().as_secs_f64(),
    }))
}
