//! HTTP mapping of [`ServiceError`].

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use widmate_core::ServiceError;

/// Handler error; renders as `{"detail": "..."}`.
#[derive(Debug)]
pub struct ApiError(pub ServiceError);

impl From<ServiceError> for ApiError {
    fn from(e: ServiceError) -> Self {
        ApiError(e)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::InvalidTransition { .. } => StatusCode::BAD_REQUEST,
            ServiceError::UpstreamFailure(_) => StatusCode::BAD_GATEWAY,
            ServiceError::ChecksumMismatch { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ServiceError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ServiceError::ConfigValidation(_) => StatusCode::BAD_REQUEST,
            ServiceError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let detail = self.0.to_string();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %self.0, "request failed");
        } else {
            tracing::debug!(status = status.as_u16(), error = %self.0, "request rejected");
        }
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
