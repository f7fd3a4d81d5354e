//! `ApiError`: the HTTP boundary's translation of `EngineError` (and its
//! own contract violations) to stable status codes (SPEC_FULL.md §7),
//! following the `TeamError`/`ApiError` split used throughout the teacher
//! codebase.

use agentset_engine::EngineError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;

pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        let status = match &err {
            EngineError::LifecycleViolation(_) => StatusCode::CONFLICT,
            EngineError::Contract(_) => StatusCode::BAD_REQUEST,
            EngineError::NotFound(_) => StatusCode::NOT_FOUND,
            EngineError::PlacementUnresolved(_) => StatusCode::BAD_GATEWAY,
            EngineError::TransientExternal { .. } | EngineError::TerminalExternal { .. } => {
                StatusCode::BAD_GATEWAY
            }
            EngineError::Client(_) => StatusCode::BAD_GATEWAY,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        tracing::warn!(status = %self.status, message = %self.message, "request failed");
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
