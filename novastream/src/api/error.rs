//! API error handling: maps the domain `Error` enum onto consistent HTTP responses.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;

use crate::error::Error;

/// API error response body.
#[derive(Debug, Serialize, ToSchema)]
pub struct ApiErrorResponse {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Object)]
    pub details: Option<serde_json::Value>,
}

/// API error type that can be converted to HTTP responses.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_INPUT", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(StatusCode::GATEWAY_TIMEOUT, "TIMEOUT", message)
    }

    pub fn bad_gateway(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, "UPSTREAM_FAILED", message)
    }

    pub fn health_failed(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, "HEALTH_FAILED", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorResponse {
            code: self.code,
            message: self.message,
            details: self.details,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::BadInput(msg) => ApiError::bad_request(msg),
            Error::NotFound { entity, id } => {
                ApiError::not_found(format!("{entity} with id '{id}' not found"))
            }
            Error::Timeout(what) => ApiError::timeout(format!("timed out waiting for {what}")),
            Error::UpstreamFailed(msg) => ApiError::bad_gateway(msg),
            Error::HealthFailed(msg) => ApiError::health_failed(msg),
            Error::Io(e) => {
                tracing::error!(error = %e, "IO error");
                ApiError::internal("IO error occurred")
            }
            Error::Reqwest(e) => {
                tracing::error!(error = %e, "upstream HTTP client error");
                ApiError::bad_gateway("upstream request failed")
            }
            other => {
                tracing::error!(error = %other, "unexpected error");
                ApiError::internal("an unexpected error occurred")
            }
        }
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;
