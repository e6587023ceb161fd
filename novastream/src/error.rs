//! Application-wide error types.

use thiserror::Error;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
///
/// Variants line up with the error kinds in the streaming engine's error taxonomy;
/// the HTTP layer (`crate::api::error::ApiError`) maps each to a status code.
#[derive(Error, Debug)]
pub enum Error {
    #[error("bad input: {0}")]
    BadInput(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    #[error("timed out waiting for {0}")]
    Timeout(String),

    #[error("upstream failed: {0}")]
    UpstreamFailed(String),

    #[error("health check failed: {0}")]
    HealthFailed(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    pub fn bad_input(msg: impl Into<String>) -> Self {
        Self::BadInput(msg.into())
    }

    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    pub fn timeout(what: impl Into<String>) -> Self {
        Self::Timeout(what.into())
    }

    pub fn upstream_failed(msg: impl Into<String>) -> Self {
        Self::UpstreamFailed(msg.into())
    }

    pub fn health_failed(msg: impl Into<String>) -> Self {
        Self::HealthFailed(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}
