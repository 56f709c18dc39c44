//! Error kinds for the monitor, collector and HTTP layers.
//!
//! None of these are fatal: the monitor falls back to polling, a bad trace line is skipped,
//! a failed collection cycle is logged and the next one runs.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MonitorError {
    /// Kernel probe could not attach; the monitor runs in polling mode.
    #[error("kernel probe backend unavailable: {0}")]
    BackendUnavailable(String),
}

/// Reasons a single trace_pipe line is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("missing task field")]
    MissingTask,
    #[error("bad pid `{0}`")]
    BadPid(String),
    #[error("not a carbonwatch event")]
    UnknownEvent,
    #[error("bad size field `{0}`")]
    BadSize(String),
}

#[derive(Debug, Error)]
pub enum CollectError {
    #[error("metrics task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("cache serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Request failure surfaced as `{"success": false, "error": ...}` with a 500.
#[derive(Debug)]
pub struct ApiError(pub anyhow::Error);

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(e: E) -> Self {
        ApiError(e.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "success": false, "error": self.0.to_string() })),
        )
            .into_response()
    }
}
