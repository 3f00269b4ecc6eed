//! error taxonomy
//!
//! sensor and store errors are transient from the poller's point of view;
//! `PollerError` ends one poller; `AppError` is what request handlers return.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};
use axum::Json;
use thiserror::Error;

/// a sensor produced no usable sample this cycle
#[derive(Debug, Error)]
pub enum SensorError {
    #[error("{sensor} driver error: {message}")]
    Driver { sensor: &'static str, message: String },
    #[error("{sensor} read timed out after {millis} ms")]
    Timeout { sensor: &'static str, millis: u64 },
    #[error("{sensor} returned implausible value {value}")]
    Implausible { sensor: &'static str, value: String },
}

impl SensorError {
    pub fn driver(sensor: &'static str, err: impl std::fmt::Display) -> Self {
        SensorError::Driver { sensor, message: err.to_string() }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no plant record for user {0}")]
    NotFound(i64),
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("store task failed: {0}")]
    Task(String),
}

/// ends a single poller; never reaches the request path
#[derive(Debug, Error)]
pub enum PollerError {
    #[error("sensor worker for {sensor} died: {message}")]
    SensorWorker { sensor: &'static str, message: String },
}

/// request-path failures
#[derive(Debug, Error)]
pub enum AppError {
    #[error("login required")]
    Unauthorized,
    #[error("login required")]
    UnauthorizedApi,
    #[error("not found")]
    NotFound,
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(_) => AppError::NotFound,
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Unauthorized => Redirect::to("/login").into_response(),
            AppError::UnauthorizedApi => (
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({"error": "login required"})),
            )
                .into_response(),
            AppError::NotFound => (StatusCode::NOT_FOUND, "Not Found").into_response(),
            AppError::Internal(detail) => {
                tracing::error!(error = %detail, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
            }
        }
    }
}
