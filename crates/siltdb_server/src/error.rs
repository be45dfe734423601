//! Error-to-status mapping for the HTTP boundary.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use siltdb_core::DbError;
use thiserror::Error;
use tracing::error;

/// Errors surfaced by request handlers.
#[derive(Error, Debug)]
pub enum AppError {
    /// An engine error.
    #[error(transparent)]
    Db(#[from] DbError),
    /// A blocking task failed to complete.
    #[error("worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl AppError {
    /// The status code and client-facing message for this error.
    fn status_and_message(&self) -> (StatusCode, String) {
        match self {
            AppError::Db(db_err) => match db_err {
                DbError::KeyNotFound => (StatusCode::NOT_FOUND, "Key not found".to_string()),
                DbError::Codec(_) => (StatusCode::BAD_REQUEST, "Invalid document data".to_string()),
                DbError::InvalidQuery { message } => {
                    (StatusCode::BAD_REQUEST, format!("Invalid query: {message}"))
                }
                DbError::InvalidGeo { message } => {
                    (StatusCode::BAD_REQUEST, format!("Invalid geo argument: {message}"))
                }
                // Safe to retry once the competing holder releases the lock.
                DbError::DatabaseLocked | DbError::DatabaseClosed => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Database unavailable".to_string(),
                ),
                DbError::Cancelled => (
                    StatusCode::REQUEST_TIMEOUT,
                    "Request cancelled".to_string(),
                ),
                DbError::Io(_)
                | DbError::LogCorruption { .. }
                | DbError::SnapshotCorruption { .. }
                | DbError::InvalidFormat { .. } => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Database internal error".to_string(),
                ),
            },
            AppError::Join(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = self.status_and_message();
        if status.is_server_error() {
            error!("error processing request: {self}");
        }
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}
