//! API-key enforcement.
//!
//! When the server is started with an API key, every route except the
//! health check must carry it in the `x-api-key` header; mismatches get a
//! 401 before the handler runs. Without a configured key the middleware is
//! a pass-through.

use crate::state::AppState;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Json, Response};
use tracing::warn;

/// Header carrying the boundary API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Middleware rejecting requests without the configured API key.
pub async fn require_api_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if let Some(expected) = &state.api_key {
        let provided = request
            .headers()
            .get(API_KEY_HEADER)
            .and_then(|value| value.to_str().ok());

        if provided != Some(expected.as_str()) {
            warn!(path = %request.uri().path(), "rejected request with missing or invalid API key");
            return (
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({ "error": "Unauthorized" })),
            )
                .into_response();
        }
    }

    next.run(request).await
}
