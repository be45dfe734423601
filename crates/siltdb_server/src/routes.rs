//! Route table and request handlers.
//!
//! One operation per path; handlers deserialize the request, invoke a
//! single engine operation on the blocking pool, and serialize the result.
//! Long reads get a cancel token that trips when the client disconnects.

use crate::auth::require_api_key;
use crate::error::AppError;
use crate::events::events_handler;
use crate::state::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::middleware;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use serde_json::Value;
use siltdb_core::{CancelToken, DocEntry, QueryNode, QueryOptions, TxnOp};
use std::sync::Arc;
use tokio::task;
use tracing::info;

#[derive(Deserialize, Debug)]
struct KeyPayload {
    key: String,
}

#[derive(Deserialize, Debug)]
struct SetPayload {
    key: String,
    value: Value,
}

#[derive(Deserialize, Debug)]
struct GetPartialPayload {
    key: String,
    fields: Vec<String>,
}

#[derive(Deserialize, Debug)]
struct ClearPrefixPayload {
    prefix: String,
}

#[derive(Deserialize, Debug)]
struct QueryAstPayload {
    ast: QueryNode,
    projection: Option<Vec<String>>,
    limit: Option<usize>,
    offset: Option<usize>,
}

#[derive(Deserialize, Debug)]
struct QueryRadiusPayload {
    field: String,
    lat: f64,
    lon: f64,
    radius: f64,
}

#[derive(Deserialize, Debug)]
struct QueryBoxPayload {
    field: String,
    min_lat: f64,
    min_lon: f64,
    max_lat: f64,
    max_lon: f64,
}

/// Trips a cancel token when dropped.
///
/// Axum drops the handler future when the client disconnects, which drops
/// this guard and lets the engine's verification loop abort.
struct CancelOnDrop(CancelToken);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

/// Builds the full application router.
pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/set", post(set_handler))
        .route("/get", post(get_handler))
        .route("/get_partial", post(get_partial_handler))
        .route("/delete", post(delete_handler))
        .route("/batch_set", post(batch_set_handler))
        .route("/transaction", post(transaction_handler))
        .route("/clear_prefix", post(clear_prefix_handler))
        .route("/drop_database", post(drop_database_handler))
        .route("/query/ast", post(query_ast_handler))
        .route("/query/radius", post(query_radius_handler))
        .route("/query/box", post(query_box_handler))
        .route("/export", get(export_handler))
        .route("/import", post(import_handler))
        .route("/events", get(events_handler))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_api_key,
        ));

    Router::new()
        .route("/", get(health_handler))
        .merge(protected)
        .with_state(state)
}

async fn health_handler(State(state): State<AppState>) -> (StatusCode, String) {
    let count = state.db.document_count();
    (StatusCode::OK, format!("Server is running ({count} documents)"))
}

async fn set_handler(
    State(state): State<AppState>,
    Json(payload): Json<SetPayload>,
) -> Result<StatusCode, AppError> {
    info!(key = %payload.key, "handling set request");
    let db = Arc::clone(&state.db);
    task::spawn_blocking(move || db.set(&payload.key, payload.value)).await??;
    Ok(StatusCode::OK)
}

async fn get_handler(
    State(state): State<AppState>,
    Json(payload): Json<KeyPayload>,
) -> Result<Json<Value>, AppError> {
    let db = Arc::clone(&state.db);
    let value = task::spawn_blocking(move || db.get(&payload.key)).await??;
    Ok(Json(value))
}

async fn get_partial_handler(
    State(state): State<AppState>,
    Json(payload): Json<GetPartialPayload>,
) -> Result<Json<Value>, AppError> {
    let db = Arc::clone(&state.db);
    let value =
        task::spawn_blocking(move || db.get_partial(&payload.key, &payload.fields)).await??;
    Ok(Json(value))
}

async fn delete_handler(
    State(state): State<AppState>,
    Json(payload): Json<KeyPayload>,
) -> Result<StatusCode, AppError> {
    info!(key = %payload.key, "handling delete request");
    let db = Arc::clone(&state.db);
    task::spawn_blocking(move || db.delete(&payload.key)).await??;
    Ok(StatusCode::OK)
}

async fn batch_set_handler(
    State(state): State<AppState>,
    Json(payload): Json<Vec<DocEntry>>,
) -> Result<StatusCode, AppError> {
    info!(count = payload.len(), "handling batch_set request");
    let db = Arc::clone(&state.db);
    task::spawn_blocking(move || db.batch_set(payload)).await??;
    Ok(StatusCode::OK)
}

async fn transaction_handler(
    State(state): State<AppState>,
    Json(payload): Json<Vec<TxnOp>>,
) -> Result<StatusCode, AppError> {
    info!(count = payload.len(), "handling transaction request");
    let db = Arc::clone(&state.db);
    task::spawn_blocking(move || db.transaction(payload)).await??;
    Ok(StatusCode::OK)
}

async fn clear_prefix_handler(
    State(state): State<AppState>,
    Json(payload): Json<ClearPrefixPayload>,
) -> Result<Json<Value>, AppError> {
    info!(prefix = %payload.prefix, "handling clear_prefix request");
    let db = Arc::clone(&state.db);
    let count = task::spawn_blocking(move || db.clear_prefix(&payload.prefix)).await??;
    Ok(Json(serde_json::json!({ "count": count })))
}

async fn drop_database_handler(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    info!("handling drop_database request");
    let db = Arc::clone(&state.db);
    let count = task::spawn_blocking(move || db.drop_database()).await??;
    Ok(Json(serde_json::json!({ "count": count })))
}

async fn query_ast_handler(
    State(state): State<AppState>,
    Json(payload): Json<QueryAstPayload>,
) -> Result<Json<Vec<Value>>, AppError> {
    let db = Arc::clone(&state.db);
    let cancel = CancelToken::new();
    let _guard = CancelOnDrop(cancel.clone());

    let options = QueryOptions {
        projection: payload.projection,
        limit: payload.limit,
        offset: payload.offset,
        cancel: Some(cancel),
    };
    let results = task::spawn_blocking(move || db.query(&payload.ast, &options)).await??;
    Ok(Json(results))
}

async fn query_radius_handler(
    State(state): State<AppState>,
    Json(payload): Json<QueryRadiusPayload>,
) -> Result<Json<Vec<Value>>, AppError> {
    info!(field = %payload.field, radius = payload.radius, "handling radius query");
    let db = Arc::clone(&state.db);
    let results = task::spawn_blocking(move || {
        db.query_within_radius(&payload.field, payload.lat, payload.lon, payload.radius)
    })
    .await??;
    Ok(Json(results))
}

async fn query_box_handler(
    State(state): State<AppState>,
    Json(payload): Json<QueryBoxPayload>,
) -> Result<Json<Vec<Value>>, AppError> {
    info!(field = %payload.field, "handling box query");
    let db = Arc::clone(&state.db);
    let results = task::spawn_blocking(move || {
        db.query_in_box(
            &payload.field,
            payload.min_lat,
            payload.min_lon,
            payload.max_lat,
            payload.max_lon,
        )
    })
    .await??;
    Ok(Json(results))
}

async fn export_handler(State(state): State<AppState>) -> Result<Json<String>, AppError> {
    let db = Arc::clone(&state.db);
    let items = task::spawn_blocking(move || db.export()).await??;
    let data = serde_json::to_string(&items).map_err(siltdb_core::DbError::from)?;
    Ok(Json(data))
}

async fn import_handler(
    State(state): State<AppState>,
    Json(payload): Json<Vec<DocEntry>>,
) -> Result<StatusCode, AppError> {
    info!(count = payload.len(), "handling import request");
    let db = Arc::clone(&state.db);
    task::spawn_blocking(move || db.import(payload)).await??;
    Ok(StatusCode::CREATED)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use siltdb_core::Database;
    use tower::ServiceExt;

    fn app(api_key: Option<&str>) -> Router {
        let db = Arc::new(Database::open_in_memory().unwrap());
        router(AppState::new(db, api_key.map(str::to_string)))
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_check_needs_no_key() {
        let app = app(Some("secret"));
        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn missing_api_key_is_unauthorized() {
        let app = app(Some("secret"));
        let response = app
            .oneshot(post_json("/set", serde_json::json!({"key": "k", "value": 1})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn valid_api_key_passes() {
        let app = app(Some("secret"));
        let mut request = post_json("/set", serde_json::json!({"key": "k", "value": 1}));
        request
            .headers_mut()
            .insert("x-api-key", "secret".parse().unwrap());
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let app = app(None);
        let value = serde_json::json!({"name": "Alice", "nested": {"ok": true}});

        let response = app
            .clone()
            .oneshot(post_json("/set", serde_json::json!({"key": "u1", "value": value})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(post_json("/get", serde_json::json!({"key": "u1"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, value);
    }

    #[tokio::test]
    async fn get_absent_key_is_404_with_error_body() {
        let app = app(None);
        let response = app
            .oneshot(post_json("/get", serde_json::json!({"key": "missing"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            body_json(response).await,
            serde_json::json!({"error": "Key not found"})
        );
    }

    #[tokio::test]
    async fn malformed_body_is_400() {
        let app = app(None);
        let request = Request::builder()
            .method("POST")
            .uri("/set")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn query_ast_end_to_end() {
        let app = app(None);
        for (key, active) in [("u1", true), ("u2", false), ("u3", true)] {
            let response = app
                .clone()
                .oneshot(post_json(
                    "/set",
                    serde_json::json!({"key": key, "value": {"active": active}}),
                ))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = app
            .oneshot(post_json(
                "/query/ast",
                serde_json::json!({"ast": {"Eq": ["active", true, "Bool"]}}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let results = body_json(response).await;
        assert_eq!(results.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn invalid_ast_literal_is_400() {
        let app = app(None);
        let response = app
            .oneshot(post_json(
                "/query/ast",
                serde_json::json!({"ast": {"Eq": ["age", "ten", "Number"]}}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn clear_prefix_reports_count() {
        let app = app(None);
        for key in ["p/1", "p/2", "q/1"] {
            app.clone()
                .oneshot(post_json("/set", serde_json::json!({"key": key, "value": 0})))
                .await
                .unwrap();
        }

        let response = app
            .oneshot(post_json("/clear_prefix", serde_json::json!({"prefix": "p/"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, serde_json::json!({"count": 2}));
    }

    #[tokio::test]
    async fn import_answers_created() {
        let app = app(None);
        let response = app
            .oneshot(post_json(
                "/import",
                serde_json::json!([{"key": "a", "value": 1}, {"key": "b", "value": 2}]),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    #[tokio::test]
    async fn export_returns_json_string_snapshot() {
        let app = app(None);
        app.clone()
            .oneshot(post_json("/set", serde_json::json!({"key": "a", "value": 7})))
            .await
            .unwrap();

        let response = app
            .oneshot(Request::builder().uri("/export").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // The body is a JSON string containing the snapshot array.
        let outer = body_json(response).await;
        let inner: Value = serde_json::from_str(outer.as_str().unwrap()).unwrap();
        assert_eq!(inner, serde_json::json!([{"key": "a", "value": 7}]));
    }

    #[tokio::test]
    async fn transaction_end_to_end() {
        let app = app(None);
        app.clone()
            .oneshot(post_json("/set", serde_json::json!({"key": "gone", "value": 1})))
            .await
            .unwrap();

        let response = app
            .clone()
            .oneshot(post_json(
                "/transaction",
                serde_json::json!([
                    {"type": "set", "key": "kept", "value": {"status": "ok"}},
                    {"type": "delete", "key": "gone"}
                ]),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(post_json("/get", serde_json::json!({"key": "gone"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
