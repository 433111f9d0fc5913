//! Handlers for the two listeners.
//!
//! The ingest listener takes OTLP exports from cluster agents; the API
//! listener serves similarity search and status to operators.

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Path, Query, State};
use axum::http::HeaderMap;
use axum::middleware::from_fn;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use super::error::ApiError;
use super::middleware::{log_requests, request_id};
use super::AppState;
use crate::store::SearchResult;
use crate::telemetry::Kind;

pub const AUTH_TOKEN_HEADER: &str = "x-auth-token";
pub const CLUSTER_HEADER: &str = "x-cluster-name";

/// `POST /otlp/v1/{signal}` and `GET /health`.
pub fn ingest_router(state: Arc<AppState>, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/otlp/v1/{signal}", post(ingest))
        .route("/health", get(ingest_health))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(from_fn(log_requests))
        .layer(from_fn(request_id))
        .with_state(state)
}

/// `GET /api/{kind}/search`, `GET /api/system/status` and `GET /api/health`.
pub fn api_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(api_health))
        .route("/api/system/status", get(system_status))
        .route("/api/{kind}/search", get(search))
        .layer(from_fn(log_requests))
        .layer(from_fn(request_id))
        .with_state(state)
}

// ── Ingest ──

fn header<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
}

async fn ingest(
    State(state): State<Arc<AppState>>,
    Path(signal): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let token = header(&headers, AUTH_TOKEN_HEADER);
    let cluster = header(&headers, CLUSTER_HEADER);

    state
        .dispatcher
        .ingest_signal(cluster, &signal, &body, token)
        .await?;
    Ok(Json(json!({ "status": "accepted" })))
}

async fn ingest_health() -> Json<Value> {
    Json(json!({ "status": "healthy", "service": "otlp-receiver" }))
}

// ── Query API ──

#[derive(Debug, Deserialize)]
struct SearchParams {
    #[serde(default)]
    q: String,
    limit: Option<usize>,
    cluster: Option<String>,
}

async fn search(
    State(state): State<Arc<AppState>>,
    Path(kind): Path<String>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Vec<SearchResult>>, ApiError> {
    let kind: Kind = kind.parse()?;
    let limit = state.search.clamp_limit(params.limit);

    let results = match params.cluster.as_deref().filter(|c| !c.is_empty()) {
        Some(cluster) => {
            state
                .search
                .search_cluster(&params.q, kind, limit, cluster)
                .await?
        }
        None => state.search.search(&params.q, kind, limit).await?,
    };
    Ok(Json(results))
}

async fn api_health() -> Json<Value> {
    Json(json!({ "status": "healthy", "service": "query-api" }))
}

async fn system_status(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let collections = state.gateway.stats().await?;
    Ok(Json(json!({
        "status": "ok",
        "ingest": state.dispatcher.stats().snapshot(),
        "queue_depth": state.dispatcher.queue_depth(),
        "collections": collections,
        "services": state.dispatcher.health().report(),
    })))
}
