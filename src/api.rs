// src/api.rs
//! HTTP control surface over a shared `FeedProcessor`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use shuttle_axum::axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::CorsLayer;

use crate::hit::Hit;
use crate::ingest::types::RawItem;
use crate::processor::FeedProcessor;
use crate::stats::ProcessingStats;
use crate::store::HitFilter;
use crate::watch::WatchKeyword;

const DEFAULT_HITS_LIMIT: usize = 50;
const MAX_HITS_LIMIT: usize = 1000;

pub type AppState = Arc<FeedProcessor>;

pub fn router(processor: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/hits", get(hits))
        .route("/keywords", get(keywords).post(add_keyword))
        .route("/keywords/{keyword}/toggle", post(toggle_keyword))
        .route("/cleanup", post(manual_cleanup))
        .route("/start", post(start))
        .route("/stop", post(stop))
        .route("/feeds/{source_tag}/items", post(push_item))
        .layer(CorsLayer::very_permissive())
        .with_state(processor)
}

#[derive(Serialize)]
struct HealthOut {
    status: &'static str,
    running: bool,
}

async fn health(State(p): State<AppState>) -> Json<HealthOut> {
    Json(HealthOut {
        status: "ok",
        running: p.is_running(),
    })
}

async fn stats(State(p): State<AppState>) -> Json<ProcessingStats> {
    Json(p.get_stats())
}

async fn hits(
    State(p): State<AppState>,
    Query(mut filter): Query<HitFilter>,
) -> Result<Json<Vec<Hit>>, (StatusCode, String)> {
    filter.limit = Some(filter.limit.unwrap_or(DEFAULT_HITS_LIMIT).min(MAX_HITS_LIMIT));
    p.list_hits(&filter)
        .map(Json)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

async fn keywords(State(p): State<AppState>) -> Json<Vec<WatchKeyword>> {
    Json(p.get_watch_keywords())
}

#[derive(Deserialize)]
struct AddKeywordReq {
    keyword: String,
}

async fn add_keyword(State(p): State<AppState>, Json(req): Json<AddKeywordReq>) -> Response {
    if req.keyword.trim().is_empty() {
        return (StatusCode::BAD_REQUEST, "keyword must not be empty").into_response();
    }
    let added = p.add_keyword(&req.keyword);
    let code = if added { StatusCode::CREATED } else { StatusCode::OK };
    (code, Json(serde_json::json!({ "keyword": req.keyword.trim(), "added": added }))).into_response()
}

async fn toggle_keyword(State(p): State<AppState>, Path(keyword): Path<String>) -> Response {
    match p.toggle_keyword(&keyword) {
        Some(enabled) => Json(serde_json::json!({ "keyword": keyword, "enabled": enabled })).into_response(),
        None => (StatusCode::NOT_FOUND, format!("unknown keyword `{keyword}`")).into_response(),
    }
}

async fn manual_cleanup(State(p): State<AppState>) -> Response {
    match p.manual_cleanup() {
        Ok(removed) => Json(serde_json::json!({ "removed": removed })).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn start(State(p): State<AppState>) -> Json<serde_json::Value> {
    let started = p.start().await;
    Json(serde_json::json!({ "running": true, "started": started }))
}

async fn stop(State(p): State<AppState>) -> Json<serde_json::Value> {
    p.stop().await;
    Json(serde_json::json!({ "running": false }))
}

async fn push_item(
    State(p): State<AppState>,
    Path(source_tag): Path<String>,
    Json(item): Json<RawItem>,
) -> Response {
    if !p.has_push_feed(&source_tag) {
        return (StatusCode::NOT_FOUND, format!("no push feed `{source_tag}`")).into_response();
    }
    match p.push(&source_tag, item) {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(e) => (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response(),
    }
}
