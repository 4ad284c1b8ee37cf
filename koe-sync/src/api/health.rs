//! Health check endpoint

use crate::AppState;
use axum::{extract::State, routing::get, Json, Router};
use serde_json::json;

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let uptime_seconds = (chrono::Utc::now() - state.startup_time).num_seconds();
    Json(json!({
        "status": "ok",
        "service": "koe-sync",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": uptime_seconds,
    }))
}

/// Build health routes
pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health))
}
