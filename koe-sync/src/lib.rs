//! koe-sync library interface
//!
//! Exposes public APIs for integration testing

pub mod api;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod queue;
pub mod resolver;

pub use crate::config::SyncConfig;
pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Catalog connection pool
    pub db: SqlitePool,
    /// Resolved service configuration, injected at startup
    pub config: Arc<SyncConfig>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(db: SqlitePool, config: Arc<SyncConfig>) -> Self {
        Self {
            db,
            config,
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::batch_routes())
        .merge(api::work_routes())
        .merge(api::health_routes())
        .with_state(state)
}
