//! koe-sync - Voice Work Catalog Synchronization Service
//!
//! Reconciles a local voice-work library and the storefront metadata
//! provider against the SQLite catalog, streaming batch progress to clients
//! over SSE.

use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use koe_sync::{AppState, SyncConfig};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting koe-sync (Catalog Synchronization) service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    // Resolve configuration once; everything downstream receives it injected
    let config = Arc::new(SyncConfig::resolve()?);

    if !config.library_root.is_dir() {
        warn!(
            library_root = %config.library_root.display(),
            "Library root does not exist; whole-library sync will fail until it does"
        );
    }

    // Open or create the catalog database
    info!("Database: {}", config.database_path.display());
    let db_pool = koe_sync::db::init_database_pool(&config.database_path).await?;
    info!("Database connection established");

    // Create application state and router
    let state = AppState::new(db_pool, Arc::clone(&config));
    let app = koe_sync::build_router(state);

    // Start server
    let bind = format!("{}:{}", config.bind_host, config.port);
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!("Listening on http://{}", bind);
    info!("Health check: http://{}/health", bind);

    axum::serve(listener, app).await?;

    Ok(())
}
