//! Batch synchronization API
//!
//! `POST /api/work/batch/{create|refresh}` — validates the request, spawns
//! the engine in a background task, and answers with a long-lived SSE stream
//! fed from the engine's event channel. Validation failures are rejected
//! with a 400 JSON body before any stream is opened.
//!
//! Closing the response mid-batch only stops observation; the spawned job
//! runs to completion. There is no reconnection — a dropped stream requires
//! re-issuing the batch request.

use crate::engine::{BatchEngine, BatchMode, BatchTargets};
use crate::error::{ApiError, ApiResult};
use crate::resolver::is_valid_work_id;
use crate::AppState;
use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
    routing::post,
    Json, Router,
};
use futures::stream::Stream;
use koe_common::sse::progress_sse_event;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;

/// Size of the engine→stream event buffer. The SSE writer drains promptly;
/// the buffer only smooths bursts of settlements.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// POST /api/work/batch/{mode} request body
#[derive(Debug, serde::Deserialize)]
pub struct BatchRequest {
    /// Explicit work IDs (ignored when `sync` is set)
    #[serde(default)]
    pub ids: Option<Vec<String>>,
    /// Sync the whole local library instead of an explicit list
    #[serde(default)]
    pub sync: bool,
}

/// POST /api/work/batch/{create|refresh}
pub async fn batch_sync(
    State(state): State<AppState>,
    Path(mode): Path<String>,
    Json(request): Json<BatchRequest>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let mode: BatchMode = mode.parse().map_err(ApiError::BadRequest)?;
    let targets = validate_targets(&request)?;

    let engine = BatchEngine::new(state.db.clone(), state.config.clone())?;
    let (tx, mut rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

    info!(mode = mode.as_str(), "Batch request accepted, starting job");
    tokio::spawn(async move {
        engine.run(mode, targets, tx).await;
    });

    // The stream ends when the engine drops its sender after the terminal
    // event; each frame is flushed as it is produced.
    let stream = async_stream::stream! {
        while let Some(event) = rx.recv().await {
            yield Ok(progress_sse_event(&event));
        }
    };

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("heartbeat"),
    ))
}

/// Reject malformed requests before any job starts
fn validate_targets(request: &BatchRequest) -> ApiResult<BatchTargets> {
    if request.sync {
        return Ok(BatchTargets::WholeLibrary);
    }

    let ids = request
        .ids
        .as_ref()
        .filter(|ids| !ids.is_empty())
        .ok_or_else(|| {
            ApiError::BadRequest("request must supply ids or set sync=true".to_string())
        })?;

    if let Some(bad) = ids.iter().find(|id| !is_valid_work_id(id)) {
        return Err(ApiError::BadRequest(format!("invalid work id: {}", bad)));
    }

    Ok(BatchTargets::Ids(ids.clone()))
}

/// Build batch routes
pub fn batch_routes() -> Router<AppState> {
    Router::new().route("/api/work/batch/:mode", post(batch_sync))
}
