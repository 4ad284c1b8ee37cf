//! Server-Sent Events (SSE) utilities
//!
//! Frame conversion for the batch progress stream.

use crate::events::ProgressEvent;
use axum::response::sse::Event;
use tracing::warn;

/// Convert a batch progress event into an SSE frame
/// (`event: <name>`, `data: <json>`).
///
/// Serialization of the event vocabulary cannot realistically fail; if it
/// ever does, a comment frame is emitted instead so the stream stays intact.
pub fn progress_sse_event(event: &ProgressEvent) -> Event {
    match serde_json::to_string(event) {
        Ok(data) => Event::default().event(event.event_type()).data(data),
        Err(e) => {
            warn!("SSE: Failed to serialize event {}: {}", event.event_type(), e);
            Event::default().comment("serialization failure")
        }
    }
}
