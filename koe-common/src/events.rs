//! Batch progress event vocabulary
//!
//! Events emitted by the batch reconciliation engine and consumed by SSE
//! clients. All events use this central enum for type safety and exhaustive
//! matching; `event_type()` provides the SSE event name for each variant.

use serde::{Deserialize, Serialize};

/// Per-item status carried by `ProgressEvent::Progress`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    /// Item admitted, resolve/persist in flight
    Processing,
    /// Item settled successfully
    Success,
    /// Item settled with an error (batch continues)
    Failed,
}

/// Severity of a `ProgressEvent::Log` entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

/// One failed item in the terminal batch summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedItem {
    pub id: String,
    pub error: String,
}

/// Terminal batch summary carried by `ProgressEvent::End`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchStats {
    /// IDs that resolved and persisted successfully
    pub success: Vec<String>,
    /// IDs that failed, with their stringified errors
    pub failed: Vec<FailedItem>,
}

/// Batch progress events
///
/// Stream contract: `Start` precedes all `Progress`/`Log` events, and exactly
/// one terminal event (`End` or `Error`) closes the stream. The `current` of
/// the final `Progress` event equals `total`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProgressEvent {
    /// Emitted once before any item events
    Start { total: usize, message: String },

    /// Emitted per item as it transitions to an in-flight or terminal state
    Progress {
        id: String,
        status: ItemStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        current: usize,
        total: usize,
        percent: u8,
    },

    /// Free-form diagnostic, zero or more times, any order relative to Progress
    Log { level: LogLevel, message: String },

    /// Terminal: batch ran to completion (possibly with per-item failures)
    End {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        stats: Option<BatchStats>,
    },

    /// Terminal: batch aborted before completion (e.g. enumeration failure)
    Error { message: String, details: String },
}

impl ProgressEvent {
    /// SSE event name for this variant
    pub fn event_type(&self) -> &'static str {
        match self {
            ProgressEvent::Start { .. } => "start",
            ProgressEvent::Progress { .. } => "progress",
            ProgressEvent::Log { .. } => "log",
            ProgressEvent::End { .. } => "end",
            ProgressEvent::Error { .. } => "error",
        }
    }

    /// Whether this event closes the stream
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProgressEvent::End { .. } | ProgressEvent::Error { .. }
        )
    }
}

/// Integer percentage, floored: `current * 100 / total`
///
/// An empty batch reports 100 so a zero-item run still terminates at "done".
pub fn percent(current: usize, total: usize) -> u8 {
    if total == 0 {
        100
    } else {
        (current * 100 / total) as u8
    }
}
