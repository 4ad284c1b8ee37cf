//! Client-side batch state reducer
//!
//! Turns the batch progress stream into UI-observable state. The reducer is
//! independent of the transport: any consumer that decodes `ProgressEvent`s
//! (an SSE client, a test harness) can drive it. Logs are append-only;
//! the progress snapshot is replaced wholesale on each `progress` event.

use crate::events::{LogLevel, ProgressEvent};
use serde::{Deserialize, Serialize};

/// Latest progress snapshot, replaced on each `progress` event
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub current: usize,
    pub total: usize,
    pub percent: u8,
}

/// One entry in the client-visible log sequence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
}

/// Client-side mirror of a running batch job
///
/// Mutated only by `apply` (event stream) and `cancel` (user action).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientBatchState {
    /// True between `start` and the terminal event (or cancellation)
    pub is_processing: bool,
    pub progress: ProgressSnapshot,
    pub logs: Vec<LogEntry>,
    /// Terminal message once the run finished or was cancelled
    pub result: Option<String>,
}

impl ClientBatchState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one stream event. Exhaustive over the event vocabulary.
    pub fn apply(&mut self, event: &ProgressEvent) {
        match event {
            ProgressEvent::Start { total, message } => {
                // New run: reset everything accumulated by a previous run
                self.is_processing = true;
                self.progress = ProgressSnapshot {
                    current: 0,
                    total: *total,
                    percent: 0,
                };
                self.logs.clear();
                self.result = None;
                self.logs.push(LogEntry {
                    level: LogLevel::Info,
                    message: message.clone(),
                });
            }
            ProgressEvent::Progress {
                current,
                total,
                percent,
                ..
            } => {
                self.progress = ProgressSnapshot {
                    current: *current,
                    total: *total,
                    percent: *percent,
                };
            }
            ProgressEvent::Log { level, message } => {
                self.logs.push(LogEntry {
                    level: *level,
                    message: message.clone(),
                });
            }
            ProgressEvent::End { message, .. } => {
                self.is_processing = false;
                self.result = Some(message.clone());
                self.logs.push(LogEntry {
                    level: LogLevel::Info,
                    message: message.clone(),
                });
            }
            ProgressEvent::Error { message, details } => {
                self.is_processing = false;
                self.result = Some(message.clone());
                self.logs.push(LogEntry {
                    level: LogLevel::Error,
                    message: format!("{}: {}", message, details),
                });
            }
        }
    }

    /// User-initiated cancellation: stops client-side observation only.
    /// The server-side job keeps running to completion unobserved.
    pub fn cancel(&mut self) {
        if self.is_processing {
            self.is_processing = false;
            self.result = Some("cancelled by user".to_string());
            self.logs.push(LogEntry {
                level: LogLevel::Warning,
                message: "cancelled by user".to_string(),
            });
        }
    }
}
