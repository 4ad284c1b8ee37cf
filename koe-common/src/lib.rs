//! # Koe Common Library
//!
//! Shared code for the koe catalog services including:
//! - Error types
//! - Batch progress event vocabulary (ProgressEvent enum)
//! - Client-side batch state reducer
//! - SSE utilities

pub mod batch_state;
pub mod error;
pub mod events;
pub mod sse;

pub use error::{Error, Result};
