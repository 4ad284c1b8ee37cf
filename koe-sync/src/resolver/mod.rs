//! Work resolution
//!
//! Turns a work ID into either normalized storefront metadata
//! ([`storefront::WorkInfo`]) or a local track tree ([`library::TrackNode`]).
//! Resolution is an idempotent, pure mapping; all mutation happens in the
//! engine and the store.

pub mod library;
pub mod storefront;

pub use library::{LibraryScanner, TrackKind, TrackNode};
pub use storefront::{StorefrontClient, WorkInfo};

use thiserror::Error;

/// Per-item resolution errors.
///
/// All variants are recorded as per-item failures by the batch engine; none
/// of them aborts a running batch.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The storefront has no record for this ID
    #[error("work {0} not found")]
    NotFound(String),

    /// Transport failure before any HTTP status was obtained
    #[error("storefront transport error: {0}")]
    Transport(String),

    /// Non-2xx storefront response; `message` distinguishes an HTML error
    /// page from a structured JSON error body
    #[error("storefront error ({status}): {message}")]
    Upstream { status: u16, message: String },

    /// Expected document structure missing
    #[error("failed to parse storefront response: {0}")]
    Parse(String),

    /// Local filesystem failure while building a track tree
    #[error("library IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Validate an explicit work ID: `RJ` followed by 6 to 8 digits.
pub fn is_valid_work_id(id: &str) -> bool {
    let Some(digits) = id.strip_prefix("RJ") else {
        return false;
    };
    (6..=8).contains(&digits.len()) && digits.bytes().all(|b| b.is_ascii_digit())
}

/// Extract an embedded work ID from a library folder name,
/// e.g. `"RJ123456 some title"` or `"[RJ123456] title"`.
pub fn extract_work_id(name: &str) -> Option<String> {
    let bytes = name.as_bytes();
    for start in 0..bytes.len().saturating_sub(1) {
        if &bytes[start..start + 2] != b"RJ" {
            continue;
        }
        let digits: usize = bytes[start + 2..]
            .iter()
            .take_while(|b| b.is_ascii_digit())
            .count();
        if (6..=8).contains(&digits) {
            return Some(name[start..start + 2 + digits].to_string());
        }
    }
    None
}
