//! Error types for ingestion, reconciliation and timeline reads.

use thiserror::Error;

use crate::model::Platform;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the engine.
///
/// Adapter errors are recoverable per source and are normally logged and
/// counted by the caller. `Persistence` is fatal to the batch that hit it.
/// Per-item problems use [`NormalizeError`] and never become an `Error`.
#[derive(Error, Debug)]
pub enum Error {
    /// Upstream platform call failed (network, rate limit, bad status).
    #[error("adapter error ({platform}): {source}")]
    Adapter {
        platform: Platform,
        #[source]
        source: anyhow::Error,
    },

    /// Storage unavailable or a statement failed.
    #[error("persistence error: {0}")]
    Persistence(#[from] rusqlite::Error),

    /// No adapter is registered for the platform.
    #[error("no adapter registered for platform {0}")]
    UnsupportedPlatform(Platform),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Malformed pagination cursor.
    #[error("invalid cursor: {0}")]
    Cursor(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Short, stable tag for logs and `fetch_status` columns.
    pub fn tag(&self) -> &'static str {
        match self {
            Error::Adapter { .. } => "adapter",
            Error::Persistence(_) => "persistence",
            Error::UnsupportedPlatform(_) => "unsupported-platform",
            Error::Config(_) => "config",
            Error::Cursor(_) => "cursor",
            Error::Io(_) => "io",
            Error::Json(_) => "json",
        }
    }

    /// True when the whole batch must stop.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Persistence(_) | Error::Io(_))
    }
}

/// Per-item shape problems found while normalizing upstream payloads.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("invalid timestamp in `{field}`: {value}")]
    InvalidTimestamp { field: &'static str, value: String },

    #[error("item has neither a start nor a publish time")]
    NoTimestamp,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_storage_failures_stop_a_batch() {
        let adapter = Error::Adapter {
            platform: Platform::Twitch,
            source: anyhow::anyhow!("502"),
        };
        assert!(!adapter.is_fatal());
        assert!(!Error::UnsupportedPlatform(Platform::Radio).is_fatal());
        assert!(Error::Persistence(rusqlite::Error::InvalidQuery).is_fatal());
        assert_eq!(Error::UnsupportedPlatform(Platform::Radio).tag(), "unsupported-platform");
    }
}
