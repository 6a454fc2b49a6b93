//! Error types for dataset-sync
//!
//! This module provides comprehensive error handling for the library, including:
//! - Domain-specific error types (Fetch, Feed)
//! - A distinction between transient failures (fed into the retry layer),
//!   skips (normal outcomes), and fatal failures (abort one source's operation)
//! - Cooperative interruption, which is always fatal to the whole run

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for dataset-sync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for dataset-sync
///
/// This is the primary error type used throughout the library. Each variant includes
/// contextual information to help diagnose issues.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "storage_dir")
        key: Option<String>,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Conditional fetch error
    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Incremental feed error
    #[error("feed error: {0}")]
    Feed(#[from] FeedError),

    /// External tool execution failed (converter, pigz, etc.)
    #[error("external tool error: {0}")]
    ExternalTool(String),

    /// A retried operation exhausted its attempt budget
    #[error("{operation} failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        /// The logical operation that was retried (e.g., "feed size query")
        operation: String,
        /// Number of attempts made before giving up
        attempts: u32,
        /// The last error observed
        #[source]
        source: Box<Error>,
    },

    /// A source's operation failed; carries the source identity for reporting
    #[error("source {name} failed during {operation}: {source}")]
    Source {
        /// Name of the failing source
        name: String,
        /// The operation that failed ("download" or "normalize")
        operation: String,
        /// The underlying failure
        #[source]
        source: Box<Error>,
    },

    /// Cooperative interruption (operator-requested cancellation)
    #[error("operation interrupted")]
    Interrupted,

    /// No dated snapshot partition exists for a source
    #[error("no dataset snapshot available for {0}")]
    NoSnapshot(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Conditional fetch errors
#[derive(Debug, Error)]
pub enum FetchError {
    /// The destination path has no parent directory or filename component
    #[error("invalid destination path {path}: {reason}")]
    InvalidDestination {
        /// The offending destination path
        path: PathBuf,
        /// Why the path is unusable
        reason: String,
    },

    /// A URL could not be parsed or has no usable filename segment
    #[error("invalid source URL {url}: {reason}")]
    InvalidUrl {
        /// The offending URL
        url: String,
        /// Why the URL is unusable
        reason: String,
    },
}

/// Incremental feed errors
///
/// All of these are fatal for the affected feed's sync cycle; none are
/// retried. Transient transport problems surface as [`Error::Network`]
/// instead and go through the retry layer.
#[derive(Debug, Error)]
pub enum FeedError {
    /// Feed name contains path separators or is empty
    #[error("invalid feed name {0:?}")]
    InvalidName(String),

    /// The size endpoint returned a payload without the expected fields
    #[error("feed {feed} returned a malformed size response: {detail}")]
    MalformedSizeResponse {
        /// The feed whose size query failed
        feed: String,
        /// What was wrong with the payload
        detail: String,
    },

    /// A page response was missing its `entries` sequence
    #[error("feed {feed} returned a malformed page for window [{start}, {end})")]
    MalformedPage {
        /// The feed whose page was malformed
        feed: String,
        /// Window start index
        start: u64,
        /// Window end index (exclusive)
        end: u64,
    },

    /// The size or page endpoint answered with a non-success status
    #[error("feed {feed} endpoint returned HTTP {status}")]
    UnexpectedStatus {
        /// The feed being queried
        feed: String,
        /// The HTTP status code received
        status: u16,
    },

    /// The persisted checkpoint claims more entries than the feed reports
    ///
    /// This indicates either local state corruption or a feed that shrank;
    /// both violate the append-only contract and require operator attention.
    #[error("feed {feed} checkpoint {entries} exceeds reported size {size}")]
    CheckpointBeyondFeed {
        /// The feed with inconsistent state
        feed: String,
        /// Entries recorded in the local checkpoint
        entries: u64,
        /// Total size reported by the feed
        size: u64,
    },
}

impl Error {
    /// Wrap this error with the identity of the source whose operation failed
    ///
    /// Interruptions are never wrapped: they must propagate unchanged so the
    /// orchestrator can distinguish them from per-source failures.
    pub fn for_source(self, name: &str, operation: &str) -> Error {
        match self {
            Error::Interrupted => Error::Interrupted,
            other => Error::Source {
                name: name.to_string(),
                operation: operation.to_string(),
                source: Box::new(other),
            },
        }
    }

    /// True if this error is (or wraps) a cooperative interruption
    pub fn is_interrupted(&self) -> bool {
        match self {
            Error::Interrupted => true,
            Error::RetriesExhausted { source, .. } | Error::Source { source, .. } => {
                source.is_interrupted()
            }
            _ => false,
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn for_source_wraps_with_identity() {
        let err = Error::Other("boom".into()).for_source("ct", "download");
        match err {
            Error::Source {
                name, operation, ..
            } => {
                assert_eq!(name, "ct");
                assert_eq!(operation, "download");
            }
            other => panic!("expected Source wrapper, got {other:?}"),
        }
    }

    #[test]
    fn for_source_never_wraps_interruption() {
        let err = Error::Interrupted.for_source("ct", "download");
        assert!(matches!(err, Error::Interrupted));
    }

    #[test]
    fn is_interrupted_sees_through_wrappers() {
        let err = Error::RetriesExhausted {
            operation: "page fetch".into(),
            attempts: 3,
            source: Box::new(Error::Interrupted),
        };
        assert!(err.is_interrupted());

        let err = Error::Other("boom".into()).for_source("rir", "normalize");
        assert!(!err.is_interrupted());
    }

    #[test]
    fn display_includes_source_context() {
        let err = Error::Other("connection reset".into()).for_source("sonar", "download");
        let msg = err.to_string();
        assert!(msg.contains("sonar"));
        assert!(msg.contains("download"));
        assert!(msg.contains("connection reset"));
    }

    #[test]
    fn display_includes_attempt_count() {
        let err = Error::RetriesExhausted {
            operation: "feed size query".into(),
            attempts: 5,
            source: Box::new(Error::Other("timeout".into())),
        };
        let msg = err.to_string();
        assert!(msg.contains("5 attempts"));
        assert!(msg.contains("feed size query"));
    }

    #[test]
    fn feed_error_display_carries_window() {
        let err = FeedError::MalformedPage {
            feed: "argon2026".into(),
            start: 2000,
            end: 4000,
        };
        assert_eq!(
            err.to_string(),
            "feed argon2026 returned a malformed page for window [2000, 4000)"
        );
    }
}
