//! Core types for dataset-sync

use serde::{Deserialize, Serialize};

/// Outcome of a single conditional fetch
///
/// Skips are normal outcomes, not errors: they are the dedup/resume mechanism
/// that makes repeated runs cheap. Transport failures surface as
/// [`crate::Error`] instead.
#[must_use]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The artifact was downloaded and atomically moved into place
    Downloaded {
        /// Number of body bytes written to the destination
        bytes: u64,
    },

    /// The server answered `304 Not Modified`; the local file is current
    SkippedNotModified,

    /// The declared `Content-Length` equals the local file size
    SkippedSameSize,

    /// The server answered with a non-success status; nothing was written
    SkippedServerStatus {
        /// The HTTP status code received
        status: u16,
    },

    /// The destination already exists and the source's policy skips the
    /// network check entirely
    SkippedExisting,
}

impl FetchOutcome {
    /// True for any skip variant
    pub fn is_skip(&self) -> bool {
        !matches!(self, FetchOutcome::Downloaded { .. })
    }

    /// Bytes written to the destination (zero for skips)
    pub fn bytes_written(&self) -> u64 {
        match self {
            FetchOutcome::Downloaded { bytes } => *bytes,
            _ => 0,
        }
    }
}

/// Per-source freshness policy for conditional fetches
///
/// Some providers rate-limit aggressively enough that re-checking an artifact
/// that already exists locally is not worth a request; those sources use
/// [`FetchPolicy::SkipIfExists`] and accept that a changed remote file will
/// not be picked up. The default performs the conditional request and lets
/// the server decide.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchPolicy {
    /// Send `If-Modified-Since` and branch on the server's response
    #[default]
    Conditional,

    /// Skip the fetch entirely whenever the destination file exists
    SkipIfExists,
}

/// Request authentication for a remote source
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Auth {
    /// No authentication
    #[default]
    None,

    /// HTTP basic auth
    Basic {
        /// Account username
        username: String,
        /// Account password
        password: String,
    },

    /// API key sent as a request header
    ApiKey {
        /// Header name (e.g., "Authorization" or a vendor header)
        header: String,
        /// The key value
        key: String,
    },
}

/// Operation the orchestrator runs across sources
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Pull remote artifacts into local storage
    Download,
    /// Produce derived outputs from downloaded artifacts
    Normalize,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::Download => write!(f, "download"),
            Operation::Normalize => write!(f, "normalize"),
        }
    }
}

/// Terminal state of one feed sync cycle
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedState {
    /// The checkpoint already matched the feed's reported size
    UpToDate,
    /// One or more windows were fetched and committed this cycle
    Synced,
}

/// Result of one feed sync cycle
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SyncSummary {
    /// Feed name
    pub feed: String,
    /// Records newly appended during this cycle
    pub new_entries: u64,
    /// Total records recorded in the checkpoint after the cycle
    pub total_entries: u64,
    /// Whether the cycle paged or found the feed already current
    pub state: FeedState,
}

/// A half-open record-index range requested from a feed in one page fetch
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FeedWindow {
    /// First record index requested
    pub start: u64,
    /// One past the last record index requested
    pub end: u64,
}

impl FeedWindow {
    /// Number of records covered by this window
    pub fn width(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }
}

impl std::fmt::Display for FeedWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}
