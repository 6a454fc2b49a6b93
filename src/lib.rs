//! # dataset-sync
//!
//! Resumable synchronization engine for large, slowly-changing public
//! internet datasets: zone files, certificate-transparency logs, WHOIS/RIR
//! delegation files, passive-DNS snapshots.
//!
//! ## Design Philosophy
//!
//! dataset-sync is designed to be:
//! - **Resumable** - Repeated runs fetch only what changed; conditional
//!   requests, durable per-feed cursors, and completion markers make a
//!   re-run cheap and safe
//! - **Crash-safe** - Artifacts materialize atomically and cursors never run
//!   ahead of data on disk; an interrupted run loses at most one in-flight
//!   page
//! - **Isolated** - Every source owns its storage subtree; one source's
//!   failure never aborts its siblings
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding
//!
//! ## Quick Start
//!
//! ```no_run
//! use dataset_sync::{Config, Operation, Orchestrator, SnapshotSource};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_file(std::path::Path::new("dataset-sync.json"))?;
//!
//!     let sources = config
//!         .snapshot_sources
//!         .iter()
//!         .map(|s| {
//!             SnapshotSource::from_config(s, &config)
//!                 .map(|s| Arc::new(s) as Arc<dyn dataset_sync::DataSource>)
//!         })
//!         .collect::<Result<Vec<_>, _>>()?;
//!
//!     let cancel = CancellationToken::new();
//!     tokio::spawn(dataset_sync::cancel_on_signal(cancel.clone()));
//!
//!     let report = Orchestrator::new(sources)
//!         .run(Operation::Download, None, &cancel)
//!         .await?;
//!     std::process::exit(if report.all_succeeded() { 0 } else { 1 });
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Durable per-feed sync cursors
pub mod checkpoint;
/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Incremental feed synchronization
pub mod feed;
/// Conditional artifact fetching
pub mod fetcher;
/// Source run orchestration
pub mod orchestrator;
/// External conversion tool seam
pub mod pipeline;
/// Retry logic for transient failures
pub mod retry;
/// Dataset sources and the source interface
pub mod source;
/// Staging idempotency and snapshot partitions
pub mod staging;
/// Core types
pub mod types;

// Re-export commonly used types
pub use checkpoint::{Checkpoint, CheckpointStore};
pub use config::{
    Config, FeedConfig, FeedSourceConfig, HttpConfig, ResourceConfig, RetryConfig,
    SnapshotSourceConfig, StorageConfig,
};
pub use error::{Error, FeedError, FetchError, Result};
pub use feed::FeedSynchronizer;
pub use fetcher::Fetcher;
pub use orchestrator::{Orchestrator, RunReport};
pub use pipeline::{CommandStage, NoOpStage, PipelineStage, ResourceBudget};
pub use source::{DataSource, FeedSource, SnapshotSource, SourceContext};
pub use types::{Auth, FeedState, FetchOutcome, FetchPolicy, Operation, SyncSummary};

use tokio_util::sync::CancellationToken;

/// Cancel the given token when a termination signal arrives.
///
/// Spawn this alongside a run so an operator interrupt propagates as a
/// cooperative cancellation: in-flight retry waits abort immediately and
/// atomic writes leave at most a `.tmp` artifact behind.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal
///   registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
pub async fn cancel_on_signal(cancel: CancellationToken) {
    wait_for_signal().await;
    cancel.cancel();
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Set up signal handlers - these may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
