//! Retry logic for transient failures
//!
//! This module provides the fixed-interval retry policy applied to remote
//! index and paginated-feed requests. The attempt budget is tracked per
//! logical operation, not globally, and a cooperative interruption is never
//! absorbed as a retryable failure.
//!
//! # Example
//!
//! ```no_run
//! use dataset_sync::retry::with_retry;
//! use dataset_sync::config::RetryConfig;
//! use dataset_sync::error::Error;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Error> {
//! let config = RetryConfig::default();
//! let cancel = CancellationToken::new();
//! let body = with_retry(&config, &cancel, "index fetch", || async {
//!     // Your network operation here
//!     Ok::<_, Error>(String::new())
//! }).await?;
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::{Error, FeedError, Result};
use std::future::Future;
use tokio_util::sync::CancellationToken;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (network timeouts, connection resets, server busy)
/// should return `true`. Permanent failures (4xx responses, malformed
/// payloads, local I/O on bad paths) should return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            // Network errors are retryable when they are connection-level
            Error::Network(e) => e.is_timeout() || e.is_connect(),
            // I/O errors can be retryable in some cases
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::Interrupted
            ),
            // Feed endpoints opt into 5xx retries; 4xx is a permanent answer
            Error::Feed(FeedError::UnexpectedStatus { status, .. }) => *status >= 500,
            // Cancellation propagates, never retries
            Error::Interrupted => false,
            // Everything else is permanent for the current operation
            _ => false,
        }
    }
}

/// Execute an async operation with fixed-interval retry logic
///
/// On a retryable failure the operation waits `config.delay` and tries again,
/// up to `config.max_attempts` total attempts. Exhausting the budget converts
/// the last error into [`Error::RetriesExhausted`] carrying the operation
/// name and attempt count. A cancellation pre-empts the backoff sleep and
/// surfaces immediately as [`Error::Interrupted`] — it is never counted as an
/// attempt and never retried.
///
/// # Arguments
///
/// * `config` - Retry configuration (max attempts, fixed delay)
/// * `cancel` - Cooperative interruption token for the current run
/// * `operation_name` - Logical operation label used in logs and errors
/// * `operation` - Async closure returning `Result<T>`
///
/// # Errors
///
/// Returns the operation's own error for non-retryable failures,
/// [`Error::Interrupted`] on cancellation, and [`Error::RetriesExhausted`]
/// when the attempt budget runs out.
pub async fn with_retry<F, Fut, T>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    operation_name: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(Error::Interrupted);
        }

        attempt += 1;
        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::info!(
                        operation = operation_name,
                        attempts = attempt,
                        "Operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(e) if e.is_interrupted() => return Err(Error::Interrupted),
            Err(e) if e.is_retryable() && attempt < config.max_attempts => {
                tracing::warn!(
                    operation = operation_name,
                    error = %e,
                    attempt = attempt,
                    max_attempts = config.max_attempts,
                    delay_secs = config.delay.as_secs(),
                    "Operation failed, retrying"
                );

                tokio::select! {
                    _ = cancel.cancelled() => return Err(Error::Interrupted),
                    _ = tokio::time::sleep(config.delay) => {}
                }
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::error!(
                        operation = operation_name,
                        error = %e,
                        attempts = attempt,
                        "Operation failed after all retry attempts exhausted"
                    );
                    return Err(Error::RetriesExhausted {
                        operation: operation_name.to_string(),
                        attempts: attempt,
                        source: Box::new(e),
                    });
                }
                tracing::error!(
                    operation = operation_name,
                    error = %e,
                    "Operation failed with non-retryable error"
                );
                return Err(e);
            }
        }
    }
}
