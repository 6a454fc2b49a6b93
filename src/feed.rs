//! Incremental synchronization of append-only record feeds
//!
//! A feed (e.g. a certificate-transparency log) exposes two endpoints: one
//! reporting its current total record count and one returning a page of
//! records for a `[start, end)` window. Each feed owns a durable
//! [`Checkpoint`] and an append-only JSON-lines data file; a sync cycle pages
//! from the checkpoint to the feed's reported size, persisting the checkpoint
//! after every committed page.
//!
//! The ordering invariant is strict: records are written to disk first, the
//! checkpoint is advanced second. A crash between the two re-fetches at most
//! one window on the next run and never loses committed progress.

use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::config::{FeedConfig, HttpConfig, RetryConfig};
use crate::error::{Error, FeedError, Result};
use crate::pipeline::gzip_command;
use crate::retry::with_retry;
use crate::types::{FeedState, FeedWindow, SyncSummary};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Deserialize)]
struct SizeResponse {
    tree_size: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct PageResponse {
    entries: Option<Vec<serde_json::Value>>,
}

/// Synchronizes append-only feeds into per-feed data files
///
/// One synchronizer serves all feeds of a source; feeds share nothing but
/// the HTTP client and are safe to sync concurrently.
#[derive(Clone, Debug)]
pub struct FeedSynchronizer {
    client: reqwest::Client,
    store: CheckpointStore,
    data_dir: PathBuf,
    feed_config: FeedConfig,
    retry: RetryConfig,
}

impl FeedSynchronizer {
    /// Create a synchronizer storing checkpoints and data files in `data_dir`
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(
        http: &HttpConfig,
        retry: RetryConfig,
        feed_config: FeedConfig,
        data_dir: PathBuf,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(http.connect_timeout)
            .user_agent(http.user_agent.clone())
            .build()
            .map_err(Error::Network)?;

        Ok(Self {
            client,
            store: CheckpointStore::new(data_dir.clone()),
            data_dir,
            feed_config,
            retry,
        })
    }

    /// Access the underlying checkpoint store
    pub fn checkpoints(&self) -> &CheckpointStore {
        &self.store
    }

    /// Run one sync cycle for a single feed
    ///
    /// Pages strictly in increasing window order from the persisted
    /// checkpoint up to the feed's reported size, appending records to
    /// `<feed>_data_<start>.json` (start = the checkpoint at cycle begin) and
    /// persisting the checkpoint after every page. When at least one record
    /// was newly synced the finished data file is gzip-compressed.
    ///
    /// # Errors
    ///
    /// Transient transport failures are retried per the configured policy
    /// before becoming fatal; malformed responses and a checkpoint ahead of
    /// the feed are immediately fatal; cancellation surfaces as
    /// [`Error::Interrupted`].
    pub async fn sync_feed(
        &self,
        feed: &str,
        base_url: &str,
        cancel: &CancellationToken,
    ) -> Result<SyncSummary> {
        let mut checkpoint: Checkpoint = self.store.load(feed).await?.unwrap_or_default();
        let base = base_url.trim_end_matches('/');

        let size = self.fetch_size(feed, base, cancel).await?;

        if checkpoint.entries > size {
            return Err(Error::Feed(FeedError::CheckpointBeyondFeed {
                feed: feed.to_string(),
                entries: checkpoint.entries,
                size,
            }));
        }

        // The feed's last complete index is size - 1; a checkpoint at or past
        // it means there is nothing new this cycle.
        let target = size.saturating_sub(1);
        if checkpoint.entries >= target {
            tracing::info!(
                feed = %feed,
                entries = checkpoint.entries,
                "Feed is already synchronized"
            );
            return Ok(SyncSummary {
                feed: feed.to_string(),
                new_entries: 0,
                total_entries: checkpoint.entries,
                state: FeedState::UpToDate,
            });
        }

        tracing::info!(feed = %feed, size, "Feed has records available");

        // Data files are in the format of <feed>_data_<start-record>.json
        let data_file = self
            .data_dir
            .join(format!("{feed}_data_{}.json", checkpoint.entries));
        tokio::fs::create_dir_all(&self.data_dir).await?;

        let mut new_entries: u64 = 0;

        while checkpoint.entries < target {
            if cancel.is_cancelled() {
                return Err(Error::Interrupted);
            }

            let window = FeedWindow {
                start: checkpoint.entries,
                end: (checkpoint.entries + self.feed_config.page_size).min(target),
            };

            let records = self.fetch_page(feed, base, window, cancel).await?;
            if records.is_empty() {
                // A well-behaved feed never returns an empty window below its
                // reported size; treat it as malformed rather than spinning.
                return Err(Error::Feed(FeedError::MalformedPage {
                    feed: feed.to_string(),
                    start: window.start,
                    end: window.end,
                }));
            }

            let returned = self.append_records(&data_file, &records).await?;

            // Advance by what the feed actually returned, which may be fewer
            // than the requested width. Records are durable before the
            // checkpoint moves.
            checkpoint.entries += returned;
            self.store.save(feed, &checkpoint).await?;
            new_entries += returned;

            tracing::info!(
                feed = %feed,
                downloaded = checkpoint.entries,
                total = size,
                "Feed page committed"
            );
        }

        if new_entries > 0 && self.feed_config.compress {
            compress_file(feed, &data_file).await;
        }

        tracing::info!(
            feed = %feed,
            new_entries,
            total = checkpoint.entries,
            "Feed synchronized"
        );

        Ok(SyncSummary {
            feed: feed.to_string(),
            new_entries,
            total_entries: checkpoint.entries,
            state: FeedState::Synced,
        })
    }

    /// Sync every feed in the map concurrently, one task per feed
    ///
    /// All tasks run to completion even when some fail; the first fatal error
    /// is then propagated (cancellation takes precedence). Feeds share no
    /// mutable state and never block one another.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Interrupted`] if any feed was cancelled, otherwise
    /// the first per-feed fatal error.
    pub async fn sync_all(
        &self,
        feeds: &BTreeMap<String, String>,
        cancel: &CancellationToken,
    ) -> Result<Vec<SyncSummary>> {
        let mut handles = Vec::with_capacity(feeds.len());
        for (feed, base_url) in feeds {
            let sync = self.clone();
            let feed = feed.clone();
            let base_url = base_url.clone();
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                sync.sync_feed(&feed, &base_url, &cancel).await
            }));
        }

        let mut summaries = Vec::with_capacity(handles.len());
        let mut first_error: Option<Error> = None;
        for handle in handles {
            let result = handle
                .await
                .unwrap_or_else(|e| Err(Error::Other(format!("feed task panicked: {e}"))));
            match result {
                Ok(summary) => summaries.push(summary),
                Err(e) if e.is_interrupted() => return Err(Error::Interrupted),
                Err(e) => {
                    tracing::error!(error = %e, "Feed sync failed");
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(summaries),
        }
    }

    async fn fetch_size(
        &self,
        feed: &str,
        base: &str,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let url = format!("{base}/ct/v1/get-sth");
        let size_response: SizeResponse = with_retry(
            &self.retry,
            cancel,
            "feed size query",
            || self.get_json(feed, &url, |detail| {
                Error::Feed(FeedError::MalformedSizeResponse {
                    feed: feed.to_string(),
                    detail,
                })
            }),
        )
        .await?;

        size_response.tree_size.ok_or_else(|| {
            Error::Feed(FeedError::MalformedSizeResponse {
                feed: feed.to_string(),
                detail: "missing tree_size".to_string(),
            })
        })
    }

    async fn fetch_page(
        &self,
        feed: &str,
        base: &str,
        window: FeedWindow,
        cancel: &CancellationToken,
    ) -> Result<Vec<serde_json::Value>> {
        let url = format!(
            "{base}/ct/v1/get-entries?start={}&end={}",
            window.start, window.end
        );
        let page: PageResponse = with_retry(&self.retry, cancel, "feed page fetch", || {
            self.get_json(feed, &url, |_| {
                Error::Feed(FeedError::MalformedPage {
                    feed: feed.to_string(),
                    start: window.start,
                    end: window.end,
                })
            })
        })
        .await?;

        page.entries.ok_or_else(|| {
            Error::Feed(FeedError::MalformedPage {
                feed: feed.to_string(),
                start: window.start,
                end: window.end,
            })
        })
    }

    async fn get_json<T, F>(&self, feed: &str, url: &str, malformed: F) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
        F: FnOnce(String) -> Error,
    {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Feed(FeedError::UnexpectedStatus {
                feed: feed.to_string(),
                status: status.as_u16(),
            }));
        }
        response.json::<T>().await.map_err(|e| malformed(e.to_string()))
    }

    async fn append_records(
        &self,
        data_file: &Path,
        records: &[serde_json::Value],
    ) -> Result<u64> {
        let mut buf = String::new();
        for record in records {
            buf.push_str(&serde_json::to_string(record)?);
            buf.push('\n');
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(data_file)
            .await?;
        file.write_all(buf.as_bytes()).await?;
        file.flush().await?;

        Ok(records.len() as u64)
    }
}

/// Compress a finished data file in place (`file` becomes `file.gz`)
///
/// Compression is an optimization, not a correctness requirement: a missing
/// gzip binary or a failed compression logs a warning and leaves the plain
/// file behind.
async fn compress_file(feed: &str, data_file: &Path) {
    let Some(gzip) = gzip_command() else {
        tracing::warn!(feed = %feed, "No pigz or gzip binary found, leaving data file uncompressed");
        return;
    };

    tracing::info!(feed = %feed, file = %data_file.display(), "Compressing data file");
    match tokio::process::Command::new(&gzip)
        .arg(data_file)
        .status()
        .await
    {
        Ok(status) if status.success() => {}
        Ok(status) => {
            tracing::warn!(feed = %feed, %status, "Compression exited non-zero");
        }
        Err(e) => {
            tracing::warn!(feed = %feed, error = %e, "Failed to run compression");
        }
    }
}
