//! Durable per-feed sync cursors
//!
//! Each incremental feed owns one small JSON file (`<feed>_meta.json`)
//! recording how many records have been synced. The file is read at the start
//! of a sync cycle and rewritten after every committed batch, so a crash
//! mid-sync loses at most the in-flight batch, never already-committed
//! progress.

use crate::error::{Error, FeedError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Durable cursor for one feed
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Number of feed records synced so far
    pub entries: u64,
}

impl Checkpoint {
    /// Create a checkpoint at the given record count
    pub fn new(entries: u64) -> Self {
        Self { entries }
    }
}

/// Directory-backed store of per-feed checkpoints
///
/// Checkpoints for different feeds live in separate files and are readable
/// and writable independently; concurrent feed tasks never touch each
/// other's cursor.
#[derive(Clone, Debug)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    /// Create a store rooted at `dir`
    ///
    /// The directory is created lazily on first save.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of the named feed's checkpoint file
    pub fn meta_path(&self, feed: &str) -> PathBuf {
        self.dir.join(format!("{feed}_meta.json"))
    }

    /// Load the named feed's checkpoint, if one has ever been saved
    ///
    /// # Errors
    ///
    /// Returns an error for invalid feed names, unreadable files, or a file
    /// that does not parse as a checkpoint. A missing file is `Ok(None)`.
    pub async fn load(&self, feed: &str) -> Result<Option<Checkpoint>> {
        validate_feed_name(feed)?;
        let path = self.meta_path(feed);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let checkpoint: Checkpoint = serde_json::from_str(&raw)?;
        Ok(Some(checkpoint))
    }

    /// Durably persist the named feed's checkpoint
    ///
    /// The write is atomic at the granularity of one checkpoint: the new
    /// state is written to a temporary sibling and renamed into place, so a
    /// reader never observes a torn file.
    pub async fn save(&self, feed: &str, checkpoint: &Checkpoint) -> Result<()> {
        validate_feed_name(feed)?;
        tokio::fs::create_dir_all(&self.dir).await?;

        let path = self.meta_path(feed);
        let tmp = tmp_sibling(&path);
        let payload = serde_json::to_string(checkpoint)?;
        tokio::fs::write(&tmp, payload.as_bytes()).await?;
        tokio::fs::rename(&tmp, &path).await?;

        tracing::debug!(feed = %feed, entries = checkpoint.entries, "Checkpoint persisted");
        Ok(())
    }
}

fn tmp_sibling(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(".tmp");
    PathBuf::from(os)
}

fn validate_feed_name(feed: &str) -> Result<()> {
    let ok = !feed.is_empty()
        && feed
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.');
    if ok && feed != "." && feed != ".." {
        Ok(())
    } else {
        Err(Error::Feed(FeedError::InvalidName(feed.to_string())))
    }
}
