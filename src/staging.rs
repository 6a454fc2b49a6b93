//! Staging idempotency protocol and dated snapshot partitions
//!
//! A derived-output directory is "complete" exactly when it contains the
//! zero-byte `_normalized_` marker. Stage-producing code checks the marker at
//! entry and skips finished work; the marker is written only after every
//! derived artifact exists, so a partially produced stage never carries it.
//! Deleting the marker forces the stage to be recomputed.
//!
//! Batch-style sources store each run in a `YYYYMMDD` partition; "latest" is
//! the numerically greatest partition present on disk.

use crate::error::{Error, Result};
use chrono::NaiveDate;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// Marker filename signaling a complete derived-output directory
pub const STAGE_MARKER: &str = "_normalized_";

static PARTITION_NAME: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)]
    let pattern = Regex::new(r"^\d{8}$").expect("partition pattern is valid");
    pattern
});

/// True when the directory carries the completion marker
///
/// A missing directory reads as incomplete.
pub async fn is_stage_complete(staging_dir: &Path) -> bool {
    tokio::fs::metadata(staging_dir.join(STAGE_MARKER))
        .await
        .is_ok()
}

/// Mark the directory's derived output as complete
///
/// Call this only after all derived artifacts for the stage have been
/// durably written.
///
/// # Errors
///
/// Returns an I/O error when the directory or marker cannot be created.
pub async fn mark_stage_complete(staging_dir: &Path) -> Result<()> {
    tokio::fs::create_dir_all(staging_dir).await?;
    tokio::fs::write(staging_dir.join(STAGE_MARKER), b"").await?;
    tracing::debug!(dir = %staging_dir.display(), "Stage marked complete");
    Ok(())
}

/// Partition name for the given date (`YYYYMMDD`)
pub fn snapshot_name(date: NaiveDate) -> String {
    date.format("%Y%m%d").to_string()
}

/// Path of the partition for the given date under `root`
pub fn snapshot_dir(root: &Path, date: NaiveDate) -> PathBuf {
    root.join(snapshot_name(date))
}

/// Find the most recent dated partition under `root`
///
/// Only names matching `YYYYMMDD` are considered; anything else in the
/// directory is ignored.
///
/// # Errors
///
/// Returns [`Error::NoSnapshot`] when no partition exists (including when
/// `root` itself is missing).
pub async fn latest_snapshot(root: &Path) -> Result<PathBuf> {
    let mut latest: Option<String> = None;

    let mut entries = match tokio::fs::read_dir(root).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::NoSnapshot(root.display().to_string()));
        }
        Err(e) => return Err(e.into()),
    };

    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_dir() {
            continue;
        }
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !PARTITION_NAME.is_match(name) {
            continue;
        }
        // Fixed-width digit names compare correctly as strings
        if latest.as_deref().is_none_or(|cur| name > cur) {
            latest = Some(name.to_string());
        }
    }

    latest
        .map(|name| root.join(name))
        .ok_or_else(|| Error::NoSnapshot(root.display().to_string()))
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn fresh_directory_is_incomplete() {
        let dir = TempDir::new().unwrap();
        assert!(!is_stage_complete(dir.path()).await);
    }

    #[tokio::test]
    async fn missing_directory_is_incomplete() {
        assert!(!is_stage_complete(Path::new("/nonexistent/staging")).await);
    }

    #[tokio::test]
    async fn mark_then_check_round_trips() {
        let dir = TempDir::new().unwrap();
        let staging = dir.path().join("normalized");

        mark_stage_complete(&staging).await.unwrap();

        assert!(is_stage_complete(&staging).await);
        let marker = staging.join(STAGE_MARKER);
        assert_eq!(
            std::fs::metadata(&marker).unwrap().len(),
            0,
            "marker is a zero-byte sentinel"
        );
    }

    #[tokio::test]
    async fn deleting_the_marker_reopens_the_stage() {
        let dir = TempDir::new().unwrap();
        mark_stage_complete(dir.path()).await.unwrap();
        assert!(is_stage_complete(dir.path()).await);

        std::fs::remove_file(dir.path().join(STAGE_MARKER)).unwrap();
        assert!(!is_stage_complete(dir.path()).await);
    }

    #[test]
    fn snapshot_name_is_compact_date() {
        let date = NaiveDate::from_ymd_opt(2026, 8, 6).unwrap();
        assert_eq!(snapshot_name(date), "20260806");
        assert_eq!(
            snapshot_dir(Path::new("/data/zones"), date),
            PathBuf::from("/data/zones/20260806")
        );
    }

    #[tokio::test]
    async fn latest_snapshot_picks_greatest_partition() {
        let dir = TempDir::new().unwrap();
        for name in ["20260101", "20251231", "20260806"] {
            std::fs::create_dir(dir.path().join(name)).unwrap();
        }

        let latest = latest_snapshot(dir.path()).await.unwrap();
        assert_eq!(latest, dir.path().join("20260806"));
    }

    #[tokio::test]
    async fn latest_snapshot_ignores_non_partition_entries() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("20260101")).unwrap();
        std::fs::create_dir(dir.path().join("normalized")).unwrap();
        std::fs::create_dir(dir.path().join("2026")).unwrap();
        // A plain file whose name looks like a partition must not win
        std::fs::write(dir.path().join("99999999"), b"").unwrap();

        let latest = latest_snapshot(dir.path()).await.unwrap();
        assert_eq!(latest, dir.path().join("20260101"));
    }

    #[tokio::test]
    async fn latest_snapshot_errors_when_none_exist() {
        let dir = TempDir::new().unwrap();
        let err = latest_snapshot(dir.path()).await.unwrap_err();
        assert!(matches!(err, Error::NoSnapshot(_)));

        let err = latest_snapshot(&dir.path().join("missing")).await.unwrap_err();
        assert!(matches!(err, Error::NoSnapshot(_)));
    }
}
