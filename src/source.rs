//! Dataset sources and the polymorphic source interface
//!
//! A source owns one storage subtree and two operations: `download` pulls
//! remote artifacts into that subtree, `normalize` feeds them to an external
//! conversion stage. The orchestrator depends only on the [`DataSource`]
//! trait; capability flags replace the per-source special cases a driver
//! would otherwise accumulate.
//!
//! Two reference implementations cover the two shapes every dataset provider
//! falls into:
//! - [`FeedSource`] — append-only record feeds with durable cursors
//! - [`SnapshotSource`] — fixed artifact lists fetched into dated partitions

use crate::checkpoint::CheckpointStore;
use crate::config::{Config, FeedSourceConfig, RetryConfig, SnapshotSourceConfig};
use crate::error::{Error, Result};
use crate::feed::FeedSynchronizer;
use crate::fetcher::{Fetcher, filename_from_url};
use crate::pipeline::{PipelineStage, ResourceBudget};
use crate::retry::with_retry;
use crate::staging;
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Per-run context passed to source operations
#[derive(Clone, Debug)]
pub struct SourceContext {
    /// Cooperative interruption token for the run
    pub cancel: CancellationToken,
    /// Date stamped onto new snapshot partitions
    pub run_date: NaiveDate,
}

impl SourceContext {
    /// Context for a run starting now
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            run_date: chrono::Utc::now().date_naive(),
        }
    }

    /// Override the partition date (used by replays and tests)
    #[must_use]
    pub fn with_run_date(mut self, run_date: NaiveDate) -> Self {
        self.run_date = run_date;
        self
    }
}

/// Interface between the orchestrator and a dataset source
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Source name; also names its storage subtree and log lines
    fn name(&self) -> &str;

    /// Whether the source is usable with the current configuration
    fn is_available(&self) -> bool {
        true
    }

    /// Whether the source runs only when explicitly selected
    ///
    /// Sources that pull very large volumes opt in here so a routine run
    /// over "all sources" does not accidentally start them.
    fn requires_manual_selection(&self) -> bool {
        false
    }

    /// Pull remote artifacts into this source's storage subtree
    async fn download(&self, ctx: &SourceContext) -> Result<()>;

    /// Produce derived outputs from downloaded artifacts
    async fn normalize(&self, ctx: &SourceContext) -> Result<()>;
}

/// Source backed by a set of append-only record feeds
///
/// `download` runs one sync cycle per feed, concurrently. `normalize` pushes
/// each finished data file through the configured conversion stage, skipping
/// outputs that already exist — feed data grows over time, so idempotence
/// here is per data file rather than per directory.
pub struct FeedSource {
    name: String,
    feeds: BTreeMap<String, String>,
    manual: bool,
    storage_dir: PathBuf,
    sync: FeedSynchronizer,
    stage: Option<Arc<dyn PipelineStage>>,
    budget: ResourceBudget,
}

impl FeedSource {
    /// Build from configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn from_config(source: &FeedSourceConfig, config: &Config) -> Result<Self> {
        let storage_dir = config.source_storage_dir(&source.name);
        let sync = FeedSynchronizer::new(
            &config.http,
            config.retry.clone(),
            config.feed.clone(),
            storage_dir.clone(),
        )?;

        Ok(Self {
            name: source.name.clone(),
            feeds: source.feeds.clone(),
            manual: source.manual,
            storage_dir,
            sync,
            stage: None,
            budget: ResourceBudget::from_config(&config.resources),
        })
    }

    /// Attach the conversion stage used by `normalize`
    ///
    /// Without a stage, `normalize` logs and returns without doing work,
    /// mirroring a machine that simply has no converters installed.
    #[must_use]
    pub fn with_stage(mut self, stage: Arc<dyn PipelineStage>) -> Self {
        self.stage = Some(stage);
        self
    }

    /// Checkpoint store for this source's feeds
    pub fn checkpoints(&self) -> &CheckpointStore {
        self.sync.checkpoints()
    }

    fn data_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        let entries = match std::fs::read_dir(&self.storage_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(files),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.contains("_data_") && (name.ends_with(".json") || name.ends_with(".json.gz")) {
                files.push(entry.path());
            }
        }
        files.sort();
        Ok(files)
    }
}

#[async_trait]
impl DataSource for FeedSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_available(&self) -> bool {
        !self.feeds.is_empty()
    }

    fn requires_manual_selection(&self) -> bool {
        self.manual
    }

    async fn download(&self, ctx: &SourceContext) -> Result<()> {
        self.sync.sync_all(&self.feeds, &ctx.cancel).await?;
        Ok(())
    }

    async fn normalize(&self, ctx: &SourceContext) -> Result<()> {
        let Some(stage) = &self.stage else {
            tracing::warn!(source = %self.name, "No conversion stage configured, skipping normalization");
            return Ok(());
        };

        let norm = self.storage_dir.join("normalized");
        tokio::fs::create_dir_all(&norm).await?;

        for src in self.data_files()? {
            if ctx.cancel.is_cancelled() {
                return Err(Error::Interrupted);
            }

            let dst = norm.join(derived_name(&src, "mtbl"));
            if tokio::fs::metadata(&dst).await.is_ok() {
                continue;
            }

            tracing::info!(source = %self.name, file = %src.display(), "Converting data file");
            stage.run(&src, &dst, &self.budget).await?;
        }

        Ok(())
    }
}

/// Source backed by a fixed list of artifact URLs
///
/// `download` fetches every artifact into the run's dated partition through
/// the conditional fetcher, retrying transient failures per artifact.
/// `normalize` converts the latest partition, guarded by the staging marker
/// so finished partitions are never reprocessed.
pub struct SnapshotSource {
    name: String,
    urls: Vec<String>,
    manual: bool,
    storage_dir: PathBuf,
    fetcher: Fetcher,
    retry: RetryConfig,
    stage: Option<Arc<dyn PipelineStage>>,
    budget: ResourceBudget,
}

impl SnapshotSource {
    /// Build from configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn from_config(source: &SnapshotSourceConfig, config: &Config) -> Result<Self> {
        let fetcher = Fetcher::new(&config.http)?
            .with_policy(source.fetch_policy)
            .with_auth(source.auth.clone());

        Ok(Self {
            name: source.name.clone(),
            urls: source.urls.clone(),
            manual: source.manual,
            storage_dir: config.source_storage_dir(&source.name),
            fetcher,
            retry: config.retry.clone(),
            stage: None,
            budget: ResourceBudget::from_config(&config.resources),
        })
    }

    /// Attach the conversion stage used by `normalize`
    #[must_use]
    pub fn with_stage(mut self, stage: Arc<dyn PipelineStage>) -> Self {
        self.stage = Some(stage);
        self
    }
}

#[async_trait]
impl DataSource for SnapshotSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_available(&self) -> bool {
        !self.urls.is_empty()
    }

    fn requires_manual_selection(&self) -> bool {
        self.manual
    }

    async fn download(&self, ctx: &SourceContext) -> Result<()> {
        let dir = staging::snapshot_dir(&self.storage_dir, ctx.run_date);

        for url in &self.urls {
            if ctx.cancel.is_cancelled() {
                return Err(Error::Interrupted);
            }

            let dst = dir.join(filename_from_url(url)?);
            tracing::info!(source = %self.name, dest = %dst.display(), "Downloading");
            with_retry(&self.retry, &ctx.cancel, "artifact fetch", || {
                self.fetcher.fetch(url, &dst)
            })
            .await?;
        }

        Ok(())
    }

    async fn normalize(&self, ctx: &SourceContext) -> Result<()> {
        let Some(stage) = &self.stage else {
            tracing::warn!(source = %self.name, "No conversion stage configured, skipping normalization");
            return Ok(());
        };

        let data = staging::latest_snapshot(&self.storage_dir).await?;
        let norm = data.join("normalized");

        if staging::is_stage_complete(&norm).await {
            tracing::info!(source = %self.name, dir = %data.display(), "Normalized data is already present");
            return Ok(());
        }
        tokio::fs::create_dir_all(&norm).await?;

        let mut artifacts: Vec<PathBuf> = Vec::new();
        let mut entries = tokio::fs::read_dir(&data).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                artifacts.push(entry.path());
            }
        }
        artifacts.sort();

        for src in artifacts {
            if ctx.cancel.is_cancelled() {
                return Err(Error::Interrupted);
            }
            let dst = norm.join(derived_name(&src, "csv"));
            tracing::info!(source = %self.name, file = %src.display(), "Converting artifact");
            stage.run(&src, &dst, &self.budget).await?;
        }

        // Only after every artifact converted cleanly
        staging::mark_stage_complete(&norm).await?;
        Ok(())
    }
}

/// Derived output filename: strip a trailing `.gz`, replace the extension
fn derived_name(src: &Path, ext: &str) -> String {
    let name = src
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let base = name.strip_suffix(".gz").unwrap_or(&name);
    match base.rsplit_once('.') {
        Some((stem, _)) => format!("{stem}.{ext}"),
        None => format!("{base}.{ext}"),
    }
}
