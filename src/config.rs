//! Configuration types for dataset-sync

use crate::error::{Error, Result};
use crate::types::{Auth, FetchPolicy};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    time::Duration,
};

/// Storage layout configuration (where datasets and reports live)
///
/// Each source owns the subtree `<storage_dir>/<source-name>`; no two sources
/// share a directory. Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory for downloaded datasets (default: "./data")
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// Root directory for derived reports (default: "./reports")
    #[serde(default = "default_reports_dir")]
    pub reports_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            reports_dir: default_reports_dir(),
        }
    }
}

/// Retry configuration for transient failures
///
/// The policy is a fixed interval between attempts. The interval is
/// deliberately long: the upstream dataset providers are slow-moving and
/// sensitive to request volume, so hammering them with rapid retries buys
/// nothing.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts per logical operation (default: 5)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Fixed delay between attempts (default: 30 seconds)
    #[serde(default = "default_retry_delay", with = "duration_serde")]
    pub delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_secs(30),
        }
    }
}

/// HTTP client configuration shared by fetches and feed requests
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HttpConfig {
    /// TCP connect timeout (default: 30 seconds)
    ///
    /// A total-request timeout is intentionally absent: artifact bodies can
    /// be tens of gigabytes and take hours on slow links.
    #[serde(default = "default_connect_timeout", with = "duration_serde")]
    pub connect_timeout: Duration,

    /// User-Agent header sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: default_connect_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

/// Incremental feed sync configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Maximum records per page request (default: 2000)
    #[serde(default = "default_page_size")]
    pub page_size: u64,

    /// Compress finished data files with pigz/gzip (default: true)
    #[serde(default = "default_true")]
    pub compress: bool,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            compress: true,
        }
    }
}

/// Resource ceiling handed to external conversion tools
///
/// The sort/merge steps inside the converters may consume most of available
/// memory and all cores by design; these knobs bound them instead of letting
/// the tools hard-code their own limits.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResourceConfig {
    /// Memory ceiling expressed the way `sort -S` accepts it (default: "50%")
    #[serde(default = "default_max_ram")]
    pub max_ram: String,

    /// Core count for parallel tools (default: all cores)
    #[serde(default)]
    pub max_cores: Option<usize>,

    /// Scratch directory for external tools (default: the system temp dir)
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            max_ram: default_max_ram(),
            max_cores: None,
            temp_dir: default_temp_dir(),
        }
    }
}

/// Configuration for one feed-style source (a set of append-only logs)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FeedSourceConfig {
    /// Source name; also its storage subtree under `storage_dir`
    pub name: String,

    /// Feed name to base URL, e.g. `"argon2026" -> "https://ct.example.com/logs/argon2026"`
    #[serde(default)]
    pub feeds: BTreeMap<String, String>,

    /// Whether this source only runs when explicitly selected (default: true,
    /// matching the volume of data a full feed sync pulls)
    #[serde(default = "default_true")]
    pub manual: bool,
}

/// Configuration for one snapshot-style source (dated artifact batches)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SnapshotSourceConfig {
    /// Source name; also its storage subtree under `storage_dir`
    pub name: String,

    /// Artifact URLs downloaded into each dated partition
    #[serde(default)]
    pub urls: Vec<String>,

    /// Freshness policy for this source's fetches
    #[serde(default)]
    pub fetch_policy: FetchPolicy,

    /// Request authentication
    #[serde(default)]
    pub auth: Auth,

    /// Whether this source only runs when explicitly selected (default: false)
    #[serde(default)]
    pub manual: bool,
}

/// Main configuration for the synchronization engine
///
/// Fields are organized into logical sub-configs for maintainability:
/// - [`storage`](StorageConfig) — dataset and report directories
/// - [`retry`](RetryConfig) — transient-failure policy
/// - [`http`](HttpConfig) — shared HTTP client settings
/// - [`feed`](FeedConfig) — incremental feed paging
/// - [`resources`](ResourceConfig) — ceilings passed to external tools
///
/// Sub-config fields are flattened for serialization, so the JSON format
/// stays flat (no nesting) and every field is optional with a sensible
/// default.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Dataset and report directories
    #[serde(flatten)]
    pub storage: StorageConfig,

    /// Transient-failure retry policy
    #[serde(default)]
    pub retry: RetryConfig,

    /// Shared HTTP client settings
    #[serde(flatten)]
    pub http: HttpConfig,

    /// Incremental feed paging settings
    #[serde(flatten)]
    pub feed: FeedConfig,

    /// Resource ceilings for external conversion tools
    #[serde(flatten)]
    pub resources: ResourceConfig,

    /// Feed-style sources (append-only logs with durable cursors)
    #[serde(default)]
    pub feed_sources: Vec<FeedSourceConfig>,

    /// Snapshot-style sources (dated artifact batches)
    #[serde(default)]
    pub snapshot_sources: Vec<SnapshotSourceConfig>,
}

impl Config {
    /// Load configuration from a JSON file
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when the file is missing or unreadable, and
    /// [`Error::Serialization`] when it is not valid JSON for this schema.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| Error::Config {
            message: format!("cannot read configuration file {}: {}", path.display(), e),
            key: None,
        })?;
        let config: Config = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check invariants that serde defaults cannot express
    pub fn validate(&self) -> Result<()> {
        if self.storage.storage_dir.as_os_str().is_empty() {
            return Err(Error::Config {
                message: "storage directory must not be empty".to_string(),
                key: Some("storage_dir".to_string()),
            });
        }
        if self.feed.page_size == 0 {
            return Err(Error::Config {
                message: "feed page size must be at least 1".to_string(),
                key: Some("page_size".to_string()),
            });
        }
        Ok(())
    }

    /// Storage subtree owned by the named source
    pub fn source_storage_dir(&self, source: &str) -> PathBuf {
        self.storage.storage_dir.join(source)
    }
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_reports_dir() -> PathBuf {
    PathBuf::from("./reports")
}

fn default_max_attempts() -> u32 {
    5
}

fn default_retry_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_user_agent() -> String {
    format!("dataset-sync/{}", env!("CARGO_PKG_VERSION"))
}

fn default_page_size() -> u64 {
    2000
}

fn default_max_ram() -> String {
    "50%".to_string()
}

fn default_temp_dir() -> PathBuf {
    std::env::temp_dir()
}

fn default_true() -> bool {
    true
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.delay, Duration::from_secs(30));
        assert_eq!(config.feed.page_size, 2000);
        assert_eq!(config.resources.max_ram, "50%");
    }

    #[test]
    fn empty_json_deserializes_to_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.storage.storage_dir, PathBuf::from("./data"));
        assert!(config.feed_sources.is_empty());
        assert!(config.snapshot_sources.is_empty());
    }

    #[test]
    fn flattened_fields_parse_from_flat_json() {
        let config: Config = serde_json::from_str(
            r#"{
                "storage_dir": "/srv/datasets",
                "page_size": 500,
                "max_ram": "25%",
                "retry": {"max_attempts": 2, "delay": 1}
            }"#,
        )
        .unwrap();
        assert_eq!(config.storage.storage_dir, PathBuf::from("/srv/datasets"));
        assert_eq!(config.feed.page_size, 500);
        assert_eq!(config.resources.max_ram, "25%");
        assert_eq!(config.retry.max_attempts, 2);
        assert_eq!(config.retry.delay, Duration::from_secs(1));
    }

    #[test]
    fn source_lists_parse_with_policies() {
        let config: Config = serde_json::from_str(
            r#"{
                "feed_sources": [
                    {"name": "ct", "feeds": {"argon": "https://ct.example.com/argon"}}
                ],
                "snapshot_sources": [
                    {
                        "name": "zones",
                        "urls": ["https://zones.example.com/com.txt.gz"],
                        "fetch_policy": "skip_if_exists",
                        "auth": {"kind": "api_key", "header": "Authorization", "key": "tok"}
                    }
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(config.feed_sources.len(), 1);
        assert!(config.feed_sources[0].manual, "feed sources default to manual");
        let snap = &config.snapshot_sources[0];
        assert_eq!(snap.fetch_policy, FetchPolicy::SkipIfExists);
        assert!(!snap.manual);
        assert!(matches!(snap.auth, Auth::ApiKey { .. }));
    }

    #[test]
    fn zero_page_size_fails_validation() {
        let config: Config = serde_json::from_str(r#"{"page_size": 0}"#).unwrap();
        let err = config.validate().unwrap_err();
        match err {
            Error::Config { key, .. } => assert_eq!(key.as_deref(), Some("page_size")),
            other => panic!("expected Config error, got {other:?}"),
        }
    }

    #[test]
    fn source_storage_dir_joins_source_name() {
        let config = Config::default();
        assert_eq!(
            config.source_storage_dir("rir"),
            PathBuf::from("./data").join("rir")
        );
    }

    #[test]
    fn missing_config_file_reports_path() {
        let err = Config::from_file(Path::new("/nonexistent/dataset-sync.json")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/dataset-sync.json"));
    }
}
