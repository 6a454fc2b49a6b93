//! Conditional artifact fetching with atomic materialization
//!
//! The fetcher pulls one remote artifact to one local path. When the
//! destination already exists its modification time and size act as the
//! freshness oracle: the request carries `If-Modified-Since`, a `304` or a
//! matching `Content-Length` skips the transfer, and a source configured with
//! [`FetchPolicy::SkipIfExists`] skips the network call entirely.
//!
//! Successful bodies are streamed to a `.tmp` sibling and renamed into place,
//! so the destination never observes a partially-written file; an interrupted
//! transfer leaves only the `.tmp` artifact.

use crate::config::HttpConfig;
use crate::error::{Error, FetchError, Result};
use crate::types::{Auth, FetchOutcome, FetchPolicy};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Conditional fetcher for one source's artifacts
///
/// Cheap to clone per task; the underlying HTTP client is shared.
#[derive(Clone, Debug)]
pub struct Fetcher {
    client: reqwest::Client,
    policy: FetchPolicy,
    auth: Auth,
}

impl Fetcher {
    /// Create a fetcher with the default conditional policy and no auth
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(http: &HttpConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(http.connect_timeout)
            .user_agent(http.user_agent.clone())
            .build()
            .map_err(Error::Network)?;

        Ok(Self {
            client,
            policy: FetchPolicy::Conditional,
            auth: Auth::None,
        })
    }

    /// Set the per-source freshness policy
    #[must_use]
    pub fn with_policy(mut self, policy: FetchPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set request authentication
    #[must_use]
    pub fn with_auth(mut self, auth: Auth) -> Self {
        self.auth = auth;
        self
    }

    /// Fetch `url` into `dest` honoring the configured freshness policy
    ///
    /// Skips are reported as outcomes, not errors; only transport and local
    /// I/O failures return `Err`. Retry is layered by the caller so that the
    /// policy can vary per source.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Network`] for transport failures, [`Error::Io`] for
    /// local filesystem failures, and [`Error::Fetch`] for unusable
    /// destination paths.
    pub async fn fetch(&self, url: &str, dest: &Path) -> Result<FetchOutcome> {
        let existing = match tokio::fs::metadata(dest).await {
            Ok(meta) => Some((meta.len(), meta.modified()?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        if self.policy == FetchPolicy::SkipIfExists && existing.is_some() {
            tracing::info!(dest = %dest.display(), "Skipped download of existing file");
            return Ok(FetchOutcome::SkippedExisting);
        }

        let mut request = self.client.get(url);
        if let Some((_, modified)) = existing {
            let since: DateTime<Utc> = modified.into();
            request = request.header("If-Modified-Since", since.to_rfc2822());
        }
        request = match &self.auth {
            Auth::None => request,
            Auth::Basic { username, password } => request.basic_auth(username, Some(password)),
            Auth::ApiKey { header, key } => request.header(header.as_str(), key.as_str()),
        };

        let response = request.send().await?;
        let status = response.status();

        if let Some((local_len, _)) = existing {
            if status == reqwest::StatusCode::NOT_MODIFIED {
                tracing::info!(
                    dest = %dest.display(),
                    "Skipped download due to not modified response"
                );
                return Ok(FetchOutcome::SkippedNotModified);
            }
            if response.content_length() == Some(local_len) {
                tracing::info!(
                    dest = %dest.display(),
                    bytes = local_len,
                    "Skipped download with same size"
                );
                return Ok(FetchOutcome::SkippedSameSize);
            }
        }

        if !status.is_success() {
            tracing::warn!(
                url = %url,
                status = status.as_u16(),
                "Skipped download due to server response"
            );
            return Ok(FetchOutcome::SkippedServerStatus {
                status: status.as_u16(),
            });
        }

        let tmp = tmp_path(dest)?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = tokio::fs::File::create(&tmp).await?;
        let mut stream = response.bytes_stream();
        let mut bytes: u64 = 0;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            bytes += chunk.len() as u64;
        }
        file.flush().await?;
        drop(file);

        tokio::fs::rename(&tmp, dest).await?;

        tracing::info!(dest = %dest.display(), bytes, "Download completed");
        Ok(FetchOutcome::Downloaded { bytes })
    }
}

fn tmp_path(dest: &Path) -> Result<PathBuf> {
    if dest.file_name().is_none() {
        return Err(Error::Fetch(FetchError::InvalidDestination {
            path: dest.to_path_buf(),
            reason: "destination has no filename component".to_string(),
        }));
    }
    let mut os = dest.as_os_str().to_os_string();
    os.push(".tmp");
    Ok(PathBuf::from(os))
}

/// Derive a destination filename from a URL's final path segment
///
/// # Errors
///
/// Returns [`FetchError::InvalidUrl`] when the URL does not parse or its path
/// has no non-empty final segment.
pub fn filename_from_url(url: &str) -> Result<String> {
    let parsed = url::Url::parse(url).map_err(|e| {
        Error::Fetch(FetchError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })
    })?;

    parsed
        .path_segments()
        .and_then(|mut segments| segments.next_back().map(|s| s.to_string()))
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            Error::Fetch(FetchError::InvalidUrl {
                url: url.to_string(),
                reason: "URL path has no filename segment".to_string(),
            })
        })
}
