//! Source run orchestration with per-source failure isolation
//!
//! Given a set of enabled sources and an operation, the orchestrator invokes
//! the operation on each source and keeps going when one fails: a source's
//! fatal error becomes a logged entry in the run report instead of aborting
//! its siblings. The single exception is cooperative interruption, which
//! aborts the whole run immediately.

use crate::error::{Error, Result};
use crate::source::{DataSource, SourceContext};
use crate::types::Operation;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Outcome of one orchestrated run
#[must_use]
#[derive(Debug, Default)]
pub struct RunReport {
    /// Sources whose operation completed
    pub succeeded: Vec<String>,
    /// Sources whose operation failed, with the failure
    pub failed: Vec<(String, Error)>,
    /// Sources skipped by availability or manual-selection gating
    pub skipped: Vec<String>,
}

impl RunReport {
    /// True when no source failed
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Runs download/normalize across a set of sources
pub struct Orchestrator {
    sources: Vec<Arc<dyn DataSource>>,
    parallel: bool,
}

impl Orchestrator {
    /// Create an orchestrator over the given sources
    pub fn new(sources: Vec<Arc<dyn DataSource>>) -> Self {
        Self {
            sources,
            parallel: false,
        }
    }

    /// Run sources concurrently (one task per source) instead of in order
    #[must_use]
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Names of all registered sources, in registration order
    pub fn source_names(&self) -> Vec<String> {
        self.sources.iter().map(|s| s.name().to_string()).collect()
    }

    /// Invoke `operation` on every eligible source
    ///
    /// Eligibility: unavailable sources are skipped with a warning;
    /// manual-only sources run only when named in `selected`; when `selected`
    /// is given, everything not named is skipped silently.
    ///
    /// Per-source failures are isolated into the report. The run itself only
    /// fails on cooperative interruption.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Interrupted`] when the run was cancelled; every other
    /// failure is recorded in the returned [`RunReport`].
    pub async fn run(
        &self,
        operation: Operation,
        selected: Option<&[String]>,
        cancel: &CancellationToken,
    ) -> Result<RunReport> {
        let mut report = RunReport::default();
        let mut eligible: Vec<Arc<dyn DataSource>> = Vec::new();

        for source in &self.sources {
            let name = source.name();
            if let Some(selected) = selected
                && !selected.iter().any(|s| s == name)
            {
                report.skipped.push(name.to_string());
                continue;
            }
            if !source.is_available() {
                tracing::warn!(source = %name, "Source is disabled due to configuration");
                report.skipped.push(name.to_string());
                continue;
            }
            if source.requires_manual_selection()
                && !selected.is_some_and(|s| s.iter().any(|x| x == name))
            {
                tracing::warn!(source = %name, "Source must be specified manually");
                report.skipped.push(name.to_string());
                continue;
            }
            eligible.push(Arc::clone(source));
        }

        let names: Vec<&str> = eligible.iter().map(|s| s.name()).collect();
        tracing::info!(%operation, sources = ?names, "Run initiated");

        let results = if self.parallel {
            self.run_parallel(&eligible, operation, cancel).await
        } else {
            self.run_sequential(&eligible, operation, cancel).await?
        };

        for (name, result) in results {
            match result {
                Ok(()) => report.succeeded.push(name),
                Err(e) if e.is_interrupted() => {
                    tracing::error!(source = %name, "Run interrupted");
                    return Err(Error::Interrupted);
                }
                Err(e) => {
                    let e = e.for_source(&name, &operation.to_string());
                    tracing::error!(source = %name, error = %e, "Source failed");
                    report.failed.push((name, e));
                }
            }
        }

        tracing::info!(
            %operation,
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            "Run completed"
        );
        Ok(report)
    }

    async fn run_sequential(
        &self,
        sources: &[Arc<dyn DataSource>],
        operation: Operation,
        cancel: &CancellationToken,
    ) -> Result<Vec<(String, Result<()>)>> {
        let mut results = Vec::with_capacity(sources.len());
        for source in sources {
            if cancel.is_cancelled() {
                return Err(Error::Interrupted);
            }
            let ctx = SourceContext::new(cancel.clone());
            let result = invoke(source.as_ref(), operation, &ctx).await;
            results.push((source.name().to_string(), result));
        }
        Ok(results)
    }

    async fn run_parallel(
        &self,
        sources: &[Arc<dyn DataSource>],
        operation: Operation,
        cancel: &CancellationToken,
    ) -> Vec<(String, Result<()>)> {
        let mut handles = Vec::with_capacity(sources.len());
        for source in sources {
            let source = Arc::clone(source);
            let ctx = SourceContext::new(cancel.clone());
            handles.push(tokio::spawn(async move {
                let result = invoke(source.as_ref(), operation, &ctx).await;
                (source.name().to_string(), result)
            }));
        }

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(entry) => results.push(entry),
                Err(e) => results.push((
                    "unknown".to_string(),
                    Err(Error::Other(format!("source task panicked: {e}"))),
                )),
            }
        }
        results
    }
}

async fn invoke(source: &dyn DataSource, operation: Operation, ctx: &SourceContext) -> Result<()> {
    match operation {
        Operation::Download => source.download(ctx).await,
        Operation::Normalize => source.normalize(ctx).await,
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct TestSource {
        name: String,
        available: bool,
        manual: bool,
        fail_with: Option<fn() -> Error>,
        downloads: AtomicUsize,
        normalizes: AtomicUsize,
    }

    impl TestSource {
        fn new(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                available: true,
                manual: false,
                fail_with: None,
                downloads: AtomicUsize::new(0),
                normalizes: AtomicUsize::new(0),
            })
        }

        fn failing(name: &str, fail_with: fn() -> Error) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                available: true,
                manual: false,
                fail_with: Some(fail_with),
                downloads: AtomicUsize::new(0),
                normalizes: AtomicUsize::new(0),
            })
        }

        fn unavailable(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                available: false,
                manual: false,
                fail_with: None,
                downloads: AtomicUsize::new(0),
                normalizes: AtomicUsize::new(0),
            })
        }

        fn manual(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                available: true,
                manual: true,
                fail_with: None,
                downloads: AtomicUsize::new(0),
                normalizes: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl DataSource for TestSource {
        fn name(&self) -> &str {
            &self.name
        }

        fn is_available(&self) -> bool {
            self.available
        }

        fn requires_manual_selection(&self) -> bool {
            self.manual
        }

        async fn download(&self, _ctx: &SourceContext) -> Result<()> {
            self.downloads.fetch_add(1, Ordering::SeqCst);
            match self.fail_with {
                Some(f) => Err(f()),
                None => Ok(()),
            }
        }

        async fn normalize(&self, _ctx: &SourceContext) -> Result<()> {
            self.normalizes.fetch_add(1, Ordering::SeqCst);
            match self.fail_with {
                Some(f) => Err(f()),
                None => Ok(()),
            }
        }
    }

    #[tokio::test]
    async fn a_failing_source_does_not_stop_its_siblings() {
        let first = TestSource::new("first");
        let broken = TestSource::failing("broken", || Error::Other("boom".into()));
        let last = TestSource::new("last");

        let orchestrator = Orchestrator::new(vec![
            first.clone() as Arc<dyn DataSource>,
            broken.clone(),
            last.clone(),
        ]);

        let report = orchestrator
            .run(Operation::Download, None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.succeeded, vec!["first", "last"]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "broken");
        assert!(!report.all_succeeded());
        assert_eq!(last.downloads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failures_carry_source_identity_and_operation() {
        let broken = TestSource::failing("broken", || Error::Other("boom".into()));
        let orchestrator = Orchestrator::new(vec![broken as Arc<dyn DataSource>]);

        let report = orchestrator
            .run(Operation::Normalize, None, &CancellationToken::new())
            .await
            .unwrap();

        let (_, err) = &report.failed[0];
        let msg = err.to_string();
        assert!(msg.contains("broken"));
        assert!(msg.contains("normalize"));
    }

    #[tokio::test]
    async fn interruption_aborts_the_whole_run() {
        let first = TestSource::failing("first", || Error::Interrupted);
        let never_reached = TestSource::new("never-reached");

        let orchestrator =
            Orchestrator::new(vec![first as Arc<dyn DataSource>, never_reached.clone()]);

        let err = orchestrator
            .run(Operation::Download, None, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Interrupted));
        assert_eq!(never_reached.downloads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unavailable_sources_are_skipped_with_a_report_entry() {
        let enabled = TestSource::new("enabled");
        let disabled = TestSource::unavailable("disabled");

        let orchestrator =
            Orchestrator::new(vec![enabled as Arc<dyn DataSource>, disabled.clone()]);
        let report = orchestrator
            .run(Operation::Download, None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.succeeded, vec!["enabled"]);
        assert_eq!(report.skipped, vec!["disabled"]);
        assert_eq!(disabled.downloads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn manual_sources_run_only_when_selected() {
        let manual = TestSource::manual("bulky");
        let orchestrator = Orchestrator::new(vec![manual.clone() as Arc<dyn DataSource>]);

        let report = orchestrator
            .run(Operation::Download, None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.skipped, vec!["bulky"]);
        assert_eq!(manual.downloads.load(Ordering::SeqCst), 0);

        let report = orchestrator
            .run(
                Operation::Download,
                Some(&["bulky".to_string()]),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(report.succeeded, vec!["bulky"]);
        assert_eq!(manual.downloads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn selection_filters_out_unnamed_sources() {
        let wanted = TestSource::new("wanted");
        let other = TestSource::new("other");

        let orchestrator =
            Orchestrator::new(vec![wanted.clone() as Arc<dyn DataSource>, other.clone()]);
        let report = orchestrator
            .run(
                Operation::Download,
                Some(&["wanted".to_string()]),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(report.succeeded, vec!["wanted"]);
        assert_eq!(report.skipped, vec!["other"]);
        assert_eq!(other.downloads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn parallel_run_isolates_failures_like_sequential() {
        let first = TestSource::new("first");
        let broken = TestSource::failing("broken", || Error::Other("boom".into()));
        let last = TestSource::new("last");

        let orchestrator =
            Orchestrator::new(vec![first as Arc<dyn DataSource>, broken, last.clone()])
                .with_parallel(true);

        let report = orchestrator
            .run(Operation::Download, None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.succeeded.len(), 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(last.downloads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancelled_token_stops_a_sequential_run() {
        let first = TestSource::new("first");
        let orchestrator = Orchestrator::new(vec![first.clone() as Arc<dyn DataSource>]);

        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = orchestrator
            .run(Operation::Download, None, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Interrupted));
        assert_eq!(first.downloads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn source_names_lists_registration_order() {
        let orchestrator = Orchestrator::new(vec![
            TestSource::new("alpha") as Arc<dyn DataSource>,
            TestSource::new("beta"),
        ]);
        assert_eq!(orchestrator.source_names(), vec!["alpha", "beta"]);
    }
}
