//! External conversion tool seam
//!
//! Downstream format converters (zone→CSV, JSON→key-value tables, ...) are
//! opaque pipeline stages: they consume a decompressed byte stream on
//! standard input, write to a target output path, and receive a resource
//! budget (temp directory, memory ceiling). Their only contract with the
//! engine is a non-zero exit status on failure, and they are never invoked a
//! second time once the staging protocol reports completion.
//!
//! The trait keeps the stage swappable so tests run without the real
//! external binaries.

use crate::config::ResourceConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

/// Resource ceiling handed to an external stage
///
/// The sort/merge steps inside converters may use most of available memory
/// and all cores by design; the budget bounds them explicitly instead of
/// letting each tool pick its own limits.
#[derive(Clone, Debug)]
pub struct ResourceBudget {
    /// Scratch directory for the tool
    pub temp_dir: PathBuf,
    /// Memory ceiling expressed the way `sort -S` accepts it (e.g. "50%")
    pub max_ram: String,
    /// Core count for parallel tools
    pub max_cores: usize,
}

impl ResourceBudget {
    /// Build a budget from configuration, resolving "all cores" defaults
    pub fn from_config(resources: &ResourceConfig) -> Self {
        let max_cores = resources.max_cores.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        });
        Self {
            temp_dir: resources.temp_dir.clone(),
            max_ram: resources.max_ram.clone(),
            max_cores,
        }
    }
}

/// Trait for external conversion stages
///
/// Implementations run one conversion: `input` (possibly gzip-compressed,
/// decompressed before it reaches the tool) to `output`, within `budget`.
///
/// # Examples
///
/// ```no_run
/// use dataset_sync::pipeline::{CommandStage, PipelineStage, ResourceBudget};
/// use dataset_sync::config::ResourceConfig;
/// use std::path::Path;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let stage = CommandStage::from_path("zone2csv")
///     .expect("zone2csv binary not found");
/// let budget = ResourceBudget::from_config(&ResourceConfig::default());
///
/// stage.run(Path::new("com.txt.gz"), Path::new("com.csv"), &budget).await?;
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait PipelineStage: Send + Sync {
    /// Run the conversion
    ///
    /// # Errors
    ///
    /// Returns [`Error::ExternalTool`] when the tool cannot be spawned or
    /// exits non-zero, and I/O errors when the input cannot be opened.
    async fn run(&self, input: &Path, output: &Path, budget: &ResourceBudget) -> Result<()>;

    /// Human-readable name for logging
    fn name(&self) -> String;
}

/// Stage backed by an external converter binary
///
/// The command line is `<binary> [args...] -t <temp_dir> -m <max_ram>
/// <output>` with the decompressed input on stdin.
pub struct CommandStage {
    binary_path: PathBuf,
    args: Vec<String>,
}

impl CommandStage {
    /// Create a stage with an explicit binary path
    pub fn new(binary_path: PathBuf) -> Self {
        Self {
            binary_path,
            args: Vec::new(),
        }
    }

    /// Attempt to find the named converter in PATH
    ///
    /// Returns `None` when the binary is not installed, which callers treat
    /// as "skip normalization" rather than an error.
    pub fn from_path(name: &str) -> Option<Self> {
        which::which(name).ok().map(Self::new)
    }

    /// Add fixed arguments placed before the budget and output arguments
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    async fn input_stdio(&self, input: &Path) -> Result<(Stdio, Option<tokio::process::Child>)> {
        if input.extension().is_some_and(|ext| ext == "gz") {
            let gzip = gzip_command().ok_or_else(|| {
                Error::ExternalTool("no pigz or gzip binary found for decompression".to_string())
            })?;
            let mut child = Command::new(gzip)
                .arg("-dc")
                .arg(input)
                .stdout(Stdio::piped())
                .spawn()
                .map_err(|e| Error::ExternalTool(format!("failed to spawn decompressor: {e}")))?;
            let stdout = child.stdout.take().ok_or_else(|| {
                Error::ExternalTool("decompressor stdout unavailable".to_string())
            })?;
            let stdio = stdout.try_into().map_err(|e| {
                Error::ExternalTool(format!("cannot wire decompressor stdout: {e}"))
            })?;
            Ok((stdio, Some(child)))
        } else {
            let file = std::fs::File::open(input)?;
            Ok((Stdio::from(file), None))
        }
    }
}

#[async_trait]
impl PipelineStage for CommandStage {
    async fn run(&self, input: &Path, output: &Path, budget: &ResourceBudget) -> Result<()> {
        let (stdin, mut decompressor) = self.input_stdio(input).await?;

        let result = Command::new(&self.binary_path)
            .args(&self.args)
            .arg("-t")
            .arg(&budget.temp_dir)
            .arg("-m")
            .arg(&budget.max_ram)
            .arg(output)
            .stdin(stdin)
            .output()
            .await
            .map_err(|e| {
                Error::ExternalTool(format!(
                    "failed to execute {}: {e}",
                    self.binary_path.display()
                ))
            });

        if let Some(child) = decompressor.as_mut() {
            let _ = child.wait().await;
        }

        let out = result?;
        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr);
            return Err(Error::ExternalTool(format!(
                "{} exited with {} for {}: {}",
                self.binary_path.display(),
                out.status,
                input.display(),
                stderr.trim()
            )));
        }

        tracing::info!(
            stage = %self.name(),
            input = %input.display(),
            output = %output.display(),
            "Conversion completed"
        );
        Ok(())
    }

    fn name(&self) -> String {
        self.binary_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.binary_path.display().to_string())
    }
}

/// Stage that produces an empty output and always succeeds
///
/// Useful for wiring tests and dry runs where the real converters are not
/// installed.
#[derive(Debug, Default)]
pub struct NoOpStage;

#[async_trait]
impl PipelineStage for NoOpStage {
    async fn run(&self, input: &Path, output: &Path, _budget: &ResourceBudget) -> Result<()> {
        tokio::fs::write(output, b"").await?;
        tracing::debug!(
            input = %input.display(),
            output = %output.display(),
            "No-op conversion"
        );
        Ok(())
    }

    fn name(&self) -> String {
        "noop".to_string()
    }
}

/// Find a gzip implementation, preferring the parallel one
pub fn gzip_command() -> Option<PathBuf> {
    which::which("pigz").or_else(|_| which::which("gzip")).ok()
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn budget(dir: &Path) -> ResourceBudget {
        ResourceBudget {
            temp_dir: dir.to_path_buf(),
            max_ram: "10%".to_string(),
            max_cores: 1,
        }
    }

    #[test]
    fn from_path_returns_none_for_nonexistent_binary() {
        assert!(CommandStage::from_path("nonexistent-converter-binary-xyz").is_none());
    }

    #[test]
    fn budget_from_config_resolves_all_cores() {
        let resources = ResourceConfig::default();
        let budget = ResourceBudget::from_config(&resources);
        assert!(budget.max_cores >= 1);
        assert_eq!(budget.max_ram, "50%");
    }

    #[tokio::test]
    async fn noop_stage_touches_the_output() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("in.json");
        let output = dir.path().join("out.mtbl");
        std::fs::write(&input, b"{}").unwrap();

        NoOpStage.run(&input, &output, &budget(dir.path())).await.unwrap();

        assert!(output.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_stage_pipes_stdin_and_writes_output() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("records.json");
        let output = dir.path().join("records.csv");
        std::fs::write(&input, b"line one\nline two\n").unwrap();

        // sh -c '<script>' receives the budget and output as positional
        // arguments: $0="-t" $1=temp $2="-m" $3=ram $4=output
        let stage = CommandStage::new(PathBuf::from("sh")).with_args(["-c", r#"cat > "$4""#]);
        stage.run(&input, &output, &budget(dir.path())).await.unwrap();

        assert_eq!(std::fs::read(&output).unwrap(), b"line one\nline two\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_is_an_external_tool_error() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("in.json");
        let output = dir.path().join("out.csv");
        std::fs::write(&input, b"x").unwrap();

        let stage =
            CommandStage::new(PathBuf::from("sh")).with_args(["-c", "echo conversion died >&2; exit 3"]);
        let err = stage
            .run(&input, &output, &budget(dir.path()))
            .await
            .unwrap_err();

        match err {
            Error::ExternalTool(msg) => {
                assert!(msg.contains("conversion died"), "stderr surfaced: {msg}");
            }
            other => panic!("expected ExternalTool, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_input_file_is_an_io_error() {
        let dir = TempDir::new().unwrap();
        let stage = CommandStage::new(PathBuf::from("sh"));
        let err = stage
            .run(
                &dir.path().join("absent.json"),
                &dir.path().join("out"),
                &budget(dir.path()),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn command_stage_name_is_the_binary_name() {
        let stage = CommandStage::new(PathBuf::from("/usr/local/bin/zone2csv"));
        assert_eq!(stage.name(), "zone2csv");
    }
}
