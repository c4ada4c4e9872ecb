//! Canned test data collaborators
//!
//! A [`TestDataSource`] knows, per DUT identifier, whether measurement data exists and
//! hands it out as an ordered list of samples: the first sample is the voltage-test
//! reading, every later one belongs to the discharge phase.
//!
//! - [`DirectoryDataSource`] reads `<dir>/<dut_id>.txt`, one `"<voltage> <current>"`
//!   pair per line, blank lines skipped.
//! - [`CommandDataSource`] runs an external generator with the DUT identifier as its
//!   last argument and reads samples from its stdout.
//!
//! Every collaborator call is bounded by a deadline so a hung disk or process cannot
//! stall a run.

use crate::error::DataSourceError;
use crate::measurement::Sample;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, error};

/// Collaborator that provides canned measurement data per DUT.
#[async_trait]
pub trait TestDataSource: Send + Sync {
    /// Whether data exists for `dut_id`.
    async fn exists(&self, dut_id: &str) -> Result<bool, DataSourceError>;

    /// Ordered samples for `dut_id`.
    ///
    /// # Errors
    /// [`DataSourceError::DataNotFound`] when [`exists`](Self::exists) would be false.
    async fn load_samples(&self, dut_id: &str) -> Result<Vec<Sample>, DataSourceError>;

    /// Human-readable location of the data for `dut_id`, used in existence reports.
    fn location(&self, dut_id: &str) -> String;
}

/// Parse `"<voltage> <current>"` lines, skipping blank ones.
///
/// `origin` names the file or command in error messages.
pub fn parse_sample_lines(origin: &str, text: &str) -> Result<Vec<Sample>, DataSourceError> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            Sample::parse_line(line).map_err(|source| DataSourceError::MalformedSample {
                origin: origin.to_string(),
                line_no: index + 1,
                source,
            })
        })
        .collect()
}

/// A DUT identifier must name a file inside the data directory, nothing else.
fn is_valid_dut_id(dut_id: &str) -> bool {
    !dut_id.is_empty()
        && dut_id != "."
        && dut_id != ".."
        && !dut_id.contains(['/', '\\', '\0'])
}

/// Data files `<dir>/<dut_id>.txt`.
#[derive(Debug, Clone)]
pub struct DirectoryDataSource {
    dir: PathBuf,
    deadline: Duration,
}

impl DirectoryDataSource {
    /// Read data files from `dir`, each access bounded by `deadline`.
    pub fn new(dir: impl Into<PathBuf>, deadline: Duration) -> Self {
        Self {
            dir: dir.into(),
            deadline,
        }
    }

    /// Data directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the data file for `dut_id`.
    pub fn path_for(&self, dut_id: &str) -> PathBuf {
        self.dir.join(format!("{dut_id}.txt"))
    }

    fn deadline_failure(&self, path: &Path) -> DataSourceError {
        DataSourceError::CollaboratorFailure {
            collaborator: path.display().to_string(),
            reason: format!("no result within {:?}", self.deadline),
            diagnostics: String::new(),
        }
    }
}

#[async_trait]
impl TestDataSource for DirectoryDataSource {
    async fn exists(&self, dut_id: &str) -> Result<bool, DataSourceError> {
        if !is_valid_dut_id(dut_id) {
            return Ok(false);
        }

        let path = self.path_for(dut_id);
        match tokio::time::timeout(self.deadline, tokio::fs::metadata(&path)).await {
            Err(_) => Err(self.deadline_failure(&path)),
            Ok(Ok(metadata)) => Ok(metadata.is_file()),
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Ok(Err(source)) => Err(DataSourceError::Io { path, source }),
        }
    }

    async fn load_samples(&self, dut_id: &str) -> Result<Vec<Sample>, DataSourceError> {
        let not_found = || DataSourceError::DataNotFound {
            dut_id: dut_id.to_string(),
        };
        if !self.exists(dut_id).await? {
            return Err(not_found());
        }

        let path = self.path_for(dut_id);
        let text = match tokio::time::timeout(self.deadline, tokio::fs::read_to_string(&path)).await
        {
            Err(_) => return Err(self.deadline_failure(&path)),
            Ok(Ok(text)) => text,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => return Err(not_found()),
            Ok(Err(source)) => return Err(DataSourceError::Io { path, source }),
        };

        let samples = parse_sample_lines(&path.display().to_string(), &text)?;
        debug!(dut_id, path = %path.display(), samples = samples.len(), "Loaded test data");
        Ok(samples)
    }

    fn location(&self, dut_id: &str) -> String {
        self.path_for(dut_id).display().to_string()
    }
}

/// External test-data generator process.
///
/// The generator is invoked as `program args... <dut_id>` and must
/// - exit `0` after printing one `"<voltage> <current>"` line per sample on stdout, or
/// - exit with `not_found_exit_code` when it has no data for the DUT.
///
/// Any other exit, a spawn failure or running past the deadline is a
/// [`DataSourceError::CollaboratorFailure`] carrying the captured stderr. A generator
/// that overruns its deadline is killed.
#[derive(Debug, Clone)]
pub struct CommandDataSource {
    program: String,
    args: Vec<String>,
    deadline: Duration,
    not_found_exit_code: i32,
}

impl CommandDataSource {
    /// Generator `program` with leading `args`.
    pub fn new(program: impl Into<String>, args: Vec<String>, deadline: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            deadline,
            not_found_exit_code: 3,
        }
    }

    /// Exit code meaning "no data for this DUT" (default 3).
    pub fn with_not_found_exit_code(mut self, code: i32) -> Self {
        self.not_found_exit_code = code;
        self
    }

    fn command_line(&self, dut_id: &str) -> String {
        let mut parts = vec![self.program.as_str()];
        parts.extend(self.args.iter().map(String::as_str));
        parts.push(dut_id);
        parts.join(" ")
    }

    /// Run the generator; `Ok(None)` means it has no data for the DUT.
    async fn run(&self, dut_id: &str) -> Result<Option<String>, DataSourceError> {
        let collaborator = self.command_line(dut_id);
        let failure = |reason: String, diagnostics: String| DataSourceError::CollaboratorFailure {
            collaborator: collaborator.clone(),
            reason,
            diagnostics,
        };

        let child = Command::new(&self.program)
            .args(&self.args)
            .arg(dut_id)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| failure(format!("failed to spawn: {e}"), String::new()))?;

        // on timeout the child is dropped and therefore killed
        let output = match tokio::time::timeout(self.deadline, child.wait_with_output()).await {
            Err(_) => {
                error!(command = %collaborator, deadline = ?self.deadline, "Test data generator hung");
                return Err(failure(
                    format!("no result within {:?}", self.deadline),
                    String::new(),
                ));
            }
            Ok(result) => {
                result.map_err(|e| failure(format!("failed to collect output: {e}"), String::new()))?
            }
        };

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        match output.status.code() {
            Some(0) => Ok(Some(String::from_utf8_lossy(&output.stdout).into_owned())),
            Some(code) if code == self.not_found_exit_code => {
                debug!(command = %collaborator, "Generator has no data for DUT");
                Ok(None)
            }
            _ => {
                error!(
                    command = %collaborator,
                    status = %output.status,
                    stderr = %stderr,
                    "Test data generator failed"
                );
                Err(failure(format!("exited with {}", output.status), stderr))
            }
        }
    }
}

#[async_trait]
impl TestDataSource for CommandDataSource {
    async fn exists(&self, dut_id: &str) -> Result<bool, DataSourceError> {
        Ok(self.run(dut_id).await?.is_some())
    }

    async fn load_samples(&self, dut_id: &str) -> Result<Vec<Sample>, DataSourceError> {
        match self.run(dut_id).await? {
            Some(stdout) => parse_sample_lines(&self.command_line(dut_id), &stdout),
            None => Err(DataSourceError::DataNotFound {
                dut_id: dut_id.to_string(),
            }),
        }
    }

    fn location(&self, dut_id: &str) -> String {
        self.command_line(dut_id)
    }
}
