//! Custom error types for the acceptance pipeline.
//!
//! Every stage of a DUT run has its own `thiserror` enum so callers can match on
//! exactly what went wrong, and [`RunError`] composes them into the per-run failure
//! that the batch runner and the CLI report.
//!
//! ## Error Hierarchy
//!
//! - **`ParseSampleError`**: a data line that is not exactly two finite decimals.
//! - **`FramingError`**: the framer gave up on a run, either because a committed data
//!   line was malformed, the channel stayed silent past the deadline, or the
//!   transport failed.
//! - **`ChannelError`**: transport-level failures of a `MeasurementChannel`.
//! - **`DataSourceError`**: the canned-data collaborator had no data, returned bad
//!   data, or failed (crashed, hung past its deadline, could not be spawned).
//! - **`FixtureError`**: the fixture emulator could not complete its script.
//! - **`ConfigError`**: configuration could not be loaded or is semantically invalid.
//! - **`ReportError`**: a report file could not be written.
//! - **`RunError`**: what one DUT run failed with. `RunError::kind` flattens the
//!   nested cause into a [`RunErrorKind`] label.
//!
//! An out-of-limit measurement is never an error: it is a failed `CheckResult` inside
//! a `Verdict`.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Why a data line could not become a `Sample`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseSampleError {
    /// Wrong number of tokens on the line
    #[error("expected 2 whitespace-separated values, found {0}")]
    TokenCount(usize),

    /// A token is not a decimal
    #[error("'{0}' is not a decimal number")]
    InvalidNumber(String),

    /// `NaN` or infinite reading
    #[error("voltage and current must be finite")]
    NonFinite,
}

/// Framing of a fixture line stream failed.
#[derive(Error, Debug)]
pub enum FramingError {
    /// A committed data line did not parse
    #[error("malformed sample on line {line_no} ({line:?}): {source}")]
    MalformedSample {
        /// 1-based position of the line in the framed stream
        line_no: usize,
        /// The offending line, terminator stripped
        line: String,
        /// Parse failure
        source: ParseSampleError,
    },

    /// No line arrived within the line timeout
    #[error("channel produced no line within {0:?}")]
    ChannelTimeout(Duration),

    /// The transport failed
    #[error("channel failure: {0}")]
    Channel(#[from] ChannelError),
}

/// Transport failures of a measurement channel.
#[derive(Error, Debug)]
pub enum ChannelError {
    /// Underlying stream error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Write or read after `close`
    #[error("channel is closed")]
    Closed,

    /// Serial port could not be opened
    #[error("failed to open serial port '{port}': {reason}")]
    Open {
        /// Port path, e.g. `/dev/ttyUSB0`
        port: String,
        /// Driver message
        reason: String,
    },

    /// Built without the `tokio_serial` feature
    #[error("serial support not enabled. Rebuild with --features tokio_serial")]
    SerialFeatureDisabled,
}

/// Failures of a test-data collaborator.
#[derive(Error, Debug)]
pub enum DataSourceError {
    /// The collaborator has nothing for this DUT
    #[error("no test data for DUT '{dut_id}'")]
    DataNotFound {
        /// DUT that was asked for
        dut_id: String,
    },

    /// Canned data contains a bad line
    #[error("malformed sample in {origin} at line {line_no}: {source}")]
    MalformedSample {
        /// File path or command that produced the line
        origin: String,
        /// 1-based line number
        line_no: usize,
        /// Parse failure
        source: ParseSampleError,
    },

    /// The collaborator crashed, hung or could not be started
    #[error("collaborator '{collaborator}' failed: {reason}")]
    CollaboratorFailure {
        /// File path or command line of the collaborator
        collaborator: String,
        /// Exit status, spawn error or deadline description
        reason: String,
        /// Captured diagnostic output (stderr), possibly empty
        diagnostics: String,
    },

    /// Reading a data file failed
    #[error("I/O error reading '{}': {source}", path.display())]
    Io {
        /// File being read
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },
}

/// The fixture emulator could not play its script.
#[derive(Error, Debug)]
pub enum FixtureError {
    /// The data source failed
    #[error("test data source failed: {0}")]
    Source(#[from] DataSourceError),

    /// Writing the script failed
    #[error("channel failure: {0}")]
    Channel(#[from] ChannelError),

    /// No `START` line arrived in time
    #[error("host did not send a START line within {0:?}")]
    HandshakeTimeout(Duration),

    /// The first host line was not `START <dutId>`
    #[error("unexpected handshake line {0:?}")]
    UnexpectedHandshake(String),
}

/// Configuration could not be loaded or failed validation.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Parsing or merging the providers failed
    #[error("Configuration error: {0}")]
    Load(#[from] Box<figment::Error>),

    /// Values are present but unusable
    #[error("Configuration validation error: {0}")]
    Invalid(String),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        ConfigError::Load(Box::new(err))
    }
}

/// A report artifact could not be produced.
#[derive(Error, Debug)]
pub enum ReportError {
    /// File system error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// CSV encoding failed
    #[cfg(feature = "storage_csv")]
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// What a single DUT run failed with.
#[derive(Error, Debug)]
pub enum RunError {
    /// Framing on the host side failed
    #[error(transparent)]
    Framing(#[from] FramingError),

    /// Loading test data failed
    #[error(transparent)]
    DataSource(#[from] DataSourceError),

    /// The emulated fixture failed
    #[error("fixture error: {0}")]
    Fixture(#[from] FixtureError),

    /// The run task panicked or was cancelled
    #[error("run task aborted: {0}")]
    Aborted(String),
}

/// Flat classification of a [`RunError`], for "run N failed: <kind>" reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunErrorKind {
    /// The DUT has no test data
    DataNotFound,
    /// A committed data line could not be parsed
    MalformedSample,
    /// The transport produced no line within the deadline
    ChannelTimeout,
    /// An external collaborator exited abnormally or hung
    CollaboratorFailure,
    /// The transport itself failed
    Channel,
    /// The run task panicked or was cancelled
    Aborted,
}

impl RunErrorKind {
    /// Stable label.
    pub fn as_str(&self) -> &'static str {
        match self {
            RunErrorKind::DataNotFound => "DataNotFound",
            RunErrorKind::MalformedSample => "MalformedSample",
            RunErrorKind::ChannelTimeout => "ChannelTimeout",
            RunErrorKind::CollaboratorFailure => "CollaboratorFailure",
            RunErrorKind::Channel => "Channel",
            RunErrorKind::Aborted => "Aborted",
        }
    }
}

impl std::fmt::Display for RunErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl DataSourceError {
    fn kind(&self) -> RunErrorKind {
        match self {
            DataSourceError::DataNotFound { .. } => RunErrorKind::DataNotFound,
            DataSourceError::MalformedSample { .. } => RunErrorKind::MalformedSample,
            DataSourceError::CollaboratorFailure { .. } | DataSourceError::Io { .. } => {
                RunErrorKind::CollaboratorFailure
            }
        }
    }
}

impl RunError {
    /// Classify the failure.
    pub fn kind(&self) -> RunErrorKind {
        match self {
            RunError::Framing(FramingError::MalformedSample { .. }) => RunErrorKind::MalformedSample,
            RunError::Framing(FramingError::ChannelTimeout(_)) => RunErrorKind::ChannelTimeout,
            RunError::Framing(FramingError::Channel(_)) => RunErrorKind::Channel,
            RunError::DataSource(err) => err.kind(),
            RunError::Fixture(FixtureError::Source(err)) => err.kind(),
            RunError::Fixture(FixtureError::Channel(_)) => RunErrorKind::Channel,
            RunError::Fixture(FixtureError::HandshakeTimeout(_)) => RunErrorKind::ChannelTimeout,
            RunError::Fixture(FixtureError::UnexpectedHandshake(_)) => RunErrorKind::Channel,
            RunError::Aborted(_) => RunErrorKind::Aborted,
        }
    }

    /// Whether the process should exit non-zero because of this failure.
    ///
    /// Data problems of a single DUT are reportable outcomes; a transport or
    /// collaborator that stopped working is not.
    pub fn is_process_fatal(&self) -> bool {
        matches!(
            self.kind(),
            RunErrorKind::ChannelTimeout
                | RunErrorKind::CollaboratorFailure
                | RunErrorKind::Channel
                | RunErrorKind::Aborted
        )
    }
}
