//! Tracing Infrastructure
//!
//! Structured logging for the acceptance pipeline, built on `tracing` and
//! `tracing-subscriber`:
//! - Structured events and per-run spans (`dut_id`, `run_id`)
//! - Pretty, compact or JSON output
//! - `RUST_LOG` filtering, falling back to the configured level
//!
//! # Example
//! ```no_run
//! use battery_acceptance::{config::AppConfig, logging};
//! use tracing::info;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AppConfig::load()?;
//! logging::init_from_config(&config)?;
//! info!(dut_id = "BatXDev20240510", "Run started");
//! # Ok(())
//! # }
//! ```

use crate::config::AppConfig;
use serde::{Deserialize, Serialize};
use std::io::IsTerminal;
use std::str::FromStr;
use tracing::Level;
use tracing_subscriber::{
    fmt,
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Output format for tracing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Pretty-printed format with colors (for interactive use)
    Pretty,
    /// Compact single-line format without colors
    Compact,
    /// JSON lines for log aggregation
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "compact" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            other => Err(format!(
                "Invalid log format '{other}'. Must be one of: pretty, compact, json"
            )),
        }
    }
}

/// Subscriber settings derived from `[application]`.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Fallback level when `RUST_LOG` is unset
    pub level: Level,
    /// Output format
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Pretty,
        }
    }
}

impl LoggingConfig {
    /// Settings from the `[application]` section.
    pub fn from_app_config(config: &AppConfig) -> Result<Self, String> {
        Ok(Self {
            level: parse_log_level(&config.application.log_level)?,
            format: config.application.log_format,
        })
    }

    /// Settings with a fixed fallback level.
    pub fn new(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    /// Set output format
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    // source locations only pay off when chasing framer transitions
    fn with_source_location(&self) -> bool {
        self.level >= Level::DEBUG
    }
}

/// Initialize tracing from the application configuration
pub fn init_from_config(config: &AppConfig) -> Result<(), String> {
    init(LoggingConfig::from_app_config(config)?)
}

/// Install the global subscriber.
///
/// Events go to stderr; stdout is left to the CLI's result summary. Colors are
/// used by the pretty format only, and only when stderr is a terminal.
///
/// A subscriber that is already installed is kept and `Ok(())` returned.
pub fn init(config: LoggingConfig) -> Result<(), String> {
    if tracing::dispatcher::has_been_set() {
        return Ok(());
    }

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str().to_lowercase()));
    let located = config.with_source_location();

    let fmt_layer = match config.format {
        LogFormat::Pretty => fmt::layer()
            .with_writer(std::io::stderr)
            .pretty()
            .with_file(located)
            .with_line_number(located)
            .with_ansi(std::io::stderr().is_terminal())
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .with_writer(std::io::stderr)
            .compact()
            .with_target(located)
            .with_ansi(false)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .with_writer(std::io::stderr)
            .json()
            .with_current_span(true)
            .with_file(located)
            .with_line_number(located)
            .boxed(),
    };

    match tracing_subscriber::registry()
        .with(fmt_layer.with_filter(env_filter))
        .try_init()
    {
        Ok(()) => Ok(()),
        // lost a race against another initializer
        Err(_) if tracing::dispatcher::has_been_set() => Ok(()),
        Err(e) => Err(format!("Failed to initialize tracing: {e}")),
    }
}

/// Parse log level string into tracing Level
pub fn parse_log_level(level: &str) -> Result<Level, String> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(format!(
            "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
            level
        )),
    }
}
