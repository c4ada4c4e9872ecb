//! Configuration System using Figment
//!
//! Configuration is layered, later sources overriding earlier ones:
//! 1. Built-in defaults ([`AppConfig::default`])
//! 2. A TOML file (`config/battery_test.toml` unless another path is given)
//! 3. Environment variables prefixed with `BATTERY_TEST_`, nested keys split on `__`
//!
//! # Example
//! ```no_run
//! use battery_acceptance::config::AppConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AppConfig::load()?;
//! config.validate()?;
//! println!("Fixture line timeout: {} ms", config.channel.line_timeout_ms);
//! # Ok(())
//! # }
//! ```
//!
//! Environment override example: `BATTERY_TEST_LIMITS__CAPACITY_MIN=2500`.

use crate::error::ConfigError;
use crate::logging::LogFormat;
use crate::validation::LimitSet;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default location of the configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/battery_test.toml";

/// Prefix of environment variable overrides.
pub const ENV_PREFIX: &str = "BATTERY_TEST_";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Fixture transport
    pub channel: ChannelConfig,
    /// Where canned measurement data comes from
    pub data_source: DataSourceConfig,
    /// Emulated fixture behaviour
    pub fixture: FixtureConfig,
    /// Report output
    pub report: ReportConfig,
    /// Engineering limits applied to every run
    pub limits: LimitSet,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format
    pub log_format: LogFormat,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "Battery Acceptance".to_string(),
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
        }
    }
}

/// Which transport connects the host to the fixture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    /// In-process loopback driven by the fixture emulator
    Loopback,
    /// Physical serial port
    Serial,
}

/// Fixture transport configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Transport kind
    pub kind: ChannelKind,
    /// Serial port path, required for `serial`
    pub port: Option<String>,
    /// Serial baud rate
    pub baud_rate: u32,
    /// Longest silence tolerated between two fixture lines (milliseconds)
    pub line_timeout_ms: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            kind: ChannelKind::Loopback,
            port: None,
            baud_rate: 9600,
            line_timeout_ms: 10_000,
        }
    }
}

impl ChannelConfig {
    /// Line timeout as a [`Duration`].
    pub fn line_timeout(&self) -> Duration {
        Duration::from_millis(self.line_timeout_ms)
    }
}

/// Which collaborator provides canned measurement data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSourceKind {
    /// `<dir>/<dut_id>.txt` files
    Directory,
    /// External generator process
    Command,
}

/// Test data collaborator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSourceConfig {
    /// Collaborator kind
    pub kind: DataSourceKind,
    /// Data directory for `directory`
    pub dir: PathBuf,
    /// Generator program for `command`
    pub program: Option<String>,
    /// Arguments placed before the DUT identifier
    pub args: Vec<String>,
    /// Upper bound on any single collaborator call (milliseconds)
    pub deadline_ms: u64,
    /// Generator exit code meaning "no data for this DUT"
    pub not_found_exit_code: i32,
}

impl Default for DataSourceConfig {
    fn default() -> Self {
        Self {
            kind: DataSourceKind::Directory,
            dir: PathBuf::from("BatDat"),
            program: None,
            args: Vec::new(),
            deadline_ms: 5_000,
            not_found_exit_code: 3,
        }
    }
}

impl DataSourceConfig {
    /// Collaborator deadline as a [`Duration`].
    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }
}

/// Emulated fixture configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FixtureConfig {
    /// Pause between two discharge samples (milliseconds, 0 = none)
    pub sample_interval_ms: u64,
}

impl FixtureConfig {
    /// Sample interval as a [`Duration`].
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }
}

/// Report output configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Directory receiving report files
    pub output_dir: PathBuf,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("reports"),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default file and environment variables.
    ///
    /// A missing default file is not an error: defaults and the environment apply.
    pub fn load() -> Result<Self, ConfigError> {
        Ok(Self::figment(DEFAULT_CONFIG_PATH).extract()?)
    }

    /// Load configuration from an explicit file, which must exist.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(ConfigError::Invalid(format!(
                "configuration file '{}' not found",
                path.display()
            )));
        }
        Ok(Self::figment(path).extract()?)
    }

    /// The provider stack used by [`AppConfig::load`] and [`AppConfig::load_from`].
    pub fn figment<P: AsRef<Path>>(path: P) -> Figment {
        Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.channel.line_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "channel.line_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.channel.kind == ChannelKind::Serial {
            match self.channel.port.as_deref() {
                Some(port) if !port.trim().is_empty() => {}
                _ => {
                    return Err(ConfigError::Invalid(
                        "channel.port is required for the serial channel".to_string(),
                    ))
                }
            }
            if self.channel.baud_rate == 0 {
                return Err(ConfigError::Invalid(
                    "channel.baud_rate must be greater than 0".to_string(),
                ));
            }
        }

        if self.data_source.deadline_ms == 0 {
            return Err(ConfigError::Invalid(
                "data_source.deadline_ms must be greater than 0".to_string(),
            ));
        }

        match self.data_source.kind {
            DataSourceKind::Directory => {
                if self.data_source.dir.as_os_str().is_empty() {
                    return Err(ConfigError::Invalid(
                        "data_source.dir cannot be empty".to_string(),
                    ));
                }
            }
            DataSourceKind::Command => match self.data_source.program.as_deref() {
                Some(program) if !program.trim().is_empty() => {}
                _ => {
                    return Err(ConfigError::Invalid(
                        "data_source.program is required for the command data source"
                            .to_string(),
                    ))
                }
            },
        }

        self.limits
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("limits: {e}")))
    }
}
