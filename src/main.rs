//! CLI entry point for battery-acceptance
//!
//! Runs the acceptance test of one DUT and writes its report.
//!
//! # Usage
//!
//! Against the built-in fixture emulator (canned data from `BatDat/<DUT_ID>.txt`):
//! ```bash
//! battery-acceptance BatXDev20240510
//! ```
//!
//! Against a physical fixture:
//! ```bash
//! battery-acceptance BatXDev20240510 --port /dev/ttyUSB0
//! ```
//!
//! # Exit status
//!
//! `0` whenever the run produced a report, including a failed verdict or missing
//! test data. Non-zero for an unusable configuration, a fixture that stopped
//! answering, a failing data collaborator or a report that could not be written.

use anyhow::{Context, Result};
use battery_acceptance::channel::open_serial;
use battery_acceptance::config::{AppConfig, ChannelKind, DataSourceKind};
use battery_acceptance::data_source::{CommandDataSource, DirectoryDataSource, TestDataSource};
use battery_acceptance::fixture::FixtureEmulator;
use battery_acceptance::logging::{self, LogFormat};
use battery_acceptance::report::{FileReportAssembler, ReportAssembler};
use battery_acceptance::run::{run_dut, run_emulated, RunOptions};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "battery-acceptance")]
#[command(about = "Acceptance test of a battery DUT", long_about = None)]
struct Cli {
    /// Identifier of the device under test
    dut_id: String,

    /// Configuration file (default: config/battery_test.toml if present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Serial port of a physical fixture; selects the serial channel
    #[arg(long)]
    port: Option<String>,

    /// Directory with canned test data for the fixture emulator
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Directory for report files
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Log output format: pretty, compact or json
    #[arg(long)]
    log_format: Option<LogFormat>,
}

impl Cli {
    fn apply_overrides(&self, config: &mut AppConfig) {
        if let Some(port) = &self.port {
            config.channel.kind = ChannelKind::Serial;
            config.channel.port = Some(port.clone());
        }
        if let Some(dir) = &self.data_dir {
            config.data_source.kind = DataSourceKind::Directory;
            config.data_source.dir = dir.clone();
        }
        if let Some(dir) = &self.output_dir {
            config.report.output_dir = dir.clone();
        }
        if let Some(format) = self.log_format {
            config.application.log_format = format;
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => AppConfig::load_from(path),
        None => AppConfig::load(),
    }
    .context("Failed to load configuration")?;
    cli.apply_overrides(&mut config);
    config.validate().context("Invalid configuration")?;

    logging::init_from_config(&config)
        .map_err(anyhow::Error::msg)
        .context("Failed to initialize logging")?;
    info!(app = %config.application.name, dut_id = %cli.dut_id, "Starting");

    let options = RunOptions::from_config(&config);
    let outcome = match config.channel.kind {
        ChannelKind::Loopback => {
            let emulator = FixtureEmulator::new(data_source(&config)?)
                .with_handshake_timeout(options.line_timeout)
                .with_sample_interval(config.fixture.sample_interval());
            run_emulated(&cli.dut_id, emulator, &config.limits, &options).await
        }
        ChannelKind::Serial => {
            let port = config.channel.port.as_deref().unwrap_or_default();
            let mut channel = open_serial(port, config.channel.baud_rate)
                .with_context(|| format!("Failed to open fixture port '{port}'"))?;
            run_dut(&cli.dut_id, &mut channel, &config.limits, &options).await
        }
    };

    let report = match outcome {
        Ok(report) => report,
        Err(err) => {
            error!(kind = %err.kind(), error = %err, "Run failed");
            eprintln!("Run for DUT {} failed: {} ({err})", cli.dut_id, err.kind());
            return Ok(if err.is_process_fatal() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            });
        }
    };

    let assembler = FileReportAssembler::new(&config.report.output_dir);
    let files = assembler
        .assemble(&report)
        .context("Failed to write report")?;

    let result = if report.any_failed() { "FAILED" } else { "PASSED" };
    println!("DUT {}: {result}", report.dut_id());
    for failure in report.verdict().failures() {
        println!("  {}: FAILED", failure.name);
    }
    for note in report.notes() {
        println!("  note: {}", note.describe());
    }
    for file in &files {
        println!("  report: {}", file.display());
    }
    Ok(ExitCode::SUCCESS)
}

fn data_source(config: &AppConfig) -> Result<Arc<dyn TestDataSource>> {
    let settings = &config.data_source;
    let source: Arc<dyn TestDataSource> = match settings.kind {
        DataSourceKind::Directory => {
            Arc::new(DirectoryDataSource::new(&settings.dir, settings.deadline()))
        }
        DataSourceKind::Command => {
            let program = settings
                .program
                .clone()
                .context("data_source.program is required for the command data source")?;
            Arc::new(
                CommandDataSource::new(program, settings.args.clone(), settings.deadline())
                    .with_not_found_exit_code(settings.not_found_exit_code),
            )
        }
    };
    Ok(source)
}
