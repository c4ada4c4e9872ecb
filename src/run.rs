//! Per-DUT pipeline and batch runner
//!
//! [`run_dut`] drives one DUT through the whole pipeline on a channel it is given:
//! announce the DUT, frame the fixture's line stream, close the channel, validate
//! and package the result as a [`TestReport`].
//!
//! [`run_emulated`] does the same against a [`FixtureEmulator`] on the other end of
//! an in-memory [`LoopbackChannel`], and [`run_batch`] runs many DUTs concurrently,
//! one tokio task each. Runs share nothing but the read-only [`LimitSet`]; a failing
//! run is recorded in its [`RunResult`] and never disturbs the others.

use crate::channel::{LoopbackChannel, MeasurementChannel};
use crate::config::AppConfig;
use crate::error::{FramingError, RunError};
use crate::fixture::{start_line, FixtureEmulator};
use crate::framer::frame_channel;
use crate::report::TestReport;
use crate::validation::{validate, LimitSet};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

/// Knobs of a single run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    /// Longest wait for any single line from the fixture.
    pub line_timeout: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            line_timeout: Duration::from_secs(10),
        }
    }
}

impl RunOptions {
    /// Options taken from the `[channel]` configuration section.
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            line_timeout: config.channel.line_timeout(),
        }
    }
}

/// Run one DUT over `channel`.
///
/// The channel is closed before validation whether or not framing succeeded.
///
/// # Errors
/// - `MalformedSample` if a committed data line does not parse
/// - `ChannelTimeout` if the fixture goes silent for longer than the line timeout
/// - `Channel` if the transport fails
pub async fn run_dut<C>(
    dut_id: &str,
    channel: &mut C,
    limits: &LimitSet,
    options: &RunOptions,
) -> Result<TestReport, RunError>
where
    C: MeasurementChannel + ?Sized,
{
    let run_id = Uuid::new_v4();
    let span = info_span!("dut_run", %dut_id, %run_id);

    async move {
        let started_at = Utc::now();
        info!("Starting acceptance test");

        let framed = match channel.write_line(&start_line(dut_id)).await {
            Ok(()) => frame_channel(channel, options.line_timeout).await,
            Err(e) => Err(FramingError::from(e)),
        };
        if let Err(e) = channel.close().await {
            warn!(error = %e, "Failed to close measurement channel");
        }
        let framed = framed?;

        let verdict = validate(framed.voltage(), framed.discharge(), limits);
        let report = TestReport::new(run_id, dut_id, started_at, framed, verdict);
        info!(
            passed = !report.any_failed(),
            failed_checks = report.verdict().failures().count(),
            voltage_samples = report.voltage_series().len(),
            discharge_samples = report.discharge_series().len(),
            notes = ?report.notes(),
            "Acceptance test finished"
        );
        Ok(report)
    }
    .instrument(span)
    .await
}

/// Run one DUT against a fixture emulator over an in-memory channel.
///
/// A host-side failure wins over whatever the emulator reports afterwards; a
/// collaborator failure that made the emulator stop early is returned as such.
pub async fn run_emulated(
    dut_id: &str,
    emulator: FixtureEmulator,
    limits: &LimitSet,
    options: &RunOptions,
) -> Result<TestReport, RunError> {
    let (mut host, mut fixture) = LoopbackChannel::pair();

    let fixture_task = tokio::spawn(async move {
        let result = emulator.serve(&mut fixture).await;
        // closing only fails on an already closed end
        let _ = fixture.close().await;
        result
    });

    let outcome = run_dut(dut_id, &mut host, limits, options).await;
    if outcome.is_err() {
        fixture_task.abort();
    }
    let fixture_result = fixture_task.await;
    let report = outcome?;

    match fixture_result {
        Ok(Ok(())) => Ok(report),
        Ok(Err(e)) => Err(e.into()),
        Err(e) => Err(RunError::Aborted(e.to_string())),
    }
}

/// One DUT of a batch.
pub struct DutJob {
    /// DUT identifier
    pub dut_id: String,
    /// Host end of the channel to the DUT's fixture
    pub channel: Box<dyn MeasurementChannel>,
}

impl DutJob {
    /// Job for `dut_id` on `channel`.
    pub fn new(dut_id: impl Into<String>, channel: impl MeasurementChannel + 'static) -> Self {
        Self {
            dut_id: dut_id.into(),
            channel: Box::new(channel),
        }
    }
}

impl std::fmt::Debug for DutJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DutJob").field("dut_id", &self.dut_id).finish_non_exhaustive()
    }
}

/// Outcome of one DUT of a batch.
#[derive(Debug)]
pub struct RunResult {
    /// DUT identifier
    pub dut_id: String,
    /// Report, or what the run failed with
    pub outcome: Result<TestReport, RunError>,
}

impl RunResult {
    /// Whether the run produced a report.
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Run every job on its own task and collect the outcomes in submission order.
pub async fn run_batch(
    jobs: Vec<DutJob>,
    limits: Arc<LimitSet>,
    options: RunOptions,
) -> Vec<RunResult> {
    let handles: Vec<_> = jobs
        .into_iter()
        .map(|job| {
            let limits = Arc::clone(&limits);
            let dut_id = job.dut_id.clone();
            let handle = tokio::spawn(async move {
                let DutJob {
                    dut_id,
                    mut channel,
                } = job;
                run_dut(&dut_id, &mut channel, &limits, &options).await
            });
            (dut_id, handle)
        })
        .collect();

    let mut results = Vec::with_capacity(handles.len());
    for (index, (dut_id, handle)) in handles.into_iter().enumerate() {
        let outcome = match handle.await {
            Ok(outcome) => outcome,
            Err(e) => Err(RunError::Aborted(e.to_string())),
        };
        if let Err(e) = &outcome {
            warn!(run = index + 1, %dut_id, kind = %e.kind(), error = %e, "Run failed");
        }
        results.push(RunResult { dut_id, outcome });
    }

    info!(
        runs = results.len(),
        failed = results.iter().filter(|r| !r.is_ok()).count(),
        "Batch finished"
    );
    results
}
