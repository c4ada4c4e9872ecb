//! Fixture emulator
//!
//! Plays the DUT-side script over a [`MeasurementChannel`] so the whole pipeline can
//! run without a physical test fixture. The emulator waits for the host's
//! `START <dutId>` line, asks its [`TestDataSource`] for the DUT's samples and then
//! reproduces what a real fixture prints:
//!
//! ```text
//! File BatDat/Bat1.txt exists.
//! true
//! Voltage Test
//! 8.8 0.4
//! Discharge Phase
//! 7.0 120
//! 6.0 130
//! End of Test
//! ```
//!
//! A DUT without data produces `File ... does not exist.` followed by `End of Test`.

use crate::channel::MeasurementChannel;
use crate::data_source::TestDataSource;
use crate::error::{DataSourceError, FixtureError};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Keyword of the host's opening line.
pub const START_KEYWORD: &str = "START";

/// Host line that opens a run for `dut_id`.
pub fn start_line(dut_id: &str) -> String {
    format!("{START_KEYWORD} {dut_id}")
}

/// Extract the DUT identifier from a `START <dutId>` line.
pub fn parse_start_line(line: &str) -> Option<&str> {
    let mut tokens = line.split_whitespace();
    match (tokens.next(), tokens.next(), tokens.next()) {
        (Some(keyword), Some(dut_id), None) if keyword.eq_ignore_ascii_case(START_KEYWORD) => {
            Some(dut_id)
        }
        _ => None,
    }
}

/// DUT-side script player.
#[derive(Clone)]
pub struct FixtureEmulator {
    source: Arc<dyn TestDataSource>,
    handshake_timeout: Duration,
    sample_interval: Duration,
}

impl std::fmt::Debug for FixtureEmulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FixtureEmulator")
            .field("handshake_timeout", &self.handshake_timeout)
            .field("sample_interval", &self.sample_interval)
            .finish_non_exhaustive()
    }
}

impl FixtureEmulator {
    /// Emulator serving data from `source`.
    pub fn new(source: Arc<dyn TestDataSource>) -> Self {
        Self {
            source,
            handshake_timeout: Duration::from_secs(10),
            sample_interval: Duration::ZERO,
        }
    }

    /// How long to wait for the host's `START` line.
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Pause between discharge samples, mimicking a slow discharge.
    pub fn with_sample_interval(mut self, interval: Duration) -> Self {
        self.sample_interval = interval;
        self
    }

    /// Wait for the host's `START` line, then play the script for that DUT.
    ///
    /// The channel is left open; the caller decides when to close it.
    pub async fn serve<C>(&self, channel: &mut C) -> Result<(), FixtureError>
    where
        C: MeasurementChannel + ?Sized,
    {
        let line = match tokio::time::timeout(self.handshake_timeout, channel.read_line()).await {
            Err(_) => return Err(FixtureError::HandshakeTimeout(self.handshake_timeout)),
            Ok(Ok(Some(line))) => line,
            Ok(Ok(None)) => return Err(FixtureError::UnexpectedHandshake(String::new())),
            Ok(Err(e)) => return Err(e.into()),
        };

        let dut_id = parse_start_line(&line)
            .ok_or_else(|| FixtureError::UnexpectedHandshake(line.clone()))?;
        self.play(dut_id, channel).await
    }

    /// Play the script for `dut_id` without waiting for a handshake.
    pub async fn play<C>(&self, dut_id: &str, channel: &mut C) -> Result<(), FixtureError>
    where
        C: MeasurementChannel + ?Sized,
    {
        let location = self.source.location(dut_id);

        // single collaborator call per DUT
        let samples = match self.source.load_samples(dut_id).await {
            Ok(samples) => samples,
            Err(DataSourceError::DataNotFound { .. }) => {
                info!(dut_id, location = %location, "No test data, ending run");
                channel
                    .write_line(&format!("File {location} does not exist."))
                    .await?;
                channel.write_line("End of Test").await?;
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        debug!(dut_id, samples = samples.len(), "Playing fixture script");

        channel.write_line(&format!("File {location} exists.")).await?;
        channel.write_line("true").await?;
        channel.write_line("Voltage Test").await?;

        let mut samples = samples.iter();
        if let Some(first) = samples.next() {
            channel.write_line(&first.to_string()).await?;
        }

        channel.write_line("Discharge Phase").await?;
        for sample in samples {
            if !self.sample_interval.is_zero() {
                tokio::time::sleep(self.sample_interval).await;
            }
            channel.write_line(&sample.to_string()).await?;
        }

        channel.write_line("End of Test").await?;
        Ok(())
    }
}
