//! Fixture protocol framer
//!
//! Turns the fixture's unstructured line stream into phase-tagged sample series.
//!
//! # State machine
//!
//! ```text
//! AwaitingExistence ──exists──▶ AwaitingVoltageTest ──voltage test──▶ InVoltageTest
//!        │                                                                │
//!        └──does not exist──▶ Completed ◀──end of test (any state)──      discharge phase
//!                                 ▲                                       ▼
//!                                 └────────────end of test──────── InDischargePhase
//! ```
//!
//! Every transition lives in [`FramerState::on_marker`]. Progression is strictly
//! forward: a marker that would move the framer back (or keep it where it is) is
//! ignored, so `InVoltageTest` can never be re-entered once the discharge started.
//! Forward skips are accepted, e.g. a fixture that never reports existence and opens
//! directly with `Voltage Test`.
//!
//! # Line classification
//!
//! Markers are matched first, case-insensitively, on fixed phrases (`does not exist`,
//! `exists`, `voltage test`, `discharge phase`, `end of test`). Any other line that
//! contains a digit or has exactly two whitespace-separated tokens is a data line;
//! everything else (`true`, `ok`, `measuring...`) is chatter and ignored. Inside a
//! data phase a data line is a commitment: it must parse as exactly two finite
//! decimals or framing fails with [`FramingError::MalformedSample`], so `abc def`
//! aborts the run instead of vanishing. Data lines outside a data phase are ignored.

use crate::channel::MeasurementChannel;
use crate::error::FramingError;
use crate::measurement::{Phase, PhaseSeries, Sample};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Framer state, ordered by protocol progression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FramerState {
    /// Waiting for the data-file existence report
    AwaitingExistence,
    /// Data exists; waiting for the voltage test to start
    AwaitingVoltageTest,
    /// Capturing the idle (no-load) measurement
    InVoltageTest,
    /// Capturing the discharge curve
    InDischargePhase,
    /// The run is over; further input is ignored
    Completed,
}

/// Fixed-phrase marker recognised in the line stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Marker {
    /// The fixture has a data file for the DUT
    DataPresent,
    /// The fixture has no data file for the DUT
    DataAbsent,
    /// The voltage test starts
    VoltageTest,
    /// The discharge phase starts
    DischargePhase,
    /// The test is over
    EndOfTest,
}

/// Classification of one received line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineClass {
    /// A phase marker
    Marker(Marker),
    /// Shaped like a sample: a sample when inside a data phase
    Data,
    /// Anything else
    Chatter,
}

// order matters: "does not exist" also contains "exist"
const MARKER_PHRASES: [(&str, Marker); 5] = [
    ("does not exist", Marker::DataAbsent),
    ("exists", Marker::DataPresent),
    ("voltage test", Marker::VoltageTest),
    ("discharge phase", Marker::DischargePhase),
    ("end of test", Marker::EndOfTest),
];

impl LineClass {
    /// Classify a line, terminator already stripped.
    pub fn of(line: &str) -> Self {
        let lowered = line.to_lowercase();
        if let Some((_, marker)) = MARKER_PHRASES
            .iter()
            .find(|(phrase, _)| lowered.contains(phrase))
        {
            return LineClass::Marker(*marker);
        }
        let has_digit = line.chars().any(|c| c.is_ascii_digit());
        if has_digit || line.split_whitespace().count() == 2 {
            LineClass::Data
        } else {
            LineClass::Chatter
        }
    }
}

impl FramerState {
    /// The transition table. `None` means the marker is ignored in this state.
    pub fn on_marker(self, marker: Marker) -> Option<FramerState> {
        use FramerState::*;

        match (self, marker) {
            (Completed, _) => None,
            (_, Marker::EndOfTest) => Some(Completed),
            (AwaitingExistence, Marker::DataAbsent) => Some(Completed),
            (AwaitingExistence, Marker::DataPresent) => Some(AwaitingVoltageTest),
            (AwaitingExistence | AwaitingVoltageTest, Marker::VoltageTest) => Some(InVoltageTest),
            (AwaitingExistence | AwaitingVoltageTest | InVoltageTest, Marker::DischargePhase) => {
                Some(InDischargePhase)
            }
            _ => None,
        }
    }

    /// Phase samples are captured under in this state.
    pub fn phase(self) -> Phase {
        match self {
            FramerState::AwaitingExistence | FramerState::AwaitingVoltageTest => Phase::Idle,
            FramerState::InVoltageTest => Phase::VoltageTest,
            FramerState::InDischargePhase => Phase::DischargePhase,
            FramerState::Completed => Phase::EndOfTest,
        }
    }

    /// Whether data lines are captured in this state.
    pub fn is_data_phase(self) -> bool {
        matches!(self, FramerState::InVoltageTest | FramerState::InDischargePhase)
    }
}

/// Result of framing one run.
#[derive(Debug, Clone, PartialEq)]
pub struct FramedRun {
    voltage: PhaseSeries,
    discharge: PhaseSeries,
    data_present: bool,
    completed: bool,
}

impl FramedRun {
    /// Samples captured during the voltage test.
    pub fn voltage(&self) -> &PhaseSeries {
        &self.voltage
    }

    /// Samples captured during the discharge phase.
    pub fn discharge(&self) -> &PhaseSeries {
        &self.discharge
    }

    /// `false` only if the fixture reported that no data exists for the DUT.
    pub fn data_present(&self) -> bool {
        self.data_present
    }

    /// Whether the framer reached [`FramerState::Completed`] before the input ended.
    pub fn completed(&self) -> bool {
        self.completed
    }

    /// Split into `(voltage, discharge)` series.
    pub fn into_series(self) -> (PhaseSeries, PhaseSeries) {
        (self.voltage, self.discharge)
    }
}

/// Incremental framer: feed lines one at a time, then [`finish`](Self::finish).
#[derive(Debug, Clone)]
pub struct ProtocolFramer {
    state: FramerState,
    voltage: PhaseSeries,
    discharge: PhaseSeries,
    data_present: bool,
    lines_seen: usize,
}

impl Default for ProtocolFramer {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolFramer {
    /// Fresh framer awaiting the existence report.
    pub fn new() -> Self {
        Self {
            state: FramerState::AwaitingExistence,
            voltage: PhaseSeries::new(Phase::VoltageTest),
            discharge: PhaseSeries::new(Phase::DischargePhase),
            data_present: true,
            lines_seen: 0,
        }
    }

    /// Current state.
    pub fn state(&self) -> FramerState {
        self.state
    }

    /// Whether the end of the test has been reached.
    pub fn is_completed(&self) -> bool {
        self.state == FramerState::Completed
    }

    /// Consume one line and return the state after it.
    pub fn feed(&mut self, line: &str) -> Result<FramerState, FramingError> {
        self.lines_seen += 1;

        match LineClass::of(line) {
            LineClass::Marker(marker) => self.apply_marker(marker),
            LineClass::Data if self.state.is_data_phase() => {
                let sample = Sample::parse_line(line).map_err(|source| {
                    FramingError::MalformedSample {
                        line_no: self.lines_seen,
                        line: line.to_string(),
                        source,
                    }
                })?;
                self.push(sample);
            }
            LineClass::Data => {
                trace!(state = ?self.state, line, "Ignoring data line outside a data phase");
            }
            LineClass::Chatter => {
                trace!(state = ?self.state, line, "Ignoring chatter");
            }
        }

        Ok(self.state)
    }

    /// Stop framing and hand over the captured series.
    pub fn finish(self) -> FramedRun {
        FramedRun {
            voltage: self.voltage,
            discharge: self.discharge,
            data_present: self.data_present,
            completed: self.state == FramerState::Completed,
        }
    }

    fn apply_marker(&mut self, marker: Marker) {
        match self.state.on_marker(marker) {
            Some(next) => {
                debug!(from = ?self.state, to = ?next, ?marker, "Framer transition");
                if marker == Marker::DataAbsent {
                    self.data_present = false;
                }
                self.state = next;
            }
            None if self.state == FramerState::Completed => {
                trace!(?marker, "Ignoring marker after end of test");
            }
            None => {
                warn!(state = ?self.state, ?marker, "Ignoring out-of-order marker");
            }
        }
    }

    fn push(&mut self, sample: Sample) {
        match self.state {
            FramerState::InVoltageTest => self.voltage.push(sample),
            FramerState::InDischargePhase => self.discharge.push(sample),
            _ => {}
        }
    }
}

/// Frame a finite sequence of lines.
///
/// Stops consuming at the end-of-test marker. Running out of lines first is not an
/// error; see [`FramedRun::completed`].
pub fn frame<I, S>(lines: I) -> Result<FramedRun, FramingError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut framer = ProtocolFramer::new();
    for line in lines {
        if framer.feed(line.as_ref())? == FramerState::Completed {
            break;
        }
    }
    Ok(framer.finish())
}

/// Frame lines read from a channel until end of test or end of stream.
///
/// Each read may wait at most `line_timeout`; a silent channel abandons the run with
/// [`FramingError::ChannelTimeout`].
pub async fn frame_channel<C>(
    channel: &mut C,
    line_timeout: Duration,
) -> Result<FramedRun, FramingError>
where
    C: MeasurementChannel + ?Sized,
{
    let mut framer = ProtocolFramer::new();

    while !framer.is_completed() {
        let line = match tokio::time::timeout(line_timeout, channel.read_line()).await {
            Err(_) => return Err(FramingError::ChannelTimeout(line_timeout)),
            Ok(read) => read?,
        };

        match line {
            Some(line) => {
                framer.feed(&line)?;
            }
            None => {
                if framer.state() != FramerState::AwaitingExistence {
                    warn!(state = ?framer.state(), "Channel ended before end of test");
                }
                break;
            }
        }
    }

    Ok(framer.finish())
}
