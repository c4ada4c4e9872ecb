//! Measurement data model shared by the framer, the validator and the reporters.
//!
//! A [`Sample`] is one `(voltage, current)` reading. Samples are captured into a
//! [`PhaseSeries`], which is tagged with the [`Phase`] it was recorded under and only
//! ever grows at the end: insertion order is the time axis of the discharge curve.
//!
//! The wire format exchanged with the fixture is exactly `"<voltage> <current>\n"`,
//! see [`Sample::to_line`] and [`Sample::parse_line`].

use crate::error::ParseSampleError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One voltage/current reading taken from the DUT.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawSample")]
pub struct Sample {
    voltage: f64,
    current: f64,
}

#[derive(Deserialize)]
struct RawSample {
    voltage: f64,
    current: f64,
}

impl TryFrom<RawSample> for Sample {
    type Error = ParseSampleError;

    fn try_from(raw: RawSample) -> Result<Self, Self::Error> {
        Sample::new(raw.voltage, raw.current)
    }
}

impl Sample {
    /// Create a sample, rejecting non-finite readings.
    pub fn new(voltage: f64, current: f64) -> Result<Self, ParseSampleError> {
        if !voltage.is_finite() || !current.is_finite() {
            return Err(ParseSampleError::NonFinite);
        }
        Ok(Self { voltage, current })
    }

    /// Voltage in volts.
    pub fn voltage(&self) -> f64 {
        self.voltage
    }

    /// Current as reported by the fixture.
    pub fn current(&self) -> f64 {
        self.current
    }

    /// Instantaneous `voltage * current` product used by the capacity check.
    pub fn power(&self) -> f64 {
        self.voltage * self.current
    }

    /// Parse a data line of exactly two whitespace-separated decimal tokens.
    ///
    /// Surrounding whitespace (including the `\n` terminator) is ignored.
    pub fn parse_line(line: &str) -> Result<Self, ParseSampleError> {
        let mut tokens = line.split_whitespace();
        let (Some(voltage), Some(current), None) = (tokens.next(), tokens.next(), tokens.next())
        else {
            return Err(ParseSampleError::TokenCount(line.split_whitespace().count()));
        };

        let voltage = parse_token(voltage)?;
        let current = parse_token(current)?;
        Self::new(voltage, current)
    }

    /// Serialize as a wire line, including the trailing `\n`.
    pub fn to_line(&self) -> String {
        format!("{self}\n")
    }
}

fn parse_token(token: &str) -> Result<f64, ParseSampleError> {
    token
        .parse::<f64>()
        .map_err(|_| ParseSampleError::InvalidNumber(token.to_string()))
}

/// Wire representation without the line terminator.
impl fmt::Display for Sample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.voltage, self.current)
    }
}

impl FromStr for Sample {
    type Err = ParseSampleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_line(s)
    }
}

/// Test phase a sample was captured under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Before any data phase has started.
    Idle,
    /// No-load measurement preceding the discharge.
    VoltageTest,
    /// Loaded discharge, sampled repeatedly.
    DischargePhase,
    /// The fixture reported the end of the test.
    EndOfTest,
}

impl Phase {
    /// Stable lowercase label, used in exported series.
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::VoltageTest => "voltage_test",
            Phase::DischargePhase => "discharge_phase",
            Phase::EndOfTest => "end_of_test",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only, phase-tagged sequence of samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseSeries {
    phase: Phase,
    samples: Vec<Sample>,
}

impl PhaseSeries {
    /// Empty series for `phase`.
    pub fn new(phase: Phase) -> Self {
        Self {
            phase,
            samples: Vec::new(),
        }
    }

    /// Series for `phase` holding `samples` in the given order.
    pub fn from_samples(phase: Phase, samples: Vec<Sample>) -> Self {
        Self { phase, samples }
    }

    /// Append a sample at the end of the series.
    pub fn push(&mut self, sample: Sample) {
        self.samples.push(sample);
    }

    /// Phase this series was captured under.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Samples in capture order.
    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// True when nothing was captured.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// First captured sample, if any.
    pub fn first(&self) -> Option<&Sample> {
        self.samples.first()
    }

    /// Iterate samples in capture order.
    pub fn iter(&self) -> std::slice::Iter<'_, Sample> {
        self.samples.iter()
    }
}

impl<'a> IntoIterator for &'a PhaseSeries {
    type Item = &'a Sample;
    type IntoIter = std::slice::Iter<'a, Sample>;

    fn into_iter(self) -> Self::IntoIter {
        self.samples.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_line() {
        let sample = Sample::parse_line("7.0 120\n").unwrap();
        assert_eq!(sample.voltage(), 7.0);
        assert_eq!(sample.current(), 120.0);

        let sample: Sample = "  8.8\t0.4 ".parse().unwrap();
        assert_eq!(sample.voltage(), 8.8);
        assert_eq!(sample.current(), 0.4);
    }

    #[test]
    fn test_parse_line_rejects_wrong_token_count() {
        assert_eq!(
            Sample::parse_line("8.8"),
            Err(ParseSampleError::TokenCount(1))
        );
        assert_eq!(
            Sample::parse_line("8.8 0.4 1"),
            Err(ParseSampleError::TokenCount(3))
        );
    }

    #[test]
    fn test_parse_line_rejects_bad_numbers() {
        assert!(matches!(
            Sample::parse_line("abc def"),
            Err(ParseSampleError::InvalidNumber(token)) if token == "abc"
        ));
        assert!(matches!(
            Sample::parse_line("7.0 12O"),
            Err(ParseSampleError::InvalidNumber(token)) if token == "12O"
        ));
        assert_eq!(
            Sample::parse_line("1 NaN"),
            Err(ParseSampleError::NonFinite)
        );
        assert_eq!(Sample::parse_line("inf 2"), Err(ParseSampleError::NonFinite));
    }

    #[test]
    fn test_wire_line_format() {
        let sample = Sample::new(7.0, 120.0).unwrap();
        assert_eq!(sample.to_line(), "7 120\n");

        let sample = Sample::new(3.7125, -0.25).unwrap();
        assert_eq!(sample.to_line(), "3.7125 -0.25\n");
        assert_eq!(Sample::parse_line(&sample.to_line()).unwrap(), sample);
    }

    #[test]
    fn test_power() {
        let sample = Sample::new(6.0, 130.0).unwrap();
        assert_eq!(sample.power(), 780.0);
    }

    #[test]
    fn test_phase_series_preserves_order() {
        let mut series = PhaseSeries::new(Phase::DischargePhase);
        assert!(series.is_empty());
        assert!(series.first().is_none());

        series.push(Sample::new(7.0, 120.0).unwrap());
        series.push(Sample::new(6.0, 130.0).unwrap());

        assert_eq!(series.phase(), Phase::DischargePhase);
        assert_eq!(series.len(), 2);
        assert_eq!(series.first().unwrap().voltage(), 7.0);
        let voltages: Vec<f64> = series.iter().map(Sample::voltage).collect();
        assert_eq!(voltages, vec![7.0, 6.0]);
    }

    #[test]
    fn test_deserialize_checks_finiteness() {
        use figment::providers::{Format, Toml};
        use figment::Figment;

        let sample: Sample = serde_json::from_str(r#"{"voltage": 7.0, "current": 120.0}"#).unwrap();
        assert_eq!(sample, Sample::new(7.0, 120.0).unwrap());

        let result = Figment::from(Toml::string("voltage = nan\ncurrent = 120.0")).extract::<Sample>();
        assert!(result.is_err());
    }
}
