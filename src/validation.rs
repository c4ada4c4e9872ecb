//! Measurement validation against engineering limits.
//!
//! [`validate`] applies a [`LimitSet`] to the voltage-test and discharge series of
//! one run and produces a [`Verdict`]. Every check runs, whatever the outcome of the
//! others, because the report must list all of them:
//!
//! 1. `idle_voltage` - every voltage-test sample within `limits.voltage_test`
//! 2. `idle_current` - every voltage-test sample within `limits.current_test`
//! 3. `max_discharge_voltage` - the highest discharge voltage within `limits.voltage_discharge`
//! 4. `min_discharge_voltage` - the lowest discharge voltage within `limits.voltage_discharge`
//! 5. `discharge_current` - every discharge sample within `limits.current_discharge`
//! 6. `capacity` - `sum(voltage * current)` over the discharge series at least
//!    `limits.capacity_min` (only when configured)
//!
//! A check whose series is empty fails with [`Observation::InsufficientData`]; it is
//! never a vacuous pass.
//!
//! Checks 3 and 4 share one range, `limits.voltage_discharge`, bounding both
//! extremes of the discharge curve.

use crate::measurement::{PhaseSeries, Sample};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::RangeInclusive;

/// Closed `[min, max]` interval.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LimitRange {
    /// Lowest accepted value
    pub min: f64,
    /// Highest accepted value
    pub max: f64,
}

impl LimitRange {
    /// Interval from `min` to `max`, both inclusive.
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Whether `value` lies within the interval.
    pub fn contains(&self, value: f64) -> bool {
        self.as_range().contains(&value)
    }

    /// View as a std inclusive range.
    pub fn as_range(&self) -> RangeInclusive<f64> {
        self.min..=self.max
    }

    fn validate(&self, name: &str) -> Result<(), String> {
        if !self.min.is_finite() || !self.max.is_finite() {
            return Err(format!("{name} bounds must be finite"));
        }
        if self.min > self.max {
            return Err(format!(
                "{name} min ({}) is greater than max ({})",
                self.min, self.max
            ));
        }
        Ok(())
    }
}

/// Named limit configuration for one validation run.
///
/// Read-only for the duration of a run; share it across concurrent runs behind an
/// `Arc`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitSet {
    /// Idle (no-load) voltage
    pub voltage_test: LimitRange,
    /// Idle (no-load) current
    pub current_test: LimitRange,
    /// Bounds for both the highest and lowest discharge voltage
    pub voltage_discharge: LimitRange,
    /// Discharge current
    pub current_discharge: LimitRange,
    /// Minimum accumulated `voltage * current`; the capacity check is skipped when unset
    pub capacity_min: Option<f64>,
}

impl Default for LimitSet {
    fn default() -> Self {
        Self {
            voltage_test: LimitRange::new(8.0, 10.0),
            current_test: LimitRange::new(0.0, 1.0),
            voltage_discharge: LimitRange::new(5.8, 10.0),
            current_discharge: LimitRange::new(100.0, 150.0),
            capacity_min: None,
        }
    }
}

impl LimitSet {
    /// Reject non-finite bounds and inverted ranges.
    pub fn validate(&self) -> Result<(), String> {
        self.voltage_test.validate("voltage_test")?;
        self.current_test.validate("current_test")?;
        self.voltage_discharge.validate("voltage_discharge")?;
        self.current_discharge.validate("current_discharge")?;
        if let Some(capacity) = self.capacity_min {
            if !capacity.is_finite() {
                return Err("capacity_min must be finite".to_string());
            }
        }
        Ok(())
    }
}

/// Identifier of a check, in report order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckName {
    /// Voltage of every voltage-test sample
    IdleVoltage,
    /// Current of every voltage-test sample
    IdleCurrent,
    /// Highest discharge voltage
    MaxDischargeVoltage,
    /// Lowest discharge voltage
    MinDischargeVoltage,
    /// Current of every discharge sample
    DischargeCurrent,
    /// Accumulated `voltage * current` over the discharge
    Capacity,
}

impl CheckName {
    /// Stable snake_case label.
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckName::IdleVoltage => "idle_voltage",
            CheckName::IdleCurrent => "idle_current",
            CheckName::MaxDischargeVoltage => "max_discharge_voltage",
            CheckName::MinDischargeVoltage => "min_discharge_voltage",
            CheckName::DischargeCurrent => "discharge_current",
            CheckName::Capacity => "capacity",
        }
    }
}

impl fmt::Display for CheckName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a check expected.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expectation {
    /// Value(s) within a closed range
    Range(LimitRange),
    /// Value at least this threshold
    AtLeast(f64),
}

/// What a check observed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Observation {
    /// Lowest and highest observed value of a per-sample check
    Span {
        /// Lowest observed value
        min: f64,
        /// Highest observed value
        max: f64,
    },
    /// Single extreme or derived value
    Value(f64),
    /// The series needed by the check was empty
    InsufficientData,
}

/// Outcome of one check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    /// Which check
    pub name: CheckName,
    /// Whether the check passed
    pub passed: bool,
    /// Configured limit
    pub expected: Expectation,
    /// Observed value(s)
    pub actual: Observation,
    /// Indices into the checked series of the samples that broke the limit
    pub offending: Vec<usize>,
}

impl CheckResult {
    /// Whether the check could not be evaluated for lack of samples.
    pub fn is_insufficient_data(&self) -> bool {
        matches!(self.actual, Observation::InsufficientData)
    }

    fn insufficient(name: CheckName, expected: Expectation) -> Self {
        Self {
            name,
            passed: false,
            expected,
            actual: Observation::InsufficientData,
            offending: Vec::new(),
        }
    }
}

/// Complete pass/fail outcome of one run.
///
/// Only the ordered check results are stored; the overall outcome is always derived
/// from them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    results: Vec<CheckResult>,
}

impl Verdict {
    /// Build a verdict from check results in report order.
    pub fn new(results: Vec<CheckResult>) -> Self {
        Self { results }
    }

    /// All check results, in report order.
    pub fn results(&self) -> &[CheckResult] {
        &self.results
    }

    /// True iff at least one check failed.
    pub fn any_failed(&self) -> bool {
        self.results.iter().any(|r| !r.passed)
    }

    /// The failed checks.
    pub fn failures(&self) -> impl Iterator<Item = &CheckResult> {
        self.results.iter().filter(|r| !r.passed)
    }

    /// Look up a check by name.
    pub fn get(&self, name: CheckName) -> Option<&CheckResult> {
        self.results.iter().find(|r| r.name == name)
    }
}

/// Apply `limits` to the series of one run.
///
/// Pure and deterministic: identical inputs always produce identical verdicts.
pub fn validate(voltage: &PhaseSeries, discharge: &PhaseSeries, limits: &LimitSet) -> Verdict {
    let mut results = vec![
        every_sample_in_range(
            CheckName::IdleVoltage,
            voltage,
            limits.voltage_test,
            Sample::voltage,
        ),
        every_sample_in_range(
            CheckName::IdleCurrent,
            voltage,
            limits.current_test,
            Sample::current,
        ),
        extreme_in_range(
            CheckName::MaxDischargeVoltage,
            discharge,
            limits.voltage_discharge,
            f64::max,
        ),
        extreme_in_range(
            CheckName::MinDischargeVoltage,
            discharge,
            limits.voltage_discharge,
            f64::min,
        ),
        every_sample_in_range(
            CheckName::DischargeCurrent,
            discharge,
            limits.current_discharge,
            Sample::current,
        ),
    ];

    if let Some(threshold) = limits.capacity_min {
        results.push(capacity_at_least(discharge, threshold));
    }

    Verdict::new(results)
}

fn every_sample_in_range(
    name: CheckName,
    series: &PhaseSeries,
    range: LimitRange,
    quantity: fn(&Sample) -> f64,
) -> CheckResult {
    let expected = Expectation::Range(range);
    let Some(first) = series.first().map(quantity) else {
        return CheckResult::insufficient(name, expected);
    };

    let mut min = first;
    let mut max = first;
    let mut offending = Vec::new();
    for (index, value) in series.iter().map(quantity).enumerate() {
        min = min.min(value);
        max = max.max(value);
        if !range.contains(value) {
            offending.push(index);
        }
    }

    CheckResult {
        name,
        passed: offending.is_empty(),
        expected,
        actual: Observation::Span { min, max },
        offending,
    }
}

fn extreme_in_range(
    name: CheckName,
    series: &PhaseSeries,
    range: LimitRange,
    pick: fn(f64, f64) -> f64,
) -> CheckResult {
    let expected = Expectation::Range(range);
    let Some(extreme) = series.iter().map(Sample::voltage).reduce(pick) else {
        return CheckResult::insufficient(name, expected);
    };

    let passed = range.contains(extreme);
    let offending = if passed {
        Vec::new()
    } else {
        series
            .iter()
            .enumerate()
            .filter(|(_, s)| s.voltage() == extreme)
            .map(|(index, _)| index)
            .collect()
    };

    CheckResult {
        name,
        passed,
        expected,
        actual: Observation::Value(extreme),
        offending,
    }
}

fn capacity_at_least(series: &PhaseSeries, threshold: f64) -> CheckResult {
    let expected = Expectation::AtLeast(threshold);
    if series.is_empty() {
        return CheckResult::insufficient(CheckName::Capacity, expected);
    }

    let capacity: f64 = series.iter().map(Sample::power).sum();
    CheckResult {
        name: CheckName::Capacity,
        passed: capacity >= threshold,
        expected,
        actual: Observation::Value(capacity),
        offending: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::Phase;

    fn series(phase: Phase, points: &[(f64, f64)]) -> PhaseSeries {
        PhaseSeries::from_samples(
            phase,
            points
                .iter()
                .map(|&(v, c)| Sample::new(v, c).unwrap())
                .collect(),
        )
    }

    #[test]
    fn test_limit_range_is_inclusive() {
        let range = LimitRange::new(5.8, 10.0);
        assert!(range.contains(5.8));
        assert!(range.contains(10.0));
        assert!(!range.contains(5.79));
        assert!(!range.contains(10.01));
    }

    #[test]
    fn test_limit_set_validate() {
        assert!(LimitSet::default().validate().is_ok());

        let mut limits = LimitSet::default();
        limits.voltage_discharge = LimitRange::new(10.0, 5.8);
        assert!(limits
            .validate()
            .unwrap_err()
            .contains("voltage_discharge"));

        let mut limits = LimitSet::default();
        limits.voltage_test = LimitRange::new(f64::NAN, 1.0);
        assert!(limits.validate().is_err());

        let mut limits = LimitSet::default();
        limits.capacity_min = Some(f64::INFINITY);
        assert!(limits.validate().is_err());
    }

    #[test]
    fn test_offending_samples_are_reported() {
        let voltage = series(Phase::VoltageTest, &[(8.8, 0.4)]);
        let discharge = series(
            Phase::DischargePhase,
            &[(7.0, 120.0), (6.0, 160.0), (5.9, 90.0)],
        );

        let verdict = validate(&voltage, &discharge, &LimitSet::default());
        let current = verdict.get(CheckName::DischargeCurrent).unwrap();
        assert!(!current.passed);
        assert_eq!(current.offending, vec![1, 2]);
        assert_eq!(
            current.actual,
            Observation::Span {
                min: 90.0,
                max: 160.0
            }
        );
    }

    #[test]
    fn test_extreme_checks_share_discharge_range() {
        let voltage = series(Phase::VoltageTest, &[(8.8, 0.4)]);
        let discharge = series(Phase::DischargePhase, &[(10.5, 120.0), (6.0, 130.0)]);

        let verdict = validate(&voltage, &discharge, &LimitSet::default());
        let max = verdict.get(CheckName::MaxDischargeVoltage).unwrap();
        assert!(!max.passed);
        assert_eq!(max.actual, Observation::Value(10.5));
        assert_eq!(max.offending, vec![0]);

        let min = verdict.get(CheckName::MinDischargeVoltage).unwrap();
        assert!(min.passed);
        assert_eq!(min.actual, Observation::Value(6.0));
        assert_eq!(max.expected, min.expected);
    }

    #[test]
    fn test_capacity_disabled_by_default() {
        let voltage = series(Phase::VoltageTest, &[(8.8, 0.4)]);
        let discharge = series(Phase::DischargePhase, &[(7.0, 120.0)]);

        let verdict = validate(&voltage, &discharge, &LimitSet::default());
        assert_eq!(verdict.results().len(), 5);
        assert!(verdict.get(CheckName::Capacity).is_none());
    }

    #[test]
    fn test_capacity_threshold() {
        let voltage = series(Phase::VoltageTest, &[(8.8, 0.4)]);
        let discharge = series(Phase::DischargePhase, &[(7.0, 120.0), (6.0, 130.0)]);
        // 7*120 + 6*130 = 1620
        let mut limits = LimitSet::default();

        limits.capacity_min = Some(1620.0);
        let verdict = validate(&voltage, &discharge, &limits);
        let capacity = verdict.get(CheckName::Capacity).unwrap();
        assert!(capacity.passed);
        assert_eq!(capacity.actual, Observation::Value(1620.0));
        assert_eq!(capacity.expected, Expectation::AtLeast(1620.0));

        limits.capacity_min = Some(1620.5);
        let verdict = validate(&voltage, &discharge, &limits);
        assert!(!verdict.get(CheckName::Capacity).unwrap().passed);
        assert!(verdict.any_failed());
    }

    #[test]
    fn test_any_failed_tracks_results() {
        let verdict = Verdict::new(vec![]);
        assert!(!verdict.any_failed());

        let empty = PhaseSeries::new(Phase::VoltageTest);
        let verdict = validate(&empty, &PhaseSeries::new(Phase::DischargePhase), &LimitSet::default());
        assert!(verdict.any_failed());
        assert_eq!(verdict.failures().count(), 5);
        assert!(verdict.results().iter().all(CheckResult::is_insufficient_data));
    }
}
