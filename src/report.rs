//! Report data contract and file assembler
//!
//! A finished run is captured in a [`TestReport`]: the DUT, the [`Verdict`], both
//! phase series and any run notes. The core never formats it for display; a
//! [`ReportAssembler`] turns it into durable artifacts.
//!
//! [`FileReportAssembler`] writes three files per run into its output directory,
//! all sharing the stem `report_<dutId>_<YYYYmmddHHMMSS>`:
//!
//! - `<stem>.json`: the full report record
//! - `<stem>_series.csv`: `phase,index,voltage,current` rows (feature `storage_csv`)
//! - `<stem>.txt`: a plain `DUT-ID` header and one `PASSED`/`FAILED` line per check

use crate::error::ReportError;
use crate::framer::FramedRun;
use crate::measurement::PhaseSeries;
use crate::validation::Verdict;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;
use uuid::Uuid;

/// Observation about a run that is not part of any check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunNote {
    /// The fixture reported that no test data exists for the DUT.
    DataNotFound,
    /// The line stream ended before `End of Test`.
    StreamEndedEarly,
}

impl RunNote {
    /// One-line description for text reports.
    pub fn describe(&self) -> &'static str {
        match self {
            RunNote::DataNotFound => "no test data found for this DUT",
            RunNote::StreamEndedEarly => "fixture stream ended before End of Test",
        }
    }
}

/// Everything a report assembler needs about one DUT run.
#[derive(Debug, Clone, Serialize)]
pub struct TestReport {
    run_id: Uuid,
    dut_id: String,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    verdict: Verdict,
    any_failed: bool,
    voltage_series: PhaseSeries,
    discharge_series: PhaseSeries,
    notes: Vec<RunNote>,
}

impl TestReport {
    /// Assemble the record for a framed and validated run.
    pub fn new(
        run_id: Uuid,
        dut_id: impl Into<String>,
        started_at: DateTime<Utc>,
        framed: FramedRun,
        verdict: Verdict,
    ) -> Self {
        let mut notes = Vec::new();
        if !framed.data_present() {
            notes.push(RunNote::DataNotFound);
        }
        if !framed.completed() {
            notes.push(RunNote::StreamEndedEarly);
        }

        let (voltage_series, discharge_series) = framed.into_series();
        Self {
            run_id,
            dut_id: dut_id.into(),
            started_at,
            finished_at: Utc::now(),
            any_failed: verdict.any_failed(),
            verdict,
            voltage_series,
            discharge_series,
            notes,
        }
    }

    /// Identifier of this run.
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// DUT under test.
    pub fn dut_id(&self) -> &str {
        &self.dut_id
    }

    /// When the host sent `START`.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// When validation completed.
    pub fn finished_at(&self) -> DateTime<Utc> {
        self.finished_at
    }

    /// Check results.
    pub fn verdict(&self) -> &Verdict {
        &self.verdict
    }

    /// Whether at least one check failed.
    pub fn any_failed(&self) -> bool {
        self.any_failed
    }

    /// Samples recorded in the voltage test.
    pub fn voltage_series(&self) -> &PhaseSeries {
        &self.voltage_series
    }

    /// Samples recorded in the discharge phase.
    pub fn discharge_series(&self) -> &PhaseSeries {
        &self.discharge_series
    }

    /// Run notes, in the order they were raised.
    pub fn notes(&self) -> &[RunNote] {
        &self.notes
    }

    /// Whether `note` was recorded for this run.
    pub fn has_note(&self, note: RunNote) -> bool {
        self.notes.contains(&note)
    }
}

/// Renders a [`TestReport`] into durable artifacts.
pub trait ReportAssembler {
    /// Produce the artifacts and return their paths.
    fn assemble(&self, report: &TestReport) -> Result<Vec<PathBuf>, ReportError>;
}

/// Writes JSON, CSV and text reports into a directory.
#[derive(Debug, Clone)]
pub struct FileReportAssembler {
    output_dir: PathBuf,
}

impl FileReportAssembler {
    /// Assembler writing into `output_dir`, created on first use.
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    /// Target directory.
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// File stem shared by all artifacts of `report`.
    pub fn stem(report: &TestReport) -> String {
        let dut: String = report
            .dut_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        format!(
            "report_{}_{}",
            dut,
            report.started_at.format("%Y%m%d%H%M%S")
        )
    }

    fn write_json(&self, path: &Path, report: &TestReport) -> Result<(), ReportError> {
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut writer, report)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }

    #[cfg(feature = "storage_csv")]
    fn write_series_csv(&self, path: &Path, report: &TestReport) -> Result<(), ReportError> {
        let mut writer = csv::Writer::from_path(path)?;
        writer.write_record(["phase", "index", "voltage", "current"])?;
        for series in [&report.voltage_series, &report.discharge_series] {
            for (index, sample) in series.iter().enumerate() {
                writer.write_record(&[
                    series.phase().to_string(),
                    index.to_string(),
                    sample.voltage().to_string(),
                    sample.current().to_string(),
                ])?;
            }
        }
        writer.flush()?;
        Ok(())
    }

    fn write_summary(&self, path: &Path, report: &TestReport) -> Result<(), ReportError> {
        let mut writer = BufWriter::new(File::create(path)?);
        writeln!(writer, "DUT-ID: {}", report.dut_id)?;
        writeln!(writer, "Run-ID: {}", report.run_id)?;
        writeln!(writer, "Date: {}", report.started_at.format("%Y-%m-%d %H:%M:%S UTC"))?;
        writeln!(writer)?;
        for result in report.verdict.results() {
            let status = if result.passed { "PASSED" } else { "FAILED" };
            if result.is_insufficient_data() {
                writeln!(writer, "{}: {} (insufficient data)", result.name, status)?;
            } else {
                writeln!(writer, "{}: {}", result.name, status)?;
            }
        }
        for note in &report.notes {
            writeln!(writer, "Note: {}", note.describe())?;
        }
        writeln!(writer)?;
        let overall = if report.any_failed { "FAILED" } else { "PASSED" };
        writeln!(writer, "Result: {overall}")?;
        writer.flush()?;
        Ok(())
    }
}

impl ReportAssembler for FileReportAssembler {
    fn assemble(&self, report: &TestReport) -> Result<Vec<PathBuf>, ReportError> {
        std::fs::create_dir_all(&self.output_dir)?;
        let stem = Self::stem(report);
        let mut written = Vec::with_capacity(3);

        let json_path = self.output_dir.join(format!("{stem}.json"));
        self.write_json(&json_path, report)?;
        written.push(json_path);

        #[cfg(feature = "storage_csv")]
        {
            let csv_path = self.output_dir.join(format!("{stem}_series.csv"));
            self.write_series_csv(&csv_path, report)?;
            written.push(csv_path);
        }

        let txt_path = self.output_dir.join(format!("{stem}.txt"));
        self.write_summary(&txt_path, report)?;
        written.push(txt_path);

        info!(
            dut_id = %report.dut_id,
            dir = %self.output_dir.display(),
            files = written.len(),
            "Report written"
        );
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framer::frame;
    use crate::validation::{validate, LimitSet};

    fn report_for(lines: &[&str]) -> TestReport {
        let framed = frame(lines.iter().copied()).unwrap();
        let verdict = validate(framed.voltage(), framed.discharge(), &LimitSet::default());
        TestReport::new(Uuid::new_v4(), "Bat/1", Utc::now(), framed, verdict)
    }

    const PASSING: &[&str] = &[
        "File BatDat/Bat1.txt exists.",
        "true",
        "Voltage Test",
        "8.8 0.4",
        "Discharge Phase",
        "7.0 120",
        "6.0 130",
        "End of Test",
    ];

    #[test]
    fn test_notes() {
        let report = report_for(PASSING);
        assert!(report.notes().is_empty());
        assert!(!report.any_failed());

        let report = report_for(&["File BatDat/Bat2.txt does not exist.", "End of Test"]);
        assert!(report.has_note(RunNote::DataNotFound));
        assert!(report.any_failed());

        let report = report_for(&["File BatDat/Bat1.txt exists.", "Voltage Test", "8.8 0.4"]);
        assert_eq!(report.notes(), [RunNote::StreamEndedEarly]);
    }

    #[test]
    fn test_stem_is_filesystem_safe() {
        let report = report_for(PASSING);
        let stem = FileReportAssembler::stem(&report);
        assert!(stem.starts_with("report_Bat_1_"));
        assert_eq!(stem.len(), "report_Bat_1_".len() + 14);
    }

    #[test]
    fn test_assemble_writes_files() {
        let dir = tempfile::tempdir().unwrap();
        let assembler = FileReportAssembler::new(dir.path().join("reports"));
        let report = report_for(PASSING);

        let files = assembler.assemble(&report).unwrap();
        assert!(files.iter().all(|p| p.exists()));

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&files[0]).unwrap()).unwrap();
        assert_eq!(json["dut_id"], "Bat/1");
        assert_eq!(json["any_failed"], false);
        assert_eq!(json["verdict"]["results"].as_array().unwrap().len(), 5);

        let summary = std::fs::read_to_string(files.last().unwrap()).unwrap();
        assert!(summary.starts_with("DUT-ID: Bat/1\n"));
        assert!(summary.contains("idle_voltage: PASSED"));
        assert!(summary.contains("Result: PASSED"));
    }

    #[cfg(feature = "storage_csv")]
    #[test]
    fn test_series_csv() {
        let dir = tempfile::tempdir().unwrap();
        let assembler = FileReportAssembler::new(dir.path());
        let files = assembler.assemble(&report_for(PASSING)).unwrap();

        let csv = std::fs::read_to_string(&files[1]).unwrap();
        let rows: Vec<&str> = csv.lines().collect();
        assert_eq!(rows, [
            "phase,index,voltage,current",
            "voltage_test,0,8.8,0.4",
            "discharge_phase,0,7,120",
            "discharge_phase,1,6,130",
        ]);
    }

    #[test]
    fn test_summary_marks_insufficient_data() {
        let dir = tempfile::tempdir().unwrap();
        let assembler = FileReportAssembler::new(dir.path());
        let report = report_for(&["File BatDat/Bat2.txt does not exist.", "End of Test"]);

        let files = assembler.assemble(&report).unwrap();
        let summary = std::fs::read_to_string(files.last().unwrap()).unwrap();
        assert!(summary.contains("idle_voltage: FAILED (insufficient data)"));
        assert!(summary.contains("Note: no test data found for this DUT"));
        assert!(summary.contains("Result: FAILED"));
    }
}
