//! End-to-end pipeline tests
//!
//! Runs DUTs through the fixture emulator, the loopback channel, the framer, the
//! validator and the file report assembler, the same path the CLI takes.

use battery_acceptance::channel::{LoopbackChannel, MeasurementChannel};
use battery_acceptance::data_source::{DirectoryDataSource, TestDataSource};
use battery_acceptance::error::RunErrorKind;
use battery_acceptance::fixture::FixtureEmulator;
use battery_acceptance::report::{FileReportAssembler, ReportAssembler, RunNote};
use battery_acceptance::run::{run_batch, run_dut, run_emulated, DutJob, RunOptions};
use battery_acceptance::validation::{CheckName, LimitSet};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const DEADLINE: Duration = Duration::from_secs(5);

/// Data directory with one passing and one deep-discharged DUT.
fn data_dir() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("BatGood.txt"), "8.8 0.4\n7.0 120\n6.0 130\n5.9 125\n").unwrap();
    fs::write(dir.path().join("BatDeep.txt"), "8.8 0.4\n7.0 120\n6.0 130\n4.0 130\n").unwrap();
    fs::write(dir.path().join("BatBroken.txt"), "8.8 0.4\n7.0 120\n7,0 11O\n").unwrap();
    dir
}

fn emulator(dir: &Path) -> FixtureEmulator {
    let source: Arc<dyn TestDataSource> = Arc::new(DirectoryDataSource::new(dir, DEADLINE));
    FixtureEmulator::new(source).with_handshake_timeout(DEADLINE)
}

fn options() -> RunOptions {
    RunOptions {
        line_timeout: Duration::from_secs(5),
    }
}

#[tokio::test]
async fn test_emulated_passing_dut() {
    let dir = data_dir();

    let report = run_emulated("BatGood", emulator(dir.path()), &LimitSet::default(), &options())
        .await
        .unwrap();

    assert_eq!(report.dut_id(), "BatGood");
    assert!(!report.any_failed());
    assert!(report.notes().is_empty());
    assert_eq!(report.voltage_series().len(), 1);
    assert_eq!(report.discharge_series().len(), 3);
}

#[tokio::test]
async fn test_emulated_deep_discharge() {
    let dir = data_dir();

    let report = run_emulated("BatDeep", emulator(dir.path()), &LimitSet::default(), &options())
        .await
        .unwrap();

    assert!(report.any_failed());
    let failed: Vec<_> = report.verdict().failures().map(|r| r.name).collect();
    assert_eq!(failed, [CheckName::MinDischargeVoltage]);
}

#[tokio::test]
async fn test_emulated_unknown_dut_reports_data_not_found() {
    let dir = data_dir();

    let report = run_emulated("BatMissing", emulator(dir.path()), &LimitSet::default(), &options())
        .await
        .unwrap();

    assert!(report.has_note(RunNote::DataNotFound));
    assert!(report.voltage_series().is_empty());
    assert!(report.discharge_series().is_empty());
    assert!(report
        .verdict()
        .results()
        .iter()
        .all(|r| r.is_insufficient_data()));
}

#[tokio::test]
async fn test_emulated_malformed_data_file() {
    let dir = data_dir();

    let err = run_emulated("BatBroken", emulator(dir.path()), &LimitSet::default(), &options())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), RunErrorKind::MalformedSample);
    assert!(!err.is_process_fatal());
}

#[tokio::test]
async fn test_emulated_paced_samples() {
    let dir = data_dir();
    let emulator = emulator(dir.path()).with_sample_interval(Duration::from_millis(5));

    let report = run_emulated("BatGood", emulator, &LimitSet::default(), &options())
        .await
        .unwrap();

    assert_eq!(report.discharge_series().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_silent_fixture_times_out() {
    // fixture end stays open and never answers
    let (mut host, _fixture) = LoopbackChannel::pair();
    let options = RunOptions {
        line_timeout: Duration::from_millis(100),
    };

    let err = run_dut("BatGood", &mut host, &LimitSet::default(), &options)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), RunErrorKind::ChannelTimeout);
    assert!(err.is_process_fatal());
}

#[tokio::test]
async fn test_fixture_stream_ending_early() {
    let (mut host, mut fixture) = LoopbackChannel::pair();
    let fixture_task = tokio::spawn(async move {
        assert_eq!(fixture.read_line().await.unwrap().as_deref(), Some("START Bat7"));
        for line in ["File BatDat/Bat7.txt exists.", "Voltage Test", "8.8 0.4"] {
            fixture.write_line(line).await.unwrap();
        }
        fixture.close().await.unwrap();
    });

    let report = run_dut("Bat7", &mut host, &LimitSet::default(), &options())
        .await
        .unwrap();
    fixture_task.await.unwrap();

    assert!(report.has_note(RunNote::StreamEndedEarly));
    assert_eq!(report.voltage_series().len(), 1);
    assert!(report
        .verdict()
        .get(CheckName::MinDischargeVoltage)
        .unwrap()
        .is_insufficient_data());
}

#[cfg(unix)]
#[tokio::test]
async fn test_failing_generator_is_collaborator_failure() {
    use battery_acceptance::data_source::CommandDataSource;

    let source = CommandDataSource::new(
        "sh",
        vec![
            "-c".to_string(),
            "echo 'calibration table missing' >&2; exit 2".to_string(),
            "generator".to_string(),
        ],
        DEADLINE,
    );
    let emulator = FixtureEmulator::new(Arc::new(source));

    let err = run_emulated("Bat1", emulator, &LimitSet::default(), &options())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), RunErrorKind::CollaboratorFailure);
    assert!(err.is_process_fatal());
    assert!(err.to_string().contains("exited with"));
}

#[cfg(unix)]
#[tokio::test]
async fn test_generator_backed_run() {
    use battery_acceptance::data_source::CommandDataSource;

    let script = r#"case "$1" in
        Bat1) printf '9.0 0.5\n8.0 110\n7.0 115\n';;
        *) exit 3;;
    esac"#;
    let source = CommandDataSource::new(
        "sh",
        vec!["-c".to_string(), script.to_string(), "generator".to_string()],
        DEADLINE,
    );
    let source: Arc<dyn TestDataSource> = Arc::new(source);

    let report = run_emulated(
        "Bat1",
        FixtureEmulator::new(Arc::clone(&source)),
        &LimitSet::default(),
        &options(),
    )
    .await
    .unwrap();
    assert!(!report.any_failed());

    let report = run_emulated("Bat2", FixtureEmulator::new(source), &LimitSet::default(), &options())
        .await
        .unwrap();
    assert!(report.has_note(RunNote::DataNotFound));
}

#[tokio::test]
async fn test_batch_of_emulated_fixtures() {
    let dir = data_dir();
    let emulated = ["BatGood", "BatMissing", "BatDeep"];

    let mut jobs = Vec::new();
    let mut fixtures = Vec::new();
    for dut in emulated {
        let (host, mut fixture) = LoopbackChannel::pair();
        let emulator = emulator(dir.path());
        fixtures.push(tokio::spawn(async move {
            let _ = emulator.serve(&mut fixture).await;
            let _ = fixture.close().await;
        }));
        jobs.push(DutJob::new(dut, host));
    }
    // a fixture garbling its discharge output
    jobs.insert(
        1,
        DutJob::new(
            "BatNoisy",
            LoopbackChannel::seeded([
                "File BatDat/BatNoisy.txt exists.",
                "Voltage Test",
                "8.8 0.4",
                "Discharge Phase",
                "7.0 1#0",
            ]),
        ),
    );

    let results = run_batch(jobs, Arc::new(LimitSet::default()), options()).await;
    for fixture in fixtures {
        fixture.await.unwrap();
    }

    let ids: Vec<_> = results.iter().map(|r| r.dut_id.as_str()).collect();
    assert_eq!(ids, ["BatGood", "BatNoisy", "BatMissing", "BatDeep"]);

    let good = results[0].outcome.as_ref().unwrap();
    assert!(!good.any_failed());

    let noisy = results[1].outcome.as_ref().unwrap_err();
    assert_eq!(noisy.kind(), RunErrorKind::MalformedSample);

    let missing = results[2].outcome.as_ref().unwrap();
    assert!(missing.has_note(RunNote::DataNotFound));

    let deep = results[3].outcome.as_ref().unwrap();
    assert!(deep.any_failed());
}

#[tokio::test]
async fn test_report_files_for_emulated_run() {
    let dir = data_dir();
    let out = tempfile::tempdir().unwrap();

    let report = run_emulated("BatDeep", emulator(dir.path()), &LimitSet::default(), &options())
        .await
        .unwrap();
    let files = FileReportAssembler::new(out.path()).assemble(&report).unwrap();

    let summary_path = files
        .iter()
        .find(|p| p.extension().is_some_and(|e| e == "txt"))
        .unwrap();
    let summary = fs::read_to_string(summary_path).unwrap();
    assert!(summary.starts_with("DUT-ID: BatDeep\n"));
    assert!(summary.contains("min_discharge_voltage: FAILED"));
    assert!(summary.contains("max_discharge_voltage: PASSED"));
    assert!(summary.contains("Result: FAILED"));

    let json_path = files
        .iter()
        .find(|p| p.extension().is_some_and(|e| e == "json"))
        .unwrap();
    let json: serde_json::Value = serde_json::from_str(&fs::read_to_string(json_path).unwrap()).unwrap();
    assert_eq!(json["any_failed"], true);
    assert_eq!(json["discharge_series"]["samples"].as_array().unwrap().len(), 3);
}
