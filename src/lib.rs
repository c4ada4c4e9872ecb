//! # Battery Acceptance Core Library
//!
//! This crate drives acceptance tests of battery DUTs (devices under test). A test
//! fixture streams a line-oriented script of phase markers and `"<voltage> <current>"`
//! samples; the library frames that stream into phases, validates the samples
//! against engineering limits and hands a structured report to an assembler. The
//! `battery-acceptance` binary is a thin CLI on top.
//!
//! Data flow of one run:
//!
//! ```text
//! TestDataSource -> FixtureEmulator -> MeasurementChannel -> ProtocolFramer
//!                -> validate(LimitSet) -> TestReport -> ReportAssembler
//! ```
//!
//! ## Crate Structure
//!
//! - **`channel`**: The `MeasurementChannel` trait and its transports, an in-memory
//!   `LoopbackChannel` and a serial-port `StreamChannel`.
//! - **`config`**: Layered `figment` configuration (`AppConfig`), TOML plus
//!   `BATTERY_TEST_` environment overrides.
//! - **`data_source`**: The `TestDataSource` collaborator: data files in a directory
//!   or an external generator process.
//! - **`error`**: `thiserror` enums for every stage and the per-run `RunError`.
//! - **`fixture`**: `FixtureEmulator`, which plays a DUT's data onto a channel the
//!   way a physical fixture does.
//! - **`framer`**: The `ProtocolFramer` state machine.
//! - **`logging`**: `tracing-subscriber` initialisation.
//! - **`measurement`**: `Sample`, `Phase` and `PhaseSeries`.
//! - **`report`**: The `TestReport` record and the `ReportAssembler` trait.
//! - **`run`**: Single-DUT pipeline and the concurrent batch runner.
//! - **`validation`**: `LimitSet`, the six checks and the `Verdict`.

pub mod channel;
pub mod config;
pub mod data_source;
pub mod error;
pub mod fixture;
pub mod framer;
pub mod logging;
pub mod measurement;
pub mod report;
pub mod run;
pub mod validation;

pub use error::{RunError, RunErrorKind};
pub use framer::{frame, frame_channel, FramedRun, ProtocolFramer};
pub use measurement::{Phase, PhaseSeries, Sample};
pub use report::{ReportAssembler, TestReport};
pub use run::{run_batch, run_dut, run_emulated, RunOptions, RunResult};
pub use validation::{validate, LimitSet, Verdict};
