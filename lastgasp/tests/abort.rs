//! Real termination: the test binary re-runs itself as a child that installs
//! the pipeline and panics, and the parent checks how the child died.

#![cfg(unix)]

use lastgasp::phases::{ConsoleLogger, FatalLogger};
use lastgasp::pipeline::{install, RecoveryConfig, RecoveryOptions, ENV_BACKUP_SINK};
use lastgasp::recorder::{FailureRecord, RecordKind};
use lastgasp::testing::{assert_record_kinds, read_records, Script, ScriptedLogger, ScriptedShutdown, TestSink};
use std::os::unix::process::ExitStatusExt;
use std::process::{Command, Output};
use std::time::Duration;

const SCENARIO_VAR: &str = "LASTGASP_TEST_SCENARIO";
const SIGABRT: i32 = 6;

/// Child entry point. Does nothing unless launched by [`run_child`].
#[test]
fn child_entry() {
    let Ok(scenario) = std::env::var(SCENARIO_VAR) else {
        return;
    };

    let (logger, shutdown): (Box<dyn FatalLogger>, Option<Script>) = match scenario.as_str() {
        "clean" => (Box::new(ConsoleLogger), Some(Script::Succeed)),
        "logger-throws" => (Box::new(ScriptedLogger::new(Script::Throw("logger offline".into()))), None),
        "logger-hangs" => (Box::new(ScriptedLogger::new(Script::Hang)), None),
        "naughty-shutdown" => (Box::new(ConsoleLogger), Some(Script::DoubleComplete)),
        "hook-panics" => (Box::new(ConsoleLogger), None),
        other => panic!("unknown scenario {other}"),
    };

    let mut builder = RecoveryConfig::builder()
        .shared_logger(logger.into())
        .logger_timeout(Duration::from_millis(100))
        .shutdown_timeout(Duration::from_millis(100))
        .silence_default_hook(true)
        .options(RecoveryOptions::from_env().unwrap());
    if let Some(script) = shutdown {
        builder = builder.graceful_shutdown(ScriptedShutdown::new(script));
    }
    if scenario == "hook-panics" {
        builder = builder.pre_terminate(|| panic!("pre-terminate exploded"));
    }
    install(builder.build().unwrap()).unwrap();

    panic!("child fatal error");
}

fn run_child(scenario: &str, backup: &str) -> Output {
    Command::new(std::env::current_exe().unwrap())
        .args(["child_entry", "--exact", "--nocapture", "--test-threads=1"])
        .env(SCENARIO_VAR, scenario)
        .env(ENV_BACKUP_SINK, backup)
        .env("RUST_BACKTRACE", "0")
        .output()
        .unwrap()
}

fn assert_aborted(output: &Output) {
    assert_eq!(
        output.status.signal(),
        Some(SIGABRT),
        "child did not abort: {:?}\nstderr:\n{}",
        output.status,
        String::from_utf8_lossy(&output.stderr)
    );
}

/// Failure records written to a standard stream. Lines may carry test
/// harness output in front of the record.
fn stream_records(stream: &[u8]) -> Vec<FailureRecord> {
    String::from_utf8_lossy(stream)
        .lines()
        .filter_map(|line| line.find('{').map(|start| &line[start..]))
        .filter_map(|json| FailureRecord::from_line(json).ok())
        .collect()
}

#[test]
fn test_clean_run_aborts_without_records() {
    let sink = TestSink::new();
    let output = run_child("clean", sink.path().to_str().unwrap());

    assert_aborted(&output);
    assert!(read_records(&sink.path()).is_empty());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Uncaught exception: panic: child fatal error"));
}

#[test]
fn test_throwing_logger_aborts_with_three_records() {
    let sink = TestSink::new();
    let output = run_child("logger-throws", sink.path().to_str().unwrap());

    assert_aborted(&output);
    assert_record_kinds(
        &sink.path(),
        &[
            RecordKind::ExceptionOccurred,
            RecordKind::LoggerSecondaryError,
            RecordKind::LoggerFailure,
        ],
    );
    let records = read_records(&sink.path());
    assert_eq!(records[0].message(), "child fatal error");
    assert_eq!(records[0].error.kind.as_deref(), Some("panic"));
    assert!(records[0].error.stack.as_deref().unwrap_or_default().contains("abort.rs"));
}

#[test]
fn test_hanging_logger_aborts_with_timeout_record() {
    let sink = TestSink::new();
    let output = run_child("logger-hangs", sink.path().to_str().unwrap());

    assert_aborted(&output);
    let records = read_records(&sink.path());
    assert_eq!(records.len(), 3);
    assert_eq!(records[2].error.kind.as_deref(), Some("lastgasp.logger.timeout"));
}

#[test]
fn test_naughty_shutdown_aborts_with_two_records() {
    let sink = TestSink::new();
    let output = run_child("naughty-shutdown", sink.path().to_str().unwrap());

    assert_aborted(&output);
    assert_record_kinds(
        &sink.path(),
        &[RecordKind::ExceptionOccurred, RecordKind::ShutdownSecondaryError],
    );
}

#[test]
fn test_panicking_pre_terminate_still_aborts() {
    let sink = TestSink::new();
    let output = run_child("hook-panics", sink.path().to_str().unwrap());

    assert_aborted(&output);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("child fatal error"));
}

#[test]
fn test_bad_backup_path_still_aborts() {
    let sink = TestSink::new();
    let missing = sink.dir().join("no").join("such").join("dir").join("backup.log");
    let output = run_child("logger-throws", missing.to_str().unwrap());

    assert_aborted(&output);
    assert!(!missing.exists());
}

#[test]
fn test_stdout_sink_receives_three_records() {
    let output = run_child("logger-throws", "stdout");

    assert_aborted(&output);
    let records = stream_records(&output.stdout);
    let kinds: Vec<_> = records.iter().map(|r| r.kind).collect();
    assert_eq!(
        kinds,
        vec![
            RecordKind::ExceptionOccurred,
            RecordKind::LoggerSecondaryError,
            RecordKind::LoggerFailure,
        ]
    );
    assert_eq!(records[1].message(), "logger offline");
    assert!(stream_records(&output.stderr).is_empty());
}

#[test]
fn test_stderr_sink_receives_three_records() {
    let output = run_child("logger-throws", "stderr");

    assert_aborted(&output);
    let records = stream_records(&output.stderr);
    assert_eq!(records.len(), 3);
    assert_eq!(records[0].message(), "child fatal error");
    assert_eq!(records[2].error.kind.as_deref(), Some("lastgasp.logger.threw"));
    assert!(stream_records(&output.stdout).is_empty());
}
