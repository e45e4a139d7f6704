//! End-to-end pipeline behaviour, observed in-process through an unwinding
//! abort primitive.

use lastgasp::core::{ErrorSnapshot, ExceptionRecord, FailureKind, PhaseOutcome, PipelineState};
use lastgasp::errors::ConfigError;
use lastgasp::pipeline::{PipelineController, RecoveryConfig};
use lastgasp::recorder::{BackupSink, RecordKind};
use lastgasp::testing::{
    assert_record_kinds, expect_abort, read_records, unwinding_abort, Script, ScriptedLogger,
    ScriptedShutdown, TestSink,
};
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const SHORT: Duration = Duration::from_millis(60);

fn trigger() -> ExceptionRecord {
    ExceptionRecord::new(
        ErrorSnapshot::new("connection pool poisoned")
            .with_type("panic")
            .with_stack("panicked at src/db.rs:42:9"),
    )
}

fn controller(sink: &TestSink, logger: Script, shutdown: Option<Script>) -> Arc<PipelineController> {
    let mut builder = RecoveryConfig::builder()
        .logger(ScriptedLogger::new(logger))
        .backup_sink(sink.sink())
        .logger_timeout(SHORT)
        .shutdown_timeout(SHORT)
        .abort(unwinding_abort);
    if let Some(script) = shutdown {
        builder = builder.graceful_shutdown(ScriptedShutdown::new(script));
    }
    PipelineController::new(builder.build().unwrap())
}

#[test]
fn test_clean_run_writes_nothing_and_aborts() {
    let sink = TestSink::new();
    let pipeline = controller(&sink, Script::Succeed, Some(Script::Succeed));

    expect_abort(|| pipeline.on_fatal(trigger()));

    assert_eq!(pipeline.state(), PipelineState::Terminated);
    assert!(read_records(&sink.path()).is_empty());
}

#[test]
fn test_logger_throw_writes_three_records() {
    let sink = TestSink::new();
    let pipeline = controller(&sink, Script::Throw("disk full".into()), None);

    expect_abort(|| pipeline.on_fatal(trigger()));

    let records = read_records(&sink.path());
    assert_record_kinds(
        &sink.path(),
        &[
            RecordKind::ExceptionOccurred,
            RecordKind::LoggerSecondaryError,
            RecordKind::LoggerFailure,
        ],
    );
    assert_eq!(records[0].message(), "connection pool poisoned");
    assert_eq!(records[0].error.stack.as_deref(), Some("panicked at src/db.rs:42:9"));
    assert_eq!(records[1].message(), "disk full");
    assert_eq!(records[2].error.kind.as_deref(), Some("lastgasp.logger.threw"));
    assert_eq!(records[2].state, Some(PipelineState::RunningLogger));
    assert!(records.iter().all(|r| r.incident == Some(pipeline.incident())));
}

#[test]
fn test_logger_panic_is_threw() {
    let sink = TestSink::new();
    let pipeline = controller(&sink, Script::Panic("logger bug".into()), None);

    expect_abort(|| pipeline.on_fatal(trigger()));

    let records = read_records(&sink.path());
    assert_eq!(records.len(), 3);
    assert_eq!(records[1].message(), "logger bug");
    assert_eq!(records[2].error.kind.as_deref(), Some("lastgasp.logger.threw"));
}

#[test]
fn test_logger_timeout() {
    let sink = TestSink::new();
    let pipeline = controller(&sink, Script::Hang, None);

    expect_abort(|| pipeline.on_fatal(trigger()));

    let records = read_records(&sink.path());
    assert_eq!(records.len(), 3);
    assert_eq!(records[1].message(), "connection pool poisoned");
    assert_eq!(records[2].error.kind.as_deref(), Some("lastgasp.logger.timeout"));
    assert!(records[2].message().contains("60 ms"));
}

#[tokio::test]
async fn test_late_logger_completion_adds_nothing() {
    let sink = TestSink::new();
    let pipeline = controller(&sink, Script::SucceedAfter(Duration::from_millis(150)), None);

    let report = pipeline.recover(trigger()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(report.logger.failure_kind(), Some(FailureKind::TimedOut));
    let records = read_records(&sink.path());
    assert_eq!(records.len(), 3);
    assert_eq!(records[2].error.kind.as_deref(), Some("lastgasp.logger.timeout"));
}

#[test]
fn test_logger_async_error() {
    let sink = TestSink::new();
    let pipeline = controller(&sink, Script::AsyncError("collector refused".into()), None);

    expect_abort(|| pipeline.on_fatal(trigger()));

    let records = read_records(&sink.path());
    assert_eq!(records.len(), 3);
    assert_eq!(records[1].message(), "collector refused");
    assert_eq!(records[2].error.kind.as_deref(), Some("lastgasp.logger.async-error"));
}

#[test]
fn test_logger_complete_then_throw_is_violation() {
    let sink = TestSink::new();
    let pipeline = controller(&sink, Script::CompleteThenThrow("after the fact".into()), None);

    expect_abort(|| pipeline.on_fatal(trigger()));

    assert_record_kinds(
        &sink.path(),
        &[RecordKind::ExceptionOccurred, RecordKind::LoggerSecondaryError],
    );
}

#[test]
fn test_shutdown_failures_are_independent_of_logger() {
    let sink = TestSink::new();
    let pipeline = controller(&sink, Script::Throw("logger down".into()), Some(Script::Hang));

    expect_abort(|| pipeline.on_fatal(trigger()));

    let records = read_records(&sink.path());
    assert_record_kinds(
        &sink.path(),
        &[
            RecordKind::ExceptionOccurred,
            RecordKind::LoggerSecondaryError,
            RecordKind::LoggerFailure,
            RecordKind::ExceptionOccurred,
            RecordKind::ShutdownSecondaryError,
            RecordKind::ShutdownFailure,
        ],
    );
    assert_eq!(records[5].error.kind.as_deref(), Some("lastgasp.shutdown.timeout"));
    assert_eq!(records[5].state, Some(PipelineState::RunningShutdown));
}

#[tokio::test]
async fn test_shutdown_outcomes() {
    let cases = [
        (Script::Throw("close failed".into()), FailureKind::Threw, "lastgasp.shutdown.threw"),
        (Script::Hang, FailureKind::TimedOut, "lastgasp.shutdown.timeout"),
        (
            Script::AsyncError("flush failed".into()),
            FailureKind::AsyncError,
            "lastgasp.shutdown.async-error",
        ),
    ];

    for (script, kind, tag) in cases {
        let sink = TestSink::new();
        let pipeline = controller(&sink, Script::Succeed, Some(script));

        let report = pipeline.recover(trigger()).await.unwrap();

        assert_eq!(report.logger, PhaseOutcome::Succeeded);
        assert_eq!(report.shutdown.failure_kind(), Some(kind));
        let records = read_records(&sink.path());
        assert_eq!(records.len(), 3, "{tag}");
        assert_eq!(records[2].kind, RecordKind::ShutdownFailure);
        assert_eq!(records[2].error.kind.as_deref(), Some(tag));
    }
}

#[test]
fn test_shutdown_double_completion_writes_two_records() {
    let sink = TestSink::new();
    let pipeline = controller(&sink, Script::Succeed, Some(Script::DoubleComplete));

    expect_abort(|| pipeline.on_fatal(trigger()));

    assert_record_kinds(
        &sink.path(),
        &[RecordKind::ExceptionOccurred, RecordKind::ShutdownSecondaryError],
    );
}

#[tokio::test]
async fn test_shutdown_late_double_completion_writes_two_records() {
    let sink = TestSink::new();
    let pipeline = controller(
        &sink,
        Script::Succeed,
        Some(Script::DoubleCompleteAfter(Duration::from_millis(10))),
    );

    let report = pipeline.recover(trigger()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(report.is_clean());
    let records = read_records(&sink.path());
    assert_record_kinds(
        &sink.path(),
        &[RecordKind::ExceptionOccurred, RecordKind::ShutdownSecondaryError],
    );
    assert_eq!(
        records[1].error.kind.as_deref(),
        Some("lastgasp.shutdown.protocol-violation")
    );
}

#[test]
fn test_shutdown_blocking_past_deadline_is_timeout() {
    let sink = TestSink::new();
    let pipeline = PipelineController::new(
        RecoveryConfig::builder()
            .logger(ScriptedLogger::new(Script::Succeed))
            .shutdown_fn(|done| {
                std::thread::sleep(Duration::from_millis(500));
                done.done();
                Ok(())
            })
            .backup_sink(sink.sink())
            .shutdown_timeout(SHORT)
            .abort(unwinding_abort)
            .build()
            .unwrap(),
    );

    let started = Instant::now();
    expect_abort(|| pipeline.on_fatal(trigger()));

    assert!(started.elapsed() < Duration::from_millis(400));
    let records = read_records(&sink.path());
    assert_record_kinds(
        &sink.path(),
        &[
            RecordKind::ExceptionOccurred,
            RecordKind::ShutdownSecondaryError,
            RecordKind::ShutdownFailure,
        ],
    );
    assert_eq!(records[2].error.kind.as_deref(), Some("lastgasp.shutdown.timeout"));
}

#[test]
fn test_shutdown_waiting_on_the_failing_thread_still_terminates() {
    let sink = TestSink::new();
    let lock = Arc::new(parking_lot::Mutex::new(()));
    let contended = lock.clone();
    let pipeline = PipelineController::new(
        RecoveryConfig::builder()
            .logger(ScriptedLogger::new(Script::Succeed))
            .shutdown_fn(move |done| {
                let _guard = contended.lock();
                done.done();
                Ok(())
            })
            .backup_sink(sink.sink())
            .shutdown_timeout(SHORT)
            .abort(unwinding_abort)
            .build()
            .unwrap(),
    );

    let started = Instant::now();
    {
        let _held = lock.lock();
        expect_abort(|| pipeline.on_fatal(trigger()));
    }

    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(pipeline.state(), PipelineState::Terminated);
    let records = read_records(&sink.path());
    assert_eq!(records.len(), 3);
    assert_eq!(records[2].error.kind.as_deref(), Some("lastgasp.shutdown.timeout"));
}

#[test]
fn test_panicking_pre_terminate_still_aborts() {
    let sink = TestSink::new();
    let hook_calls = Arc::new(AtomicUsize::new(0));
    let counter = hook_calls.clone();
    let pipeline = PipelineController::new(
        RecoveryConfig::builder()
            .logger(ScriptedLogger::new(Script::Throw("logger down".into())))
            .backup_sink(sink.sink())
            .logger_timeout(SHORT)
            .pre_terminate(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                panic!("hook exploded");
            })
            .abort(unwinding_abort)
            .build()
            .unwrap(),
    );

    expect_abort(|| pipeline.on_fatal(trigger()));

    assert_eq!(hook_calls.load(Ordering::SeqCst), 1);
    let records = read_records(&sink.path());
    assert_eq!(records[0].message(), "connection pool poisoned");
}

#[test]
fn test_unwritable_backup_still_aborts() {
    let sink = TestSink::new();
    let pipeline = PipelineController::new(
        RecoveryConfig::builder()
            .logger(ScriptedLogger::new(Script::Throw("logger down".into())))
            .backup_sink(BackupSink::File(sink.dir().join("missing").join("backup.log")))
            .abort(unwinding_abort)
            .build()
            .unwrap(),
    );

    expect_abort(|| pipeline.on_fatal(trigger()));

    assert_eq!(pipeline.state(), PipelineState::Terminated);
}

#[test]
fn test_missing_logger_fails_at_setup() {
    let err = RecoveryConfig::builder()
        .backup_sink(BackupSink::Stderr)
        .build()
        .unwrap_err();
    assert!(matches!(err, ConfigError::LoggerRequired));
}

#[test]
fn test_second_trigger_is_not_rerun() {
    let sink = TestSink::new();
    let logger = Arc::new(ScriptedLogger::new(Script::Throw("logger down".into())));
    let pipeline = PipelineController::new(
        RecoveryConfig::builder()
            .shared_logger(logger.clone())
            .backup_sink(sink.sink())
            .abort(unwinding_abort)
            .build()
            .unwrap(),
    );

    expect_abort(|| pipeline.on_fatal(trigger()));
    pipeline.on_fatal(ExceptionRecord::new(ErrorSnapshot::new("second failure")));

    assert_eq!(logger.call_count(), 1);
    assert_eq!(logger.received()[0].message(), "connection pool poisoned");
    assert_eq!(read_records(&sink.path()).len(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_trigger_from_inside_a_runtime() {
    let sink = TestSink::new();
    let pipeline = controller(
        &sink,
        Script::SucceedAfter(Duration::from_millis(5)),
        Some(Script::Succeed),
    );

    expect_abort(|| pipeline.on_fatal(trigger()));

    assert_eq!(pipeline.state(), PipelineState::Terminated);
    assert!(read_records(&sink.path()).is_empty());
}
