//! Diagnostic logging phase.

use super::{drive, record_outcome, Phase, PhaseContext};
use crate::core::{ExceptionRecord, PhaseOutcome};
use crate::guard::{Completion, TimeoutGuard};
use crate::observability::PhaseTimer;
use std::fmt::Debug;
use std::future::Future;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// A logger able to record a fatal exception.
///
/// `fatal` must signal `done` exactly once, possibly from another task.
/// Returning `Err` or panicking counts as a synchronous failure.
#[cfg_attr(test, mockall::automock)]
pub trait FatalLogger: Send + Sync {
    /// Records `record` and signals `done` once it is durable.
    fn fatal(&self, record: &ExceptionRecord, done: Completion) -> anyhow::Result<()>;
}

/// A logger backed by a closure.
pub struct FnLogger<F>
where
    F: Fn(&ExceptionRecord, Completion) -> anyhow::Result<()> + Send + Sync,
{
    func: F,
}

impl<F> FnLogger<F>
where
    F: Fn(&ExceptionRecord, Completion) -> anyhow::Result<()> + Send + Sync,
{
    /// Creates a new function-based logger.
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

impl<F> Debug for FnLogger<F>
where
    F: Fn(&ExceptionRecord, Completion) -> anyhow::Result<()> + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnLogger").finish_non_exhaustive()
    }
}

impl<F> FatalLogger for FnLogger<F>
where
    F: Fn(&ExceptionRecord, Completion) -> anyhow::Result<()> + Send + Sync,
{
    fn fatal(&self, record: &ExceptionRecord, done: Completion) -> anyhow::Result<()> {
        (self.func)(record, done)
    }
}

/// A logger backed by an async closure.
///
/// The future runs on the recovery runtime and its result signals
/// completion; a panic inside it becomes an asynchronous failure.
pub struct AsyncLogger<F, Fut>
where
    F: Fn(ExceptionRecord) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    func: F,
}

impl<F, Fut> AsyncLogger<F, Fut>
where
    F: Fn(ExceptionRecord) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    /// Creates a new async logger.
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

impl<F, Fut> Debug for AsyncLogger<F, Fut>
where
    F: Fn(ExceptionRecord) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncLogger").finish_non_exhaustive()
    }
}

impl<F, Fut> FatalLogger for AsyncLogger<F, Fut>
where
    F: Fn(ExceptionRecord) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    fn fatal(&self, record: &ExceptionRecord, done: Completion) -> anyhow::Result<()> {
        drive((self.func)(record.clone()), done)
    }
}

/// Writes the exception to standard error.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleLogger;

impl FatalLogger for ConsoleLogger {
    fn fatal(&self, record: &ExceptionRecord, done: Completion) -> anyhow::Result<()> {
        let mut err = std::io::stderr().lock();
        writeln!(err, "Uncaught exception: {}", record.error())?;
        if let Some(stack) = record.stack() {
            writeln!(err, "{stack}")?;
        }
        err.flush()?;
        done.done();
        Ok(())
    }
}

/// Emits the exception as a `tracing` error event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl FatalLogger for TracingLogger {
    fn fatal(&self, record: &ExceptionRecord, done: Completion) -> anyhow::Result<()> {
        error!(
            error_message = record.message(),
            kind = record.kind().unwrap_or("unknown"),
            stack = record.stack().unwrap_or_default(),
            captured_at = %record.captured_at(),
            "uncaught exception"
        );
        done.done();
        Ok(())
    }
}

/// Hands the trigger exception to the configured logger under a deadline.
#[derive(Clone)]
pub struct LoggerPhase {
    logger: Arc<dyn FatalLogger>,
    timeout: Duration,
}

impl LoggerPhase {
    /// Creates the phase.
    #[must_use]
    pub fn new(logger: Arc<dyn FatalLogger>, timeout: Duration) -> Self {
        Self { logger, timeout }
    }

    /// Returns the deadline.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Runs the logger once and records any failure.
    ///
    /// Never fails: the outcome is returned for reporting only.
    pub async fn run(&self, exception: &ExceptionRecord, ctx: &PhaseContext<'_>) -> PhaseOutcome {
        let phase = Phase::Logger;
        let mut guard = TimeoutGuard::new(phase.label(), self.timeout).with_slot(ctx.slot);
        if let Some(stray) = ctx.stray_for(phase) {
            guard = guard.on_stray(stray);
        }

        let logger = Arc::clone(&self.logger);
        let record = exception.clone();
        let timer = PhaseTimer::start(phase.label());
        let outcome = guard.run(move |done| logger.fatal(&record, done)).await;
        info!(
            phase = %phase,
            duration_ms = timer.finish(),
            success = outcome.is_success(),
            "phase finished"
        );
        record_outcome(ctx, phase, exception, &outcome, self.timeout);
        outcome
    }
}

impl Debug for LoggerPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoggerPhase")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
