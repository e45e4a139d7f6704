//! Graceful shutdown phase.

use super::{drive, record_outcome, Phase, PhaseContext};
use crate::core::{ExceptionRecord, PhaseOutcome};
use crate::guard::{Completion, TimeoutGuard};
use crate::observability::PhaseTimer;
use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Cleanup routine run after diagnostics and before the process aborts.
///
/// `shutdown` must signal `done` exactly once, possibly from another task.
/// Returning `Err` or panicking counts as a synchronous failure.
pub trait GracefulShutdown: Send + Sync {
    /// Releases resources and signals `done` when finished.
    fn shutdown(&self, done: Completion) -> anyhow::Result<()>;
}

/// A shutdown routine backed by a closure.
pub struct FnShutdown<F>
where
    F: Fn(Completion) -> anyhow::Result<()> + Send + Sync,
{
    func: F,
}

impl<F> FnShutdown<F>
where
    F: Fn(Completion) -> anyhow::Result<()> + Send + Sync,
{
    /// Creates a new function-based shutdown routine.
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

impl<F> Debug for FnShutdown<F>
where
    F: Fn(Completion) -> anyhow::Result<()> + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnShutdown").finish_non_exhaustive()
    }
}

impl<F> GracefulShutdown for FnShutdown<F>
where
    F: Fn(Completion) -> anyhow::Result<()> + Send + Sync,
{
    fn shutdown(&self, done: Completion) -> anyhow::Result<()> {
        (self.func)(done)
    }
}

/// A shutdown routine backed by an async closure.
pub struct AsyncShutdown<F, Fut>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    func: F,
}

impl<F, Fut> AsyncShutdown<F, Fut>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    /// Creates a new async shutdown routine.
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

impl<F, Fut> Debug for AsyncShutdown<F, Fut>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncShutdown").finish_non_exhaustive()
    }
}

impl<F, Fut> GracefulShutdown for AsyncShutdown<F, Fut>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    fn shutdown(&self, done: Completion) -> anyhow::Result<()> {
        drive((self.func)(), done)
    }
}

/// Runs the optional shutdown routine under a deadline.
#[derive(Clone)]
pub struct ShutdownPhase {
    shutdown: Option<Arc<dyn GracefulShutdown>>,
    timeout: Duration,
}

impl ShutdownPhase {
    /// Creates the phase. Without a routine the phase always succeeds.
    #[must_use]
    pub fn new(shutdown: Option<Arc<dyn GracefulShutdown>>, timeout: Duration) -> Self {
        Self { shutdown, timeout }
    }

    /// Returns the deadline.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns true if a routine is configured.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.shutdown.is_some()
    }

    /// Runs the routine once and records any failure.
    ///
    /// `exception` is the trigger, written as evidence if the routine fails.
    pub async fn run(&self, exception: &ExceptionRecord, ctx: &PhaseContext<'_>) -> PhaseOutcome {
        let Some(ref shutdown) = self.shutdown else {
            debug!("no graceful shutdown configured");
            return PhaseOutcome::Succeeded;
        };

        let phase = Phase::Shutdown;
        let mut guard = TimeoutGuard::new(phase.label(), self.timeout).with_slot(ctx.slot);
        if let Some(stray) = ctx.stray_for(phase) {
            guard = guard.on_stray(stray);
        }

        let shutdown = Arc::clone(shutdown);
        let timer = PhaseTimer::start(phase.label());
        let outcome = guard.run(move |done| shutdown.shutdown(done)).await;
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

impl Debug for ShutdownPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownPhase")
            .field("configured", &self.is_configured())
            .field("timeout", &self.timeout)
            .finish()
    }
}
