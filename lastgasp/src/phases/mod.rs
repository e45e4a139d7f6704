//! The two bounded phases of the pipeline: diagnostic logging and graceful
//! shutdown.
//!
//! Both run their capability through a [`TimeoutGuard`](crate::guard::TimeoutGuard)
//! and emit the same record sequence on failure:
//!
//! ```text
//! typed failure (threw / timed out / async error):
//!     exception-occurred -> <phase>-secondary-error -> <phase>-failure
//! protocol violation:
//!     exception-occurred -> <phase>-secondary-error
//! success:
//!     (nothing)
//! ```

mod logger;
mod shutdown;

pub use logger::{AsyncLogger, ConsoleLogger, FatalLogger, FnLogger, LoggerPhase, TracingLogger};
pub use shutdown::{AsyncShutdown, FnShutdown, GracefulShutdown, ShutdownPhase};

#[cfg(test)]
pub use logger::MockFatalLogger;

use crate::core::{ErrorSnapshot, ExceptionRecord, PhaseOutcome, StateLatch};
use crate::errors::PhaseFailure;
use crate::guard::{Completion, GuardSlot, StrayHandler};
use crate::recorder::{FailureRecorder, RecordKind};
use futures::FutureExt;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

/// Which phase a failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Diagnostic logging.
    Logger,
    /// Graceful shutdown.
    Shutdown,
}

impl Phase {
    /// Name of the guarded operation, used in logs.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Logger => "logger.fatal()",
            Self::Shutdown => "graceful_shutdown()",
        }
    }

    /// Record kind for the phase's own error.
    #[must_use]
    pub fn secondary_kind(&self) -> RecordKind {
        match self {
            Self::Logger => RecordKind::LoggerSecondaryError,
            Self::Shutdown => RecordKind::ShutdownSecondaryError,
        }
    }

    /// Record kind for the typed failure summary.
    #[must_use]
    pub fn failure_kind(&self) -> RecordKind {
        match self {
            Self::Logger => RecordKind::LoggerFailure,
            Self::Shutdown => RecordKind::ShutdownFailure,
        }
    }

    /// Type tag for protocol-violation errors of this phase.
    #[must_use]
    pub fn violation_tag(&self) -> &'static str {
        match self {
            Self::Logger => "lastgasp.logger.protocol-violation",
            Self::Shutdown => "lastgasp.shutdown.protocol-violation",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Logger => write!(f, "logger"),
            Self::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// Receives duplicate completions of a phase that arrive after its guard
/// settled, already tagged as protocol violations.
pub type PhaseStrayHandler = Arc<dyn Fn(Phase, ErrorSnapshot) + Send + Sync>;

/// Pipeline services a phase runs against.
#[derive(Clone)]
pub struct PhaseContext<'a> {
    /// Where failure records go.
    pub recorder: &'a FailureRecorder,
    /// Slot through which out-of-band faults reach the running guard.
    pub slot: &'a GuardSlot,
    /// Pipeline state, stamped on records.
    pub state: &'a StateLatch,
    /// Receives duplicate completions that arrive after the guard settled.
    pub stray: Option<PhaseStrayHandler>,
}

impl<'a> PhaseContext<'a> {
    /// Creates a context without a stray handler.
    #[must_use]
    pub fn new(recorder: &'a FailureRecorder, slot: &'a GuardSlot, state: &'a StateLatch) -> Self {
        Self {
            recorder,
            slot,
            state,
            stray: None,
        }
    }

    /// Sets the stray handler.
    #[must_use]
    pub fn with_stray(mut self, stray: PhaseStrayHandler) -> Self {
        self.stray = Some(stray);
        self
    }

    fn stray_for(&self, phase: Phase) -> Option<StrayHandler> {
        let inner = self.stray.clone()?;
        let tag = phase.violation_tag();
        Some(Arc::new(move |error: ErrorSnapshot| inner(phase, error.with_type(tag))))
    }
}

impl fmt::Debug for PhaseContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhaseContext")
            .field("recorder", &self.recorder)
            .field("state", &self.state.current())
            .field("has_stray_handler", &self.stray.is_some())
            .finish()
    }
}

/// Spawns `future` on the current runtime and signals `done` with its result.
///
/// A panic inside the future is reported as a failed completion.
pub(crate) fn drive<Fut>(future: Fut, done: Completion) -> anyhow::Result<()>
where
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    let handle = tokio::runtime::Handle::try_current()?;
    handle.spawn(async move {
        match AssertUnwindSafe(future).catch_unwind().await {
            Ok(Ok(())) => done.done(),
            Ok(Err(err)) => done.fail(err),
            Err(payload) => done.complete(Err(ErrorSnapshot::from_panic_payload(&*payload))),
        }
    });
    Ok(())
}

/// Writes the failure records for a finished phase. Success writes nothing.
pub(crate) fn record_outcome(
    ctx: &PhaseContext<'_>,
    phase: Phase,
    exception: &ExceptionRecord,
    outcome: &PhaseOutcome,
    timeout: Duration,
) {
    let PhaseOutcome::Failed { kind, error } = outcome else {
        return;
    };
    let state = ctx.state.current();
    let recorder = ctx.recorder;

    recorder.record(RecordKind::ExceptionOccurred, exception.error(), state);

    // Pure timeouts have no error of their own; the trigger stands in.
    let secondary = match (error, kind.is_typed()) {
        (Some(error), _) => error.clone(),
        (None, true) => exception.error().clone(),
        (None, false) => ErrorSnapshot::new(format!(
            "{} violated the single-completion contract",
            phase.label()
        ))
        .with_type(phase.violation_tag()),
    };
    recorder.record(phase.secondary_kind(), &secondary, state);

    if kind.is_typed() {
        let failure = PhaseFailure::classify(phase, *kind, error.as_ref(), timeout, state);
        recorder.record(phase.failure_kind(), &failure.to_snapshot(), state);
    }
}
