//! The pipeline state machine.

use super::config::RecoveryConfig;
use crate::core::{ErrorSnapshot, ExceptionRecord, PhaseOutcome, PipelineState, StateLatch};
use crate::guard::GuardSlot;
use crate::phases::{LoggerPhase, Phase, PhaseContext, PhaseStrayHandler, ShutdownPhase};
use crate::recorder::{FailureRecorder, RecordKind};
use crate::terminator::Terminator;
use serde::Serialize;
use std::fmt;
use std::panic::PanicHookInfo;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Name of the thread the phases run on.
pub const RECOVERY_THREAD_NAME: &str = "lastgasp-recovery";

/// Outcome of both phases of one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    /// Incident id stamped on every record of the run.
    pub incident: Uuid,
    /// Outcome of the logger phase.
    pub logger: PhaseOutcome,
    /// Outcome of the shutdown phase.
    pub shutdown: PhaseOutcome,
}

impl RecoveryReport {
    /// Returns true if both phases succeeded.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.logger.is_success() && self.shutdown.is_success()
    }
}

/// Drives one trigger error through logging, shutdown and termination.
///
/// ```text
/// Idle -> CapturingException -> RunningLogger -> RunningShutdown
///      -> RunningTerminator -> Terminated
/// ```
///
/// Only the first trigger runs the pipeline. Later triggers are routed to
/// the phase currently in flight as a fault, or dropped with a warning.
pub struct PipelineController {
    logger: LoggerPhase,
    shutdown: ShutdownPhase,
    terminator: Terminator,
    recorder: FailureRecorder,
    state: StateLatch,
    slot: GuardSlot,
    exception: OnceLock<ExceptionRecord>,
    recovery_bound: Duration,
    this: Weak<Self>,
}

impl PipelineController {
    /// Creates a controller in the `Idle` state.
    #[must_use]
    pub fn new(config: RecoveryConfig) -> Arc<Self> {
        let recovery_bound = config.recovery_bound();
        let mut terminator = Terminator::new().with_abort(config.abort);
        if let Some(hook) = config.pre_terminate {
            terminator = terminator.with_pre_terminate(hook);
        }

        Arc::new_cyclic(|this| Self {
            logger: LoggerPhase::new(config.logger, config.logger_timeout),
            shutdown: ShutdownPhase::new(config.shutdown, config.shutdown_timeout),
            terminator,
            recorder: FailureRecorder::new(config.backup_sink),
            state: StateLatch::new(),
            slot: GuardSlot::new(),
            exception: OnceLock::new(),
            recovery_bound,
            this: this.clone(),
        })
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> PipelineState {
        self.state.current()
    }

    /// Returns the incident id stamped on this pipeline's records.
    #[must_use]
    pub fn incident(&self) -> Uuid {
        self.recorder.incident()
    }

    /// Returns the trigger exception, once captured.
    #[must_use]
    pub fn exception(&self) -> Option<&ExceptionRecord> {
        self.exception.get()
    }

    /// Panic hook entry point.
    ///
    /// The record, backtrace included, is only captured by the trigger that
    /// wins the latch; a re-entrant panic contributes its payload alone.
    pub fn handle_panic(&self, info: &PanicHookInfo<'_>) {
        self.on_fatal_with(
            || ExceptionRecord::from_panic(info),
            || ErrorSnapshot::from_panic_payload(info.payload()),
        );
    }

    /// Handles a fatal error.
    ///
    /// The first caller runs both phases and the pre-terminate hook on a
    /// dedicated thread, then aborts the process; this call does not return
    /// for it. Any later caller returns immediately after its error has been
    /// routed or dropped.
    pub fn on_fatal(&self, exception: ExceptionRecord) {
        let error = exception.error().clone();
        self.on_fatal_with(|| exception, || error);
    }

    fn on_fatal_with<C, R>(&self, capture: C, reentrant: R)
    where
        C: FnOnce() -> ExceptionRecord,
        R: FnOnce() -> ErrorSnapshot,
    {
        if let Err(state) = self.state.enter() {
            self.on_reentrant(reentrant(), state);
            return;
        }

        let exception = capture();
        info!(incident = %self.incident(), error = %exception.error(), "fatal error captured");
        self.recover_off_thread(exception);
        self.advance(PipelineState::Terminated);
        self.terminator.abort()
    }

    /// Runs both phases for `exception`.
    ///
    /// Fails with the observed state if a pipeline run already started.
    /// Does not terminate: call [`terminate`](Self::terminate) afterwards.
    pub async fn recover(&self, exception: ExceptionRecord) -> Result<RecoveryReport, PipelineState> {
        self.state.enter()?;
        Ok(self.run_phases(exception).await)
    }

    /// Runs the pre-terminate hook and aborts the process.
    pub fn terminate(&self) -> ! {
        self.prepare_termination();
        self.advance(PipelineState::Terminated);
        self.terminator.abort()
    }

    fn prepare_termination(&self) {
        self.advance(PipelineState::RunningTerminator);
        self.terminator.run_pre_terminate();
    }

    /// Runs the phases and the pre-terminate hook away from the triggering
    /// thread, which may be a runtime worker or inside the panic hook, and
    /// waits for them at most `recovery_bound`. Whatever is still running
    /// after that is abandoned to the abort.
    fn recover_off_thread(&self, exception: ExceptionRecord) {
        let Some(this) = self.this.upgrade() else {
            error!("controller released before recovery; skipping phases");
            return;
        };

        let (finished_tx, finished_rx) = mpsc::channel();
        let spawned = std::thread::Builder::new()
            .name(RECOVERY_THREAD_NAME.to_string())
            .spawn(move || {
                this.recover_blocking(exception);
                let _ = finished_tx.send(());
            });
        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                error!(error = %e, "could not start recovery thread; skipping phases");
                self.prepare_termination();
                return;
            }
        };

        match finished_rx.recv_timeout(self.recovery_bound) {
            Ok(()) => {}
            Err(RecvTimeoutError::Timeout) => {
                error!(
                    bound_ms = self.recovery_bound.as_millis() as u64,
                    state = %self.state(),
                    "recovery did not finish in time; terminating anyway"
                );
            }
            Err(RecvTimeoutError::Disconnected) => {
                if let Err(payload) = handle.join() {
                    let error = ErrorSnapshot::from_panic_payload(&*payload);
                    error!(error = %error, "recovery thread panicked");
                }
                if self.state() < PipelineState::RunningTerminator {
                    self.prepare_termination();
                }
            }
        }
    }

    fn recover_blocking(&self, exception: ExceptionRecord) {
        match tokio::runtime::Builder::new_current_thread().enable_all().build() {
            Ok(runtime) => {
                let report = runtime.block_on(self.run_phases(exception));
                runtime.shutdown_background();
                debug!(?report, "recovery finished");
            }
            Err(e) => error!(error = %e, "could not build recovery runtime; skipping phases"),
        }
        self.prepare_termination();
    }

    async fn run_phases(&self, exception: ExceptionRecord) -> RecoveryReport {
        let exception = self.exception.get_or_init(|| exception);
        let ctx = PhaseContext::new(&self.recorder, &self.slot, &self.state)
            .with_stray(self.stray_handler());

        self.advance(PipelineState::RunningLogger);
        let logger = self.logger.run(exception, &ctx).await;

        self.advance(PipelineState::RunningShutdown);
        let shutdown = self.shutdown.run(exception, &ctx).await;

        RecoveryReport {
            incident: self.incident(),
            logger,
            shutdown,
        }
    }

    fn advance(&self, next: PipelineState) {
        let state = self.state.advance(next);
        info!(state = %state, "pipeline state changed");
    }

    fn on_reentrant(&self, error: ErrorSnapshot, state: PipelineState) {
        if self.slot.deliver_fault(error.clone()) {
            warn!(state = %state, error = %error, "fatal error routed to the running phase");
        } else {
            warn!(state = %state, error = %error, "pipeline already running; fatal error dropped");
        }
    }

    fn stray_handler(&self) -> PhaseStrayHandler {
        let this = self.this.clone();
        Arc::new(move |phase, error| {
            if let Some(controller) = this.upgrade() {
                controller.on_protocol_violation(phase, &error);
            }
        })
    }

    /// Records a duplicate completion that arrived after its phase settled.
    /// No meta-record is written and no phase is re-entered.
    fn on_protocol_violation(&self, phase: Phase, error: &ErrorSnapshot) {
        let state = self.state.current();
        warn!(phase = %phase, state = %state, error = %error, "protocol violation after phase settled");
        if let Some(exception) = self.exception.get() {
            self.recorder.record(RecordKind::ExceptionOccurred, exception.error(), state);
        }
        self.recorder.record(phase.secondary_kind(), error, state);
    }
}

impl fmt::Debug for PipelineController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineController")
            .field("state", &self.state())
            .field("incident", &self.incident())
            .field("recovery_bound", &self.recovery_bound)
            .field("logger", &self.logger)
            .field("shutdown", &self.shutdown)
            .field("terminator", &self.terminator)
            .field("recorder", &self.recorder)
            .finish_non_exhaustive()
    }
}
