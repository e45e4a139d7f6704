//! Deadline race for callback-style operations.

use super::completion::{Completion, Signal, StrayHandler};
use crate::core::{ErrorSnapshot, FailureKind, PhaseOutcome};
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, warn};

/// Slot holding the completion of the guard currently in flight.
///
/// Uncaught errors that surface elsewhere in the process while a guard is
/// waiting are delivered to it through the slot.
#[derive(Debug, Default)]
pub struct GuardSlot {
    current: Mutex<Option<Completion>>,
}

impl GuardSlot {
    /// Creates an empty slot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivers a fault to the guard in flight.
    ///
    /// Returns false when no guard is waiting.
    pub fn deliver_fault(&self, error: ErrorSnapshot) -> bool {
        match self.current.lock().as_ref() {
            Some(completion) if !completion.is_settled() => {
                completion.fault(error);
                true
            }
            _ => false,
        }
    }

    /// Returns true while a guard is waiting.
    #[must_use]
    pub fn is_occupied(&self) -> bool {
        self.current.lock().is_some()
    }

    fn occupy(&self, completion: Completion) -> SlotLease<'_> {
        *self.current.lock() = Some(completion);
        SlotLease { slot: self }
    }
}

struct SlotLease<'a> {
    slot: &'a GuardSlot,
}

impl Drop for SlotLease<'_> {
    fn drop(&mut self) {
        self.slot.current.lock().take();
    }
}

/// Races one run of a callback-style operation against a deadline.
///
/// The operation receives a [`Completion`]. The first of {synchronous
/// failure, completion signal, deadline} decides the outcome; everything
/// after that is observed but never adopted.
pub struct TimeoutGuard<'a> {
    label: &'static str,
    deadline: Duration,
    slot: Option<&'a GuardSlot>,
    on_stray: Option<StrayHandler>,
}

impl<'a> TimeoutGuard<'a> {
    /// Creates a guard for the named operation.
    #[must_use]
    pub fn new(label: &'static str, deadline: Duration) -> Self {
        Self {
            label,
            deadline,
            slot: None,
            on_stray: None,
        }
    }

    /// Publishes the in-flight completion in `slot` while waiting.
    #[must_use]
    pub fn with_slot(mut self, slot: &'a GuardSlot) -> Self {
        self.slot = Some(slot);
        self
    }

    /// Sets the handler for duplicate completions arriving after settlement.
    #[must_use]
    pub fn on_stray(mut self, handler: StrayHandler) -> Self {
        self.on_stray = Some(handler);
        self
    }

    /// Returns the deadline.
    #[must_use]
    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Runs `action` once and returns the adopted outcome.
    ///
    /// `action` runs on the blocking pool, so a call that never returns
    /// still loses to the deadline. Must be called within a tokio runtime
    /// with the time driver enabled.
    pub async fn run<F>(&self, action: F) -> PhaseOutcome
    where
        F: FnOnce(Completion) -> anyhow::Result<()> + Send + 'static,
    {
        let (completion, mut rx) = Completion::channel(self.label, self.on_stray.clone());
        let sleep = tokio::time::sleep(self.deadline);
        tokio::pin!(sleep);

        let handed = completion.clone();
        let call = tokio::task::spawn_blocking(move || catch_unwind(AssertUnwindSafe(|| action(handed))));

        let returned = tokio::select! {
            biased;
            () = &mut sleep => return self.time_out(&completion, &mut rx),
            joined = call => joined,
        };
        let thrown = match returned {
            Ok(Ok(Ok(()))) => None,
            Ok(Ok(Err(err))) => Some(ErrorSnapshot::from_anyhow(&err)),
            Ok(Err(payload)) => Some(ErrorSnapshot::from_panic_payload(&*payload)),
            Err(join) => Some(ErrorSnapshot::new(format!("{} did not run: {join}", self.label))),
        };

        if let Some(error) = thrown {
            settle(&completion, &mut rx);
            // A completion queued before the throw already won adoption.
            let completed = std::iter::from_fn(|| rx.try_recv().ok())
                .any(|signal| matches!(signal, Signal::Complete(_)));
            if completed {
                warn!(operation = self.label, error = %error, "operation failed after signalling completion");
                return PhaseOutcome::failed(FailureKind::ProtocolViolation, Some(error));
            }
            warn!(operation = self.label, error = %error, "operation threw");
            return PhaseOutcome::failed(FailureKind::Threw, Some(error));
        }

        let _lease = self.slot.map(|slot| slot.occupy(completion.clone()));

        let first = tokio::select! {
            biased;
            Some(signal) = rx.recv() => signal,
            () = &mut sleep => return self.time_out(&completion, &mut rx),
        };

        settle(&completion, &mut rx);
        let mut completions = usize::from(matches!(first, Signal::Complete(_)));
        let adopted = match first {
            Signal::Complete(Ok(())) => PhaseOutcome::Succeeded,
            Signal::Complete(Err(error)) | Signal::Fault(error) => {
                warn!(operation = self.label, error = %error, "operation failed asynchronously");
                PhaseOutcome::failed(FailureKind::AsyncError, Some(error))
            }
        };

        // Signals queued behind the adopted one arrived before settlement. A
        // second completion, or a fault after completion, breaks the
        // contract; a completion following a fault is the operation
        // reporting the same failure.
        let mut violation = None;
        while let Ok(extra) = rx.try_recv() {
            match extra {
                Signal::Complete(result) => {
                    completions += 1;
                    if completions > 1 && violation.is_none() {
                        violation = Some(result.err().unwrap_or_else(|| {
                            ErrorSnapshot::new(format!(
                                "{} signalled completion {completions} times",
                                self.label
                            ))
                        }));
                    }
                }
                Signal::Fault(error) => {
                    if completions > 0 && violation.is_none() {
                        violation = Some(error);
                    }
                }
            }
        }

        if let Some(error) = violation {
            warn!(operation = self.label, error = %error, "single-completion contract violated");
            return PhaseOutcome::failed(FailureKind::ProtocolViolation, Some(error));
        }

        adopted
    }

    fn time_out(&self, completion: &Completion, rx: &mut UnboundedReceiver<Signal>) -> PhaseOutcome {
        settle(completion, rx);
        warn!(operation = self.label, deadline_ms = self.deadline.as_millis() as u64, "operation timed out");
        while let Ok(signal) = rx.try_recv() {
            debug!(operation = self.label, ?signal, "signal after deadline discarded");
        }
        PhaseOutcome::failed(FailureKind::TimedOut, None)
    }
}

/// Marks the outcome adopted and closes the channel. Signals sent from here
/// on fail to queue and go through the completion's own settled path.
fn settle(completion: &Completion, rx: &mut UnboundedReceiver<Signal>) {
    completion.settle();
    rx.close();
}

impl std::fmt::Debug for TimeoutGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeoutGuard")
            .field("label", &self.label)
            .field("deadline", &self.deadline)
            .finish()
    }
}
