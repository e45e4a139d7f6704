//! Single-fire completion signal handed to guarded operations.

use crate::core::ErrorSnapshot;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Callback receiving duplicate completions that arrive after the guard has
/// settled.
pub type StrayHandler = Arc<dyn Fn(ErrorSnapshot) + Send + Sync>;

/// What a guard can be told about the operation it is watching.
#[derive(Debug)]
pub(crate) enum Signal {
    /// The operation signalled completion.
    Complete(Result<(), ErrorSnapshot>),
    /// An uncaught error surfaced while the operation was in flight.
    Fault(ErrorSnapshot),
}

struct Shared {
    label: &'static str,
    tx: mpsc::UnboundedSender<Signal>,
    fired: AtomicUsize,
    settled: AtomicBool,
    on_stray: Option<StrayHandler>,
}

/// Completion handle for a guarded operation.
///
/// The operation must signal exactly once, through [`done`](Self::done),
/// [`fail`](Self::fail) or [`complete`](Self::complete). The handle is
/// cheap to clone so it can be moved into spawned tasks. Signals after the
/// first are never adopted: a late completion after a timeout is discarded,
/// and a duplicate completion is reported as a protocol violation.
#[derive(Clone)]
pub struct Completion {
    shared: Arc<Shared>,
}

impl Completion {
    pub(crate) fn channel(
        label: &'static str,
        on_stray: Option<StrayHandler>,
    ) -> (Self, mpsc::UnboundedReceiver<Signal>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Shared {
            label,
            tx,
            fired: AtomicUsize::new(0),
            settled: AtomicBool::new(false),
            on_stray,
        };
        (
            Self {
                shared: Arc::new(shared),
            },
            rx,
        )
    }

    /// Signals successful completion.
    pub fn done(&self) {
        self.complete(Ok(()));
    }

    /// Signals completion with an error.
    pub fn fail<E: Into<anyhow::Error>>(&self, err: E) {
        self.complete(Err(ErrorSnapshot::from_anyhow(&err.into())));
    }

    /// Signals completion with an explicit result.
    pub fn complete(&self, result: Result<(), ErrorSnapshot>) {
        let previous = self.shared.fired.fetch_add(1, Ordering::SeqCst);
        if self.is_settled() || self.shared.tx.send(Signal::Complete(result)).is_err() {
            self.after_settle(previous);
        }
    }

    /// Returns how many times completion has been signalled.
    #[must_use]
    pub fn fire_count(&self) -> usize {
        self.shared.fired.load(Ordering::SeqCst)
    }

    /// Returns true once the guard has adopted an outcome.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.shared.settled.load(Ordering::SeqCst)
    }

    /// Returns the label of the guarded operation.
    #[must_use]
    pub fn label(&self) -> &'static str {
        self.shared.label
    }

    pub(crate) fn fault(&self, error: ErrorSnapshot) {
        if self.is_settled() || self.shared.tx.send(Signal::Fault(error)).is_err() {
            debug!(operation = self.shared.label, "fault after settlement ignored");
        }
    }

    pub(crate) fn settle(&self) {
        self.shared.settled.store(true, Ordering::SeqCst);
    }

    fn after_settle(&self, previous: usize) {
        let label = self.shared.label;
        if previous == 0 {
            debug!(operation = label, "late completion discarded");
            return;
        }

        let count = previous + 1;
        warn!(operation = label, count, "completion signalled more than once");
        if let Some(ref handler) = self.shared.on_stray {
            handler(ErrorSnapshot::new(format!(
                "{label} signalled completion {count} times"
            )));
        }
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("label", &self.shared.label)
            .field("fired", &self.fire_count())
            .field("settled", &self.is_settled())
            .finish()
    }
}
