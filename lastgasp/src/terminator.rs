//! Final, unconditional abnormal exit.

use crate::core::ErrorSnapshot;
use std::fmt;
use std::io::Write;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{info, warn};

/// Primitive that ends the process abnormally. Must not return.
pub type AbortFn = fn() -> !;

/// Hook run immediately before the process aborts.
pub type PreTerminateHook = Arc<dyn Fn() + Send + Sync>;

/// Aborts the process with `SIGABRT` (or the platform equivalent), which
/// allows the OS to write a core dump.
pub fn abort_process() -> ! {
    std::process::abort()
}

/// Runs the pre-terminate hook, then aborts.
#[derive(Clone)]
pub struct Terminator {
    pre_terminate: Option<PreTerminateHook>,
    abort: AbortFn,
}

impl Terminator {
    /// Creates a terminator using [`abort_process`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            pre_terminate: None,
            abort: abort_process,
        }
    }

    /// Sets the pre-terminate hook.
    #[must_use]
    pub fn with_pre_terminate(mut self, hook: PreTerminateHook) -> Self {
        self.pre_terminate = Some(hook);
        self
    }

    /// Replaces the abort primitive.
    #[must_use]
    pub fn with_abort(mut self, abort: AbortFn) -> Self {
        self.abort = abort;
        self
    }

    /// Runs the hook, discarding any panic, then aborts.
    pub fn run(&self) -> ! {
        self.run_pre_terminate();
        self.abort()
    }

    /// Runs the pre-terminate hook, if any. A panic inside it is logged and
    /// discarded.
    pub fn run_pre_terminate(&self) {
        if let Some(ref hook) = self.pre_terminate {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| hook())) {
                let error = ErrorSnapshot::from_panic_payload(&*payload);
                warn!(error = %error, "pre-terminate hook panicked");
            }
        }
    }

    /// Flushes the standard streams and invokes the abort primitive.
    pub fn abort(&self) -> ! {
        info!("terminating process");
        let _ = std::io::stdout().flush();
        let _ = std::io::stderr().flush();
        (self.abort)()
    }
}

impl Default for Terminator {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Terminator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Terminator")
            .field("has_pre_terminate", &self.pre_terminate.is_some())
            .finish_non_exhaustive()
    }
}
