//! Pipeline state and the one-shot entry latch.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// The states of the recovery pipeline. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum PipelineState {
    /// Installed, no trigger seen yet.
    Idle = 0,
    /// A trigger error was accepted and is being snapshotted.
    CapturingException = 1,
    /// The diagnostic logger is running.
    RunningLogger = 2,
    /// The graceful shutdown routine is running.
    RunningShutdown = 3,
    /// The pre-terminate hook and the abort are running.
    RunningTerminator = 4,
    /// The process is going down.
    Terminated = 5,
}

impl Default for PipelineState {
    fn default() -> Self {
        Self::Idle
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::CapturingException => write!(f, "capturing_exception"),
            Self::RunningLogger => write!(f, "running_logger"),
            Self::RunningShutdown => write!(f, "running_shutdown"),
            Self::RunningTerminator => write!(f, "running_terminator"),
            Self::Terminated => write!(f, "terminated"),
        }
    }
}

impl PipelineState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::CapturingException,
            2 => Self::RunningLogger,
            3 => Self::RunningShutdown,
            4 => Self::RunningTerminator,
            _ => Self::Terminated,
        }
    }

    /// Returns true while a phase of the pipeline is in flight.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !matches!(self, Self::Idle | Self::Terminated)
    }
}

/// Atomic holder of the pipeline state.
///
/// Leaving `Idle` is a compare-and-set, so of any number of concurrent or
/// nested triggers exactly one wins the right to run the pipeline.
#[derive(Debug, Default)]
pub struct StateLatch {
    state: AtomicU8,
}

impl StateLatch {
    /// Creates a latch in the `Idle` state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current state.
    #[must_use]
    pub fn current(&self) -> PipelineState {
        PipelineState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Attempts `Idle -> CapturingException`.
    ///
    /// Returns `Err` with the observed state if the pipeline was already
    /// entered.
    pub fn enter(&self) -> Result<(), PipelineState> {
        self.state
            .compare_exchange(
                PipelineState::Idle as u8,
                PipelineState::CapturingException as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .map(|_| ())
            .map_err(PipelineState::from_u8)
    }

    /// Moves forward to `next`. Backward moves are ignored.
    ///
    /// Returns the state the latch ends up in.
    pub fn advance(&self, next: PipelineState) -> PipelineState {
        let previous = self.state.fetch_max(next as u8, Ordering::SeqCst);
        PipelineState::from_u8(previous.max(next as u8))
    }
}
