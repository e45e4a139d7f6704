//! Core data model: exception snapshots, pipeline state, phase outcomes.

mod outcome;
mod record;
mod state;

pub use outcome::{FailureKind, PhaseOutcome};
pub use record::{ErrorSnapshot, ExceptionRecord, PANIC_TYPE};
pub use state::{PipelineState, StateLatch};
