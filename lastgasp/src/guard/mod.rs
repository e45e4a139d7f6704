//! Deadline racing for callback-style operations.
//!
//! This module provides:
//! - [`Completion`], the single-fire signal handed to guarded operations
//! - [`TimeoutGuard`], which races one run of an operation against a deadline
//! - [`GuardSlot`], through which out-of-band faults reach the guard in flight

mod completion;
mod timeout;

pub use completion::{Completion, StrayHandler};
pub use timeout::{GuardSlot, TimeoutGuard};
