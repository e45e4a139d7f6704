//! Testing utilities for recovery pipelines.
//!
//! This module provides:
//! - Scripted loggers and shutdown routines that misbehave on demand
//! - Readers and assertions for backup sink files
//! - An unwinding abort primitive, so termination can be observed in-process

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{assert_record_kinds, read_records, record_kinds};
pub use fixtures::{expect_abort, unwinding_abort, AbortSentinel, TestSink};
pub use mocks::{Script, ScriptedLogger, ScriptedShutdown};
