//! # Lastgasp
//!
//! A last-resort recovery pipeline for fatal errors.
//!
//! When the first unhandled panic (or any error fed to [`pipeline::trigger`])
//! reaches the pipeline, it:
//!
//! - **Logs**: hands the error to a [`FatalLogger`](phases::FatalLogger),
//!   bounded by a deadline
//! - **Shuts down**: runs an optional [`GracefulShutdown`](phases::GracefulShutdown)
//!   routine, bounded by its own deadline
//! - **Records**: writes structured failure records to a backup sink whenever
//!   either step fails, times out or misbehaves
//! - **Aborts**: always ends the process with an abnormal, core-dump-capable
//!   exit, whatever happened before
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use lastgasp::prelude::*;
//! use std::time::Duration;
//!
//! let config = RecoveryConfig::builder()
//!     .logger(ConsoleLogger)
//!     .shutdown_fn(|done| {
//!         flush_everything();
//!         done.done();
//!         Ok(())
//!     })
//!     .backup_sink(BackupSink::parse("/var/log/app/fatal.log")?)
//!     .logger_timeout(Duration::from_secs(5))
//!     .build()?;
//!
//! install(config)?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod core;
pub mod errors;
pub mod guard;
pub mod observability;
pub mod phases;
pub mod pipeline;
pub mod recorder;
pub mod terminator;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::core::{
        ErrorSnapshot, ExceptionRecord, FailureKind, PhaseOutcome, PipelineState,
    };
    pub use crate::errors::{BackupWriteFailed, ConfigError, PhaseFailure};
    pub use crate::guard::Completion;
    pub use crate::observability::init_tracing;
    pub use crate::phases::{
        AsyncLogger, AsyncShutdown, ConsoleLogger, FatalLogger, FnLogger, FnShutdown,
        GracefulShutdown, TracingLogger,
    };
    pub use crate::pipeline::{
        install, trigger, PipelineController, RecoveryConfig, RecoveryOptions, RecoveryReport,
    };
    pub use crate::recorder::{BackupSink, FailureRecord, RecordKind};
}

pub use pipeline::{install, RecoveryConfig};
