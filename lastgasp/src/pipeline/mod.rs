//! Pipeline configuration, state machine and installation.
//!
//! This module provides:
//! - [`RecoveryConfig`] and its builder, with [`RecoveryOptions`] for
//!   JSON or environment driven settings
//! - [`PipelineController`], which sequences logger, shutdown and
//!   termination for the first fatal error
//! - [`install`], which wires the controller into the process panic hook

mod config;
mod controller;
mod install;

pub use config::{
    RecoveryConfig, RecoveryConfigBuilder, RecoveryOptions, DEFAULT_LOGGER_TIMEOUT,
    DEFAULT_SHUTDOWN_TIMEOUT, DEFAULT_TERMINATION_GRACE, ENV_BACKUP_SINK, ENV_LOGGER_TIMEOUT_MS,
    ENV_SHUTDOWN_TIMEOUT_MS, ENV_TERMINATION_GRACE_MS,
};
pub use controller::{PipelineController, RecoveryReport, RECOVERY_THREAD_NAME};
pub use install::{install, installed, trigger};
