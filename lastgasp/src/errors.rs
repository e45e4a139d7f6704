//! Error types for the recovery pipeline.
//!
//! - [`ConfigError`]: raised synchronously at installation time.
//! - [`PhaseFailure`]: runtime failures of the logger and shutdown phases.
//!   They are recorded to the backup sink and never propagated.
//! - [`BackupWriteFailed`]: the backup sink could not be written. Reported
//!   best-effort and swallowed.

use crate::core::{ErrorSnapshot, FailureKind, PipelineState};
use crate::phases::Phase;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while building or installing the pipeline.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No diagnostic logger was supplied.
    #[error("a fatal logger is required; call `RecoveryConfig::builder().logger(..)` before `build()`")]
    LoggerRequired,

    /// A phase timeout was zero.
    #[error("{name} must be greater than zero")]
    InvalidTimeout {
        /// Which timeout was invalid.
        name: &'static str,
    },

    /// The backup sink path was empty.
    #[error("backup sink path must not be empty")]
    InvalidBackupSink,

    /// An option value could not be parsed.
    #[error("invalid value {value:?} for option {option}")]
    InvalidOption {
        /// The option name.
        option: String,
        /// The raw value.
        value: String,
    },

    /// Options JSON could not be deserialized.
    #[error("invalid recovery options: {0}")]
    Options(#[from] serde_json::Error),

    /// A pipeline is already installed in this process.
    #[error("a recovery pipeline is already installed in this process")]
    AlreadyInstalled,
}

impl ConfigError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            ConfigError::LoggerRequired => "config_logger_required",
            ConfigError::InvalidTimeout { .. } => "config_invalid_timeout",
            ConfigError::InvalidBackupSink => "config_invalid_backup_sink",
            ConfigError::InvalidOption { .. } => "config_invalid_option",
            ConfigError::Options(_) => "config_invalid_options",
            ConfigError::AlreadyInstalled => "config_already_installed",
        }
    }
}

/// Runtime failure of a phase, as written to the backup sink.
#[non_exhaustive]
#[derive(Debug, Clone, Error)]
pub enum PhaseFailure {
    /// `FatalLogger::fatal` did not complete in time.
    #[error("logger.fatal() timed out; expected it to finish within {} ms", timeout.as_millis())]
    LoggerTimeout {
        /// The configured deadline.
        timeout: Duration,
    },

    /// `FatalLogger::fatal` returned an error or panicked.
    #[error("logger.fatal() threw; expected it not to fail synchronously. message: {}", error.message)]
    LoggerThrew {
        /// The thrown error.
        error: ErrorSnapshot,
    },

    /// `FatalLogger::fatal` completed with an error, or faulted while running.
    #[error("logger.fatal() failed asynchronously. message: {}. state: {state}", error.message)]
    LoggerAsyncError {
        /// The reported error.
        error: ErrorSnapshot,
        /// Pipeline state when the error was observed.
        state: PipelineState,
    },

    /// `FatalLogger::fatal` signalled completion more than once.
    #[error("logger.fatal() violated the single-completion contract")]
    LoggerProtocolViolation,

    /// `GracefulShutdown::shutdown` did not complete in time.
    #[error("graceful shutdown timed out; expected it to finish within {} ms", timeout.as_millis())]
    ShutdownTimeout {
        /// The configured deadline.
        timeout: Duration,
    },

    /// `GracefulShutdown::shutdown` returned an error or panicked.
    #[error("graceful shutdown threw; expected it not to fail synchronously. message: {}", error.message)]
    ShutdownThrew {
        /// The thrown error.
        error: ErrorSnapshot,
    },

    /// `GracefulShutdown::shutdown` completed with an error, or faulted while running.
    #[error("graceful shutdown failed asynchronously. message: {}. state: {state}", error.message)]
    ShutdownAsyncError {
        /// The reported error.
        error: ErrorSnapshot,
        /// Pipeline state when the error was observed.
        state: PipelineState,
    },

    /// `GracefulShutdown::shutdown` signalled completion more than once.
    #[error("graceful shutdown violated the single-completion contract")]
    ShutdownProtocolViolation,
}

impl PhaseFailure {
    /// Classifies a failed phase.
    ///
    /// `error` is the error the guard observed; it is absent for timeouts.
    #[must_use]
    pub fn classify(
        phase: Phase,
        kind: FailureKind,
        error: Option<&ErrorSnapshot>,
        timeout: Duration,
        state: PipelineState,
    ) -> Self {
        let error = || {
            error
                .cloned()
                .unwrap_or_else(|| ErrorSnapshot::new("no error value was supplied"))
        };
        match (phase, kind) {
            (Phase::Logger, FailureKind::TimedOut) => Self::LoggerTimeout { timeout },
            (Phase::Logger, FailureKind::Threw) => Self::LoggerThrew { error: error() },
            (Phase::Logger, FailureKind::AsyncError) => Self::LoggerAsyncError { error: error(), state },
            (Phase::Logger, FailureKind::ProtocolViolation) => Self::LoggerProtocolViolation,
            (Phase::Shutdown, FailureKind::TimedOut) => Self::ShutdownTimeout { timeout },
            (Phase::Shutdown, FailureKind::Threw) => Self::ShutdownThrew { error: error() },
            (Phase::Shutdown, FailureKind::AsyncError) => {
                Self::ShutdownAsyncError { error: error(), state }
            }
            (Phase::Shutdown, FailureKind::ProtocolViolation) => Self::ShutdownProtocolViolation,
        }
    }

    /// Returns the stable type tag written to the backup sink.
    pub fn type_tag(&self) -> &'static str {
        match self {
            PhaseFailure::LoggerTimeout { .. } => "lastgasp.logger.timeout",
            PhaseFailure::LoggerThrew { .. } => "lastgasp.logger.threw",
            PhaseFailure::LoggerAsyncError { .. } => "lastgasp.logger.async-error",
            PhaseFailure::LoggerProtocolViolation => "lastgasp.logger.protocol-violation",
            PhaseFailure::ShutdownTimeout { .. } => "lastgasp.shutdown.timeout",
            PhaseFailure::ShutdownThrew { .. } => "lastgasp.shutdown.threw",
            PhaseFailure::ShutdownAsyncError { .. } => "lastgasp.shutdown.async-error",
            PhaseFailure::ShutdownProtocolViolation => "lastgasp.shutdown.protocol-violation",
        }
    }

    /// Returns the failure kind this error describes.
    pub fn kind(&self) -> FailureKind {
        match self {
            PhaseFailure::LoggerTimeout { .. } | PhaseFailure::ShutdownTimeout { .. } => {
                FailureKind::TimedOut
            }
            PhaseFailure::LoggerThrew { .. } | PhaseFailure::ShutdownThrew { .. } => {
                FailureKind::Threw
            }
            PhaseFailure::LoggerAsyncError { .. } | PhaseFailure::ShutdownAsyncError { .. } => {
                FailureKind::AsyncError
            }
            PhaseFailure::LoggerProtocolViolation | PhaseFailure::ShutdownProtocolViolation => {
                FailureKind::ProtocolViolation
            }
        }
    }

    /// Captures this failure as a snapshot: the message is the rendered
    /// error, the type is [`Self::type_tag`] and the stack is the underlying
    /// error's stack, if any.
    #[must_use]
    pub fn to_snapshot(&self) -> ErrorSnapshot {
        let snapshot = ErrorSnapshot::new(self.to_string()).with_type(self.type_tag());
        let inner = match self {
            PhaseFailure::LoggerThrew { error }
            | PhaseFailure::LoggerAsyncError { error, .. }
            | PhaseFailure::ShutdownThrew { error }
            | PhaseFailure::ShutdownAsyncError { error, .. } => error.stack.clone(),
            _ => None,
        };
        match inner {
            Some(stack) => snapshot.with_stack(stack),
            None => snapshot,
        }
    }
}

/// The backup sink could not be written.
#[derive(Debug, Error)]
#[error("failed to write failure record to {target}: {source}")]
pub struct BackupWriteFailed {
    /// Where the write was aimed.
    pub target: String,
    /// The underlying I/O or encoding error.
    #[source]
    pub source: std::io::Error,
}

impl BackupWriteFailed {
    /// Creates a write failure for a file sink.
    #[must_use]
    pub fn file(path: &Path, source: std::io::Error) -> Self {
        Self {
            target: path.display().to_string(),
            source,
        }
    }

    /// Creates a write failure for a named stream.
    #[must_use]
    pub fn stream(name: &str, source: std::io::Error) -> Self {
        Self {
            target: name.to_string(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_config_error_labels() {
        assert_eq!(ConfigError::LoggerRequired.as_label(), "config_logger_required");
        assert_eq!(
            ConfigError::InvalidTimeout { name: "logger_timeout" }.as_label(),
            "config_invalid_timeout"
        );
        assert!(ConfigError::LoggerRequired.to_string().contains("logger"));
    }

    #[test]
    fn test_classify_logger_timeout() {
        let failure = PhaseFailure::classify(
            Phase::Logger,
            FailureKind::TimedOut,
            None,
            Duration::from_millis(50),
            PipelineState::RunningLogger,
        );

        assert_eq!(failure.type_tag(), "lastgasp.logger.timeout");
        assert_eq!(failure.kind(), FailureKind::TimedOut);
        assert!(failure.to_string().contains("50 ms"));
    }

    #[test]
    fn test_classify_shutdown_async_error_names_state() {
        let cause = ErrorSnapshot::new("pool drained twice").with_stack("at drain()");
        let failure = PhaseFailure::classify(
            Phase::Shutdown,
            FailureKind::AsyncError,
            Some(&cause),
            Duration::from_secs(1),
            PipelineState::RunningShutdown,
        );

        assert_eq!(failure.type_tag(), "lastgasp.shutdown.async-error");
        let snapshot = failure.to_snapshot();
        assert!(snapshot.message.contains("pool drained twice"));
        assert!(snapshot.message.contains("running_shutdown"));
        assert_eq!(snapshot.kind.as_deref(), Some("lastgasp.shutdown.async-error"));
        assert_eq!(snapshot.stack.as_deref(), Some("at drain()"));
    }

    #[test]
    fn test_classify_threw_without_error_value() {
        let failure = PhaseFailure::classify(
            Phase::Logger,
            FailureKind::Threw,
            None,
            Duration::from_secs(1),
            PipelineState::RunningLogger,
        );
        assert!(failure.to_string().contains("no error value"));
    }

    #[test]
    fn test_backup_write_failed_display() {
        let err = BackupWriteFailed::stream(
            "stdout",
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed"),
        );
        assert_eq!(err.to_string(), "failed to write failure record to stdout: pipe closed");
    }
}
