//! Phase outcomes.

use super::record::ErrorSnapshot;
use serde::{Deserialize, Serialize};
use std::fmt;

/// How a guarded operation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The call returned an error or panicked before returning.
    Threw,
    /// No completion arrived before the deadline.
    TimedOut,
    /// The completion carried an error, or a fault arrived while waiting.
    AsyncError,
    /// Completion was signalled more than once, or the call failed after
    /// signalling completion.
    ProtocolViolation,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Threw => write!(f, "threw"),
            Self::TimedOut => write!(f, "timed_out"),
            Self::AsyncError => write!(f, "async_error"),
            Self::ProtocolViolation => write!(f, "protocol_violation"),
        }
    }
}

impl FailureKind {
    /// Returns true for the kinds that get a typed failure meta-record.
    #[must_use]
    pub fn is_typed(&self) -> bool {
        !matches!(self, Self::ProtocolViolation)
    }
}

/// The single adopted result of a phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PhaseOutcome {
    /// The operation signalled completion without an error.
    Succeeded,
    /// The operation failed.
    Failed {
        /// The failure classification.
        kind: FailureKind,
        /// The error observed, absent for pure timeouts.
        error: Option<ErrorSnapshot>,
    },
}

impl PhaseOutcome {
    /// Creates a failed outcome.
    #[must_use]
    pub fn failed(kind: FailureKind, error: Option<ErrorSnapshot>) -> Self {
        Self::Failed { kind, error }
    }

    /// Returns true if the phase succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }

    /// Returns the failure kind, if the phase failed.
    #[must_use]
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::Succeeded => None,
            Self::Failed { kind, .. } => Some(*kind),
        }
    }

    /// Returns the error carried by a failed outcome.
    #[must_use]
    pub fn error(&self) -> Option<&ErrorSnapshot> {
        match self {
            Self::Succeeded => None,
            Self::Failed { error, .. } => error.as_ref(),
        }
    }
}
