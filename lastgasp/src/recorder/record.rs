//! Failure record schema written to the backup sink.

use crate::core::{ErrorSnapshot, PipelineState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Tag identifying what a failure record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecordKind {
    /// The trigger error itself, written because the logger could not be trusted.
    ExceptionOccurred,
    /// The error the logger produced while failing.
    LoggerSecondaryError,
    /// Typed summary of how the logger failed.
    LoggerFailure,
    /// The error the shutdown routine produced while failing.
    ShutdownSecondaryError,
    /// Typed summary of how the shutdown routine failed.
    ShutdownFailure,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExceptionOccurred => write!(f, "exception-occurred"),
            Self::LoggerSecondaryError => write!(f, "logger-secondary-error"),
            Self::LoggerFailure => write!(f, "logger-failure"),
            Self::ShutdownSecondaryError => write!(f, "shutdown-secondary-error"),
            Self::ShutdownFailure => write!(f, "shutdown-failure"),
        }
    }
}

/// One self-contained line in the backup sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// What the record describes.
    pub kind: RecordKind,
    /// Message, type and stack of the recorded error.
    #[serde(flatten)]
    pub error: ErrorSnapshot,
    /// When the record was written.
    pub timestamp: DateTime<Utc>,
    /// Identifier shared by all records of one pipeline run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incident: Option<Uuid>,
    /// Id of the writing process.
    pub pid: u32,
    /// Pipeline state at write time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<PipelineState>,
}

impl FailureRecord {
    /// Creates a record stamped with the current time and process id.
    #[must_use]
    pub fn new(kind: RecordKind, error: ErrorSnapshot) -> Self {
        Self {
            kind,
            error,
            timestamp: Utc::now(),
            incident: None,
            pid: std::process::id(),
            state: None,
        }
    }

    /// Sets the incident id.
    #[must_use]
    pub fn with_incident(mut self, incident: Uuid) -> Self {
        self.incident = Some(incident);
        self
    }

    /// Sets the pipeline state.
    #[must_use]
    pub fn with_state(mut self, state: PipelineState) -> Self {
        self.state = Some(state);
        self
    }

    /// Returns the record message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.error.message
    }

    /// Serializes the record as a single JSON line, newline included.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_line(&self) -> serde_json::Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }

    /// Parses a record from one line of a backup sink.
    ///
    /// # Errors
    ///
    /// Returns an error if the line is not a valid record.
    pub fn from_line(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line.trim_end())
    }
}
