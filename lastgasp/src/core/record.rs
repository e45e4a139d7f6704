//! Immutable snapshots of the trigger error and of secondary errors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::fmt;
use std::panic::PanicHookInfo;

/// Type tag used for exception records built from a panic.
pub const PANIC_TYPE: &str = "panic";

/// Message used when a panic payload is neither `&str` nor `String`.
const UNKNOWN_PAYLOAD: &str = "unknown panic payload";

/// Message, type and stack text of an error, detached from the error value.
///
/// Errors flowing through the pipeline are captured into snapshots as soon as
/// they are observed: the original values may not be `Clone`, may borrow from
/// a panicking frame, or may not survive the thread that produced them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorSnapshot {
    /// Human-readable message.
    pub message: String,
    /// Type or category of the error, when known.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Stack or cause-chain text, when available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl ErrorSnapshot {
    /// Creates a snapshot carrying only a message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: None,
            stack: None,
        }
    }

    /// Sets the type tag.
    #[must_use]
    pub fn with_type(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    /// Sets the stack text.
    #[must_use]
    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    /// Captures a typed error. The type tag is the error's Rust type name and
    /// the stack is its `source()` chain.
    #[must_use]
    pub fn from_error<E: std::error::Error>(err: &E) -> Self {
        let snapshot = Self::new(err.to_string()).with_type(std::any::type_name::<E>());
        match cause_chain(err.source()) {
            Some(chain) => snapshot.with_stack(chain),
            None => snapshot,
        }
    }

    /// Captures an `anyhow::Error`, including its backtrace when one was
    /// recorded.
    #[must_use]
    pub fn from_anyhow(err: &anyhow::Error) -> Self {
        let mut stack = cause_chain(err.source()).unwrap_or_default();
        let backtrace = err.backtrace();
        if backtrace.status() == BacktraceStatus::Captured {
            if !stack.is_empty() {
                stack.push('\n');
            }
            stack.push_str(&backtrace.to_string());
        }

        let snapshot = Self::new(err.to_string());
        if stack.is_empty() {
            snapshot
        } else {
            snapshot.with_stack(stack)
        }
    }

    /// Captures a panic payload as produced by `catch_unwind`.
    #[must_use]
    pub fn from_panic_payload(payload: &(dyn Any + Send)) -> Self {
        Self::new(panic_message(payload)).with_type(PANIC_TYPE)
    }
}

impl fmt::Display for ErrorSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            Some(ref kind) => write!(f, "{kind}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl From<anyhow::Error> for ErrorSnapshot {
    fn from(err: anyhow::Error) -> Self {
        Self::from_anyhow(&err)
    }
}

impl From<&str> for ErrorSnapshot {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for ErrorSnapshot {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

/// Snapshot of the error that triggered the pipeline.
///
/// Built exactly once when the trigger is captured, then shared read-only by
/// both phases and by the failure recorder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionRecord {
    error: ErrorSnapshot,
    captured_at: DateTime<Utc>,
}

impl ExceptionRecord {
    /// Creates a record from a snapshot, stamped with the current time.
    #[must_use]
    pub fn new(error: ErrorSnapshot) -> Self {
        Self {
            error,
            captured_at: Utc::now(),
        }
    }

    /// Builds a record from the information handed to a panic hook.
    ///
    /// The stack is the panic location followed by a force-captured backtrace
    /// of the panicking thread.
    #[must_use]
    pub fn from_panic(info: &PanicHookInfo<'_>) -> Self {
        let mut stack = match info.location() {
            Some(loc) => format!("panicked at {}:{}:{}", loc.file(), loc.line(), loc.column()),
            None => "panicked at <unknown location>".to_string(),
        };
        stack.push('\n');
        stack.push_str(&Backtrace::force_capture().to_string());

        Self::new(
            ErrorSnapshot::new(panic_message(info.payload()))
                .with_type(PANIC_TYPE)
                .with_stack(stack),
        )
    }

    /// Builds a record from a typed error that escaped normal handling.
    #[must_use]
    pub fn from_error<E: std::error::Error>(err: &E) -> Self {
        Self::new(ErrorSnapshot::from_error(err))
    }

    /// Returns the captured error.
    #[must_use]
    pub fn error(&self) -> &ErrorSnapshot {
        &self.error
    }

    /// Returns the error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.error.message
    }

    /// Returns the error type tag, if any.
    #[must_use]
    pub fn kind(&self) -> Option<&str> {
        self.error.kind.as_deref()
    }

    /// Returns the stack text, if any.
    #[must_use]
    pub fn stack(&self) -> Option<&str> {
        self.error.stack.as_deref()
    }

    /// Returns when the trigger was captured.
    #[must_use]
    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        UNKNOWN_PAYLOAD.to_string()
    }
}

fn cause_chain(mut source: Option<&(dyn std::error::Error + 'static)>) -> Option<String> {
    let mut lines = Vec::new();
    while let Some(cause) = source {
        lines.push(format!("caused by: {cause}"));
        source = cause.source();
    }
    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}
