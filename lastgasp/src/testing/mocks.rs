//! Scripted capabilities for testing.

use crate::core::ExceptionRecord;
use crate::guard::Completion;
use crate::phases::{FatalLogger, GracefulShutdown};
use parking_lot::Mutex;
use std::time::Duration;

/// How a scripted capability behaves when called.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Script {
    /// Signals success before returning.
    Succeed,
    /// Signals success from a spawned task after the delay.
    SucceedAfter(Duration),
    /// Returns an error without signalling.
    Throw(String),
    /// Panics without signalling.
    Panic(String),
    /// Returns without ever signalling.
    Hang,
    /// Signals an error from a spawned task.
    AsyncError(String),
    /// Signals success twice before returning.
    DoubleComplete,
    /// Signals success, then again from a spawned task after the delay.
    DoubleCompleteAfter(Duration),
    /// Signals success, then returns an error.
    CompleteThenThrow(String),
}

impl Script {
    fn play(&self, done: Completion) -> anyhow::Result<()> {
        match self {
            Script::Succeed => {
                done.done();
                Ok(())
            }
            Script::SucceedAfter(delay) => {
                let delay = *delay;
                tokio::runtime::Handle::try_current()?.spawn(async move {
                    tokio::time::sleep(delay).await;
                    done.done();
                });
                Ok(())
            }
            Script::Throw(message) => Err(anyhow::anyhow!("{message}")),
            Script::Panic(message) => panic!("{message}"),
            Script::Hang => Ok(()),
            Script::AsyncError(message) => {
                let message = message.clone();
                tokio::runtime::Handle::try_current()?.spawn(async move {
                    tokio::task::yield_now().await;
                    done.fail(anyhow::anyhow!("{message}"));
                });
                Ok(())
            }
            Script::DoubleComplete => {
                done.done();
                done.done();
                Ok(())
            }
            Script::DoubleCompleteAfter(delay) => {
                let delay = *delay;
                done.done();
                tokio::runtime::Handle::try_current()?.spawn(async move {
                    tokio::time::sleep(delay).await;
                    done.done();
                });
                Ok(())
            }
            Script::CompleteThenThrow(message) => {
                done.done();
                Err(anyhow::anyhow!("{message}"))
            }
        }
    }
}

/// A logger that follows a [`Script`] and records what it was given.
#[derive(Debug)]
pub struct ScriptedLogger {
    script: Script,
    received: Mutex<Vec<ExceptionRecord>>,
}

impl ScriptedLogger {
    /// Creates a scripted logger.
    #[must_use]
    pub fn new(script: Script) -> Self {
        Self {
            script,
            received: Mutex::new(Vec::new()),
        }
    }

    /// Returns the number of times the logger was called.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.received.lock().len()
    }

    /// Returns the exceptions the logger received.
    #[must_use]
    pub fn received(&self) -> Vec<ExceptionRecord> {
        self.received.lock().clone()
    }
}

impl FatalLogger for ScriptedLogger {
    fn fatal(&self, record: &ExceptionRecord, done: Completion) -> anyhow::Result<()> {
        self.received.lock().push(record.clone());
        self.script.play(done)
    }
}

/// A shutdown routine that follows a [`Script`].
#[derive(Debug)]
pub struct ScriptedShutdown {
    script: Script,
    calls: Mutex<usize>,
}

impl ScriptedShutdown {
    /// Creates a scripted shutdown routine.
    #[must_use]
    pub fn new(script: Script) -> Self {
        Self {
            script,
            calls: Mutex::new(0),
        }
    }

    /// Returns the number of times the routine was called.
    #[must_use]
    pub fn call_count(&self) -> usize {
        *self.calls.lock()
    }
}

impl GracefulShutdown for ScriptedShutdown {
    fn shutdown(&self, done: Completion) -> anyhow::Result<()> {
        *self.calls.lock() += 1;
        self.script.play(done)
    }
}
