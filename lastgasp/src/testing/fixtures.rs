//! Fixtures for observing termination in-process.

use crate::recorder::BackupSink;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Payload carried by [`unwinding_abort`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AbortSentinel;

/// Abort primitive for tests: unwinds with [`AbortSentinel`] instead of
/// ending the process. The panic hook is not invoked.
pub fn unwinding_abort() -> ! {
    std::panic::resume_unwind(Box::new(AbortSentinel))
}

/// Runs `f` and asserts it ended through [`unwinding_abort`].
///
/// # Panics
///
/// Panics if `f` returns or unwinds with another payload.
pub fn expect_abort<F: FnOnce()>(f: F) {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(()) => panic!("expected the pipeline to abort, but it returned"),
        Err(payload) => assert!(
            payload.is::<AbortSentinel>(),
            "expected an abort, got another panic"
        ),
    }
}

/// Backup file in a private temporary directory.
#[derive(Debug)]
pub struct TestSink {
    dir: TempDir,
}

impl TestSink {
    /// Creates an empty sink.
    ///
    /// # Panics
    ///
    /// Panics if the temporary directory cannot be created.
    #[must_use]
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("failed to create temp dir"),
        }
    }

    /// Returns the backup file path.
    #[must_use]
    pub fn path(&self) -> PathBuf {
        self.dir.path().join("backup.log")
    }

    /// Returns the directory holding the file.
    #[must_use]
    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    /// Returns a sink writing to [`Self::path`].
    #[must_use]
    pub fn sink(&self) -> BackupSink {
        BackupSink::File(self.path())
    }
}

impl Default for TestSink {
    fn default() -> Self {
        Self::new()
    }
}
