//! Durable, line-oriented failure records.
//!
//! Every record is written synchronously and flushed before `record`
//! returns: the process may abort at any moment after, so nothing is
//! buffered across records. Write failures are reported and swallowed.

mod record;
mod sink;

pub use record::{FailureRecord, RecordKind};
pub use sink::BackupSink;

use crate::core::{ErrorSnapshot, PipelineState};
use crate::errors::BackupWriteFailed;
use parking_lot::Mutex;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use tracing::{debug, warn};
use uuid::Uuid;

/// Appends failure records to a [`BackupSink`].
#[derive(Debug)]
pub struct FailureRecorder {
    sink: BackupSink,
    incident: Uuid,
    write_lock: Mutex<()>,
}

impl FailureRecorder {
    /// Creates a recorder with a fresh incident id.
    #[must_use]
    pub fn new(sink: BackupSink) -> Self {
        Self {
            sink,
            incident: Uuid::new_v4(),
            write_lock: Mutex::new(()),
        }
    }

    /// Returns the sink.
    #[must_use]
    pub fn sink(&self) -> &BackupSink {
        &self.sink
    }

    /// Returns the incident id stamped on every record.
    #[must_use]
    pub fn incident(&self) -> Uuid {
        self.incident
    }

    /// Records one entry. Never fails: write errors are reported on a
    /// best-effort basis and dropped.
    ///
    /// Returns true if the record reached the sink.
    pub fn record(&self, kind: RecordKind, error: &ErrorSnapshot, state: PipelineState) -> bool {
        if !self.sink.is_enabled() {
            return false;
        }

        let record = FailureRecord::new(kind, error.clone())
            .with_incident(self.incident)
            .with_state(state);

        match self.write(&record) {
            Ok(()) => true,
            Err(err) => {
                warn!(kind = %kind, sink = %self.sink, error = %err, "backup record lost");
                let _ = writeln!(std::io::stderr(), "lastgasp: {err}");
                false
            }
        }
    }

    /// Writes one record and flushes it.
    ///
    /// # Errors
    ///
    /// Returns [`BackupWriteFailed`] if the sink cannot be written.
    pub fn write(&self, record: &FailureRecord) -> Result<(), BackupWriteFailed> {
        let line = record.to_line().map_err(|e| BackupWriteFailed {
            target: self.sink.to_string(),
            source: e.into(),
        })?;

        let _serialized = self.write_lock.lock();
        match self.sink {
            BackupSink::None => Ok(()),
            BackupSink::Stdout => {
                let mut out = std::io::stdout().lock();
                out.write_all(line.as_bytes())
                    .and_then(|()| out.flush())
                    .map_err(|e| BackupWriteFailed::stream("stdout", e))
            }
            BackupSink::Stderr => {
                let mut err = std::io::stderr().lock();
                err.write_all(line.as_bytes())
                    .and_then(|()| err.flush())
                    .map_err(|e| BackupWriteFailed::stream("stderr", e))
            }
            BackupSink::File(ref path) => {
                append_line(path, &line).map_err(|e| BackupWriteFailed::file(path, e))
            }
        }
    }
}

fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(line.as_bytes())?;
    file.flush()?;
    // Device files and pipes reject fsync; the bytes are already written.
    if let Err(e) = file.sync_data() {
        debug!(path = %path.display(), error = %e, "sync_data not supported");
    }
    Ok(())
}
