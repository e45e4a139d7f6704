//! Readers and assertions for backup sink files.

use crate::recorder::{FailureRecord, RecordKind};
use std::path::Path;

/// Reads every record from a backup file. A missing file reads as empty.
///
/// # Panics
///
/// Panics if a line is not a valid record.
pub fn read_records(path: &Path) -> Vec<FailureRecord> {
    let Ok(content) = std::fs::read_to_string(path) else {
        return Vec::new();
    };
    content
        .lines()
        .enumerate()
        .map(|(n, line)| {
            FailureRecord::from_line(line)
                .unwrap_or_else(|e| panic!("line {} of {} is not a record: {e}", n + 1, path.display()))
        })
        .collect()
}

/// Returns the kinds of `records`, in order.
pub fn record_kinds(records: &[FailureRecord]) -> Vec<RecordKind> {
    records.iter().map(|r| r.kind).collect()
}

/// Asserts the backup file holds exactly `expected`, in order.
pub fn assert_record_kinds(path: &Path, expected: &[RecordKind]) {
    let actual = record_kinds(&read_records(path));
    assert_eq!(
        actual, expected,
        "Expected records {:?} in {}, got {:?}",
        expected,
        path.display(),
        actual
    );
}
