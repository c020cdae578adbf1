// JSON array file operations

use crate::record::Record;
use crate::store::StoreError;
use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Result of reading a collection file
#[derive(Debug)]
pub enum LoadOutcome {
    /// No file at the path
    Missing,
    /// File parsed as an array of records
    Loaded(Vec<Record>),
    /// File exists but is not an array of records with positive integer ids
    Malformed(serde_json::Error),
}

impl LoadOutcome {
    /// Records to operate on, treating a malformed file as empty
    pub fn into_records(self) -> Vec<Record> {
        match self {
            LoadOutcome::Loaded(records) => records,
            LoadOutcome::Missing | LoadOutcome::Malformed(_) => Vec::new(),
        }
    }
}

/// Read every record from a collection file
///
/// Only I/O failures other than "not found" are returned as errors; parse
/// failures come back as `LoadOutcome::Malformed` so the caller picks the
/// recovery policy.
pub fn read_records(path: &Path) -> Result<LoadOutcome, StoreError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(LoadOutcome::Missing),
        Err(e) => return Err(StoreError::io(path, e)),
    };

    let records: Vec<Record> = match serde_json::from_slice(&bytes) {
        Ok(records) => records,
        Err(e) => return Ok(LoadOutcome::Malformed(e)),
    };

    let mut seen = HashSet::with_capacity(records.len());
    for record in &records {
        if !seen.insert(record.id) {
            warn!(file = ?path, id = record.id, "Duplicate record id in collection file");
        }
    }

    debug!(file = ?path, count = records.len(), "Loaded records");
    Ok(LoadOutcome::Loaded(records))
}

/// Render records as a pretty JSON array with 4-space indentation
///
/// Non-ASCII characters are written literally, not escaped.
pub fn to_pretty_json(records: &[Record]) -> Result<Vec<u8>, StoreError> {
    let mut buf = Vec::new();
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, PrettyFormatter::with_indent(b"    "));
    records.serialize(&mut ser)?;
    buf.push(b'\n');
    Ok(buf)
}

/// Replace the whole collection file with `records`
///
/// The content goes to a sibling temp file first and is renamed over the
/// target, so a crash mid-write never leaves a truncated collection.
pub fn write_records(path: &Path, records: &[Record]) -> Result<(), StoreError> {
    let content = to_pretty_json(records)?;
    let tmp_path = sibling(path, "tmp");

    let mut file = File::create(&tmp_path).map_err(|e| StoreError::io(&tmp_path, e))?;
    file.write_all(&content).map_err(|e| StoreError::io(&tmp_path, e))?;
    file.sync_all().map_err(|e| StoreError::io(&tmp_path, e))?;
    drop(file);

    fs::rename(&tmp_path, path).map_err(|e| StoreError::io(path, e))?;

    debug!(file = ?path, count = records.len(), "Saved records");
    Ok(())
}

/// `<file>.<suffix>` next to `path`
pub(crate) fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".");
    name.push(suffix);
    path.with_file_name(name)
}
