//! Streaming JSONL reader with malformed-line diagnostics
//!
//! A line that is not valid JSON, not an object, or does not match the
//! expected record shape is skipped and reported as a diagnostic with a
//! stable content fingerprint. Reads never abort because of a bad line;
//! a truncated tail line simply becomes one diagnostic.

use crate::io::error::StoreError;
use crate::io::hash::compute_hash;
use serde::de::DeserializeOwned;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

/// One successfully decoded record, with its 1-based line number.
#[derive(Debug, Clone)]
pub struct JsonlRecord<T> {
    pub line_number: u64,
    pub value: T,
}

/// Diagnostic for one skipped line.
#[derive(Debug, Clone)]
pub struct MalformedLine {
    pub file_path: PathBuf,
    pub line_number: u64,
    pub line_hash: String,
    pub reason: String,
}

/// Result of scanning one JSONL file.
#[derive(Debug, Clone)]
pub struct JsonlScan<T> {
    pub records: Vec<JsonlRecord<T>>,
    pub malformed: Vec<MalformedLine>,
}

impl<T> Default for JsonlScan<T> {
    fn default() -> Self {
        JsonlScan {
            records: Vec::new(),
            malformed: Vec::new(),
        }
    }
}

/// Stream-decode a JSONL file. A missing file yields an empty scan.
pub fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<JsonlScan<T>, StoreError> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(JsonlScan::default()),
        Err(e) => return Err(StoreError::io(path, e)),
    };

    let mut scan = JsonlScan::default();
    let reader = BufReader::new(file);

    for (idx, line) in reader.lines().enumerate() {
        let line_number = idx as u64 + 1;
        let line = line.map_err(|e| StoreError::io(path, e))?;
        if line.trim().is_empty() {
            continue;
        }

        let reason = match serde_json::from_str::<serde_json::Value>(&line) {
            Ok(value) if value.is_object() => match serde_json::from_value::<T>(value) {
                Ok(record) => {
                    scan.records.push(JsonlRecord {
                        line_number,
                        value: record,
                    });
                    continue;
                }
                Err(e) => format!("record shape mismatch: {e}"),
            },
            Ok(_) => "not a JSON object".to_string(),
            Err(e) => format!("invalid JSON: {e}"),
        };

        scan.malformed.push(MalformedLine {
            file_path: path.to_path_buf(),
            line_number,
            line_hash: compute_hash(line.as_bytes()),
            reason,
        });
    }

    Ok(scan)
}

/// Count the JSONL lines already in a file (missing file counts zero).
///
/// A non-empty file without a trailing newline still counts its last line,
/// so the next append's 1-based line number is `count + 1`.
pub fn count_lines(path: &Path) -> Result<u64, StoreError> {
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(StoreError::io(path, e)),
    };
    if bytes.is_empty() {
        return Ok(0);
    }
    let mut count = bytes.iter().filter(|b| **b == b'\n').count() as u64;
    if *bytes.last().unwrap() != b'\n' {
        count += 1;
    }
    Ok(count)
}
