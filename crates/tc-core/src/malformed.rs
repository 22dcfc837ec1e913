//! Deduplicated diagnostics for malformed JSONL lines
//!
//! Malformed lines are never fatal (§ reader contract); they are skipped and
//! remembered here, keyed by `(file_path, line_hash)`, so repeated scans of
//! the same bad line do not inflate counters. With
//! `TEAM_CHAT_WARN_MALFORMED=1` each *new* fingerprint emits one stderr
//! warning.

use crate::io::atomic::write_json_atomic;
use crate::io::error::StoreError;
use crate::io::jsonl::MalformedLine;
use crate::io::lock::{lock_resource, LockResource};
use crate::paths::TeamPaths;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One remembered malformed line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MalformedEntry {
    pub file_path: String,
    pub line_number: u64,
    pub line_hash: String,
    pub reason: String,
    pub first_seen_at: String,
    pub last_seen_at: String,
    pub count: u64,
}

fn entry_key(file_path: &str, line_hash: &str) -> String {
    format!("{file_path}|{line_hash}")
}

/// Load the diagnostics index (lock-free read).
pub fn load(paths: &TeamPaths) -> Result<BTreeMap<String, MalformedEntry>, StoreError> {
    let path = paths.malformed_index();
    let content = match std::fs::read(&path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(e) => return Err(StoreError::io(&path, e)),
    };
    serde_json::from_slice(&content).map_err(|e| StoreError::json(&path, e))
}

/// Record scan diagnostics, returning the fingerprints not seen before.
///
/// Re-observing a known fingerprint at the same line refreshes
/// `last_seen_at` only; at a different line it counts as a new occurrence.
pub fn record(
    paths: &TeamPaths,
    lines: &[MalformedLine],
    now: &str,
    warn: bool,
) -> Result<Vec<MalformedLine>, StoreError> {
    if lines.is_empty() {
        return Ok(Vec::new());
    }

    let _guard = lock_resource(paths, LockResource::MalformedJsonl)?;
    let mut index = load(paths)?;
    let mut new_fingerprints = Vec::new();

    for line in lines {
        let file_path = line.file_path.to_string_lossy().into_owned();
        let key = entry_key(&file_path, &line.line_hash);
        match index.get_mut(&key) {
            Some(entry) if entry.line_number == line.line_number => {
                entry.last_seen_at = now.to_string();
            }
            Some(entry) => {
                entry.line_number = line.line_number;
                entry.last_seen_at = now.to_string();
                entry.count += 1;
            }
            None => {
                index.insert(
                    key,
                    MalformedEntry {
                        file_path: file_path.clone(),
                        line_number: line.line_number,
                        line_hash: line.line_hash.clone(),
                        reason: line.reason.clone(),
                        first_seen_at: now.to_string(),
                        last_seen_at: now.to_string(),
                        count: 1,
                    },
                );
                if warn {
                    eprintln!(
                        "warning: skipped malformed line {}:{} ({})",
                        file_path, line.line_number, line.reason
                    );
                }
                new_fingerprints.push(line.clone());
            }
        }
    }

    write_json_atomic(&paths.malformed_index(), &index)?;
    Ok(new_fingerprints)
}

/// Record scan diagnostics and log a `malformed_skipped` event per new
/// fingerprint. For callers that scan outside any lock (readers, status).
pub fn note_scan(
    data_root: &std::path::Path,
    paths: &TeamPaths,
    lines: &[MalformedLine],
    now: chrono::DateTime<chrono::Utc>,
) -> Result<usize, StoreError> {
    let warn = crate::config::warn_malformed_enabled(data_root);
    let ts = crate::schema::rfc3339_millis(now);
    let new_fingerprints = record(paths, lines, &ts, warn)?;

    for line in &new_fingerprints {
        let event = crate::schema::EventRecord::new(
            format!("malformed.{}", &line.line_hash[..16]),
            ts.clone(),
            crate::schema::EventKind::MalformedSkipped,
        )
        .attr("file", line.file_path.to_string_lossy().into_owned())
        .attr("line", line.line_number)
        .attr("reason", line.reason.clone());
        crate::events::log_event(paths, &event)?;
    }
    Ok(new_fingerprints.len())
}
