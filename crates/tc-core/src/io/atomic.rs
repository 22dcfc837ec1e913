//! Atomic JSON replace and JSONL append
//!
//! JSON state files are written to a sibling temp file (prefix `.tmp.`,
//! unique suffix) and renamed over the target, so readers never observe
//! partial content. JSONL appends write one compact LF-terminated line.
//! Neither path forces a sync to stable storage: the contract is atomic
//! visibility, best-effort durability.

use crate::io::error::StoreError;
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

fn tmp_sibling(path: &Path) -> PathBuf {
    static SEQ: AtomicU64 = AtomicU64::new(0);
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    let suffix = format!(
        "{:x}-{:x}-{:x}",
        std::process::id(),
        nanos,
        SEQ.fetch_add(1, Ordering::Relaxed)
    );
    path.with_file_name(format!(".tmp.{name}.{suffix}"))
}

fn ensure_parent(path: &Path) -> Result<(), StoreError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
    }
    Ok(())
}

/// Replace `path` with the pretty-printed JSON encoding of `value`.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    ensure_parent(path)?;
    let tmp = tmp_sibling(path);

    let mut bytes = serde_json::to_vec_pretty(value).map_err(|e| StoreError::json(&tmp, e))?;
    bytes.push(b'\n');
    fs::write(&tmp, &bytes).map_err(|e| StoreError::io(&tmp, e))?;

    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        StoreError::io(path, e)
    })?;
    Ok(())
}

/// Append one compact JSON line to a JSONL file, creating it on demand.
pub fn append_jsonl<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    ensure_parent(path)?;
    let mut line = serde_json::to_string(value).map_err(|e| StoreError::json(path, e))?;
    line.push('\n');

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| StoreError::io(path, e))?;
    file.write_all(line.as_bytes())
        .map_err(|e| StoreError::io(path, e))?;
    Ok(())
}
