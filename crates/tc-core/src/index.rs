//! Sharded message/event indexes
//!
//! An index maps record ids to locators in the append-only logs. Shards are
//! JSON files named by the lowercase hex of the first two bytes of
//! `sha256(id)`, so one lookup loads exactly one shard. A `.migrated` marker
//! inside the shard directory signals that the legacy single-file index is
//! no longer authoritative; until it appears, readers consult both and the
//! first write migrates.
//!
//! Mutators run under the owning resource lock (`messages` or `events`);
//! readers load without locking and rely on atomic replace.

use crate::io::atomic::write_json_atomic;
use crate::io::error::StoreError;
use crate::paths::TeamPaths;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Where an inbox message lives, plus a content digest for tamper checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageLocator {
    /// Recipient agent (names `inboxes/<inbox>.jsonl`)
    pub inbox: String,
    /// 1-based line number within the inbox file
    pub line: u64,
    /// blake3 of the appended line
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

/// Where an event record lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLocator {
    /// UTC day, names `events/<day>.jsonl`
    pub day: String,
    /// 1-based line number within the day file
    pub line: u64,
}

/// Shard name for an id: lowercase hex of the first two bytes of sha256.
pub fn shard_key(id: &str) -> String {
    let digest = Sha256::digest(id.as_bytes());
    format!("{:02x}{:02x}", digest[0], digest[1])
}

/// One sharded index (messages or events) of one team.
#[derive(Debug, Clone)]
pub struct ShardedIndex {
    shard_dir: PathBuf,
    legacy_path: PathBuf,
}

impl ShardedIndex {
    pub fn messages(paths: &TeamPaths) -> Self {
        ShardedIndex {
            shard_dir: paths.message_shard_dir(),
            legacy_path: paths.legacy_message_index(),
        }
    }

    pub fn events(paths: &TeamPaths) -> Self {
        ShardedIndex {
            shard_dir: paths.event_shard_dir(),
            legacy_path: paths.legacy_event_index(),
        }
    }

    fn marker_path(&self) -> PathBuf {
        self.shard_dir.join(".migrated")
    }

    fn migrated(&self) -> bool {
        self.marker_path().exists()
    }

    fn shard_path(&self, id: &str) -> PathBuf {
        self.shard_dir.join(format!("{}.json", shard_key(id)))
    }

    fn load_map(&self, path: &PathBuf) -> Result<BTreeMap<String, Value>, StoreError> {
        let content = match std::fs::read(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(StoreError::io(path, e)),
        };
        serde_json::from_slice(&content).map_err(|e| StoreError::json(path, e))
    }

    /// O(1) membership check after loading the id's single shard.
    pub fn has(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.get(id)?.is_some())
    }

    pub fn get(&self, id: &str) -> Result<Option<Value>, StoreError> {
        let shard = self.load_map(&self.shard_path(id))?;
        if let Some(locator) = shard.get(id) {
            return Ok(Some(locator.clone()));
        }
        if !self.migrated() {
            let legacy = self.load_map(&self.legacy_path)?;
            return Ok(legacy.get(id).cloned());
        }
        Ok(None)
    }

    /// Insert one entry. The caller holds the owning resource lock.
    ///
    /// The first write through an un-migrated index folds the legacy file
    /// into shards and touches `.migrated`.
    pub fn put<T: Serialize>(&self, id: &str, locator: &T) -> Result<(), StoreError> {
        self.migrate_legacy_if_needed()?;

        let path = self.shard_path(id);
        let mut shard = self.load_map(&path)?;
        shard.insert(
            id.to_string(),
            serde_json::to_value(locator).map_err(|e| StoreError::json(&path, e))?,
        );
        write_json_atomic(&path, &shard)
    }

    fn migrate_legacy_if_needed(&self) -> Result<(), StoreError> {
        if self.migrated() {
            return Ok(());
        }

        let legacy = self.load_map(&self.legacy_path)?;
        if !legacy.is_empty() {
            let mut by_shard: BTreeMap<String, Vec<(String, Value)>> = BTreeMap::new();
            for (id, locator) in legacy {
                by_shard
                    .entry(shard_key(&id))
                    .or_default()
                    .push((id, locator));
            }
            for (shard_name, entries) in by_shard {
                let path = self.shard_dir.join(format!("{shard_name}.json"));
                let mut shard = self.load_map(&path)?;
                for (id, locator) in entries {
                    // Shard entries win over the stale legacy file
                    shard.entry(id).or_insert(locator);
                }
                write_json_atomic(&path, &shard)?;
            }
        }

        let marker = self.marker_path();
        std::fs::create_dir_all(&self.shard_dir)
            .map_err(|e| StoreError::io(&self.shard_dir, e))?;
        std::fs::write(&marker, b"").map_err(|e| StoreError::io(&marker, e))?;
        Ok(())
    }

    /// Iterate every entry across all shards (plus the legacy file while it
    /// is still authoritative). For rehydrate and status scans.
    pub fn scan_all(&self) -> Result<BTreeMap<String, Value>, StoreError> {
        let mut all = BTreeMap::new();

        if !self.migrated() {
            all.extend(self.load_map(&self.legacy_path)?);
        }

        let entries = match std::fs::read_dir(&self.shard_dir) {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(all),
            Err(e) => return Err(StoreError::io(&self.shard_dir, e)),
        };
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::io(&self.shard_dir, e))?;
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                all.extend(self.load_map(&path)?);
            }
        }
        Ok(all)
    }

    /// Replace the whole shard set with `entries`.
    ///
    /// Writes a complete new generation into a sibling temp directory
    /// (marker included), removes the old directory, and renames the new one
    /// into place. A crash in between leaves a rebuildable state; rehydrate
    /// re-runs safely.
    pub fn replace_all(&self, entries: &BTreeMap<String, Value>) -> Result<(), StoreError> {
        let mut by_shard: BTreeMap<String, BTreeMap<String, Value>> = BTreeMap::new();
        for (id, locator) in entries {
            by_shard
                .entry(shard_key(id))
                .or_default()
                .insert(id.clone(), locator.clone());
        }

        let parent = self
            .shard_dir
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));
        std::fs::create_dir_all(&parent).map_err(|e| StoreError::io(&parent, e))?;

        let dir_name = self
            .shard_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "shards".to_string());
        let tmp_dir = parent.join(format!(".tmp.{dir_name}.{:x}", std::process::id()));
        if tmp_dir.exists() {
            std::fs::remove_dir_all(&tmp_dir).map_err(|e| StoreError::io(&tmp_dir, e))?;
        }
        std::fs::create_dir_all(&tmp_dir).map_err(|e| StoreError::io(&tmp_dir, e))?;

        for (shard_name, shard) in &by_shard {
            let path = tmp_dir.join(format!("{shard_name}.json"));
            let bytes =
                serde_json::to_vec_pretty(shard).map_err(|e| StoreError::json(&path, e))?;
            std::fs::write(&path, bytes).map_err(|e| StoreError::io(&path, e))?;
        }
        let marker = tmp_dir.join(".migrated");
        std::fs::write(&marker, b"").map_err(|e| StoreError::io(&marker, e))?;

        if self.shard_dir.exists() {
            std::fs::remove_dir_all(&self.shard_dir)
                .map_err(|e| StoreError::io(&self.shard_dir, e))?;
        }
        std::fs::rename(&tmp_dir, &self.shard_dir)
            .map_err(|e| StoreError::io(&self.shard_dir, e))?;
        Ok(())
    }
}
