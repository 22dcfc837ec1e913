//! Cooldown-based nudge suppression
//!
//! `state/nudge-index.json` maps hashed `(team, recipient, cooldown_key)`
//! triples to the last non-suppressed send time. A send inside the window is
//! suppressed; a send outside it refreshes the window under
//! `nudge-cooldown.lock`.

use crate::io::atomic::write_json_atomic;
use crate::io::error::StoreError;
use crate::io::hash::compute_hash;
use crate::io::lock::{lock_resource, LockResource};
use crate::paths::TeamPaths;
use crate::schema::{parse_rfc3339, rfc3339_millis};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Outcome of the cooldown gate for one send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CooldownDecision {
    /// Outside the window; `last_sent_at` has been refreshed
    Send,
    /// Inside the window; the send must be suppressed
    Suppressed { remaining_secs: i64 },
}

/// Suppression key: hash of the team/recipient/key triple.
pub fn cooldown_entry_key(team: &str, recipient: &str, cooldown_key: &str) -> String {
    compute_hash(format!("{team}\u{0}{recipient}\u{0}{cooldown_key}").as_bytes())
}

/// Load the nudge index (lock-free read).
pub fn load(paths: &TeamPaths) -> Result<BTreeMap<String, String>, StoreError> {
    let path = paths.nudge_index();
    let content = match std::fs::read(&path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(e) => return Err(StoreError::io(&path, e)),
    };
    serde_json::from_slice(&content).map_err(|e| StoreError::json(&path, e))
}

/// Gate one send: suppress inside the window, otherwise start a new window.
pub fn check_and_touch(
    paths: &TeamPaths,
    recipient: &str,
    cooldown_key: &str,
    cooldown_seconds: i64,
    now: DateTime<Utc>,
) -> Result<CooldownDecision, StoreError> {
    let key = cooldown_entry_key(paths.team(), recipient, cooldown_key);

    let _guard = lock_resource(paths, LockResource::NudgeCooldown)?;
    let mut index = load(paths)?;

    if let Some(last_sent_at) = index.get(&key)
        && let Some(last) = parse_rfc3339(last_sent_at)
    {
        let elapsed = (now - last).num_seconds();
        if elapsed < cooldown_seconds {
            return Ok(CooldownDecision::Suppressed {
                remaining_secs: cooldown_seconds - elapsed,
            });
        }
    }

    index.insert(key, rfc3339_millis(now));
    write_json_atomic(&paths.nudge_index(), &index)?;
    Ok(CooldownDecision::Send)
}
