//! Task snapshot schema
//!
//! A snapshot is derived state: the monotonic merge of every applied
//! `task_assign`/`task_update` message for one task id. It is rebuildable
//! from the inbox logs at any time.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const CONFLICT_POLICY: &str = "created_at_then_message_id_monotonic";

fn default_conflict_policy() -> String {
    CONFLICT_POLICY.to_string()
}

/// Current derived state of one task.
///
/// Legacy snapshots lacking the `snapshot_version`/`last_message_*` metadata
/// deserialize with empty defaults; the first applied update populates them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub task_id: String,

    pub status: String,

    pub subject: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,

    pub assignee: String,

    pub reporter: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,

    pub history_summary: String,

    #[serde(default)]
    pub snapshot_version: u64,

    #[serde(default)]
    pub last_message_id: String,

    #[serde(default)]
    pub last_message_created_at: String,

    #[serde(default = "default_conflict_policy")]
    pub snapshot_conflict_policy: String,

    /// Unknown fields for forward compatibility
    #[serde(flatten)]
    pub unknown_fields: HashMap<String, serde_json::Value>,
}

impl TaskSnapshot {
    /// Ordering key of the last applied message.
    ///
    /// Legacy snapshots report the empty key, so any real message key is
    /// strictly greater and the first update repopulates the metadata.
    pub fn last_key(&self) -> (&str, &str) {
        (&self.last_message_created_at, &self.last_message_id)
    }
}
