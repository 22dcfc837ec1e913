//! Operational event records, one JSONL file per UTC day

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// The closed set of operational event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Sent,
    Read,
    Acked,
    RetryScheduled,
    DeadLettered,
    Rehydrated,
    MalformedSkipped,
    NudgeSuppressed,
    TeamCreated,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Sent => "sent",
            EventKind::Read => "read",
            EventKind::Acked => "acked",
            EventKind::RetryScheduled => "retry_scheduled",
            EventKind::DeadLettered => "dead_lettered",
            EventKind::Rehydrated => "rehydrated",
            EventKind::MalformedSkipped => "malformed_skipped",
            EventKind::NudgeSuppressed => "nudge_suppressed",
            EventKind::TeamCreated => "team_created",
        }
    }
}

fn attrs_is_empty(attrs: &Map<String, Value>) -> bool {
    attrs.is_empty()
}

/// One operational event. `id` is unique within a team; duplicates are
/// idempotently dropped on append.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: String,

    /// RFC 3339 UTC timestamp; selects the day file
    pub ts: String,

    pub kind: EventKind,

    /// The message/task the event is about, when there is one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,

    #[serde(default, skip_serializing_if = "attrs_is_empty")]
    pub attrs: Map<String, Value>,

    /// Unknown fields for forward compatibility
    #[serde(flatten)]
    pub unknown_fields: HashMap<String, Value>,
}

impl EventRecord {
    pub fn new(id: impl Into<String>, ts: impl Into<String>, kind: EventKind) -> Self {
        EventRecord {
            id: id.into(),
            ts: ts.into(),
            kind,
            subject_id: None,
            trace_id: None,
            attrs: Map::new(),
            unknown_fields: HashMap::new(),
        }
    }

    pub fn subject(mut self, subject_id: impl Into<String>) -> Self {
        self.subject_id = Some(subject_id.into());
        self
    }

    pub fn trace(mut self, trace_id: Option<String>) -> Self {
        self.trace_id = trace_id;
        self
    }

    pub fn attr(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.attrs.insert(key.to_string(), value.into());
        self
    }
}
