//! Inbox envelope schema (schema v1)

use crate::io::error::StoreError;
use crate::paths::validate_identifier;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The closed set of message types.
///
/// Per-type behavior (retry policy, snapshot applicability) hangs off this
/// enum rather than being scattered through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// Free-form message between agents
    Message,
    /// Assign a task to the recipient
    TaskAssign,
    /// Update the state of an existing task
    TaskUpdate,
    /// Ask the recipient for a decision
    DecisionRequired,
    /// Notify that an agent has gone idle
    IdleNotification,
    /// Reminder for an earlier unacknowledged message
    Nudge,
}

/// Retry schedule for `require_ack` deliveries of one message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_secs: i64,
    pub factor: u32,
    pub ack_timeout_secs: i64,
}

impl MessageType {
    /// Parse a wire name, rejecting anything outside the enumerated set.
    pub fn parse(value: &str) -> Result<Self, StoreError> {
        match value {
            "message" => Ok(MessageType::Message),
            "task_assign" => Ok(MessageType::TaskAssign),
            "task_update" => Ok(MessageType::TaskUpdate),
            "decision_required" => Ok(MessageType::DecisionRequired),
            "idle_notification" => Ok(MessageType::IdleNotification),
            "nudge" => Ok(MessageType::Nudge),
            _ => Err(StoreError::UnknownType {
                value: value.to_string(),
            }),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::Message => "message",
            MessageType::TaskAssign => "task_assign",
            MessageType::TaskUpdate => "task_update",
            MessageType::DecisionRequired => "decision_required",
            MessageType::IdleNotification => "idle_notification",
            MessageType::Nudge => "nudge",
        }
    }

    /// Whether the task snapshot engine consumes this type.
    pub fn applies_to_snapshot(self) -> bool {
        matches!(self, MessageType::TaskAssign | MessageType::TaskUpdate)
    }

    /// Retry schedule used when this type is sent with `require_ack`.
    pub fn retry_policy(self) -> RetryPolicy {
        match self {
            MessageType::TaskAssign | MessageType::DecisionRequired => RetryPolicy {
                max_attempts: 5,
                base_delay_secs: 30,
                factor: 2,
                ack_timeout_secs: 600,
            },
            _ => RetryPolicy {
                max_attempts: 3,
                base_delay_secs: 10,
                factor: 2,
                ack_timeout_secs: 300,
            },
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn is_zero(n: &i64) -> bool {
    *n == 0
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// A message as written to an inbox. Immutable once appended; ack and
/// read-state live in side indexes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Unique per team; duplicate sends are idempotently dropped
    pub id: String,

    #[serde(rename = "type")]
    pub kind: MessageType,

    /// Sender agent id
    pub from: String,

    /// Recipient agent id
    pub to: String,

    /// Type-specific payload object
    pub payload: serde_json::Value,

    /// RFC 3339 UTC timestamp, first half of the snapshot ordering key
    pub created_at: String,

    pub schema_version: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,

    #[serde(default, skip_serializing_if = "is_zero")]
    pub priority: i64,

    #[serde(default, skip_serializing_if = "is_false")]
    pub require_ack: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_seconds: Option<i64>,

    /// Unknown fields for forward compatibility
    #[serde(flatten)]
    pub unknown_fields: HashMap<String, serde_json::Value>,
}

impl Envelope {
    /// Validate schema v1 requirements at the send boundary.
    pub fn validate(&self) -> Result<(), StoreError> {
        validate_identifier(&self.id)?;
        validate_identifier(&self.from)?;
        validate_identifier(&self.to)?;
        if let Some(ref task_id) = self.task_id {
            validate_identifier(task_id)?;
        }

        if self.schema_version != 1 {
            return Err(StoreError::Schema {
                reason: format!("unsupported schema_version {}", self.schema_version),
            });
        }
        if !self.payload.is_object() {
            return Err(StoreError::Schema {
                reason: "payload must be a JSON object".to_string(),
            });
        }
        if crate::schema::parse_rfc3339(&self.created_at).is_none() {
            return Err(StoreError::Schema {
                reason: format!("created_at {:?} is not RFC 3339", self.created_at),
            });
        }
        if self.kind.applies_to_snapshot() && self.task_id.is_none() {
            return Err(StoreError::Schema {
                reason: format!("{} requires task_id", self.kind),
            });
        }
        Ok(())
    }

    /// Snapshot ordering key: `(created_at, id)`, compared lexicographically.
    pub fn ordering_key(&self) -> (&str, &str) {
        (&self.created_at, &self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    pub(crate) fn sample_envelope() -> Envelope {
        Envelope {
            id: "msg_1".to_string(),
            kind: MessageType::Message,
            from: "lead".to_string(),
            to: "dev".to_string(),
            payload: json!({"text": "hello"}),
            created_at: "2025-01-01T00:00:00.000Z".to_string(),
            schema_version: 1,
            task_id: None,
            trace_id: None,
            priority: 0,
            require_ack: false,
            cooldown_key: None,
            cooldown_seconds: None,
            unknown_fields: HashMap::new(),
        }
    }

    #[test]
    fn test_message_type_parse_known() {
        assert_eq!(
            MessageType::parse("task_assign").unwrap(),
            MessageType::TaskAssign
        );
        assert_eq!(
            MessageType::parse("idle_notification").unwrap(),
            MessageType::IdleNotification
        );
    }

    #[test]
    fn test_message_type_parse_unknown() {
        assert!(matches!(
            MessageType::parse("telegram"),
            Err(StoreError::UnknownType { .. })
        ));
    }

    #[test]
    fn test_retry_policy_dispatch() {
        let urgent = MessageType::DecisionRequired.retry_policy();
        assert_eq!(urgent.max_attempts, 5);
        assert_eq!(urgent.base_delay_secs, 30);
        assert_eq!(urgent.ack_timeout_secs, 600);

        let routine = MessageType::Message.retry_policy();
        assert_eq!(routine.max_attempts, 3);
        assert_eq!(routine.base_delay_secs, 10);
        assert_eq!(routine.ack_timeout_secs, 300);
    }

    #[test]
    fn test_snapshot_applicability() {
        assert!(MessageType::TaskAssign.applies_to_snapshot());
        assert!(MessageType::TaskUpdate.applies_to_snapshot());
        assert!(!MessageType::Nudge.applies_to_snapshot());
        assert!(!MessageType::Message.applies_to_snapshot());
    }

    #[test]
    fn test_envelope_roundtrip_omits_absent_optionals() {
        let envelope = sample_envelope();
        let line = serde_json::to_string(&envelope).unwrap();
        assert!(!line.contains("task_id"));
        assert!(!line.contains("require_ack"));
        assert!(!line.contains("priority"));
        assert!(!line.contains("null"));

        let reparsed: Envelope = serde_json::from_str(&line).unwrap();
        assert_eq!(reparsed.id, "msg_1");
        assert_eq!(reparsed.kind, MessageType::Message);
        assert!(!reparsed.require_ack);
    }

    #[test]
    fn test_envelope_preserves_unknown_fields() {
        let json = r#"{
            "id": "msg_2",
            "type": "message",
            "from": "lead",
            "to": "dev",
            "payload": {},
            "created_at": "2025-01-01T00:00:00Z",
            "schema_version": 1,
            "futureFeature": {"nested": true}
        }"#;

        let envelope: Envelope = serde_json::from_str(json).unwrap();
        assert!(envelope.unknown_fields.contains_key("futureFeature"));

        let reserialized = serde_json::to_string(&envelope).unwrap();
        assert!(reserialized.contains("futureFeature"));
    }

    #[test]
    fn test_validate_rejects_bad_schema_version() {
        let mut envelope = sample_envelope();
        envelope.schema_version = 2;
        assert!(matches!(
            envelope.validate(),
            Err(StoreError::Schema { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_non_object_payload() {
        let mut envelope = sample_envelope();
        envelope.payload = json!("just a string");
        assert!(matches!(
            envelope.validate(),
            Err(StoreError::Schema { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_bad_created_at() {
        let mut envelope = sample_envelope();
        envelope.created_at = "last tuesday".to_string();
        assert!(matches!(
            envelope.validate(),
            Err(StoreError::Schema { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_unsafe_ids() {
        let mut envelope = sample_envelope();
        envelope.to = "../other-team".to_string();
        assert!(matches!(
            envelope.validate(),
            Err(StoreError::UnsafeIdentifier { .. })
        ));
    }

    #[test]
    fn test_validate_task_message_requires_task_id() {
        let mut envelope = sample_envelope();
        envelope.kind = MessageType::TaskUpdate;
        assert!(matches!(
            envelope.validate(),
            Err(StoreError::Schema { .. })
        ));

        envelope.task_id = Some("task_7".to_string());
        envelope.validate().unwrap();
    }

    #[test]
    fn test_ordering_key_tie_break() {
        let mut a = sample_envelope();
        a.id = "u1".to_string();
        let mut b = sample_envelope();
        b.id = "u2".to_string();
        // Equal created_at: the lexicographically greater id wins
        assert!(b.ordering_key() > a.ordering_key());
    }
}
