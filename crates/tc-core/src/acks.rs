//! Acknowledgement tracking
//!
//! `state/ack-index.json` maps message ids to ack records. Updates take
//! `acks.lock` and replace atomically; concurrent acks of the same message
//! are idempotent (first writer wins, later writers observe the existing
//! record and succeed without rewrite).

use crate::io::atomic::write_json_atomic;
use crate::io::error::StoreError;
use crate::io::lock::{lock_resource, LockResource};
use crate::paths::{validate_identifier, TeamPaths};
use crate::schema::{rfc3339_millis, EventKind, EventRecord, TeamFile};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// One acknowledgement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckRecord {
    pub message_id: String,
    pub acked_by: String,
    pub acked_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

/// Load the ack index (lock-free read).
pub fn load(paths: &TeamPaths) -> Result<BTreeMap<String, AckRecord>, StoreError> {
    let path = paths.ack_index();
    let content = match std::fs::read(&path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(e) => return Err(StoreError::io(&path, e)),
    };
    serde_json::from_slice(&content).map_err(|e| StoreError::json(&path, e))
}

/// Outcome of an ack attempt.
#[derive(Debug, Clone)]
pub enum AckOutcome {
    /// This call recorded the ack
    Recorded(AckRecord),
    /// The message was already acked; the existing record is returned
    AlreadyAcked(AckRecord),
}

impl AckOutcome {
    pub fn record(&self) -> &AckRecord {
        match self {
            AckOutcome::Recorded(r) | AckOutcome::AlreadyAcked(r) => r,
        }
    }
}

/// Acknowledge one message on behalf of `agent`.
///
/// Clears any pending delivery-guard entry and logs an `acked` event. The
/// message must exist in the team's inboxes.
pub fn ack_message(
    data_root: &Path,
    team: &str,
    agent: &str,
    message_id: &str,
    now: DateTime<Utc>,
) -> Result<AckOutcome, StoreError> {
    let paths = TeamPaths::new(data_root, team)?;
    paths.ensure_team()?;
    validate_identifier(agent)?;
    validate_identifier(message_id)?;
    TeamFile::load(&paths)?.require_member(agent)?;

    let found =
        crate::inbox::find_envelope(&paths, message_id)?.ok_or_else(|| StoreError::NotFound {
            what: format!("message {message_id:?}"),
        })?;

    let outcome = {
        let _guard = lock_resource(&paths, LockResource::Acks)?;
        let mut index = load(&paths)?;
        if let Some(existing) = index.get(message_id) {
            AckOutcome::AlreadyAcked(existing.clone())
        } else {
            let record = AckRecord {
                message_id: message_id.to_string(),
                acked_by: agent.to_string(),
                acked_at: rfc3339_millis(now),
                trace_id: found.envelope.trace_id.clone(),
            };
            index.insert(message_id.to_string(), record.clone());
            write_json_atomic(&paths.ack_index(), &index)?;
            AckOutcome::Recorded(record)
        }
    };

    if let AckOutcome::Recorded(ref record) = outcome {
        crate::delivery::clear_pending(&paths, message_id)?;

        let event = EventRecord::new(
            format!("{message_id}.acked"),
            rfc3339_millis(now),
            EventKind::Acked,
        )
        .subject(message_id.to_string())
        .trace(record.trace_id.clone())
        .attr("acked_by", agent);
        crate::events::log_event(&paths, &event)?;
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inbox::{send, SendOutcome};
    use crate::schema::{parse_rfc3339, Envelope, MessageType};
    use serde_json::json;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn setup(tmp: &TempDir) -> TeamPaths {
        crate::status::init_team(
            tmp.path(),
            "demo",
            &["lead".to_string(), "dev".to_string()],
            parse_rfc3339("2025-01-01T00:00:00Z").unwrap(),
        )
        .unwrap();
        let paths = TeamPaths::new(tmp.path(), "demo").unwrap();

        let envelope = Envelope {
            id: "msg_1".to_string(),
            kind: MessageType::Message,
            from: "lead".to_string(),
            to: "dev".to_string(),
            payload: json!({}),
            created_at: "2025-01-01T10:00:00Z".to_string(),
            schema_version: 1,
            task_id: None,
            trace_id: Some("tr_001".to_string()),
            priority: 0,
            require_ack: false,
            cooldown_key: None,
            cooldown_seconds: None,
            unknown_fields: HashMap::new(),
        };
        assert_eq!(
            send(tmp.path(), "demo", &envelope, parse_rfc3339("2025-01-01T10:00:00Z").unwrap())
                .unwrap(),
            SendOutcome::Delivered
        );
        paths
    }

    #[test]
    fn test_ack_records_and_emits_event() {
        let tmp = TempDir::new().unwrap();
        let paths = setup(&tmp);
        let now = parse_rfc3339("2025-01-01T10:05:00Z").unwrap();

        let outcome = ack_message(tmp.path(), "demo", "dev", "msg_1", now).unwrap();
        assert!(matches!(outcome, AckOutcome::Recorded(_)));
        assert_eq!(outcome.record().acked_by, "dev");
        assert_eq!(outcome.record().trace_id.as_deref(), Some("tr_001"));

        let index = load(&paths).unwrap();
        assert!(index.contains_key("msg_1"));

        let (events, _) = crate::events::read_all_events(&paths).unwrap();
        assert!(events.iter().any(|p| p.event.kind == EventKind::Acked));
    }

    #[test]
    fn test_double_ack_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let paths = setup(&tmp);
        let t0 = parse_rfc3339("2025-01-01T10:05:00Z").unwrap();
        let t1 = parse_rfc3339("2025-01-01T10:06:00Z").unwrap();

        ack_message(tmp.path(), "demo", "dev", "msg_1", t0).unwrap();
        let second = ack_message(tmp.path(), "demo", "lead", "msg_1", t1).unwrap();
        assert!(matches!(second, AckOutcome::AlreadyAcked(_)));

        // First writer wins
        let index = load(&paths).unwrap();
        assert_eq!(index["msg_1"].acked_by, "dev");
        assert_eq!(index["msg_1"].acked_at, "2025-01-01T10:05:00.000Z");

        // Only one acked event
        let (events, _) = crate::events::read_all_events(&paths).unwrap();
        let acked = events
            .iter()
            .filter(|p| p.event.kind == EventKind::Acked)
            .count();
        assert_eq!(acked, 1);
    }

    #[test]
    fn test_ack_unknown_message_fails() {
        let tmp = TempDir::new().unwrap();
        setup(&tmp);
        let now = parse_rfc3339("2025-01-01T10:05:00Z").unwrap();

        let result = ack_message(tmp.path(), "demo", "dev", "msg_missing", now);
        assert!(matches!(result, Err(StoreError::NotFound { .. })));
    }
}
