//! Task snapshot engine
//!
//! Consumes `task_assign`/`task_update` messages and folds them into
//! `tasks/<task_id>.json` under `task-snapshots.lock`. An update applies iff
//! its `(created_at, message_id)` key is strictly greater than the
//! snapshot's last applied key; equal or lesser keys are discarded with no
//! rollback and no error, so the snapshot is monotonic regardless of
//! delivery order.

use crate::io::atomic::write_json_atomic;
use crate::io::error::StoreError;
use crate::io::lock::{lock_resource, LockResource};
use crate::paths::TeamPaths;
use crate::schema::task::CONFLICT_POLICY;
use crate::schema::{Envelope, MessageType, TaskSnapshot};

/// Load one task snapshot (lock-free read).
pub fn load_snapshot(
    paths: &TeamPaths,
    task_id: &str,
) -> Result<Option<TaskSnapshot>, StoreError> {
    let path = paths.task_snapshot(task_id)?;
    let content = match std::fs::read(&path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StoreError::io(&path, e)),
    };
    serde_json::from_slice(&content)
        .map(Some)
        .map_err(|e| StoreError::json(&path, e))
}

fn payload_str(envelope: &Envelope, field: &str) -> Option<String> {
    envelope
        .payload
        .get(field)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

/// Fold one task message into an in-memory snapshot. Returns whether it
/// applied. Pure; shared by the live path and rehydrate replay.
pub fn apply_to(current: &mut Option<TaskSnapshot>, envelope: &Envelope) -> bool {
    if !envelope.kind.applies_to_snapshot() {
        return false;
    }
    let Some(ref task_id) = envelope.task_id else {
        return false;
    };

    if let Some(snapshot) = current
        && envelope.ordering_key() <= snapshot.last_key()
    {
        return false;
    }

    match current {
        None => {
            let status = payload_str(envelope, "status").unwrap_or_else(|| {
                if envelope.kind == MessageType::TaskAssign {
                    "assigned".to_string()
                } else {
                    "open".to_string()
                }
            });
            *current = Some(TaskSnapshot {
                task_id: task_id.clone(),
                status,
                subject: payload_str(envelope, "subject").unwrap_or_default(),
                details: payload_str(envelope, "details").or_else(|| payload_str(envelope, "note")),
                assignee: envelope.to.clone(),
                reporter: envelope.from.clone(),
                trace_id: envelope.trace_id.clone(),
                history_summary: "1 task message(s) applied".to_string(),
                snapshot_version: 1,
                last_message_id: envelope.id.clone(),
                last_message_created_at: envelope.created_at.clone(),
                snapshot_conflict_policy: CONFLICT_POLICY.to_string(),
                unknown_fields: Default::default(),
            });
        }
        Some(snapshot) => {
            // Last-writer-wins per field present in the message
            if let Some(subject) = payload_str(envelope, "subject") {
                snapshot.subject = subject;
            }
            if let Some(status) = payload_str(envelope, "status") {
                snapshot.status = status;
            }
            if let Some(details) =
                payload_str(envelope, "details").or_else(|| payload_str(envelope, "note"))
            {
                snapshot.details = Some(details);
            }
            snapshot.assignee = envelope.to.clone();
            if envelope.kind == MessageType::TaskAssign {
                snapshot.reporter = envelope.from.clone();
            }
            if envelope.trace_id.is_some() {
                snapshot.trace_id = envelope.trace_id.clone();
            }

            snapshot.snapshot_version += 1;
            snapshot.last_message_id = envelope.id.clone();
            snapshot.last_message_created_at = envelope.created_at.clone();
            // Legacy snapshots gain current metadata on first applied update
            snapshot.snapshot_conflict_policy = CONFLICT_POLICY.to_string();
            snapshot.history_summary =
                format!("{} task message(s) applied", snapshot.snapshot_version);
        }
    }
    true
}

/// Apply one applied task message to its persisted snapshot.
pub fn apply_task_message(paths: &TeamPaths, envelope: &Envelope) -> Result<bool, StoreError> {
    let Some(ref task_id) = envelope.task_id else {
        return Ok(false);
    };
    let snapshot_path = paths.task_snapshot(task_id)?;

    let _guard = lock_resource(paths, LockResource::TaskSnapshots)?;
    let mut current = load_snapshot(paths, task_id)?;
    if !apply_to(&mut current, envelope) {
        tracing::debug!(
            "task message {} for {task_id} discarded (stale ordering key)",
            envelope.id
        );
        return Ok(false);
    }
    write_json_atomic(&snapshot_path, current.as_ref().expect("applied above"))?;
    Ok(true)
}

/// Replay task messages in ordering-key order into fresh snapshots.
///
/// Used by rehydrate; callers sort nothing, this sorts internally.
pub fn replay(messages: &[Envelope]) -> Vec<TaskSnapshot> {
    let mut sorted: Vec<&Envelope> = messages
        .iter()
        .filter(|e| e.kind.applies_to_snapshot() && e.task_id.is_some())
        .collect();
    sorted.sort_by(|a, b| a.ordering_key().cmp(&b.ordering_key()));

    let mut snapshots: std::collections::BTreeMap<String, Option<TaskSnapshot>> =
        Default::default();
    for envelope in sorted {
        let task_id = envelope.task_id.clone().expect("filtered above");
        apply_to(snapshots.entry(task_id).or_default(), envelope);
    }
    snapshots.into_values().flatten().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::MessageType;
    use serde_json::json;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn task_update(id: &str, created_at: &str, status: &str) -> Envelope {
        Envelope {
            id: id.to_string(),
            kind: MessageType::TaskUpdate,
            from: "dev".to_string(),
            to: "lead".to_string(),
            payload: json!({"status": status}),
            created_at: created_at.to_string(),
            schema_version: 1,
            task_id: Some("task_7".to_string()),
            trace_id: None,
            priority: 0,
            require_ack: false,
            cooldown_key: None,
            cooldown_seconds: None,
            unknown_fields: HashMap::new(),
        }
    }

    fn task_assign(id: &str, created_at: &str, subject: &str) -> Envelope {
        let mut envelope = task_update(id, created_at, "assigned");
        envelope.kind = MessageType::TaskAssign;
        envelope.from = "lead".to_string();
        envelope.to = "dev".to_string();
        envelope.payload = json!({"subject": subject});
        envelope
    }

    #[test]
    fn test_assign_creates_snapshot() {
        let mut current = None;
        assert!(apply_to(
            &mut current,
            &task_assign("a1", "2025-01-01T00:00:01Z", "Impl")
        ));
        let snapshot = current.unwrap();
        assert_eq!(snapshot.task_id, "task_7");
        assert_eq!(snapshot.subject, "Impl");
        assert_eq!(snapshot.status, "assigned");
        assert_eq!(snapshot.assignee, "dev");
        assert_eq!(snapshot.reporter, "lead");
        assert_eq!(snapshot.snapshot_version, 1);
        assert_eq!(snapshot.last_message_id, "a1");
    }

    #[test]
    fn test_newer_key_applies_older_discarded() {
        let newer = task_update("u2", "2025-01-01T00:00:02Z", "done");
        let older = task_update("u1", "2025-01-01T00:00:01Z", "in_progress");

        // Deliver newest first: the late-arriving older update is discarded
        let mut current = None;
        assert!(apply_to(&mut current, &newer));
        assert!(!apply_to(&mut current, &older));
        let snapshot = current.as_ref().unwrap();
        assert_eq!(snapshot.last_message_id, "u2");
        assert_eq!(snapshot.status, "done");
        assert_eq!(snapshot.snapshot_version, 1);

        // Deliver in order: both apply, same final key and status
        let mut current = None;
        assert!(apply_to(&mut current, &older));
        assert!(apply_to(&mut current, &newer));
        let snapshot = current.as_ref().unwrap();
        assert_eq!(snapshot.last_message_id, "u2");
        assert_eq!(snapshot.status, "done");
        assert_eq!(snapshot.snapshot_version, 2);
    }

    #[test]
    fn test_equal_created_at_greater_id_wins() {
        let a = task_update("u1", "2025-01-01T00:00:01Z", "first");
        let b = task_update("u2", "2025-01-01T00:00:01Z", "second");

        let mut current = None;
        assert!(apply_to(&mut current, &b));
        assert!(!apply_to(&mut current, &a));
        assert_eq!(current.as_ref().unwrap().status, "second");

        // Re-applying the winning key is also discarded (strictly greater)
        assert!(!apply_to(&mut current, &b));
    }

    #[test]
    fn test_merge_is_per_field() {
        let assign = task_assign("a1", "2025-01-01T00:00:01Z", "Impl parser");
        let mut update = task_update("u2", "2025-01-01T00:00:02Z", "in_progress");
        update.payload = json!({"status": "in_progress", "note": "halfway"});

        let mut current = None;
        apply_to(&mut current, &assign);
        apply_to(&mut current, &update);

        let snapshot = current.unwrap();
        // Subject survives an update that does not carry one
        assert_eq!(snapshot.subject, "Impl parser");
        assert_eq!(snapshot.status, "in_progress");
        assert_eq!(snapshot.details.as_deref(), Some("halfway"));
        assert_eq!(snapshot.history_summary, "2 task message(s) applied");
    }

    #[test]
    fn test_legacy_snapshot_upgraded_on_first_apply() {
        let legacy: TaskSnapshot = serde_json::from_value(json!({
            "task_id": "task_7",
            "status": "open",
            "subject": "Old",
            "assignee": "dev",
            "reporter": "lead",
            "history_summary": "legacy"
        }))
        .unwrap();
        assert_eq!(legacy.snapshot_version, 0);

        let mut current = Some(legacy);
        assert!(apply_to(
            &mut current,
            &task_update("u1", "2025-01-01T00:00:01Z", "in_progress")
        ));
        let snapshot = current.unwrap();
        assert_eq!(snapshot.snapshot_version, 1);
        assert_eq!(snapshot.last_message_id, "u1");
        assert_eq!(snapshot.snapshot_conflict_policy, CONFLICT_POLICY);
    }

    #[test]
    fn test_apply_task_message_persists() {
        let tmp = TempDir::new().unwrap();
        let paths = TeamPaths::new(tmp.path(), "demo").unwrap();
        paths.create_skeleton().unwrap();

        let applied =
            apply_task_message(&paths, &task_assign("a1", "2025-01-01T00:00:01Z", "Impl")).unwrap();
        assert!(applied);

        let snapshot = load_snapshot(&paths, "task_7").unwrap().unwrap();
        assert_eq!(snapshot.subject, "Impl");

        // Stale message leaves the file untouched
        let stale =
            apply_task_message(&paths, &task_update("a0", "2025-01-01T00:00:00Z", "late")).unwrap();
        assert!(!stale);
        let snapshot = load_snapshot(&paths, "task_7").unwrap().unwrap();
        assert_eq!(snapshot.status, "assigned");
    }

    #[test]
    fn test_replay_matches_arrival_independent_result() {
        let m1 = task_assign("a1", "2025-01-01T00:00:01Z", "Impl");
        let m2 = task_update("u2", "2025-01-01T00:00:02Z", "in_progress");
        let m3 = task_update("u3", "2025-01-01T00:00:03Z", "done");

        // Replay sorts internally, so scrambled input converges
        let snapshots = replay(&[m3.clone(), m1.clone(), m2.clone()]);
        assert_eq!(snapshots.len(), 1);
        let snapshot = &snapshots[0];
        assert_eq!(snapshot.status, "done");
        assert_eq!(snapshot.subject, "Impl");
        assert_eq!(snapshot.snapshot_version, 3);
        assert_eq!(snapshot.last_message_id, "u3");
    }
}
