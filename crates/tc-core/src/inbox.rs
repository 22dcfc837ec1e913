//! Inbox send pipeline and paginated reads
//!
//! `send` validates, gates on cooldown, dedupes by message id, appends to
//! `inboxes/<to>.jsonl` under `messages.lock`, and updates the message
//! index inside the same critical section. The append and the index update
//! are still two writes: a crash between them leaves an un-indexed message
//! that rehydrate reconciles, and readers fall back to a log scan on index
//! misses.

use crate::cooldown::{check_and_touch, CooldownDecision};
use crate::index::{MessageLocator, ShardedIndex};
use crate::io::error::StoreError;
use crate::io::hash::compute_hash;
use crate::io::jsonl::{count_lines, read_jsonl};
use crate::io::lock::{lock_resource, FileLock, LockResource};
use crate::paths::{validate_identifier, TeamPaths};
use crate::schema::{rfc3339_millis, Envelope, EventKind, EventRecord, TeamFile};
use chrono::{DateTime, Utc};
use std::io::Write;
use std::path::Path;

/// Outcome of a send operation. Duplicates and cooldown suppression are
/// successes: idempotence is a contract, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Appended to the recipient inbox and indexed
    Delivered,
    /// A message with this id already exists; nothing was written
    Duplicate,
    /// Suppressed by the cooldown gate; recorded as a `nudge_suppressed`
    /// event, no inbox append
    CooldownSuppressed,
}

/// Send one envelope to its recipient's inbox.
pub fn send(
    data_root: &Path,
    team: &str,
    envelope: &Envelope,
    now: DateTime<Utc>,
) -> Result<SendOutcome, StoreError> {
    let paths = TeamPaths::new(data_root, team)?;
    paths.ensure_team()?;
    envelope.validate()?;

    let roster = TeamFile::load(&paths)?;
    roster.require_member(&envelope.from)?;
    roster.require_member(&envelope.to)?;

    if let Some(ref cooldown_key) = envelope.cooldown_key {
        let cooldown_seconds = envelope.cooldown_seconds.unwrap_or(0);
        if cooldown_seconds > 0 {
            let decision =
                check_and_touch(&paths, &envelope.to, cooldown_key, cooldown_seconds, now)?;
            if let CooldownDecision::Suppressed { remaining_secs } = decision {
                let event = EventRecord::new(
                    format!("{}.suppressed", envelope.id),
                    rfc3339_millis(now),
                    EventKind::NudgeSuppressed,
                )
                .subject(envelope.id.clone())
                .trace(envelope.trace_id.clone())
                .attr("to", envelope.to.clone())
                .attr("cooldown_key", cooldown_key.clone())
                .attr("remaining_secs", remaining_secs);
                crate::events::log_event(&paths, &event)?;
                tracing::debug!(
                    "send of {} suppressed by cooldown ({remaining_secs}s remaining)",
                    envelope.id
                );
                return Ok(SendOutcome::CooldownSuppressed);
            }
        }
    }

    {
        let guard = lock_resource(&paths, LockResource::Messages)?;
        let index = ShardedIndex::messages(&paths);
        if index.has(&envelope.id)? {
            return Ok(SendOutcome::Duplicate);
        }
        append_envelope_locked(&paths, envelope, &guard)?;
    }

    let mut sent = EventRecord::new(
        format!("{}.sent", envelope.id),
        rfc3339_millis(now),
        EventKind::Sent,
    )
    .subject(envelope.id.clone())
    .trace(envelope.trace_id.clone())
    .attr("from", envelope.from.clone())
    .attr("to", envelope.to.clone())
    .attr("type", envelope.kind.as_str());
    if envelope.require_ack {
        sent = sent.attr("require_ack", true);
    }
    crate::events::log_event(&paths, &sent)?;

    if envelope.kind.applies_to_snapshot() {
        crate::tasks::apply_task_message(&paths, envelope)?;
    }

    if envelope.require_ack {
        crate::delivery::register(&paths, envelope, now)?;
    }

    Ok(SendOutcome::Delivered)
}

/// Append an envelope and index it. The caller holds `messages.lock`; the
/// unused guard reference makes that explicit.
pub(crate) fn append_envelope_locked(
    paths: &TeamPaths,
    envelope: &Envelope,
    _messages_lock: &FileLock,
) -> Result<MessageLocator, StoreError> {
    let inbox_path = paths.inbox(&envelope.to)?;
    if let Some(parent) = inbox_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
    }

    let line = serde_json::to_string(envelope).map_err(|e| StoreError::json(&inbox_path, e))?;
    let digest = compute_hash(line.as_bytes());
    let line_number = count_lines(&inbox_path)? + 1;

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&inbox_path)
        .map_err(|e| StoreError::io(&inbox_path, e))?;
    file.write_all(line.as_bytes())
        .and_then(|_| file.write_all(b"\n"))
        .map_err(|e| StoreError::io(&inbox_path, e))?;

    let locator = MessageLocator {
        inbox: envelope.to.clone(),
        line: line_number,
        digest: Some(digest),
    };
    ShardedIndex::messages(paths).put(&envelope.id, &locator)?;
    Ok(locator)
}

/// An envelope located in an inbox file.
#[derive(Debug, Clone)]
pub struct FoundEnvelope {
    pub envelope: Envelope,
    pub agent: String,
    pub line_number: u64,
}

/// Agents that currently have an inbox file.
pub fn list_inbox_agents(paths: &TeamPaths) -> Result<Vec<String>, StoreError> {
    let dir = paths.inboxes_dir();
    let entries = match std::fs::read_dir(&dir) {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(StoreError::io(&dir, e)),
    };
    let mut agents = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| StoreError::io(&dir, e))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if let Some(agent) = name.strip_suffix(".jsonl") {
            agents.push(agent.to_string());
        }
    }
    agents.sort();
    Ok(agents)
}

/// Locate a message by id: index lookup first, full log scan on a miss.
pub fn find_envelope(
    paths: &TeamPaths,
    message_id: &str,
) -> Result<Option<FoundEnvelope>, StoreError> {
    if let Some(value) = ShardedIndex::messages(paths).get(message_id)?
        && let Ok(locator) = serde_json::from_value::<MessageLocator>(value)
    {
        let scan = read_jsonl::<Envelope>(&paths.inbox(&locator.inbox)?)?;
        for record in scan.records {
            if record.line_number == locator.line && record.value.id == message_id {
                return Ok(Some(FoundEnvelope {
                    envelope: record.value,
                    agent: locator.inbox,
                    line_number: record.line_number,
                }));
            }
        }
    }

    // Index miss or stale locator: fall back to scanning the logs
    for agent in list_inbox_agents(paths)? {
        let scan = read_jsonl::<Envelope>(&paths.inbox(&agent)?)?;
        for record in scan.records {
            if record.value.id == message_id {
                return Ok(Some(FoundEnvelope {
                    envelope: record.value,
                    agent: agent.clone(),
                    line_number: record.line_number,
                }));
            }
        }
    }
    Ok(None)
}

/// Options for a paginated inbox read.
#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    /// Only envelopes without an ack record
    pub unread_only: bool,
    /// Maximum number of envelopes to yield
    pub limit: usize,
    /// Resume older than this message id
    pub cursor: Option<String>,
}

/// A page of inbox results, newest first.
#[derive(Debug, Clone)]
pub struct ReadPage {
    pub envelopes: Vec<Envelope>,
    pub next_cursor: Option<String>,
}

/// Read an agent's inbox newest-first with cursor pagination.
pub fn read_inbox(
    data_root: &Path,
    team: &str,
    agent: &str,
    options: &ReadOptions,
    now: DateTime<Utc>,
) -> Result<ReadPage, StoreError> {
    let paths = TeamPaths::new(data_root, team)?;
    paths.ensure_team()?;
    validate_identifier(agent)?;
    TeamFile::load(&paths)?.require_member(agent)?;

    let scan = read_jsonl::<Envelope>(&paths.inbox(agent)?)?;
    crate::malformed::note_scan(data_root, &paths, &scan.malformed, now)?;

    let acks = crate::acks::load(&paths)?;

    let mut newest_first = scan.records.into_iter().map(|r| r.value).rev();

    if let Some(ref cursor) = options.cursor {
        for envelope in newest_first.by_ref() {
            if &envelope.id == cursor {
                break;
            }
        }
    }

    let mut envelopes = Vec::new();
    let mut next_cursor = None;
    for envelope in newest_first {
        if options.unread_only && acks.contains_key(&envelope.id) {
            continue;
        }
        if envelopes.len() == options.limit {
            next_cursor = envelopes.last().map(|e: &Envelope| e.id.clone());
            break;
        }
        envelopes.push(envelope);
    }

    if !envelopes.is_empty() {
        let event = EventRecord::new(
            format!("read.{agent}.{}", now.timestamp_millis()),
            rfc3339_millis(now),
            EventKind::Read,
        )
        .attr("agent", agent)
        .attr("count", envelopes.len() as u64);
        crate::events::log_event(&paths, &event)?;
    }

    Ok(ReadPage {
        envelopes,
        next_cursor,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::parse_rfc3339;
    use crate::schema::MessageType;
    use serde_json::json;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn init_team(tmp: &TempDir) -> TeamPaths {
        crate::status::init_team(
            tmp.path(),
            "demo",
            &["lead".to_string(), "dev".to_string(), "qa".to_string()],
            parse_rfc3339("2025-01-01T00:00:00Z").unwrap(),
        )
        .unwrap();
        TeamPaths::new(tmp.path(), "demo").unwrap()
    }

    fn envelope(id: &str, from: &str, to: &str, created_at: &str) -> Envelope {
        Envelope {
            id: id.to_string(),
            kind: MessageType::Message,
            from: from.to_string(),
            to: to.to_string(),
            payload: json!({"text": "hello"}),
            created_at: created_at.to_string(),
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

    fn now() -> chrono::DateTime<chrono::Utc> {
        parse_rfc3339("2025-01-01T12:00:00Z").unwrap()
    }

    #[test]
    fn test_send_appends_and_indexes() {
        let tmp = TempDir::new().unwrap();
        let paths = init_team(&tmp);

        let outcome = send(
            tmp.path(),
            "demo",
            &envelope("msg_1", "lead", "dev", "2025-01-01T10:00:00Z"),
            now(),
        )
        .unwrap();
        assert_eq!(outcome, SendOutcome::Delivered);

        let content = std::fs::read_to_string(paths.inbox("dev").unwrap()).unwrap();
        assert_eq!(content.lines().count(), 1);
        assert!(ShardedIndex::messages(&paths).has("msg_1").unwrap());

        // One sent event exists
        let (events, _) = crate::events::read_all_events(&paths).unwrap();
        assert!(events
            .iter()
            .any(|p| p.event.kind == EventKind::Sent && p.event.subject_id.as_deref() == Some("msg_1")));
    }

    #[test]
    fn test_resend_same_id_is_noop() {
        let tmp = TempDir::new().unwrap();
        let paths = init_team(&tmp);
        let message = envelope("msg_42", "lead", "dev", "2025-01-01T10:00:00Z");

        assert_eq!(
            send(tmp.path(), "demo", &message, now()).unwrap(),
            SendOutcome::Delivered
        );
        assert_eq!(
            send(tmp.path(), "demo", &message, now()).unwrap(),
            SendOutcome::Duplicate
        );

        let content = std::fs::read_to_string(paths.inbox("dev").unwrap()).unwrap();
        let with_id = content
            .lines()
            .filter(|line| line.contains("\"msg_42\""))
            .count();
        assert_eq!(with_id, 1);
    }

    #[test]
    fn test_send_rejects_non_member() {
        let tmp = TempDir::new().unwrap();
        init_team(&tmp);

        let result = send(
            tmp.path(),
            "demo",
            &envelope("msg_1", "lead", "stranger", "2025-01-01T10:00:00Z"),
            now(),
        );
        assert!(matches!(result, Err(StoreError::NotFound { .. })));
    }

    #[test]
    fn test_send_rejects_uninitialized_team() {
        let tmp = TempDir::new().unwrap();
        let result = send(
            tmp.path(),
            "ghost",
            &envelope("msg_1", "lead", "dev", "2025-01-01T10:00:00Z"),
            now(),
        );
        assert!(matches!(result, Err(StoreError::Bootstrap { .. })));
    }

    #[test]
    fn test_cooldown_suppresses_second_send() {
        let tmp = TempDir::new().unwrap();
        let paths = init_team(&tmp);

        let mut first = envelope("msg_a", "lead", "dev", "2025-01-01T10:00:00Z");
        first.cooldown_key = Some("k".to_string());
        first.cooldown_seconds = Some(60);
        let mut second = envelope("msg_b", "lead", "dev", "2025-01-01T10:00:05Z");
        second.cooldown_key = Some("k".to_string());
        second.cooldown_seconds = Some(60);

        let t0 = parse_rfc3339("2025-01-01T10:00:00Z").unwrap();
        let t1 = parse_rfc3339("2025-01-01T10:00:10Z").unwrap();

        assert_eq!(
            send(tmp.path(), "demo", &first, t0).unwrap(),
            SendOutcome::Delivered
        );
        assert_eq!(
            send(tmp.path(), "demo", &second, t1).unwrap(),
            SendOutcome::CooldownSuppressed
        );

        // Exactly one inbox record, and a nudge_suppressed event
        let content = std::fs::read_to_string(paths.inbox("dev").unwrap()).unwrap();
        assert_eq!(content.lines().count(), 1);

        let (events, _) = crate::events::read_all_events(&paths).unwrap();
        assert!(events
            .iter()
            .any(|p| p.event.kind == EventKind::NudgeSuppressed));
    }

    #[test]
    fn test_find_envelope_by_index_and_fallback() {
        let tmp = TempDir::new().unwrap();
        let paths = init_team(&tmp);

        send(
            tmp.path(),
            "demo",
            &envelope("msg_1", "lead", "dev", "2025-01-01T10:00:00Z"),
            now(),
        )
        .unwrap();

        let found = find_envelope(&paths, "msg_1").unwrap().unwrap();
        assert_eq!(found.agent, "dev");
        assert_eq!(found.line_number, 1);

        // Drop the index: the log-scan fallback still finds it
        std::fs::remove_dir_all(paths.message_shard_dir()).unwrap();
        let found = find_envelope(&paths, "msg_1").unwrap().unwrap();
        assert_eq!(found.agent, "dev");

        assert!(find_envelope(&paths, "msg_missing").unwrap().is_none());
    }

    #[test]
    fn test_read_inbox_newest_first_with_cursor() {
        let tmp = TempDir::new().unwrap();
        init_team(&tmp);

        for i in 1..=5 {
            send(
                tmp.path(),
                "demo",
                &envelope(
                    &format!("msg_{i}"),
                    "lead",
                    "dev",
                    &format!("2025-01-01T10:00:0{i}Z"),
                ),
                now(),
            )
            .unwrap();
        }

        let page = read_inbox(
            tmp.path(),
            "demo",
            "dev",
            &ReadOptions {
                unread_only: false,
                limit: 2,
                cursor: None,
            },
            now(),
        )
        .unwrap();
        assert_eq!(page.envelopes.len(), 2);
        assert_eq!(page.envelopes[0].id, "msg_5");
        assert_eq!(page.envelopes[1].id, "msg_4");
        assert_eq!(page.next_cursor.as_deref(), Some("msg_4"));

        let rest = read_inbox(
            tmp.path(),
            "demo",
            "dev",
            &ReadOptions {
                unread_only: false,
                limit: 10,
                cursor: Some("msg_4".to_string()),
            },
            now(),
        )
        .unwrap();
        let ids: Vec<&str> = rest.envelopes.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["msg_3", "msg_2", "msg_1"]);
        assert!(rest.next_cursor.is_none());
    }

    #[test]
    fn test_read_inbox_tolerates_truncated_tail() {
        let tmp = TempDir::new().unwrap();
        let paths = init_team(&tmp);

        send(
            tmp.path(),
            "demo",
            &envelope("msg_1", "lead", "dev", "2025-01-01T10:00:00Z"),
            now(),
        )
        .unwrap();

        // Simulate a crash mid-append
        let inbox_path = paths.inbox("dev").unwrap();
        let mut content = std::fs::read_to_string(&inbox_path).unwrap();
        content.push_str("{\"id\":\"msg_trunc");
        std::fs::write(&inbox_path, content).unwrap();

        let page = read_inbox(
            tmp.path(),
            "demo",
            "dev",
            &ReadOptions {
                unread_only: false,
                limit: 10,
                cursor: None,
            },
            now(),
        )
        .unwrap();
        assert_eq!(page.envelopes.len(), 1);

        let diagnostics = crate::malformed::load(&paths).unwrap();
        assert_eq!(diagnostics.len(), 1);
    }
}
