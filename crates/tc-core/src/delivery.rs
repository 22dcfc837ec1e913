//! Delivery guard for `require_ack` sends
//!
//! The authoritative in-flight set lives in `state/delivery-guard.json`,
//! mutated only under `messages.lock` (no dedicated lock). Ticks are driven
//! externally with an explicit `now`, so retry schedules are testable
//! without sleeping. The whole file is reconstructable from events plus the
//! ack index; rehydrate does exactly that.

use crate::index::ShardedIndex;
use crate::io::atomic::{append_jsonl, write_json_atomic};
use crate::io::error::StoreError;
use crate::io::lock::{lock_resource, LockResource};
use crate::paths::TeamPaths;
use crate::schema::{parse_rfc3339, rfc3339_millis, Envelope, EventKind, EventRecord, MessageType};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::path::Path;

/// One in-flight delivery awaiting acknowledgement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingDelivery {
    pub envelope: Envelope,
    pub attempts: u32,
    pub first_sent_at: String,
    pub next_attempt_at: String,
}

/// A delivery that exhausted its retry budget or ack timeout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    pub original_envelope: Envelope,
    pub attempts: u32,
    pub last_error: String,
    pub terminated_at: String,
}

/// What one tick did.
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    pub retried: Vec<String>,
    pub dead_lettered: Vec<String>,
}

/// Load the pending set (lock-free read).
pub fn load_guard(paths: &TeamPaths) -> Result<BTreeMap<String, PendingDelivery>, StoreError> {
    let path = paths.delivery_guard();
    let content = match std::fs::read(&path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(e) => return Err(StoreError::io(&path, e)),
    };
    serde_json::from_slice(&content).map_err(|e| StoreError::json(&path, e))
}

/// Register a freshly sent `require_ack` envelope.
pub fn register(
    paths: &TeamPaths,
    envelope: &Envelope,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    let policy = envelope.kind.retry_policy();
    let _guard = lock_resource(paths, LockResource::Messages)?;
    let mut pending = load_guard(paths)?;
    pending
        .entry(envelope.id.clone())
        .or_insert_with(|| PendingDelivery {
            envelope: envelope.clone(),
            attempts: 0,
            first_sent_at: rfc3339_millis(now),
            next_attempt_at: rfc3339_millis(now + Duration::seconds(policy.base_delay_secs)),
        });
    write_json_atomic(&paths.delivery_guard(), &pending)
}

/// Remove a pending entry (after an ack). Returns whether it existed.
pub fn clear_pending(paths: &TeamPaths, message_id: &str) -> Result<bool, StoreError> {
    let _guard = lock_resource(paths, LockResource::Messages)?;
    let mut pending = load_guard(paths)?;
    let existed = pending.remove(message_id).is_some();
    if existed {
        write_json_atomic(&paths.delivery_guard(), &pending)?;
    }
    Ok(existed)
}

/// The reminder envelope re-enqueued for an unacked delivery.
///
/// Its id is deterministic per attempt, so a replayed tick dedupes instead
/// of double-nudging.
fn nudge_envelope(original: &Envelope, attempt: u32, now: DateTime<Utc>) -> Envelope {
    Envelope {
        id: format!("{}.retry{attempt}", original.id),
        kind: MessageType::Nudge,
        from: original.from.clone(),
        to: original.to.clone(),
        payload: json!({
            "original_message_id": original.id,
            "original_type": original.kind.as_str(),
            "attempt": attempt,
        }),
        created_at: rfc3339_millis(now),
        schema_version: 1,
        task_id: original.task_id.clone(),
        trace_id: original.trace_id.clone(),
        priority: original.priority,
        require_ack: false,
        cooldown_key: None,
        cooldown_seconds: None,
        unknown_fields: Default::default(),
    }
}

/// Advance the retry schedule: nudge entries that are due, dead-letter
/// entries past their budget, drop entries that got acked out of band.
pub fn tick(data_root: &Path, team: &str, now: DateTime<Utc>) -> Result<TickReport, StoreError> {
    let paths = TeamPaths::new(data_root, team)?;
    paths.ensure_team()?;

    let mut report = TickReport::default();
    let mut events: Vec<EventRecord> = Vec::new();

    {
        let guard = lock_resource(&paths, LockResource::Messages)?;
        let mut pending = load_guard(&paths)?;
        let acks = crate::acks::load(&paths)?;
        let mut changed = false;

        let ids: Vec<String> = pending.keys().cloned().collect();
        for id in ids {
            if acks.contains_key(&id) {
                // Acked but not cleared (crash window); tidy up silently
                pending.remove(&id);
                changed = true;
                continue;
            }

            let entry = pending.get(&id).expect("key enumerated above");
            let due = parse_rfc3339(&entry.next_attempt_at)
                .map(|at| at <= now)
                .unwrap_or(true);
            if !due {
                continue;
            }

            let policy = entry.envelope.kind.retry_policy();
            let first_sent = parse_rfc3339(&entry.first_sent_at).unwrap_or(now);
            let timed_out = (now - first_sent).num_seconds() >= policy.ack_timeout_secs;

            if entry.attempts >= policy.max_attempts || timed_out {
                let entry = pending.remove(&id).expect("key enumerated above");
                let last_error = if timed_out {
                    "ack wait timed out".to_string()
                } else {
                    "retry budget exhausted without ack".to_string()
                };
                let record = DeadLetterRecord {
                    original_envelope: entry.envelope.clone(),
                    attempts: entry.attempts,
                    last_error: last_error.clone(),
                    terminated_at: rfc3339_millis(now),
                };
                {
                    let _dl = lock_resource(&paths, LockResource::DeadLetter)?;
                    let day = now.format("%Y-%m-%d").to_string();
                    append_jsonl(&paths.dead_letter_day_file(&day), &record)?;
                }
                events.push(
                    EventRecord::new(
                        format!("{id}.dead"),
                        rfc3339_millis(now),
                        EventKind::DeadLettered,
                    )
                    .subject(id.clone())
                    .trace(entry.envelope.trace_id.clone())
                    .attr("attempts", entry.attempts)
                    .attr("last_error", last_error),
                );
                report.dead_lettered.push(id);
                changed = true;
                continue;
            }

            let attempt = entry.attempts + 1;
            let nudge = nudge_envelope(&entry.envelope, attempt, now);
            let index = ShardedIndex::messages(&paths);
            if !index.has(&nudge.id)? {
                crate::inbox::append_envelope_locked(&paths, &nudge, &guard)?;
            }

            let policy_delay =
                policy.base_delay_secs * i64::from(policy.factor.pow(attempt));
            let entry = pending.get_mut(&id).expect("key enumerated above");
            entry.attempts = attempt;
            entry.next_attempt_at = rfc3339_millis(now + Duration::seconds(policy_delay));

            events.push(
                EventRecord::new(
                    format!("{id}.retry{attempt}"),
                    rfc3339_millis(now),
                    EventKind::RetryScheduled,
                )
                .subject(id.clone())
                .trace(entry.envelope.trace_id.clone())
                .attr("attempt", attempt)
                .attr("next_attempt_at", entry.next_attempt_at.clone()),
            );
            report.retried.push(id);
            changed = true;
        }

        if changed {
            write_json_atomic(&paths.delivery_guard(), &pending)?;
        }
    }

    for event in events {
        crate::events::log_event(&paths, &event)?;
    }

    Ok(report)
}
