//! Deterministic rebuild of all derived state from the append-only logs
//!
//! Under `state-rehydrate.lock`: re-reads every inbox and event record,
//! rebuilds both sharded indexes (swapped in via a sibling directory
//! rename), rewrites the ack index and delivery guard from events, and
//! replays task messages in ordering-key order into fresh snapshots. The
//! logs themselves are never touched.

use crate::index::{EventLocator, MessageLocator, ShardedIndex};
use crate::io::atomic::write_json_atomic;
use crate::io::error::StoreError;
use crate::io::hash::compute_hash;
use crate::io::jsonl::{read_jsonl, MalformedLine};
use crate::io::lock::{lock_resource, LockResource};
use crate::paths::TeamPaths;
use crate::schema::{rfc3339_millis, Envelope, EventKind, EventRecord};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Counts reported by one rehydrate run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RehydrateSummary {
    pub messages_indexed: u64,
    pub events_indexed: u64,
    pub snapshots_written: u64,
    pub acks_rebuilt: u64,
    pub pending_rebuilt: u64,
    pub malformed_lines: u64,
}

/// Raw line text by line number, for digesting exactly what is on disk.
fn raw_lines(path: &Path) -> Result<BTreeMap<u64, String>, StoreError> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(e) => return Err(StoreError::io(path, e)),
    };
    Ok(content
        .lines()
        .enumerate()
        .map(|(idx, line)| (idx as u64 + 1, line.to_string()))
        .collect())
}

/// Rebuild indexes, snapshots, ack index, and delivery-guard state.
pub fn rehydrate(
    data_root: &Path,
    team: &str,
    now: DateTime<Utc>,
) -> Result<RehydrateSummary, StoreError> {
    let paths = TeamPaths::new(data_root, team)?;
    paths.ensure_team()?;

    let mut summary = RehydrateSummary::default();
    let mut all_malformed: Vec<MalformedLine> = Vec::new();

    {
        let _guard = lock_resource(&paths, LockResource::StateRehydrate)?;

        // Pass 1: inbox logs → message index + task/require-ack envelopes
        let mut message_entries: BTreeMap<String, Value> = BTreeMap::new();
        let mut task_messages: Vec<Envelope> = Vec::new();
        let mut ack_required: BTreeMap<String, Envelope> = BTreeMap::new();

        for agent in crate::inbox::list_inbox_agents(&paths)? {
            let inbox_path = paths.inbox(&agent)?;
            let scan = read_jsonl::<Envelope>(&inbox_path)?;
            all_malformed.extend(scan.malformed);
            let lines = raw_lines(&inbox_path)?;

            for record in scan.records {
                let envelope = record.value;
                let digest = lines
                    .get(&record.line_number)
                    .map(|line| compute_hash(line.as_bytes()));
                let locator = MessageLocator {
                    inbox: agent.clone(),
                    line: record.line_number,
                    digest,
                };
                message_entries
                    .entry(envelope.id.clone())
                    .or_insert(serde_json::to_value(&locator).map_err(|e| {
                        StoreError::json(&inbox_path, e)
                    })?);

                if envelope.kind.applies_to_snapshot() {
                    task_messages.push(envelope.clone());
                }
                if envelope.require_ack {
                    ack_required.insert(envelope.id.clone(), envelope);
                }
            }
        }
        summary.messages_indexed = message_entries.len() as u64;

        // Pass 2: event logs → event index + ack/guard source data
        let (events, event_malformed) = crate::events::read_all_events(&paths)?;
        all_malformed.extend(event_malformed);

        let mut event_entries: BTreeMap<String, Value> = BTreeMap::new();
        let mut acks: BTreeMap<String, crate::acks::AckRecord> = BTreeMap::new();
        let mut sent_require_ack: BTreeMap<String, String> = BTreeMap::new();
        let mut dead: BTreeSet<String> = BTreeSet::new();
        let mut retry_counts: BTreeMap<String, u32> = BTreeMap::new();

        for positioned in &events {
            let event = &positioned.event;
            event_entries.entry(event.id.clone()).or_insert(
                serde_json::to_value(EventLocator {
                    day: positioned.day.clone(),
                    line: positioned.line_number,
                })
                .map_err(|e| StoreError::json(&paths.events_dir(), e))?,
            );

            let Some(subject) = event.subject_id.clone() else {
                continue;
            };
            match event.kind {
                EventKind::Acked => {
                    acks.entry(subject.clone()).or_insert(crate::acks::AckRecord {
                        message_id: subject,
                        acked_by: event
                            .attrs
                            .get("acked_by")
                            .and_then(|v| v.as_str())
                            .unwrap_or_default()
                            .to_string(),
                        acked_at: event.ts.clone(),
                        trace_id: event.trace_id.clone(),
                    });
                }
                EventKind::Sent => {
                    if event
                        .attrs
                        .get("require_ack")
                        .and_then(|v| v.as_bool())
                        .unwrap_or(false)
                    {
                        sent_require_ack.entry(subject).or_insert(event.ts.clone());
                    }
                }
                EventKind::DeadLettered => {
                    dead.insert(subject);
                }
                EventKind::RetryScheduled => {
                    *retry_counts.entry(subject).or_insert(0) += 1;
                }
                _ => {}
            }
        }
        summary.events_indexed = event_entries.len() as u64;

        // Snapshots: replay in ordering-key order, write fresh
        for snapshot in crate::tasks::replay(&task_messages) {
            write_json_atomic(&paths.task_snapshot(&snapshot.task_id)?, &snapshot)?;
            summary.snapshots_written += 1;
        }

        // Ack index from acked events
        summary.acks_rebuilt = acks.len() as u64;
        write_json_atomic(&paths.ack_index(), &acks)?;

        // Delivery guard from sent/acked/dead-lettered/retry events
        let mut pending: BTreeMap<String, crate::delivery::PendingDelivery> = BTreeMap::new();
        for (id, first_sent_at) in sent_require_ack {
            if acks.contains_key(&id) || dead.contains(&id) {
                continue;
            }
            let Some(envelope) = ack_required.get(&id) else {
                continue;
            };
            let attempts = retry_counts.get(&id).copied().unwrap_or(0);
            let policy = envelope.kind.retry_policy();
            let delay = policy.base_delay_secs * i64::from(policy.factor.pow(attempts));
            pending.insert(
                id,
                crate::delivery::PendingDelivery {
                    envelope: envelope.clone(),
                    attempts,
                    first_sent_at,
                    next_attempt_at: rfc3339_millis(now + Duration::seconds(delay)),
                },
            );
        }
        summary.pending_rebuilt = pending.len() as u64;
        write_json_atomic(&paths.delivery_guard(), &pending)?;

        // Index swap last: new shard generations renamed into place
        ShardedIndex::messages(&paths).replace_all(&message_entries)?;
        ShardedIndex::events(&paths).replace_all(&event_entries)?;
    }

    summary.malformed_lines = all_malformed.len() as u64;
    crate::malformed::note_scan(data_root, &paths, &all_malformed, now)?;

    let event = EventRecord::new(
        format!("rehydrated.{}", now.timestamp_millis()),
        rfc3339_millis(now),
        EventKind::Rehydrated,
    )
    .attr("messages_indexed", summary.messages_indexed)
    .attr("events_indexed", summary.events_indexed)
    .attr("snapshots_written", summary.snapshots_written)
    .attr("acks_rebuilt", summary.acks_rebuilt)
    .attr("pending_rebuilt", summary.pending_rebuilt)
    .attr("malformed_lines", summary.malformed_lines);
    crate::events::log_event(&paths, &event)?;

    tracing::info!(
        "rehydrated team {}: {} messages, {} events, {} snapshots",
        paths.team(),
        summary.messages_indexed,
        summary.events_indexed,
        summary.snapshots_written
    );
    Ok(summary)
}
