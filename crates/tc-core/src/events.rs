//! Dated operational event log
//!
//! Events append to `events/<YYYY-MM-DD>.jsonl` (UTC day of `event.ts`)
//! under `events.lock`, deduplicated by event id through the event index.
//! The day files are source of truth; the index is derived.

use crate::index::{EventLocator, ShardedIndex};
use crate::io::atomic::append_jsonl;
use crate::io::error::StoreError;
use crate::io::jsonl::{count_lines, read_jsonl, JsonlRecord, MalformedLine};
use crate::io::lock::{lock_resource, LockResource};
use crate::paths::{validate_identifier, TeamPaths};
use crate::schema::{parse_rfc3339, EventRecord};
use chrono::{DateTime, Utc};
use std::path::Path;

/// UTC day (YYYY-MM-DD) an event timestamp belongs to.
pub fn day_of(ts: &str) -> Result<String, StoreError> {
    let parsed = parse_rfc3339(ts).ok_or_else(|| StoreError::Schema {
        reason: format!("event ts {ts:?} is not RFC 3339"),
    })?;
    Ok(parsed.format("%Y-%m-%d").to_string())
}

/// Append one event, idempotently. Returns false if the id was already
/// logged.
pub fn log_event(paths: &TeamPaths, event: &EventRecord) -> Result<bool, StoreError> {
    validate_identifier(&event.id)?;
    let day = day_of(&event.ts)?;

    let _guard = lock_resource(paths, LockResource::Events)?;
    let index = ShardedIndex::events(paths);
    if index.has(&event.id)? {
        return Ok(false);
    }

    let day_file = paths.event_day_file(&day);
    let line = count_lines(&day_file)? + 1;
    append_jsonl(&day_file, event)?;
    index.put(&event.id, &EventLocator { day, line })?;

    tracing::debug!(
        "event {} ({}) logged for team {}",
        event.id,
        event.kind.as_str(),
        paths.team()
    );
    Ok(true)
}

/// One decoded event with its position in the log.
#[derive(Debug, Clone)]
pub struct PositionedEvent {
    pub day: String,
    pub line_number: u64,
    pub event: EventRecord,
}

/// Read every event in day order, tolerating malformed lines.
pub fn read_all_events(
    paths: &TeamPaths,
) -> Result<(Vec<PositionedEvent>, Vec<MalformedLine>), StoreError> {
    let mut days: Vec<String> = Vec::new();
    let dir = paths.events_dir();
    let entries = match std::fs::read_dir(&dir) {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((Vec::new(), Vec::new())),
        Err(e) => return Err(StoreError::io(&dir, e)),
    };
    for entry in entries {
        let entry = entry.map_err(|e| StoreError::io(&dir, e))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if let Some(day) = name.strip_suffix(".jsonl") {
            days.push(day.to_string());
        }
    }
    days.sort();

    let mut events = Vec::new();
    let mut malformed = Vec::new();
    for day in days {
        let scan = read_jsonl::<EventRecord>(&paths.event_day_file(&day))?;
        malformed.extend(scan.malformed);
        for JsonlRecord { line_number, value } in scan.records {
            events.push(PositionedEvent {
                day: day.clone(),
                line_number,
                event: value,
            });
        }
    }
    Ok((events, malformed))
}

/// A page of trace results.
#[derive(Debug, Clone)]
pub struct TracePage {
    pub events: Vec<EventRecord>,
    pub next_cursor: Option<String>,
}

/// Chronological page of the events carrying one trace id.
///
/// `cursor` is an event id: records up to and including it are skipped, and
/// the page resumes with the next matching event. An unknown cursor yields
/// an empty page.
pub fn trace(
    data_root: &Path,
    team: &str,
    trace_id: &str,
    limit: usize,
    cursor: Option<&str>,
    now: DateTime<Utc>,
) -> Result<TracePage, StoreError> {
    let paths = TeamPaths::new(data_root, team)?;
    paths.ensure_team()?;

    let (all, malformed) = read_all_events(&paths)?;
    crate::malformed::note_scan(data_root, &paths, &malformed, now)?;

    let mut matching = all
        .into_iter()
        .filter(|p| p.event.trace_id.as_deref() == Some(trace_id))
        .map(|p| p.event);

    if let Some(cursor_id) = cursor {
        for event in matching.by_ref() {
            if event.id == cursor_id {
                break;
            }
        }
    }

    let mut events: Vec<EventRecord> = Vec::with_capacity(limit);
    let mut next_cursor = None;
    for event in matching {
        if events.len() == limit {
            next_cursor = events.last().map(|e: &EventRecord| e.id.clone());
            break;
        }
        events.push(event);
    }

    Ok(TracePage { events, next_cursor })
}
