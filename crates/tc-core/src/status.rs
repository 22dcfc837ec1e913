//! Team bootstrap, aggregate counters, and consistency checks

use crate::index::{MessageLocator, ShardedIndex};
use crate::io::atomic::write_json_atomic;
use crate::io::error::StoreError;
use crate::io::hash::compute_hash;
use crate::io::jsonl::{count_lines, read_jsonl, MalformedLine};
use crate::paths::{validate_identifier, TeamPaths};
use crate::schema::{rfc3339_millis, Envelope, EventKind, EventRecord, TeamFile};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

/// Create the directory skeleton and seed empty derived state for a team.
pub fn init_team(
    data_root: &Path,
    team: &str,
    members: &[String],
    now: DateTime<Utc>,
) -> Result<TeamPaths, StoreError> {
    let paths = TeamPaths::new(data_root, team)?;
    if members.is_empty() {
        return Err(StoreError::Schema {
            reason: "at least one member is required".to_string(),
        });
    }
    for member in members {
        validate_identifier(member)?;
    }
    if paths.team_file().exists() {
        return Err(StoreError::Bootstrap {
            reason: format!("team {team:?} is already initialized"),
        });
    }

    paths.create_skeleton()?;
    write_json_atomic(
        &paths.team_file(),
        &TeamFile {
            name: team.to_string(),
            members: members.to_vec(),
            created_at: rfc3339_millis(now),
            unknown_fields: Default::default(),
        },
    )?;

    // Seed empty derived state: both indexes (with markers), the ack/nudge/
    // malformed maps, and an empty delivery guard
    ShardedIndex::messages(&paths).replace_all(&BTreeMap::new())?;
    ShardedIndex::events(&paths).replace_all(&BTreeMap::new())?;
    let empty: BTreeMap<String, Value> = BTreeMap::new();
    write_json_atomic(&paths.ack_index(), &empty)?;
    write_json_atomic(&paths.nudge_index(), &empty)?;
    write_json_atomic(&paths.malformed_index(), &empty)?;
    write_json_atomic(&paths.delivery_guard(), &empty)?;

    let event = EventRecord::new(
        format!("{team}.created"),
        rfc3339_millis(now),
        EventKind::TeamCreated,
    )
    .attr("members", members.len() as u64);
    crate::events::log_event(&paths, &event)?;

    tracing::info!("initialized team {team} with {} member(s)", members.len());
    Ok(paths)
}

/// Teams present under the data root.
pub fn list_teams(data_root: &Path) -> Result<Vec<String>, StoreError> {
    let dir = data_root.join("teams");
    let entries = match std::fs::read_dir(&dir) {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(StoreError::io(&dir, e)),
    };
    let mut teams = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| StoreError::io(&dir, e))?;
        if entry.path().is_dir() {
            teams.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    teams.sort();
    Ok(teams)
}

/// Aggregate counters for one team.
#[derive(Debug, Clone, Serialize)]
pub struct TeamStatus {
    pub team: String,
    pub members: Vec<String>,
    pub messages_total: u64,
    pub unread_total: u64,
    pub acked_total: u64,
    pub events_total: u64,
    pub tasks_total: u64,
    pub pending_deliveries: u64,
    pub dead_letter_total: u64,
    pub malformed_total: u64,
}

fn count_tasks(paths: &TeamPaths) -> Result<u64, StoreError> {
    let dir = paths.tasks_dir();
    let entries = match std::fs::read_dir(&dir) {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(StoreError::io(&dir, e)),
    };
    let mut count = 0;
    for entry in entries {
        let entry = entry.map_err(|e| StoreError::io(&dir, e))?;
        if entry.path().extension().is_some_and(|ext| ext == "json") {
            count += 1;
        }
    }
    Ok(count)
}

fn count_dead_letters(paths: &TeamPaths) -> Result<u64, StoreError> {
    let dir = paths.dead_letter_dir();
    let entries = match std::fs::read_dir(&dir) {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(StoreError::io(&dir, e)),
    };
    let mut total = 0;
    for entry in entries {
        let entry = entry.map_err(|e| StoreError::io(&dir, e))?;
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "jsonl") {
            total += count_lines(&path)?;
        }
    }
    Ok(total)
}

/// Compute aggregate counters by scanning the logs and derived state.
pub fn team_status(
    data_root: &Path,
    team: &str,
    now: DateTime<Utc>,
) -> Result<TeamStatus, StoreError> {
    let paths = TeamPaths::new(data_root, team)?;
    paths.ensure_team()?;
    let roster = TeamFile::load(&paths)?;
    let acks = crate::acks::load(&paths)?;

    let mut malformed: Vec<MalformedLine> = Vec::new();
    let mut messages_total = 0;
    let mut unread_total = 0;
    for agent in crate::inbox::list_inbox_agents(&paths)? {
        let scan = read_jsonl::<Envelope>(&paths.inbox(&agent)?)?;
        malformed.extend(scan.malformed);
        for record in scan.records {
            messages_total += 1;
            if !acks.contains_key(&record.value.id) {
                unread_total += 1;
            }
        }
    }

    let (events, event_malformed) = crate::events::read_all_events(&paths)?;
    malformed.extend(event_malformed);
    crate::malformed::note_scan(data_root, &paths, &malformed, now)?;

    Ok(TeamStatus {
        team: team.to_string(),
        members: roster.members,
        messages_total,
        unread_total,
        acked_total: acks.len() as u64,
        events_total: events.len() as u64,
        tasks_total: count_tasks(&paths)?,
        pending_deliveries: crate::delivery::load_guard(&paths)?.len() as u64,
        dead_letter_total: count_dead_letters(&paths)?,
        malformed_total: crate::malformed::load(&paths)?.len() as u64,
    })
}

/// Consistency report produced by `doctor check`.
#[derive(Debug, Clone, Serialize)]
pub struct DoctorReport {
    pub ok: bool,
    /// Inbox records the message index does not know about
    pub missing_from_message_index: Vec<String>,
    /// Message index entries with no matching inbox record
    pub orphaned_message_index: Vec<String>,
    /// Indexed messages whose stored digest no longer matches the log line
    pub digest_mismatches: Vec<String>,
    /// Event records the event index does not know about
    pub missing_from_event_index: Vec<String>,
    /// Event index entries with no matching event record
    pub orphaned_event_index: Vec<String>,
    pub malformed_fingerprints: u64,
    pub pending_deliveries: u64,
    pub dead_letter_total: u64,
}

/// Cross-check the derived indexes against the append-only logs.
pub fn doctor_check(
    data_root: &Path,
    team: &str,
    now: DateTime<Utc>,
) -> Result<DoctorReport, StoreError> {
    let paths = TeamPaths::new(data_root, team)?;
    paths.ensure_team()?;

    let mut malformed: Vec<MalformedLine> = Vec::new();

    // Inbox side: ids on disk, and raw line digests for tamper checks
    let mut log_messages: BTreeMap<String, String> = BTreeMap::new();
    for agent in crate::inbox::list_inbox_agents(&paths)? {
        let inbox_path = paths.inbox(&agent)?;
        let scan = read_jsonl::<Envelope>(&inbox_path)?;
        malformed.extend(scan.malformed);

        let content = std::fs::read_to_string(&inbox_path)
            .map_err(|e| StoreError::io(&inbox_path, e))?;
        let lines: Vec<&str> = content.lines().collect();
        for record in scan.records {
            let digest = lines
                .get(record.line_number as usize - 1)
                .map(|line| compute_hash(line.as_bytes()))
                .unwrap_or_default();
            log_messages.insert(record.value.id.clone(), digest);
        }
    }

    let message_index = ShardedIndex::messages(&paths).scan_all()?;
    let mut missing_from_message_index: Vec<String> = Vec::new();
    let mut digest_mismatches: Vec<String> = Vec::new();
    for (id, digest) in &log_messages {
        match message_index.get(id) {
            None => missing_from_message_index.push(id.clone()),
            Some(value) => {
                if let Ok(locator) = serde_json::from_value::<MessageLocator>(value.clone())
                    && let Some(ref stored) = locator.digest
                    && stored != digest
                {
                    digest_mismatches.push(id.clone());
                }
            }
        }
    }
    let orphaned_message_index: Vec<String> = message_index
        .keys()
        .filter(|id| !log_messages.contains_key(*id))
        .cloned()
        .collect();

    // Event side
    let (events, event_malformed) = crate::events::read_all_events(&paths)?;
    malformed.extend(event_malformed);
    let event_index = ShardedIndex::events(&paths).scan_all()?;

    let log_event_ids: std::collections::BTreeSet<String> =
        events.iter().map(|p| p.event.id.clone()).collect();
    let missing_from_event_index: Vec<String> = log_event_ids
        .iter()
        .filter(|id| !event_index.contains_key(*id))
        .cloned()
        .collect();
    let orphaned_event_index: Vec<String> = event_index
        .keys()
        .filter(|id| !log_event_ids.contains(*id))
        .cloned()
        .collect();

    crate::malformed::note_scan(data_root, &paths, &malformed, now)?;

    let report = DoctorReport {
        ok: missing_from_message_index.is_empty()
            && orphaned_message_index.is_empty()
            && digest_mismatches.is_empty()
            && missing_from_event_index.is_empty()
            && orphaned_event_index.is_empty(),
        missing_from_message_index,
        orphaned_message_index,
        digest_mismatches,
        missing_from_event_index,
        orphaned_event_index,
        malformed_fingerprints: crate::malformed::load(&paths)?.len() as u64,
        pending_deliveries: crate::delivery::load_guard(&paths)?.len() as u64,
        dead_letter_total: count_dead_letters(&paths)?,
    };
    Ok(report)
}
