//! Identifier validation and team directory layout
//!
//! Every path under the data root is derived by joining validated segments;
//! raw caller input is never joined. Identifiers are restricted to
//! `[A-Za-z0-9._-]+`, with `.`, `..`, and any value containing the `..`
//! substring rejected outright.

use crate::io::error::StoreError;
use std::path::{Path, PathBuf};

/// Validate a team/agent/message/task identifier for safe path derivation.
pub fn validate_identifier(value: &str) -> Result<&str, StoreError> {
    let unsafe_err = || StoreError::UnsafeIdentifier {
        value: value.to_string(),
    };

    if value.is_empty() || value == "." || value == ".." || value.contains("..") {
        return Err(unsafe_err());
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        return Err(unsafe_err());
    }
    Ok(value)
}

/// Canonical layout of one team's directory tree.
#[derive(Debug, Clone)]
pub struct TeamPaths {
    team: String,
    team_dir: PathBuf,
}

impl TeamPaths {
    /// Validate the team name and bind it to a data root.
    pub fn new(data_root: &Path, team: &str) -> Result<Self, StoreError> {
        let team = validate_identifier(team)?;
        Ok(TeamPaths {
            team: team.to_string(),
            team_dir: data_root.join("teams").join(team),
        })
    }

    pub fn team(&self) -> &str {
        &self.team
    }

    pub fn team_dir(&self) -> &Path {
        &self.team_dir
    }

    /// Roster and metadata file written by `init`.
    pub fn team_file(&self) -> PathBuf {
        self.team_dir.join("team.json")
    }

    pub fn inboxes_dir(&self) -> PathBuf {
        self.team_dir.join("inboxes")
    }

    pub fn inbox(&self, agent: &str) -> Result<PathBuf, StoreError> {
        let agent = validate_identifier(agent)?;
        Ok(self.inboxes_dir().join(format!("{agent}.jsonl")))
    }

    pub fn events_dir(&self) -> PathBuf {
        self.team_dir.join("events")
    }

    pub fn event_day_file(&self, day: &str) -> PathBuf {
        self.events_dir().join(format!("{day}.jsonl"))
    }

    pub fn tasks_dir(&self) -> PathBuf {
        self.team_dir.join("tasks")
    }

    pub fn task_snapshot(&self, task_id: &str) -> Result<PathBuf, StoreError> {
        let task_id = validate_identifier(task_id)?;
        Ok(self.tasks_dir().join(format!("{task_id}.json")))
    }

    pub fn state_dir(&self) -> PathBuf {
        self.team_dir.join("state")
    }

    pub fn locks_dir(&self) -> PathBuf {
        self.team_dir.join("locks")
    }

    pub fn dead_letter_dir(&self) -> PathBuf {
        self.team_dir.join("dead-letter")
    }

    pub fn dead_letter_day_file(&self, day: &str) -> PathBuf {
        self.dead_letter_dir().join(format!("{day}.jsonl"))
    }

    pub fn message_shard_dir(&self) -> PathBuf {
        self.state_dir().join("message-index-shards")
    }

    pub fn legacy_message_index(&self) -> PathBuf {
        self.state_dir().join("message-index.json")
    }

    pub fn event_shard_dir(&self) -> PathBuf {
        self.state_dir().join("event-index-shards")
    }

    pub fn legacy_event_index(&self) -> PathBuf {
        self.state_dir().join("event-index.json")
    }

    pub fn ack_index(&self) -> PathBuf {
        self.state_dir().join("ack-index.json")
    }

    pub fn nudge_index(&self) -> PathBuf {
        self.state_dir().join("nudge-index.json")
    }

    pub fn malformed_index(&self) -> PathBuf {
        self.state_dir().join("malformed.json")
    }

    pub fn delivery_guard(&self) -> PathBuf {
        self.state_dir().join("delivery-guard.json")
    }

    /// Fail with a bootstrap error unless the team has been initialized.
    pub fn ensure_team(&self) -> Result<(), StoreError> {
        if !self.team_dir.is_dir() {
            return Err(StoreError::Bootstrap {
                reason: format!(
                    "team {:?} not found under {} (run `tc init` first)",
                    self.team,
                    self.team_dir.display()
                ),
            });
        }
        Ok(())
    }

    /// Create the directory skeleton for a new team.
    pub fn create_skeleton(&self) -> Result<(), StoreError> {
        for dir in [
            self.team_dir.clone(),
            self.inboxes_dir(),
            self.events_dir(),
            self.tasks_dir(),
            self.state_dir(),
            self.dead_letter_dir(),
            self.locks_dir(),
        ] {
            std::fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;
        }
        Ok(())
    }
}
