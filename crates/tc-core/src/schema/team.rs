//! Team roster file written by `init`

use crate::io::error::StoreError;
use crate::paths::TeamPaths;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// `teams/<team>/team.json`: the roster other operations validate against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamFile {
    pub name: String,

    pub members: Vec<String>,

    /// RFC 3339 UTC timestamp
    pub created_at: String,

    /// Unknown fields for forward compatibility
    #[serde(flatten)]
    pub unknown_fields: HashMap<String, serde_json::Value>,
}

impl TeamFile {
    pub fn load(paths: &TeamPaths) -> Result<Self, StoreError> {
        let path = paths.team_file();
        let content = std::fs::read_to_string(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StoreError::Bootstrap {
                    reason: format!("team file missing at {}", path.display()),
                }
            } else {
                StoreError::io(&path, e)
            }
        })?;
        serde_json::from_str(&content).map_err(|e| StoreError::json(&path, e))
    }

    pub fn is_member(&self, agent: &str) -> bool {
        self.members.iter().any(|m| m == agent)
    }

    /// Error unless `agent` is on the roster.
    pub fn require_member(&self, agent: &str) -> Result<(), StoreError> {
        if self.is_member(agent) {
            Ok(())
        } else {
            Err(StoreError::NotFound {
                what: format!("agent {:?} in team {:?}", agent, self.name),
            })
        }
    }
}
