//! Canonical data-root resolution
//!
//! Provides a single source of truth for where the `teams/` tree lives.
//! Custom deployments and tests override it via the `TEAM_CHAT_HOME`
//! environment variable; otherwise the platform home directory is used.
//!
//! # Precedence
//!
//! 1. `TEAM_CHAT_HOME` environment variable (if set and non-empty, trimmed)
//! 2. `<home>/.team-chat` via `dirs::home_dir()`

use crate::io::error::StoreError;
use std::path::PathBuf;

/// Resolve the data root that contains the `teams/` tree.
///
/// Integration tests MUST set `TEAM_CHAT_HOME` to a temp directory so they
/// never touch the real tree.
pub fn data_root() -> Result<PathBuf, StoreError> {
    if let Ok(root) = std::env::var("TEAM_CHAT_HOME") {
        let trimmed = root.trim();
        if !trimmed.is_empty() {
            return Ok(PathBuf::from(trimmed));
        }
    }

    dirs::home_dir()
        .map(|h| h.join(".team-chat"))
        .ok_or_else(|| StoreError::Bootstrap {
            reason: "could not determine home directory (set TEAM_CHAT_HOME)".to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    #[test]
    #[serial]
    fn test_home_env_set() {
        let original = env::var("TEAM_CHAT_HOME").ok();
        unsafe { env::set_var("TEAM_CHAT_HOME", "/custom/root") };

        assert_eq!(data_root().unwrap(), PathBuf::from("/custom/root"));

        unsafe {
            match original {
                Some(v) => env::set_var("TEAM_CHAT_HOME", v),
                None => env::remove_var("TEAM_CHAT_HOME"),
            }
        }
    }

    #[test]
    #[serial]
    fn test_home_env_whitespace_falls_back() {
        let original = env::var("TEAM_CHAT_HOME").ok();
        unsafe { env::set_var("TEAM_CHAT_HOME", "   ") };

        let root = data_root().unwrap();
        assert_eq!(root, dirs::home_dir().unwrap().join(".team-chat"));

        unsafe {
            match original {
                Some(v) => env::set_var("TEAM_CHAT_HOME", v),
                None => env::remove_var("TEAM_CHAT_HOME"),
            }
        }
    }

    #[test]
    #[serial]
    fn test_home_env_trims_whitespace() {
        let original = env::var("TEAM_CHAT_HOME").ok();
        unsafe { env::set_var("TEAM_CHAT_HOME", "  /data/chat  ") };

        assert_eq!(data_root().unwrap(), PathBuf::from("/data/chat"));

        unsafe {
            match original {
                Some(v) => env::set_var("TEAM_CHAT_HOME", v),
                None => env::remove_var("TEAM_CHAT_HOME"),
            }
        }
    }
}
