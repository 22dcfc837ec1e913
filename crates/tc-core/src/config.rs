//! Optional TOML configuration under the data root.
//!
//! `<data_root>/config.toml` carries defaults that environment variables
//! override. A missing or unreadable file resolves to the defaults.

use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Default, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub core: CoreConfig,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct CoreConfig {
    /// Emit one stderr warning per new malformed-line fingerprint.
    #[serde(default)]
    pub warn_malformed: bool,
}

/// Load `config.toml` from the data root, falling back to defaults.
pub fn load(data_root: &Path) -> Config {
    let path = data_root.join("config.toml");
    let Ok(content) = std::fs::read_to_string(&path) else {
        return Config::default();
    };
    match toml::from_str(&content) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!("ignoring unparseable config at {}: {e}", path.display());
            Config::default()
        }
    }
}

/// Whether new malformed-line fingerprints should be warned to stderr.
///
/// `TEAM_CHAT_WARN_MALFORMED=1` forces it on, `TEAM_CHAT_WARN_MALFORMED=0`
/// forces it off; otherwise `config.toml` decides.
pub fn warn_malformed_enabled(data_root: &Path) -> bool {
    match std::env::var("TEAM_CHAT_WARN_MALFORMED") {
        Ok(v) if v == "1" => true,
        Ok(v) if v == "0" => false,
        _ => load(data_root).core.warn_malformed,
    }
}
