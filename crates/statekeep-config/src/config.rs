/// Application configuration: load, save, and sanitize.
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Default number of past snapshots kept per tracked key.
pub const DEFAULT_MAX_AGE: usize = 10;

/// Default `tracing` filter when `RUST_LOG` is not set.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// History defaults applied to trackers created from configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistorySettings {
    /// Maximum number of past snapshots per tracked key.
    pub max_age: usize,
    /// Track only this top-level property of the state.
    pub watch_property: Option<String>,
}

impl Default for HistorySettings {
    fn default() -> Self {
        Self {
            max_age: DEFAULT_MAX_AGE,
            watch_property: None,
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub history: HistorySettings,
    /// Directory for persisted history. Empty = default location.
    pub data_dir: String,
    /// `tracing` env-filter directive used when `RUST_LOG` is unset.
    pub log_filter: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            history: HistorySettings::default(),
            data_dir: String::new(),
            log_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl AppConfig {
    /// Returns the config file path: exe directory + `statekeep.json`.
    pub fn config_path() -> PathBuf {
        std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(|d| d.join("statekeep.json")))
            .unwrap_or_else(|| PathBuf::from("statekeep.json"))
    }

    /// Loads config from `path`, creating a default file if it doesn't exist.
    /// Returns defaults on any error (missing file, parse error, etc.).
    pub fn load_or_create(path: &Path) -> Self {
        if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(contents) => match serde_json::from_str::<AppConfig>(&contents) {
                    Ok(mut config) => {
                        config.sanitize();
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to parse config at {}: {e}", path.display());
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read config at {}: {e}", path.display());
                }
            }
            // Return defaults on error (don't overwrite broken file)
            Self::default()
        } else {
            let config = Self::default();
            if let Err(e) = config.save(path) {
                tracing::warn!("Failed to create default config at {}: {e}", path.display());
            }
            config
        }
    }

    /// Saves config to `path` as pretty-printed JSON.
    pub fn save(&self, path: &Path) -> Result<(), std::io::Error> {
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }

    /// Returns the directory for persisted history.
    ///
    /// Resolution order:
    /// 1. `data_dir` from the config file (if non-empty)
    /// 2. `STATEKEEP_DATA_DIR` environment variable
    /// 3. `statekeep/` under the platform data directory
    /// 4. `.data/` in the working directory
    pub fn resolve_data_dir(&self) -> PathBuf {
        if !self.data_dir.is_empty() {
            return PathBuf::from(&self.data_dir);
        }
        if let Ok(dir) = std::env::var("STATEKEEP_DATA_DIR") {
            return PathBuf::from(dir);
        }
        dirs::data_dir()
            .map(|d| d.join("statekeep"))
            .unwrap_or_else(|| PathBuf::from(".data"))
    }

    /// Clamps values to valid ranges and resets invalid fields.
    pub fn sanitize(&mut self) {
        self.history.max_age = self.history.max_age.max(1);
        if self
            .history
            .watch_property
            .as_deref()
            .is_some_and(|p| p.trim().is_empty())
        {
            self.history.watch_property = None;
        }
        if self.log_filter.trim().is_empty() {
            self.log_filter = DEFAULT_LOG_FILTER.to_string();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.history.max_age, 10);
        assert!(config.history.watch_property.is_none());
        assert!(config.data_dir.is_empty());
        assert_eq!(config.log_filter, "info");
    }

    #[test]
    fn test_sanitize_clamps_max_age() {
        let mut config = AppConfig::default();
        config.history.max_age = 0;
        config.sanitize();
        assert_eq!(config.history.max_age, 1);

        config.history.max_age = 250;
        config.sanitize();
        assert_eq!(config.history.max_age, 250);
    }

    #[test]
    fn test_sanitize_drops_blank_watch_property() {
        let mut config = AppConfig::default();
        config.history.watch_property = Some("   ".to_string());
        config.sanitize();
        assert!(config.history.watch_property.is_none());

        config.history.watch_property = Some("filters".to_string());
        config.sanitize();
        assert_eq!(config.history.watch_property.as_deref(), Some("filters"));
    }

    #[test]
    fn test_sanitize_resets_blank_log_filter() {
        let mut config = AppConfig::default();
        config.log_filter = String::new();
        config.sanitize();
        assert_eq!(config.log_filter, "info");
    }

    #[test]
    fn test_configured_data_dir_wins() {
        let mut config = AppConfig::default();
        config.data_dir = "/var/lib/statekeep".to_string();
        assert_eq!(config.resolve_data_dir(), PathBuf::from("/var/lib/statekeep"));
    }

    #[test]
    fn test_serde_round_trip() {
        let mut config = AppConfig::default();
        config.history.max_age = 3;
        config.history.watch_property = Some("todos".to_string());
        let json = serde_json::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_missing_fields_get_defaults() {
        let json = r#"{"history": {"max_age": 4}}"#;
        let parsed: AppConfig = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.history.max_age, 4);
        assert!(parsed.history.watch_property.is_none());
        assert_eq!(parsed.log_filter, "info");
    }
}
