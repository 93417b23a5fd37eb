//! Configuration loading
//!
//! TOML configuration with embedded defaults. Every section and field is
//! optional; a missing file is the same as an empty one.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use pb_core::document::STORAGE_KEY;
use pb_core::UnknownKindPolicy;

use crate::monitor::{MonitorSettings, DEFAULT_REDIRECT_TARGET};

const APP_DIR: &str = "pageblocker";

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Where the rule tree document is kept
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Storage directory; `~` is expanded. Defaults to the user data dir.
    pub dir: Option<String>,

    /// Key the tree document is stored under
    pub key: String,

    /// How often to check for writes from other processes
    pub poll_interval_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: None,
            key: STORAGE_KEY.to_string(),
            poll_interval_ms: 500,
        }
    }
}

/// Background monitor behavior
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Page blocked tabs are sent to
    pub redirect_target: String,

    /// Origin a relative redirect target is served from
    pub extension_origin: Option<String>,

    /// How rules of an unrecognized type are treated
    pub unknown_kinds: UnknownKindPolicy,

    /// Honor rule activity windows
    pub enforce_schedules: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            redirect_target: DEFAULT_REDIRECT_TARGET.to_string(),
            extension_origin: None,
            unknown_kinds: UnknownKindPolicy::FailOpen,
            enforce_schedules: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default log filter when `RUST_LOG` is unset
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub monitor: MonitorConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load from `path`, or from the default location if `None`.
    ///
    /// A missing file yields the defaults. A file that exists but cannot be
    /// read or parsed is an error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path.map(Path::to_path_buf).or_else(Self::default_path) {
            Some(path) => path,
            None => return Ok(Self::default()),
        };
        match std::fs::read_to_string(&path) {
            Ok(content) => Self::from_toml(&content).map_err(|source| ConfigError::Parse { path, source }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("No config at {}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Io { path, source }),
        }
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// `<config dir>/pageblocker/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR).join("config.toml"))
    }

    /// Expand ~ in path strings
    pub fn expand_path(path: &str) -> PathBuf {
        if let Some(rest) = path.strip_prefix("~/") {
            if let Some(home) = dirs::home_dir() {
                return home.join(rest);
            }
        }
        PathBuf::from(path)
    }

    /// Storage directory (expanded), falling back to the user data dir and
    /// then the working directory.
    pub fn storage_dir(&self) -> PathBuf {
        match &self.storage.dir {
            Some(dir) => Self::expand_path(dir),
            None => dirs::data_dir()
                .map(|dir| dir.join(APP_DIR))
                .unwrap_or_else(|| PathBuf::from(".pageblocker")),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.storage.poll_interval_ms.max(1))
    }

    pub fn monitor_settings(&self) -> MonitorSettings {
        MonitorSettings {
            redirect_target: self.monitor.redirect_target.clone(),
            extension_origin: self.monitor.extension_origin.clone(),
            unknown_kinds: self.monitor.unknown_kinds,
            enforce_schedules: self.monitor.enforce_schedules,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_is_default() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.storage.key, "blockedPages");
        assert_eq!(config.poll_interval(), Duration::from_millis(500));
        assert_eq!(config.monitor_settings(), MonitorSettings::default());
    }

    #[test]
    fn test_partial_config() {
        let config = Config::from_toml(
            r#"
            [storage]
            dir = "/var/lib/pageblocker"
            poll_interval_ms = 50

            [monitor]
            extension_origin = "chrome-extension://abcdef"
            unknown_kinds = "fail-closed"
            enforce_schedules = false
            "#,
        )
        .unwrap();

        assert_eq!(config.storage_dir(), PathBuf::from("/var/lib/pageblocker"));
        assert_eq!(config.storage.key, "blockedPages");
        assert_eq!(config.poll_interval(), Duration::from_millis(50));

        let settings = config.monitor_settings();
        assert_eq!(settings.unknown_kinds, UnknownKindPolicy::FailClosed);
        assert!(!settings.enforce_schedules);
        assert_eq!(settings.redirect_target, "/blocked.html");
        assert_eq!(settings.blocked_page_url(), "chrome-extension://abcdef/blocked.html");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_invalid_policy_rejected() {
        assert!(Config::from_toml("[monitor]\nunknown_kinds = \"sometimes\"").is_err());
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_reports_parse_errors_with_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[storage\nkey = 1").unwrap();

        match Config::load(Some(&path)) {
            Err(ConfigError::Parse { path: reported, .. }) => assert_eq!(reported, path),
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn test_expand_home() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(Config::expand_path("~/rules"), home.join("rules"));
        }
        assert_eq!(Config::expand_path("/abs/rules"), PathBuf::from("/abs/rules"));
    }
}
