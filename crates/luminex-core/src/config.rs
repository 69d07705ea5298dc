//! Host configuration, read from `host.toml`.
//!
//! ```toml
//! [events]
//! slow_handler_timeout_ms = 1000
//! traced_events = ["BufWritePre"]
//!
//! [extensions]
//! command_activation_timeout_ms = 1000
//!
//! [log]
//! level = "warn"
//! ```
//!
//! Every section is `#[serde(default)]`, so a file only needs the keys it
//! changes.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main host configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Event dispatch settings
    pub events: EventsConfig,

    /// Extension lifecycle settings
    pub extensions: ExtensionsConfig,

    /// Logging settings
    pub log: LogConfig,
}

impl HostConfig {
    /// Loads the default config file, falling back to defaults on any error.
    pub fn load() -> Self {
        Self::load_from_default_path().unwrap_or_else(|e| {
            tracing::warn!("Falling back to default host config: {}", e);
            Self::default()
        })
    }

    /// Loads config from a file.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    fn load_from_default_path() -> Result<Self, ConfigError> {
        let path = Self::default_path()?;
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// `<config dir>/luminex/host.toml`
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(config_dir.join("luminex").join("host.toml"))
    }

    /// Saves the config to the given path.
    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// Event dispatch configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Handlers of traced events running longer than this are reported
    pub slow_handler_timeout_ms: u64,

    /// Event names whose handlers are timed
    pub traced_events: Vec<String>,

    /// Capacity of the recent insert ring
    pub recent_inserts_limit: usize,
}

impl EventsConfig {
    pub fn slow_handler_timeout(&self) -> Duration {
        Duration::from_millis(self.slow_handler_timeout_ms)
    }
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            slow_handler_timeout_ms: 1000,
            traced_events: vec!["BufWritePre".to_string()],
            recent_inserts_limit: 16,
        }
    }
}

/// Extension lifecycle configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtensionsConfig {
    /// Folder holding globally installed extensions and the store file
    pub root: PathBuf,

    /// Folder scanned for single-file extension manifests
    pub single_file_root: PathBuf,

    /// Upper bound on waiting for command-triggered activations
    pub command_activation_timeout_ms: u64,

    /// Glob of files whose change reloads a watched directory extension
    pub watch_pattern: String,

    /// Quiet period after the last change before a watched extension reloads
    pub watch_debounce_ms: u64,

    /// Version checked against manifest engine requirements
    pub engine_version: String,
}

impl ExtensionsConfig {
    pub fn command_activation_timeout(&self) -> Duration {
        Duration::from_millis(self.command_activation_timeout_ms)
    }

    pub fn watch_debounce(&self) -> Duration {
        Duration::from_millis(self.watch_debounce_ms)
    }

    /// Folder global extensions are installed into.
    pub fn modules_folder(&self) -> PathBuf {
        self.root.join("modules")
    }
}

impl Default for ExtensionsConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir().unwrap_or_else(std::env::temp_dir);
        let config_dir = dirs::config_dir().unwrap_or_else(std::env::temp_dir);
        Self {
            root: data_dir.join("luminex").join("extensions"),
            single_file_root: config_dir.join("luminex").join("single-extensions"),
            command_activation_timeout_ms: 1000,
            watch_pattern: "**/*".to_string(),
            watch_debounce_ms: 100,
            engine_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default level when neither `-v` nor `RUST_LOG` is given
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config directory not found")]
    NoConfigDir,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = HostConfig::default();
        assert_eq!(config.events.slow_handler_timeout(), Duration::from_millis(1000));
        assert_eq!(config.events.traced_events, vec!["BufWritePre".to_string()]);
        assert_eq!(config.extensions.watch_pattern, "**/*");
        assert_eq!(config.extensions.watch_debounce(), Duration::from_millis(100));
        assert_eq!(config.log.level, "warn");
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: HostConfig = toml::from_str(
            r#"
            [events]
            slow_handler_timeout_ms = 250
            "#,
        )
        .unwrap();
        assert_eq!(config.events.slow_handler_timeout_ms, 250);
        assert_eq!(config.events.recent_inserts_limit, 16);
        assert_eq!(config.extensions.command_activation_timeout_ms, 1000);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("host.toml");

        let mut config = HostConfig::default();
        config.extensions.root = dir.path().join("ext");
        config.save_to(&path).unwrap();

        let loaded = HostConfig::load_from(&path).unwrap();
        assert_eq!(loaded.extensions.root, dir.path().join("ext"));
        assert_eq!(loaded.extensions.modules_folder(), dir.path().join("ext").join("modules"));
    }
}
