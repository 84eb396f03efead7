//! Configuration module for the directory watcher.
//!
//! This module provides a layered configuration system that supports:
//! - Default values
//! - TOML configuration file (`.dirwatch/settings.toml`)
//! - Environment variable overrides
//! - CLI argument overrides (applied by the binary)
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `DIRWATCH_` and use double
//! underscores to separate nested levels:
//! - `DIRWATCH_WATCHER__LATENCY_MS=5` sets `watcher.latency_ms`
//! - `DIRWATCH_WATCHER__FILE_EVENTS=false` sets `watcher.file_events`
//! - `DIRWATCH_LOGGING__DEFAULT=debug` sets `logging.default`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::watcher::{StreamConfig, StreamFlags};

/// Directory holding the settings file, searched from the current directory up.
pub const CONFIG_DIR: &str = ".dirwatch";
pub const CONFIG_FILE: &str = "settings.toml";
const ENV_PREFIX: &str = "DIRWATCH_";

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// Native stream settings
    #[serde(default)]
    pub watcher: WatcherConfig,

    /// Log levels
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct WatcherConfig {
    /// Batching latency of the native stream in milliseconds
    #[serde(default = "default_latency_ms")]
    pub latency_ms: u64,

    /// Report individual files rather than their parent directories
    #[serde(default = "default_true")]
    pub file_events: bool,

    /// Watch whole subtrees; required for root containment
    #[serde(default = "default_true")]
    pub recursive: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Default level for every target
    #[serde(default = "default_log_level")]
    pub default: String,

    /// Per-target level overrides, e.g. `dirwatch = "debug"`
    #[serde(default)]
    pub modules: BTreeMap<String, String>,
}

// Default value functions
fn default_version() -> u32 {
    1
}
fn default_latency_ms() -> u64 {
    1
}
fn default_true() -> bool {
    true
}
fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            watcher: WatcherConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            latency_ms: default_latency_ms(),
            file_events: true,
            recursive: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: BTreeMap::new(),
        }
    }
}

impl WatcherConfig {
    /// Native stream configuration for these settings.
    pub fn stream_config(&self) -> StreamConfig {
        let mut flags = StreamFlags::empty();
        if self.file_events {
            flags |= StreamFlags::FILE_EVENTS;
        }
        if self.recursive {
            flags |= StreamFlags::RECURSIVE;
        }

        StreamConfig {
            latency: Duration::from_millis(self.latency_ms),
            flags,
        }
    }
}

impl Settings {
    /// Load configuration from all sources
    pub fn load() -> Result<Self, Box<figment::Error>> {
        let config_path = Self::find_workspace_config()
            .unwrap_or_else(|| PathBuf::from(CONFIG_DIR).join(CONFIG_FILE));

        Self::load_from(config_path)
    }

    /// Load configuration from a specific file, still honoring env overrides
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, Box<figment::Error>> {
        Figment::new()
            // Start with defaults
            .merge(Serialized::defaults(Settings::default()))
            // Layer in config file if it exists
            .merge(Toml::file(path.as_ref()))
            // Double underscore separates nested levels; single underscores
            // stay inside field names
            .merge(Env::prefixed(ENV_PREFIX).map(|key| {
                key.as_str()
                    .to_lowercase()
                    .replace("__", ".")
                    .into()
            }))
            .extract()
            .map_err(Box::new)
    }

    /// Find the settings file by looking for `.dirwatch` from the current
    /// directory up to the root
    fn find_workspace_config() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;

        for ancestor in current.ancestors() {
            let config_dir = ancestor.join(CONFIG_DIR);
            if config_dir.is_dir() {
                return Some(config_dir.join(CONFIG_FILE));
            }
        }

        None
    }

    /// Save current configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Box<dyn std::error::Error>> {
        let parent = path.as_ref().parent().ok_or("Invalid path")?;
        std::fs::create_dir_all(parent)?;

        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;

        Ok(())
    }

    /// Render as TOML for display
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Create a default settings file under the current directory
    pub fn init_config_file(force: bool) -> Result<PathBuf, Box<dyn std::error::Error>> {
        Self::init_config_file_in(Path::new("."), force)
    }

    /// Create a default settings file under `root`
    pub fn init_config_file_in(
        root: &Path,
        force: bool,
    ) -> Result<PathBuf, Box<dyn std::error::Error>> {
        let config_path = root.join(CONFIG_DIR).join(CONFIG_FILE);

        if !force && config_path.exists() {
            return Err("Configuration file already exists. Use --force to overwrite".into());
        }

        Settings::default().save(&config_path)?;
        Ok(config_path)
    }
}
