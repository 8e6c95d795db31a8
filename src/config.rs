//! Configuration management for filesender

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default remote directory that holds transfers
pub const DEFAULT_REMOTE_DIR: &str = "filesender";

/// Default file name of the persisted envelope
pub const DEFAULT_ENVELOPE_FILE: &str = "crypto.json";

pub const ENV_STORE_DIR: &str = "FILESENDER_STORE_DIR";
pub const ENV_REMOTE_DIR: &str = "FILESENDER_REMOTE_DIR";
pub const ENV_ENVELOPE: &str = "FILESENDER_ENVELOPE";
pub const ENV_LOG: &str = "FILESENDER_LOG";

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Default configuration directory (`~/.config/filesender`)
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("filesender")
}

/// Object store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Root directory of the object store
    pub root: PathBuf,

    /// Directory within the store that holds transfers
    #[serde(default = "default_remote_dir")]
    pub remote_dir: String,
}

fn default_remote_dir() -> String {
    DEFAULT_REMOTE_DIR.to_string()
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Object store configuration
    pub store: StoreConfig,

    /// Where the encrypted key material is kept
    pub envelope_path: PathBuf,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        let root = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("filesender")
            .join("store");

        StoreConfig {
            root,
            remote_dir: default_remote_dir(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            store: StoreConfig::default(),
            envelope_path: default_config_dir().join(DEFAULT_ENVELOPE_FILE),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a file, with environment variable overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::Config(format!("Failed to read config file: {}", e))
        })?;

        let mut config: Config = serde_json::from_str(&content).map_err(|e| {
            Error::Config(format!("Failed to parse config file: {}", e))
        })?;

        config.apply_env_overrides();

        config.validate()?;
        Ok(config)
    }

    /// Load configuration, falling back to defaults when the file does not exist
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            return Self::load(path);
        }

        let mut config = Config::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Apply overrides from `lookup`, keyed by environment variable name.
    /// Blank values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let value = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(dir) = value(ENV_STORE_DIR) {
            self.store.root = PathBuf::from(dir);
        }

        if let Some(remote) = value(ENV_REMOTE_DIR) {
            self.store.remote_dir = remote;
        }

        if let Some(path) = value(ENV_ENVELOPE) {
            self.envelope_path = PathBuf::from(path);
        }

        if let Some(level) = value(ENV_LOG) {
            self.logging.level = level.to_lowercase();
        }
    }

    /// Save configuration to a file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self).map_err(|e| {
            Error::Config(format!("Failed to serialize config: {}", e))
        })?;

        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        std::fs::write(path.as_ref(), content).map_err(|e| {
            Error::Config(format!("Failed to write config file: {}", e))
        })?;

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let remote = self.store.remote_dir.as_str();
        if remote.is_empty() {
            return Err(Error::InvalidConfig(
                "Remote directory must not be empty".to_string(),
            ));
        }

        if remote.contains('/') || remote.contains('\\') || remote == "." || remote == ".." {
            return Err(Error::InvalidConfig(format!(
                "Remote directory must be a single path component: {}",
                remote
            )));
        }

        if self.envelope_path.as_os_str().is_empty() {
            return Err(Error::InvalidConfig(
                "Envelope path must not be empty".to_string(),
            ));
        }

        if !LOG_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(Error::InvalidConfig(format!(
                "Unknown log level: {}",
                self.logging.level
            )));
        }

        Ok(())
    }

    /// Ensure all required directories exist
    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.store.root)?;
        if let Some(parent) = self.envelope_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }
}
