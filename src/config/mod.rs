//! Configuration management for GroupWarden
//!
//! This module provides configuration loading, saving, and global state management.
//! Configuration is loaded from `~/.groupwarden/config.json` with environment
//! variable overrides.

mod types;

pub use types::*;

use crate::error::{Result, WardenError};
use once_cell::sync::OnceCell;
use std::path::PathBuf;
use std::sync::RwLock;

/// Global configuration instance
static CONFIG: OnceCell<RwLock<Config>> = OnceCell::new();

impl Config {
    /// Returns the GroupWarden configuration directory path (~/.groupwarden)
    pub fn dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".groupwarden")
    }

    /// Returns the path to the config file (~/.groupwarden/config.json)
    pub fn path() -> PathBuf {
        Self::dir().join("config.json")
    }

    /// Load configuration from the default path with environment overrides.
    ///
    /// If the config file doesn't exist, returns default configuration.
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::path())
    }

    /// Load configuration from a specific path with environment overrides.
    pub fn load_from_path(path: &PathBuf) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            serde_json::from_str(&content)?
        } else {
            Config::default()
        };

        config.apply_env_overrides();

        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables follow the pattern: GROUPWARDEN_SECTION_KEY
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("GROUPWARDEN_TELEGRAM_TOKEN") {
            self.telegram.token = val;
            self.telegram.enabled = true;
        }
        if let Ok(val) = std::env::var("GROUPWARDEN_STORE_URL") {
            self.store.url = val;
        }
        if let Ok(val) = std::env::var("GROUPWARDEN_STORE_KEY_PREFIX") {
            self.store.key_prefix = val;
        }
        if let Ok(val) = std::env::var("GROUPWARDEN_CLASSIFIER_API_KEY") {
            self.classifier.api_key = val;
        }
        if let Ok(val) = std::env::var("GROUPWARDEN_CLASSIFIER_API_BASE") {
            self.classifier.api_base = val;
        }
        if let Ok(val) = std::env::var("GROUPWARDEN_CLASSIFIER_MODEL") {
            self.classifier.model = val;
        }
        if let Ok(val) = std::env::var("GROUPWARDEN_SWEEP_INTERVAL_SECS") {
            if let Ok(v) = val.parse() {
                self.sweep.interval_secs = v;
            }
        }
        if let Ok(val) = std::env::var("GROUPWARDEN_SWEEP_MENTION_TIMEOUT_SECS") {
            if let Ok(v) = val.parse() {
                self.sweep.mention_timeout_secs = v;
            }
        }
        if let Ok(val) = std::env::var("GROUPWARDEN_DIALOG_TTL_SECS") {
            if let Ok(v) = val.parse() {
                self.dialog.ttl_secs = v;
            }
        }
        if let Ok(val) = std::env::var("GROUPWARDEN_LOG_LEVEL") {
            self.logging.level = val;
        }
    }

    /// Save configuration to the default path.
    pub fn save(&self) -> Result<()> {
        self.save_to_path(&Self::path())
    }

    /// Save configuration to a specific path, creating parent directories.
    pub fn save_to_path(&self, path: &PathBuf) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Initialize the global configuration instance.
    ///
    /// Subsequent calls replace the stored config.
    pub fn set_global(config: Config) {
        match CONFIG.get() {
            Some(lock) => {
                if let Ok(mut guard) = lock.write() {
                    *guard = config;
                }
            }
            None => {
                let _ = CONFIG.set(RwLock::new(config));
            }
        }
    }

    /// Get a clone of the global configuration.
    ///
    /// Returns an error if `set_global` was never called.
    pub fn global() -> Result<Config> {
        CONFIG
            .get()
            .and_then(|lock| lock.read().ok().map(|guard| guard.clone()))
            .ok_or_else(|| WardenError::Config("global config not initialized".into()))
    }

    /// Basic sanity checks before starting the bot.
    pub fn validate(&self) -> Result<()> {
        if self.telegram.enabled && self.telegram.token.is_empty() {
            return Err(WardenError::Config(
                "telegram is enabled but token is empty".into(),
            ));
        }
        if self.classifier.timeout_secs == 0 {
            return Err(WardenError::Config(
                "classifier.timeout_secs must be non-zero".into(),
            ));
        }
        if self.sweep.enabled && self.sweep.interval_secs == 0 {
            return Err(WardenError::Config(
                "sweep.interval_secs must be non-zero when the sweep is enabled".into(),
            ));
        }
        Ok(())
    }
}
