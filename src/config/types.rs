//! Configuration type definitions for GroupWarden
//!
//! This module defines all configuration structs used throughout the bot.
//! All types implement serde traits for JSON serialization and have sensible defaults.

use serde::{Deserialize, Serialize};

/// Main configuration struct for GroupWarden
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Telegram transport configuration
    pub telegram: TelegramConfig,
    /// Conversation store (Redis) configuration
    pub store: StoreConfig,
    /// Intent classifier configuration
    pub classifier: ClassifierConfig,
    /// Mention sweep configuration
    pub sweep: SweepConfig,
    /// Dialog state configuration
    pub dialog: DialogConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

// ============================================================================
// Telegram Configuration
// ============================================================================

/// Telegram transport configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TelegramConfig {
    /// Whether the transport is enabled
    pub enabled: bool,
    /// Bot token from BotFather
    pub token: String,
    /// Allowlist of user IDs (empty = allow all)
    pub allow_from: Vec<String>,
    /// Deny users not on the allowlist even when the allowlist is empty
    pub deny_by_default: bool,
}

// ============================================================================
// Store Configuration
// ============================================================================

/// Conversation store (Redis) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Redis connection URL
    pub url: String,
    /// Prefix applied to every key written by this bot instance
    pub key_prefix: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            key_prefix: "groupwarden".to_string(),
        }
    }
}

// ============================================================================
// Classifier Configuration
// ============================================================================

/// Intent classifier configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// API key for the hosted model
    pub api_key: String,
    /// Base URL for the API (OpenAI-compatible chat completions)
    pub api_base: String,
    /// Model identifier to request
    pub model: String,
    /// Confidence boundary: a nomination must be strictly greater to pass
    pub confidence_threshold: f64,
    /// Request timeout in seconds; expiry is treated as classifier failure
    pub timeout_secs: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_base: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            confidence_threshold: 0.5,
            timeout_secs: 8,
        }
    }
}

// ============================================================================
// Sweep Configuration
// ============================================================================

/// Mention sweep configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    /// Whether the background sweep runs
    pub enabled: bool,
    /// Interval between sweep cycles, in seconds
    pub interval_secs: u64,
    /// Age after which an unresponded mention is escalated, in seconds
    pub mention_timeout_secs: u64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 300,
            mention_timeout_secs: 1800,
        }
    }
}

// ============================================================================
// Dialog Configuration
// ============================================================================

/// Dialog state configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DialogConfig {
    /// Seconds after which abandoned dialog state is treated as absent.
    /// 0 disables expiry.
    pub ttl_secs: u64,
}

impl Default for DialogConfig {
    fn default() -> Self {
        Self { ttl_secs: 3600 }
    }
}

// ============================================================================
// Logging Configuration
// ============================================================================

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable colored output
    Pretty,
    /// Compact text with a structured `component` field for grep-based filtering
    #[default]
    Component,
    /// JSON lines for log aggregators
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Output format
    pub format: LogFormat,
    /// Log level filter (overridden by RUST_LOG when set)
    pub level: String,
    /// Optional log file path (stdout when unset)
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Component,
            level: "info".to_string(),
            file: None,
        }
    }
}
