//! Error types for GroupWarden
//!
//! This module defines all error types used throughout the bot.
//! Uses `thiserror` for ergonomic error handling with automatic `Display` and
//! `Error` trait implementations.

use thiserror::Error;

/// The primary error type for GroupWarden operations.
#[derive(Error, Debug)]
pub enum WardenError {
    /// Configuration-related errors (invalid config, missing required fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Conversation store errors (connection failures, command errors, etc.)
    #[error("Store error: {0}")]
    Store(String),

    /// Intent classifier errors (API failures, timeouts, etc.)
    #[error("Classifier error: {0}")]
    Classifier(String),

    /// Chat transport errors (connection failures, send failures, etc.)
    #[error("Transport error: {0}")]
    Transport(String),

    /// The transport rejected an operation for lack of permissions
    /// (e.g. the bot was removed from a group). Terminal for that room.
    #[error("Transport forbidden: {0}")]
    TransportForbidden(String),

    /// Action handler failures during `handle`
    #[error("Action error: {0}")]
    Action(String),

    /// Standard I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Update loop channel closed unexpectedly
    #[error("Bus error: channel closed")]
    BusClosed,

    /// Resource not found (rooms, mentions, actions, etc.)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Authentication or authorization failures
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
}

impl From<redis::RedisError> for WardenError {
    fn from(err: redis::RedisError) -> Self {
        WardenError::Store(err.to_string())
    }
}

/// A specialized `Result` type for GroupWarden operations.
pub type Result<T> = std::result::Result<T, WardenError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = WardenError::Config("missing bot token".to_string());
        assert_eq!(err.to_string(), "Configuration error: missing bot token");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let warden_err: WardenError = io_err.into();
        assert!(matches!(warden_err, WardenError::Io(_)));
    }

    #[test]
    fn test_error_from_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("{broken").unwrap_err();
        let warden_err: WardenError = json_err.into();
        assert!(matches!(warden_err, WardenError::Json(_)));
    }

    #[test]
    fn test_result_type() {
        fn returns_result() -> Result<i32> {
            Ok(42)
        }
        assert_eq!(returns_result().unwrap(), 42);
    }

    #[test]
    fn test_error_variants() {
        // Ensure all stringly variants can be created
        let _ = WardenError::Config("test".into());
        let _ = WardenError::Store("test".into());
        let _ = WardenError::Classifier("test".into());
        let _ = WardenError::Transport("test".into());
        let _ = WardenError::TransportForbidden("test".into());
        let _ = WardenError::Action("test".into());
        let _ = WardenError::BusClosed;
        let _ = WardenError::NotFound("test".into());
        let _ = WardenError::Unauthorized("test".into());
    }

    #[test]
    fn test_transport_forbidden_display() {
        let err = WardenError::TransportForbidden("bot was kicked from chat -100123".to_string());
        assert_eq!(
            err.to_string(),
            "Transport forbidden: bot was kicked from chat -100123"
        );
    }
}
