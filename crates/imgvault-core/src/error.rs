//! Error types module
//!
//! All engine failures are unified under [`EngineError`]. The variants follow the
//! failure classes the engine distinguishes when deciding whether to retry, fall back
//! or surface an error: configuration, permission, not-found, transient network,
//! optimization, timeout, invalid input and integrity.
//!
//! Every variant self-describes how it should be reported through [`ErrorMetadata`],
//! so callers can log the technical cause while showing users a generic message.

use std::time::Duration;

/// Log level for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug level - for expected errors like missing keys
    Debug,
    /// Warning level - for recoverable issues like optimization fallbacks
    Warn,
    /// Error level - for failures that need operator attention
    Error,
}

/// Metadata for error reporting - defines how an error should be presented
pub trait ErrorMetadata {
    /// Machine-readable error code (e.g., "PERMISSION_DENIED")
    fn error_code(&self) -> &'static str;

    /// Whether this error is recoverable (can be retried)
    fn is_recoverable(&self) -> bool;

    /// Whether operators should be alerted
    fn requires_alert(&self) -> bool;

    /// Non-technical message safe to show to end users
    fn client_message(&self) -> String;

    /// Log level for this error
    fn log_level(&self) -> LogLevel;
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Permission denied: {0}")]
    Permission(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Transient network error: {0}")]
    TransientNetwork(String),

    #[error("Optimization failed: {0}")]
    Optimization(String),

    #[error("Operation timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    /// The object changed between the read and the write that depended on it.
    #[error("Conflicting update: {0}")]
    Conflict(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Integrity check failed for {key}: expected {expected}, got {actual}")]
    Integrity {
        key: String,
        expected: String,
        actual: String,
    },
}

impl EngineError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, EngineError::NotFound(_))
    }
}

/// Static metadata for each variant: (error_code, recoverable, alert, log_level).
fn engine_error_static_metadata(err: &EngineError) -> (&'static str, bool, bool, LogLevel) {
    match err {
        EngineError::Configuration(_) => ("CONFIGURATION_ERROR", false, true, LogLevel::Error),
        EngineError::Permission(_) => ("PERMISSION_DENIED", false, true, LogLevel::Error),
        EngineError::NotFound(_) => ("NOT_FOUND", false, false, LogLevel::Debug),
        EngineError::TransientNetwork(_) => ("TRANSIENT_NETWORK_ERROR", true, false, LogLevel::Warn),
        EngineError::Optimization(_) => ("OPTIMIZATION_FAILED", false, false, LogLevel::Warn),
        EngineError::Timeout(_) => ("TIMEOUT", false, false, LogLevel::Warn),
        EngineError::InvalidInput(_) => ("INVALID_INPUT", false, false, LogLevel::Debug),
        EngineError::Conflict(_) => ("CONFLICT", true, false, LogLevel::Warn),
        EngineError::Integrity { .. } => ("INTEGRITY_ERROR", false, true, LogLevel::Error),
    }
}

impl ErrorMetadata for EngineError {
    fn error_code(&self) -> &'static str {
        engine_error_static_metadata(self).0
    }

    fn is_recoverable(&self) -> bool {
        engine_error_static_metadata(self).1
    }

    fn requires_alert(&self) -> bool {
        engine_error_static_metadata(self).2
    }

    fn client_message(&self) -> String {
        match self {
            EngineError::NotFound(_) => "The image is not available.".to_string(),
            EngineError::Timeout(_) => {
                "Loading the image took too long. Please try again.".to_string()
            }
            EngineError::InvalidInput(msg) => format!("Invalid request: {}", msg),
            EngineError::Conflict(_) => {
                "The image was changed by another request. Please try again.".to_string()
            }
            EngineError::TransientNetwork(_) => {
                "The image service is temporarily unavailable. Please try again.".to_string()
            }
            EngineError::Configuration(_)
            | EngineError::Permission(_)
            | EngineError::Optimization(_)
            | EngineError::Integrity { .. } => {
                "Something went wrong while handling the image.".to_string()
            }
        }
    }

    fn log_level(&self) -> LogLevel {
        engine_error_static_metadata(self).3
    }
}
