//! Error Handling Infrastructure
//!
//! This module defines all error types used throughout dbconsole.
//! All errors are structured and map to stable error codes for JSON output.
//!
//! # Error Categories
//! - `Validation`: Malformed connection descriptor, rejected before any network call
//! - `ConnectionFailed`: Engine unreachable or credentials rejected
//! - `SyntaxError`: Engine rejected the command text
//! - `Timeout`: No response from the engine within the bound
//! - `TooEarly` / `NoPendingConfirmation`: Local confirmation gate state, not engine faults
//! - `InvalidInput`: Malformed caller input (empty command, bad history index)
//! - `EngineError`: Engine-specific failure outside the categories above
//! - `ConfigError`: Configuration file or connection registry errors
//!
//! None of these is fatal to a session. Engine errors are reported, never retried.

use thiserror::Error;

/// Descriptor validation failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// A field required by the engine type is absent or empty
    #[error("{engine} connections require '{field}'")]
    MissingField { engine: &'static str, field: &'static str },

    /// A field is present but cannot be used by the engine
    #[error("invalid '{field}' for {engine}: {reason}")]
    InvalidField { engine: &'static str, field: &'static str, reason: String },
}

/// Main error type for console operations
#[derive(Error, Debug)]
pub enum ConsoleError {
    /// Connection descriptor failed validation
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Engine unreachable or authentication rejected
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Engine rejected the command text
    #[error("Command rejected by {engine}: {detail}")]
    SyntaxError { engine: String, detail: String },

    /// Engine did not answer within the configured bound
    #[error("No response from {engine} within {timeout_ms}ms")]
    Timeout { engine: String, timeout_ms: u64 },

    /// Confirmation attempted before the required delay elapsed
    #[error("Confirmation not allowed yet, {remaining_ms}ms remaining")]
    TooEarly { remaining_ms: u64 },

    /// Confirm requested while nothing is pending
    #[error("No command is awaiting confirmation")]
    NoPendingConfirmation,

    /// Invalid input or missing required parameters
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Engine-specific error
    #[error("Engine error ({engine}): {detail}")]
    EngineError { engine: String, detail: String },

    /// Configuration error (file not found, invalid JSON, etc.)
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl ConsoleError {
    /// Convert error to error code string for JSON output
    ///
    /// Error codes are stable and suitable for programmatic handling.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::ConnectionFailed(_) => "CONNECTION_FAILED",
            Self::SyntaxError { .. } => "SYNTAX_ERROR",
            Self::Timeout { .. } => "TIMEOUT",
            Self::TooEarly { .. } => "TOO_EARLY",
            Self::NoPendingConfirmation => "NO_PENDING_CONFIRMATION",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::EngineError { .. } => "ENGINE_ERROR",
            Self::ConfigError(_) => "CONFIG_ERROR",
        }
    }

    /// Get human-readable error message
    ///
    /// Never contains credentials: descriptors are only ever rendered redacted.
    #[must_use]
    pub fn message(&self) -> String {
        self.to_string()
    }

    /// Raw engine detail, when the error came from an engine
    #[must_use]
    pub fn detail(&self) -> Option<&str> {
        match self {
            Self::SyntaxError { detail, .. } | Self::EngineError { detail, .. } => Some(detail),
            _ => None,
        }
    }

    /// Whether the error is local gate state rather than an engine or input fault
    #[must_use]
    pub const fn is_gate_state(&self) -> bool {
        matches!(self, Self::TooEarly { .. } | Self::NoPendingConfirmation)
    }

    /// Create a connection failed error
    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::ConnectionFailed(message.into())
    }

    /// Create a syntax error for a command the engine rejected
    pub fn syntax_error(engine: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::SyntaxError { engine: engine.into(), detail: detail.into() }
    }

    /// Create a timeout error
    pub fn timeout(engine: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout { engine: engine.into(), timeout_ms }
    }

    /// Create an invalid input error
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Create an engine-specific error
    pub fn engine_error(engine: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::EngineError { engine: engine.into(), detail: detail.into() }
    }

    /// Create a configuration error
    pub fn config_error(message: impl Into<String>) -> Self {
        Self::ConfigError(message.into())
    }
}

/// Result type alias for console operations
pub type Result<T> = std::result::Result<T, ConsoleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let missing = ValidationError::MissingField { engine: "postgres", field: "host" };
        assert_eq!(ConsoleError::from(missing).error_code(), "VALIDATION_ERROR");
        assert_eq!(ConsoleError::connection_failed("test").error_code(), "CONNECTION_FAILED");
        assert_eq!(ConsoleError::syntax_error("postgres", "test").error_code(), "SYNTAX_ERROR");
        assert_eq!(ConsoleError::timeout("redis", 10).error_code(), "TIMEOUT");
        assert_eq!(ConsoleError::TooEarly { remaining_ms: 5 }.error_code(), "TOO_EARLY");
        assert_eq!(ConsoleError::NoPendingConfirmation.error_code(), "NO_PENDING_CONFIRMATION");
        assert_eq!(ConsoleError::invalid_input("test").error_code(), "INVALID_INPUT");
        assert_eq!(ConsoleError::engine_error("sqlite", "test").error_code(), "ENGINE_ERROR");
        assert_eq!(ConsoleError::config_error("test").error_code(), "CONFIG_ERROR");
    }

    #[test]
    fn test_error_messages() {
        let err = ConsoleError::from(ValidationError::MissingField {
            engine: "redis",
            field: "port",
        });
        assert!(err.message().contains("redis connections require 'port'"));

        let err = ConsoleError::timeout("postgres", 30_000);
        assert!(err.message().contains("postgres"));
        assert!(err.message().contains("30000ms"));
    }

    #[test]
    fn test_engine_detail() {
        let err = ConsoleError::syntax_error("postgres", "syntax error at or near \"SELEC\"");
        assert_eq!(err.detail(), Some("syntax error at or near \"SELEC\""));
        assert!(ConsoleError::connection_failed("refused").detail().is_none());
    }

    #[test]
    fn test_gate_state_errors() {
        assert!(ConsoleError::TooEarly { remaining_ms: 1 }.is_gate_state());
        assert!(ConsoleError::NoPendingConfirmation.is_gate_state());
        assert!(!ConsoleError::timeout("redis", 1).is_gate_state());
    }
}
