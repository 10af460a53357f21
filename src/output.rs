//! JSON Output Envelopes
//!
//! Every CLI command and JSON-RPC tool answers with one of two envelopes.
//!
//! # Output Contract
//! - Success: `{"ok": true, "engine": "...", "command": "...", "data": {...}, "meta": {...}}`
//! - Error: `{"ok": false, "engine": "...", "command": "...", "error": {"code": "...", "message": "..."}}`
//!
//! `engine` is empty when the failure happened before an engine was known (bad config,
//! gate state with nothing pending).

use serde::{Deserialize, Serialize};

use crate::engine::QueryResult;
use crate::error::ConsoleError;

/// Success envelope for operation results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessEnvelope<T> {
    /// Always true for success envelopes
    pub ok: bool,

    /// Engine the operation ran against (postgres, sqlite, redis)
    pub engine: String,

    /// Operation name (schema, execute, confirm, action, ...)
    pub command: String,

    /// Operation-specific data
    pub data: T,

    /// Execution metadata
    pub meta: Metadata,
}

impl<T> SuccessEnvelope<T> {
    /// Successful envelope for `command` on `engine`
    pub fn new(engine: impl Into<String>, command: impl Into<String>, data: T, meta: Metadata) -> Self {
        Self { ok: true, engine: engine.into(), command: command.into(), data, meta }
    }
}

/// Error envelope for operation failures
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    /// Always false for error envelopes
    pub ok: bool,

    pub engine: String,

    pub command: String,

    pub error: ErrorInfo,
}

impl ErrorEnvelope {
    /// Failed envelope for `command` on `engine`
    pub fn new(engine: impl Into<String>, command: impl Into<String>, error: ErrorInfo) -> Self {
        Self { ok: false, engine: engine.into(), command: command.into(), error }
    }

    /// Build an envelope from a console error
    pub fn from_error(
        engine: impl Into<String>,
        command: impl Into<String>,
        err: &ConsoleError,
    ) -> Self {
        Self::new(engine, command, ErrorInfo::from(err))
    }
}

/// Error information structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Stable error code (e.g., "TOO_EARLY", "CONNECTION_FAILED")
    pub code: String,

    /// Human-readable message, free of credentials
    pub message: String,
}

impl ErrorInfo {
    /// Error info without detail
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self { code: code.into(), message: message.into() }
    }
}

impl From<&ConsoleError> for ErrorInfo {
    fn from(err: &ConsoleError) -> Self {
        Self::new(err.error_code(), err.message())
    }
}

/// Execution metadata included in all success responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// Wall-clock time of the adapter call in milliseconds
    pub execution_ms: u64,

    /// Rows returned, for tabular results
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows_returned: Option<usize>,
}

impl Metadata {
    /// Metadata with timing only
    #[must_use]
    pub const fn new(execution_ms: u64) -> Self {
        Self { execution_ms, rows_returned: None }
    }

    /// Metadata with timing and a row count
    #[must_use]
    pub const fn with_rows(execution_ms: u64, rows_returned: usize) -> Self {
        Self { execution_ms, rows_returned: Some(rows_returned) }
    }

    /// Metadata describing `result`
    #[must_use]
    pub fn for_result(execution_ms: u64, result: &QueryResult) -> Self {
        Self { execution_ms, rows_returned: result.row_count() }
    }
}
