//! dbconsole - Multi-Engine Database Console
//!
//! dbconsole is the engine behind a database console: it connects to `PostgreSQL`, `SQLite`
//! and Redis through one adapter interface, browses their schema, runs operator commands,
//! and holds destructive commands behind a timed confirmation step.
//!
//! # Core Principles
//! - Command text is passed to the engine verbatim (vendor SQL, native Redis commands)
//! - Destructive commands never run on the first request; they are confirmed after a delay
//! - One session, one pending command; a newer dangerous command replaces the older one
//! - Credentials never appear in logs, signatures, or error messages
//!
//! # Architecture
//! The library holds all behavior. The CLI (`main.rs`), the interactive console, and the
//! JSON-RPC tool server are thin wrappers over [`ConsoleSession`].
//!
//! # Module Organization
//! - [`error`] - Error types and stable error codes
//! - [`output`] - JSON output envelope types
//! - [`descriptor`] - Validated connection descriptors and their signatures
//! - [`engine`] - Adapter trait, engine router, and the per-engine adapters
//! - [`classify`] - Dangerous-command classification
//! - [`command`] - Commands as submitted to the pipeline
//! - [`gate`] - Timed confirmation of dangerous commands
//! - [`synth`] - Command synthesis for context actions
//! - [`history`] - Bounded, deduplicated command history
//! - [`cache`] - Schema inventory cache keyed by connection signature
//! - [`session`] - Per-operator state and the execution pipeline
//! - [`config`] - Saved connections and settings
//! - [`console`] - Interactive console loop
//! - [`mcp`] - JSON-RPC tool server over stdio

pub mod cache;
pub mod classify;
pub mod command;
pub mod config;
pub mod console;
pub mod descriptor;
pub mod engine;
pub mod error;
pub mod gate;
pub mod history;
pub mod mcp;
pub mod output;
pub mod session;
pub mod synth;

// Re-export commonly used types for convenience
pub use cache::SchemaCache;
pub use classify::{classify, classify_for, Safety};
pub use command::{tokenize, RawCommand};
pub use config::{
    load_with_precedence, save_connection, ConfigLocation, ConsoleConfig, SettingsFile,
    StoredConnection,
};
pub use descriptor::{ConnectionConfig, ConnectionDescriptor, ConnectionSignature};
pub use engine::{
    ConnectionInfo, EngineAdapter, EngineFamily, EngineKind, EngineSettings, Engines, EntryKind,
    QueryResult, Row, SchemaEntry,
};
pub use error::{ConsoleError, Result, ValidationError};
pub use gate::{ConfirmationGate, PendingConfirmation, REQUIRED_DELAY};
pub use history::{ExecutionRecord, HistoryLedger, HISTORY_CAPACITY};
pub use output::{ErrorEnvelope, ErrorInfo, Metadata, SuccessEnvelope};
pub use session::{
    ConsoleSession, ExecutionOutcome, RunStatus, SessionRegistry, SessionSettings,
};
pub use synth::{synthesize, ContextAction};
