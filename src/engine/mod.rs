//! Database Engine Adapters and Core Types
//!
//! This module defines the adapter abstraction the console runs commands through.
//! Each engine (`PostgreSQL`, `SQLite`, Redis) implements the `EngineAdapter` trait with
//! the same fixed capability set: `connect`, `execute`, `list_schema`, `sample_target`.
//!
//! # Connection Scope
//! Adapters hold no connections. Every call opens a connection, uses it, and drops it
//! before returning. The connection is owned by the call's future (or blocking closure),
//! so it is released on every exit path, including a timeout that drops the future.
//!
//! # Closed Engine Set
//! [`Engines`] dispatches on [`EngineKind`]. Adding an engine means adding a variant and
//! a match arm, never ad-hoc branching elsewhere.

use serde::{Deserialize, Serialize};
use std::future::Future;

use crate::descriptor::ConnectionDescriptor;
use crate::error::{ConsoleError, Result};

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "redis")]
pub mod redis;

/// Row limit for `sample_target` when nothing else is configured
pub const DEFAULT_SAMPLE_LIMIT: usize = 50;

/// Key count after which a key-value schema scan stops
pub const DEFAULT_SCAN_LIMIT: usize = 100;

/// Supported database engine types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// `PostgreSQL` database
    Postgres,
    /// `SQLite` database file
    Sqlite,
    /// Redis key-value store
    Redis,
}

impl EngineKind {
    /// Get the engine name as a string
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::Sqlite => "sqlite",
            Self::Redis => "redis",
        }
    }

    /// Command model the engine speaks
    #[must_use]
    pub const fn family(&self) -> EngineFamily {
        match self {
            Self::Postgres | Self::Sqlite => EngineFamily::Relational,
            Self::Redis => EngineFamily::KeyValue,
        }
    }
}

impl std::fmt::Display for EngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for EngineKind {
    type Err = ConsoleError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "sqlite" => Ok(Self::Sqlite),
            "redis" => Ok(Self::Redis),
            other => Err(ConsoleError::invalid_input(format!(
                "Unsupported engine '{other}'. Must be postgres, sqlite, or redis"
            ))),
        }
    }
}

/// Engine families share a command language and schema model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineFamily {
    /// SQL-speaking engines whose schema entries are tables
    Relational,
    /// Command-based stores whose schema entries are typed keys
    #[serde(rename = "keyvalue")]
    KeyValue,
}

/// Kind of a schema entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntryKind {
    /// Relational table
    Table,
    /// Key-value string
    String,
    /// Key-value hash
    Hash,
    /// Key-value list
    List,
    /// Key-value set
    Set,
    /// Key-value sorted set
    SortedSet,
    /// Key-value stream
    Stream,
    /// Type could not be determined
    Unknown,
}

impl EntryKind {
    /// Map a Redis `TYPE` reply onto an entry kind
    #[must_use]
    pub fn from_redis_type(type_name: &str) -> Self {
        match type_name {
            "string" => Self::String,
            "hash" => Self::Hash,
            "list" => Self::List,
            "set" => Self::Set,
            "zset" => Self::SortedSet,
            "stream" => Self::Stream,
            _ => Self::Unknown,
        }
    }

    /// Wire name of the kind
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Table => "table",
            Self::String => "string",
            Self::Hash => "hash",
            Self::List => "list",
            Self::Set => "set",
            Self::SortedSet => "sorted-set",
            Self::Stream => "stream",
            Self::Unknown => "unknown",
        }
    }
}

impl std::str::FromStr for EntryKind {
    type Err = ConsoleError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "table" => Ok(Self::Table),
            "string" => Ok(Self::String),
            "hash" => Ok(Self::Hash),
            "list" => Ok(Self::List),
            "set" => Ok(Self::Set),
            "sorted-set" | "zset" => Ok(Self::SortedSet),
            "stream" => Ok(Self::Stream),
            "unknown" => Ok(Self::Unknown),
            other => Err(ConsoleError::invalid_input(format!("Unknown entry kind '{other}'"))),
        }
    }
}

/// One named, typed object discoverable by introspection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaEntry {
    /// Table or key name
    pub name: String,

    /// Engine-specific kind
    pub kind: EntryKind,
}

impl SchemaEntry {
    /// Create a schema entry
    pub fn new(name: impl Into<String>, kind: EntryKind) -> Self {
        Self { name: name.into(), kind }
    }

    /// Create a relational table entry
    pub fn table(name: impl Into<String>) -> Self {
        Self::new(name, EntryKind::Table)
    }
}

/// A single result row: column name to JSON value
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Uniform command result
///
/// Exactly one shape is populated: a table, or a status message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryResult {
    /// Result set
    Tabular {
        /// Column names in result order
        columns: Vec<String>,
        /// Result rows
        rows: Vec<Row>,
    },
    /// Scalar reply or statement status
    Status {
        /// Human-readable reply
        message: String,
    },
}

impl QueryResult {
    /// Create a tabular result
    #[must_use]
    pub const fn tabular(columns: Vec<String>, rows: Vec<Row>) -> Self {
        Self::Tabular { columns, rows }
    }

    /// Create a status result
    pub fn status(message: impl Into<String>) -> Self {
        Self::Status { message: message.into() }
    }

    /// Number of rows for tabular results, `None` for status results
    #[must_use]
    pub fn row_count(&self) -> Option<usize> {
        match self {
            Self::Tabular { rows, .. } => Some(rows.len()),
            Self::Status { .. } => None,
        }
    }

    /// Single value of a one-row, one-column table, or the status message
    #[must_use]
    pub fn as_scalar(&self) -> Option<serde_json::Value> {
        match self {
            Self::Tabular { columns, rows } if columns.len() == 1 && rows.len() == 1 => {
                rows[0].get(&columns[0]).cloned()
            }
            Self::Tabular { .. } => None,
            Self::Status { message } => Some(serde_json::Value::String(message.clone())),
        }
    }
}

/// Connection information returned after a successful `connect`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    /// Server version string
    pub server_version: String,

    /// Database (or logical database index) the connection landed in
    pub connected_database: String,

    /// Connected user name, when the engine has users
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

/// Engine-side knobs shared by all adapters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Row limit for `sample_target` on relational engines and Redis streams
    pub sample_limit: usize,

    /// Key count after which a key-value schema scan stops
    pub scan_limit: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self { sample_limit: DEFAULT_SAMPLE_LIMIT, scan_limit: DEFAULT_SCAN_LIMIT }
    }
}

/// Engine adapter capability set
///
/// Every method opens and releases its own connection. Errors are classified as
/// `ConnectionFailed`, `SyntaxError`, or `EngineError`; timeouts are applied by the caller.
pub trait EngineAdapter: Send + Sync {
    /// Open a connection, report server metadata, and close it
    fn connect(
        &self,
        descriptor: &ConnectionDescriptor,
    ) -> impl Future<Output = Result<ConnectionInfo>> + Send;

    /// Run a raw command and shape its reply
    fn execute(
        &self,
        descriptor: &ConnectionDescriptor,
        command: &str,
    ) -> impl Future<Output = Result<QueryResult>> + Send;

    /// Enumerate tables or keys
    fn list_schema(
        &self,
        descriptor: &ConnectionDescriptor,
    ) -> impl Future<Output = Result<Vec<SchemaEntry>>> + Send;

    /// Bounded read of one table or key
    fn sample_target(
        &self,
        descriptor: &ConnectionDescriptor,
        target: &str,
    ) -> impl Future<Output = Result<QueryResult>> + Send;
}

/// Quote a relational identifier, doubling embedded quotes
///
/// This guards against malformed syntax for odd table names. It is not an injection
/// boundary; commands come from an authenticated operator.
#[must_use]
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Router over the compiled-in engines
#[derive(Debug, Clone, Copy, Default)]
pub struct Engines {
    settings: EngineSettings,
}

impl Engines {
    /// Create a router with the given engine settings
    #[must_use]
    pub const fn new(settings: EngineSettings) -> Self {
        Self { settings }
    }

    /// Engine settings in effect
    #[must_use]
    pub const fn settings(&self) -> &EngineSettings {
        &self.settings
    }
}

#[allow(dead_code)]
fn engine_not_enabled(engine: EngineKind) -> ConsoleError {
    ConsoleError::engine_error(
        engine.as_str(),
        format!("{engine} engine not enabled. Build with --features {engine}"),
    )
}

/// Dispatch one adapter call to the engine named by the descriptor
macro_rules! dispatch {
    ($self:ident, $descriptor:ident, $engine:ident => $call:expr) => {
        match $descriptor.engine() {
            #[cfg(feature = "postgres")]
            EngineKind::Postgres => {
                let $engine = self::postgres::PostgresEngine::new($self.settings);
                $call.await
            }
            #[cfg(not(feature = "postgres"))]
            EngineKind::Postgres => Err(engine_not_enabled(EngineKind::Postgres)),

            #[cfg(feature = "sqlite")]
            EngineKind::Sqlite => {
                let $engine = self::sqlite::SqliteEngine::new($self.settings);
                $call.await
            }
            #[cfg(not(feature = "sqlite"))]
            EngineKind::Sqlite => Err(engine_not_enabled(EngineKind::Sqlite)),

            #[cfg(feature = "redis")]
            EngineKind::Redis => {
                let $engine = self::redis::RedisEngine::new($self.settings);
                $call.await
            }
            #[cfg(not(feature = "redis"))]
            EngineKind::Redis => Err(engine_not_enabled(EngineKind::Redis)),
        }
    };
}

impl EngineAdapter for Engines {
    async fn connect(&self, descriptor: &ConnectionDescriptor) -> Result<ConnectionInfo> {
        dispatch!(self, descriptor, engine => engine.connect(descriptor))
    }

    async fn execute(&self, descriptor: &ConnectionDescriptor, command: &str) -> Result<QueryResult> {
        dispatch!(self, descriptor, engine => engine.execute(descriptor, command))
    }

    async fn list_schema(&self, descriptor: &ConnectionDescriptor) -> Result<Vec<SchemaEntry>> {
        dispatch!(self, descriptor, engine => engine.list_schema(descriptor))
    }

    async fn sample_target(
        &self,
        descriptor: &ConnectionDescriptor,
        target: &str,
    ) -> Result<QueryResult> {
        dispatch!(self, descriptor, engine => engine.sample_target(descriptor, target))
    }
}
