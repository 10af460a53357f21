//! `SQLite` Engine Adapter
//!
//! # Features
//! - File-based connections (`/path/to/db.sqlite`)
//! - Schema enumeration of user tables via `sqlite_master`
//! - Bounded table samples via `SELECT * ... LIMIT n`
//!
//! # Implementation Notes
//! - Uses `rusqlite` (synchronous driver); every call runs on the blocking pool
//! - The database file must already exist; the console never creates one
//! - If the calling future is dropped (timeout), the running statement is interrupted
//! - BLOB data is Base64-encoded for JSON safety

use rusqlite::{Connection, InterruptHandle, OpenFlags, Row};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::descriptor::ConnectionDescriptor;
use crate::engine::{
    quote_identifier, ConnectionInfo, EngineAdapter, EngineKind, EngineSettings, QueryResult,
    Row as ResultRow, SchemaEntry,
};
use crate::error::{ConsoleError, Result};

const ENGINE: &str = "sqlite";

/// `SQLite` engine adapter
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteEngine {
    settings: EngineSettings,
}

impl SqliteEngine {
    /// Create an adapter with the given settings
    #[must_use]
    pub const fn new(settings: EngineSettings) -> Self {
        Self { settings }
    }
}

impl EngineAdapter for SqliteEngine {
    async fn connect(&self, descriptor: &ConnectionDescriptor) -> Result<ConnectionInfo> {
        let path = database_path(descriptor)?;
        let connected_database = path
            .file_name()
            .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());

        let version = with_connection(descriptor, |conn| {
            conn.query_row("SELECT sqlite_version()", [], |row| row.get::<_, String>(0))
                .map_err(|e| {
                    ConsoleError::connection_failed(format!("Failed to query SQLite version: {e}"))
                })
        })
        .await?;

        Ok(ConnectionInfo { server_version: version, connected_database, user: None })
    }

    async fn execute(&self, descriptor: &ConnectionDescriptor, command: &str) -> Result<QueryResult> {
        let command = command.to_string();
        with_connection(descriptor, move |conn| execute_query(conn, &command)).await
    }

    async fn list_schema(&self, descriptor: &ConnectionDescriptor) -> Result<Vec<SchemaEntry>> {
        with_connection(descriptor, |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT name FROM sqlite_master
                     WHERE type = 'table'
                     AND name NOT LIKE 'sqlite_%'
                     ORDER BY name",
                )
                .map_err(|e| {
                    ConsoleError::engine_error(ENGINE, format!("Failed to query tables: {e}"))
                })?;

            let names = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .and_then(|rows| rows.collect::<rusqlite::Result<Vec<String>>>())
                .map_err(|e| {
                    ConsoleError::engine_error(ENGINE, format!("Failed to fetch table names: {e}"))
                })?;

            Ok(names.into_iter().map(SchemaEntry::table).collect())
        })
        .await
    }

    async fn sample_target(
        &self,
        descriptor: &ConnectionDescriptor,
        target: &str,
    ) -> Result<QueryResult> {
        if target.is_empty() {
            return Err(ConsoleError::invalid_input("Table name must be provided to sample"));
        }

        let query =
            format!("SELECT * FROM {} LIMIT {}", quote_identifier(target), self.settings.sample_limit);
        with_connection(descriptor, move |conn| execute_query(conn, &query)).await
    }
}

/// Database file of a validated `SQLite` descriptor
fn database_path(descriptor: &ConnectionDescriptor) -> Result<PathBuf> {
    if descriptor.engine() != EngineKind::Sqlite {
        return Err(ConsoleError::invalid_input(format!(
            "Expected SQLite engine, got {}",
            descriptor.engine()
        )));
    }

    descriptor
        .file()
        .map(PathBuf::from)
        .ok_or_else(|| ConsoleError::invalid_input("SQLite requires 'file' parameter"))
}

/// Open an existing database file for reading and writing
fn open_connection(path: &Path) -> Result<Connection> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_URI
        | OpenFlags::SQLITE_OPEN_NO_MUTEX;

    Connection::open_with_flags(path, flags).map_err(|e| {
        ConsoleError::connection_failed(format!(
            "Failed to open SQLite database '{}': {e}",
            path.display()
        ))
    })
}

/// Interrupts the connection's running statement unless disarmed
struct InterruptOnDrop(Option<InterruptHandle>);

impl InterruptOnDrop {
    fn disarm(mut self) {
        self.0 = None;
    }
}

impl Drop for InterruptOnDrop {
    fn drop(&mut self) {
        if let Some(handle) = self.0.take() {
            handle.interrupt();
        }
    }
}

/// Run `work` against a fresh connection on the blocking pool
///
/// The connection moves into the closure and is closed when the closure returns.
async fn with_connection<T, F>(descriptor: &ConnectionDescriptor, work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&Connection) -> Result<T> + Send + 'static,
{
    let path = database_path(descriptor)?;

    let conn = tokio::task::spawn_blocking(move || open_connection(&path))
        .await
        .map_err(|e| ConsoleError::engine_error(ENGINE, format!("Blocking task failed: {e}")))?
        .inspect_err(|_| warn!(db = %descriptor.redacted(), "sqlite open failed"))?;

    let guard = InterruptOnDrop(Some(conn.get_interrupt_handle()));
    let outcome = tokio::task::spawn_blocking(move || work(&conn)).await;
    guard.disarm();

    outcome.map_err(|e| ConsoleError::engine_error(ENGINE, format!("Blocking task failed: {e}")))?
}

/// Classify a driver error raised while running a command
fn map_sqlite_error(e: rusqlite::Error) -> ConsoleError {
    match e {
        rusqlite::Error::SqliteFailure(code, message) => {
            let detail = message.unwrap_or_else(|| code.to_string());
            match code.code {
                rusqlite::ErrorCode::CannotOpen
                | rusqlite::ErrorCode::NotADatabase
                | rusqlite::ErrorCode::PermissionDenied => ConsoleError::connection_failed(detail),
                _ => ConsoleError::syntax_error(ENGINE, detail),
            }
        }
        other => ConsoleError::engine_error(ENGINE, other.to_string()),
    }
}

/// Execute a command and shape the reply
fn execute_query(conn: &Connection, query: &str) -> Result<QueryResult> {
    let mut stmt = conn.prepare(query).map_err(map_sqlite_error)?;

    let column_names: Vec<String> = stmt.column_names().iter().map(|s| (*s).to_string()).collect();

    if column_names.is_empty() {
        // INSERT, UPDATE, DELETE, DDL
        stmt.execute([]).map_err(map_sqlite_error)?;
        return Ok(QueryResult::status(format!("{} rows affected", conn.changes())));
    }

    let rows_data = stmt
        .query([])
        .map_err(map_sqlite_error)?
        .mapped(|row| row_to_json(&column_names, row))
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(map_sqlite_error)?;

    Ok(QueryResult::tabular(column_names, rows_data))
}

/// Convert a `SQLite` row to a column-keyed map
fn row_to_json(column_names: &[String], row: &Row) -> rusqlite::Result<ResultRow> {
    let mut values = ResultRow::new();

    for (idx, name) in column_names.iter().enumerate() {
        values.insert(name.clone(), sqlite_value_to_json(row, idx)?);
    }

    Ok(values)
}

/// Convert `SQLite` value to JSON value
fn sqlite_value_to_json(row: &Row, idx: usize) -> rusqlite::Result<serde_json::Value> {
    use rusqlite::types::ValueRef;
    use serde_json::Value;

    Ok(match row.get_ref(idx)? {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Number(i.into()),
        // NaN/Infinity become null
        ValueRef::Real(f) => serde_json::Number::from_f64(f).map_or(Value::Null, Value::Number),
        ValueRef::Text(s) => Value::String(String::from_utf8_lossy(s).into_owned()),
        ValueRef::Blob(b) => {
            use base64::Engine;
            Value::String(base64::engine::general_purpose::STANDARD.encode(b))
        }
    })
}
