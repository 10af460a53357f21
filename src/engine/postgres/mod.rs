//! `PostgreSQL` Engine Adapter
//!
//! # Features
//! - Client-server connections via TCP
//! - Schema enumeration of base tables in the current schema
//! - Bounded table samples via `SELECT * ... LIMIT n`
//! - Rich type conversion (JSON/JSONB, timestamps, UUID, BYTEA)
//!
//! # Implementation Notes
//! - Uses `tokio-postgres`; the connection task is spawned per call and ends when the
//!   client is dropped at the end of the call
//! - Errors carrying a server `DbError` are the engine rejecting the command and map to
//!   `SyntaxError`; a closed connection maps to `ConnectionFailed`
//! - BYTEA data is Base64-encoded for JSON safety
//! - Types without a JSON mapping are rendered as `<typename>` instead of failing the row

use tokio_postgres::{Client, Config, NoTls, Row};
use tracing::warn;

use crate::descriptor::ConnectionDescriptor;
use crate::engine::{
    quote_identifier, ConnectionInfo, EngineAdapter, EngineKind, EngineSettings, QueryResult,
    Row as ResultRow, SchemaEntry,
};
use crate::error::{ConsoleError, Result};

const ENGINE: &str = "postgres";

/// `PostgreSQL` engine adapter
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresEngine {
    settings: EngineSettings,
}

impl PostgresEngine {
    /// Create an adapter with the given settings
    #[must_use]
    pub const fn new(settings: EngineSettings) -> Self {
        Self { settings }
    }
}

impl EngineAdapter for PostgresEngine {
    async fn connect(&self, descriptor: &ConnectionDescriptor) -> Result<ConnectionInfo> {
        let client = open_client(descriptor).await?;

        let row = client
            .query_one("SELECT version(), current_database(), current_user::text", &[])
            .await
            .map_err(map_pg_error)?;

        let version_string: String = row.get(0);

        // "PostgreSQL 15.3 on x86_64..." -> "15.3"
        let server_version =
            version_string.split_whitespace().nth(1).unwrap_or("unknown").to_string();

        Ok(ConnectionInfo {
            server_version,
            connected_database: row.get(1),
            user: Some(row.get(2)),
        })
    }

    async fn execute(&self, descriptor: &ConnectionDescriptor, command: &str) -> Result<QueryResult> {
        let client = open_client(descriptor).await?;
        execute_query(&client, command).await
    }

    async fn list_schema(&self, descriptor: &ConnectionDescriptor) -> Result<Vec<SchemaEntry>> {
        let client = open_client(descriptor).await?;

        let query = "
            SELECT table_name::text
            FROM information_schema.tables
            WHERE table_schema = current_schema()
            AND table_type = 'BASE TABLE'
            ORDER BY table_name";

        let rows = client.query(query, &[]).await.map_err(|e| {
            ConsoleError::engine_error(ENGINE, format!("Failed to list tables: {e}"))
        })?;

        Ok(rows.iter().map(|row| SchemaEntry::table(row.get::<_, String>(0))).collect())
    }

    async fn sample_target(
        &self,
        descriptor: &ConnectionDescriptor,
        target: &str,
    ) -> Result<QueryResult> {
        if target.is_empty() {
            return Err(ConsoleError::invalid_input("Table name must be provided to sample"));
        }

        let client = open_client(descriptor).await?;
        let query =
            format!("SELECT * FROM {} LIMIT {}", quote_identifier(target), self.settings.sample_limit);
        execute_query(&client, &query).await
    }
}

/// Build `tokio-postgres` config from a validated descriptor
fn build_pg_config(descriptor: &ConnectionDescriptor) -> Result<Config> {
    // Validation guarantees these for postgres descriptors
    let (Some(host), Some(port), Some(user), Some(database)) =
        (descriptor.host(), descriptor.port(), descriptor.user(), descriptor.database())
    else {
        return Err(ConsoleError::invalid_input(format!(
            "Expected a validated PostgreSQL descriptor, got {}",
            descriptor.redacted()
        )));
    };

    if descriptor.engine() != EngineKind::Postgres {
        return Err(ConsoleError::invalid_input(format!(
            "Expected PostgreSQL engine, got {}",
            descriptor.engine()
        )));
    }

    let mut pg_config = Config::new();
    pg_config.host(host).port(port).user(user).dbname(database);
    if let Some(password) = descriptor.password() {
        pg_config.password(password);
    }

    Ok(pg_config)
}

/// Open a client whose connection task lives exactly as long as the client
async fn open_client(descriptor: &ConnectionDescriptor) -> Result<Client> {
    let pg_config = build_pg_config(descriptor)?;

    let (client, connection) = pg_config.connect(NoTls).await.map_err(|e| {
        warn!(db = %descriptor.redacted(), "postgres connection failed");
        ConsoleError::connection_failed(format!("Failed to connect to PostgreSQL: {e}"))
    })?;

    // Connection errors are not logged with detail to prevent credential leakage
    tokio::spawn(async move {
        let _ = connection.await;
    });

    Ok(client)
}

/// Classify a driver error
fn map_pg_error(e: tokio_postgres::Error) -> ConsoleError {
    match e.as_db_error() {
        Some(db) => ConsoleError::syntax_error(ENGINE, format!("{}: {}", db.severity(), db.message())),
        None if e.is_closed() => {
            ConsoleError::connection_failed(format!("PostgreSQL connection closed: {e}"))
        }
        None => ConsoleError::engine_error(ENGINE, e.to_string()),
    }
}

/// Execute a command and shape the reply
async fn execute_query(client: &Client, query: &str) -> Result<QueryResult> {
    let stmt = client.prepare(query).await.map_err(map_pg_error)?;

    if stmt.columns().is_empty() {
        // INSERT, UPDATE, DELETE, DDL
        let rows_affected = client.execute(&stmt, &[]).await.map_err(map_pg_error)?;
        return Ok(QueryResult::status(format!("{rows_affected} rows affected")));
    }

    let rows = client.query(&stmt, &[]).await.map_err(map_pg_error)?;

    let column_names: Vec<String> = stmt.columns().iter().map(|c| c.name().to_string()).collect();

    let rows_data = rows
        .iter()
        .map(|row| row_to_json(&column_names, row))
        .collect::<Result<Vec<_>>>()?;

    Ok(QueryResult::tabular(column_names, rows_data))
}

/// Convert a `PostgreSQL` row to a column-keyed map
fn row_to_json(column_names: &[String], row: &Row) -> Result<ResultRow> {
    let mut values = ResultRow::new();

    for (idx, name) in column_names.iter().enumerate() {
        values.insert(name.clone(), postgres_value_to_json(row, idx)?);
    }

    Ok(values)
}

/// Fetch a nullable column value of a concrete type
fn get<'a, T>(row: &'a Row, idx: usize) -> Result<Option<T>>
where
    T: tokio_postgres::types::FromSql<'a>,
{
    row.try_get::<_, Option<T>>(idx).map_err(|e| {
        ConsoleError::engine_error(ENGINE, format!("Failed to read column {idx}: {e}"))
    })
}

/// Convert `PostgreSQL` value to JSON value
fn postgres_value_to_json(row: &Row, idx: usize) -> Result<serde_json::Value> {
    use serde_json::Value;
    use tokio_postgres::types::Type;

    let col_type = row.columns()[idx].type_();

    let value = match *col_type {
        Type::BOOL => get::<bool>(row, idx)?.map(Value::Bool),

        Type::INT2 => get::<i16>(row, idx)?.map(|v| Value::Number(v.into())),
        Type::INT4 => get::<i32>(row, idx)?.map(|v| Value::Number(v.into())),
        Type::INT8 => get::<i64>(row, idx)?.map(|v| Value::Number(v.into())),
        Type::OID => get::<u32>(row, idx)?.map(|v| Value::Number(v.into())),

        // NaN/Infinity become null
        Type::FLOAT4 => get::<f32>(row, idx)?
            .and_then(|v| serde_json::Number::from_f64(f64::from(v)))
            .map(Value::Number),
        Type::FLOAT8 => {
            get::<f64>(row, idx)?.and_then(serde_json::Number::from_f64).map(Value::Number)
        }

        Type::VARCHAR | Type::TEXT | Type::BPCHAR | Type::NAME => {
            get::<String>(row, idx)?.map(Value::String)
        }

        Type::JSON | Type::JSONB => get::<Value>(row, idx)?,

        Type::BYTEA => get::<Vec<u8>>(row, idx)?.map(|v| {
            use base64::Engine;
            Value::String(base64::engine::general_purpose::STANDARD.encode(v))
        }),

        Type::TIMESTAMP => get::<chrono::NaiveDateTime>(row, idx)?
            .map(|v| Value::String(v.format("%Y-%m-%dT%H:%M:%S").to_string())),
        Type::TIMESTAMPTZ => get::<chrono::DateTime<chrono::Utc>>(row, idx)?
            .map(|v| Value::String(v.to_rfc3339())),
        Type::DATE => get::<chrono::NaiveDate>(row, idx)?
            .map(|v| Value::String(v.format("%Y-%m-%d").to_string())),
        Type::TIME => get::<chrono::NaiveTime>(row, idx)?
            .map(|v| Value::String(v.format("%H:%M:%S").to_string())),

        Type::UUID => get::<uuid::Uuid>(row, idx)?.map(|v| Value::String(v.to_string())),

        _ => match row.try_get::<_, Option<String>>(idx) {
            Ok(v) => v.map(Value::String),
            Err(_) => Some(Value::String(format!("<{}>", col_type.name()))),
        },
    };

    Ok(value.unwrap_or(Value::Null))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::ConnectionConfig;

    fn local() -> ConnectionDescriptor {
        ConnectionDescriptor::validate(ConnectionConfig::postgres(
            "localhost",
            5432,
            "postgres",
            "postgres",
            "postgres",
        ))
        .unwrap()
    }

    #[test]
    fn test_build_pg_config() {
        let config = build_pg_config(&local()).unwrap();
        assert_eq!(config.get_user(), Some("postgres"));
        assert_eq!(config.get_dbname(), Some("postgres"));
        assert_eq!(config.get_ports(), &[5432]);
    }

    #[test]
    fn test_build_pg_config_without_password() {
        let mut raw = ConnectionConfig::postgres("localhost", 5432, "app", "", "app");
        raw.password = None;
        let config = build_pg_config(&ConnectionDescriptor::validate(raw).unwrap()).unwrap();
        assert!(config.get_password().is_none());
    }

    #[test]
    fn test_build_pg_config_wrong_engine() {
        let redis = ConnectionDescriptor::validate(ConnectionConfig::redis("localhost", 6379)).unwrap();
        assert!(build_pg_config(&redis).is_err());
    }

    #[tokio::test]
    async fn test_unreachable_server_is_connection_failure() {
        let descriptor = ConnectionDescriptor::validate(ConnectionConfig::postgres(
            "127.0.0.1",
            1,
            "postgres",
            "postgres",
            "postgres",
        ))
        .unwrap();

        let err = PostgresEngine::default().execute(&descriptor, "SELECT 1").await.unwrap_err();
        assert_eq!(err.error_code(), "CONNECTION_FAILED");
    }

    #[tokio::test]
    #[ignore = "Requires running PostgreSQL instance"]
    async fn test_connect() {
        let info = PostgresEngine::default().connect(&local()).await.unwrap();
        assert!(!info.server_version.is_empty());
        assert_eq!(info.connected_database, "postgres");
        assert_eq!(info.user.as_deref(), Some("postgres"));
    }

    #[tokio::test]
    #[ignore = "Requires running PostgreSQL instance"]
    async fn test_execute_select_and_count() {
        let engine = PostgresEngine::default();
        let result = engine.execute(&local(), "SELECT 1 AS num, 'test' AS str").await.unwrap();

        let QueryResult::Tabular { columns, rows } = result else {
            panic!("expected tabular result")
        };
        assert_eq!(columns, vec!["num", "str"]);
        assert_eq!(rows[0]["num"], serde_json::json!(1));
        assert_eq!(rows[0]["str"], serde_json::json!("test"));
    }

    #[tokio::test]
    #[ignore = "Requires running PostgreSQL instance"]
    async fn test_syntax_error_is_classified() {
        let err = PostgresEngine::default().execute(&local(), "SELEC 1").await.unwrap_err();
        assert_eq!(err.error_code(), "SYNTAX_ERROR");
    }

    #[tokio::test]
    #[ignore = "Requires running PostgreSQL instance"]
    async fn test_list_and_sample_tables() {
        let engine = PostgresEngine::default();
        let db = local();
        let _ = engine.execute(&db, "DROP TABLE IF EXISTS console_sample").await;
        engine.execute(&db, "CREATE TABLE console_sample (id SERIAL PRIMARY KEY, note TEXT)").await.unwrap();
        engine.execute(&db, "INSERT INTO console_sample (note) VALUES ('a'), (NULL)").await.unwrap();

        let entries = engine.list_schema(&db).await.unwrap();
        assert!(entries.contains(&SchemaEntry::table("console_sample")));

        let sample = engine.sample_target(&db, "console_sample").await.unwrap();
        assert_eq!(sample.row_count(), Some(2));

        let _ = engine.execute(&db, "DROP TABLE console_sample").await;
    }
}
