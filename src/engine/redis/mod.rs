//! Redis Engine Adapter
//!
//! # Features
//! - TCP connections with optional ACL user, password, and logical database index
//! - Schema enumeration via bounded `SCAN` plus `TYPE` per key
//! - Per-type key samples (`GET`, `HGETALL`, `LRANGE`, `SMEMBERS`, `ZRANGE ... WITHSCORES`,
//!   and `XRANGE` capped at the sample limit)
//! - Raw commands tokenized and sent verbatim
//!
//! # Reply Shaping
//! Array replies become a table with `Index`/`Value` columns. Scalar replies (integers,
//! strings, status, nil) become a status message.

use redis::aio::MultiplexedConnection;
use redis::{ConnectionAddr, ErrorKind, RedisConnectionInfo, RedisError, Value};
use tracing::{debug, warn};

use crate::command::tokenize;
use crate::descriptor::ConnectionDescriptor;
use crate::engine::{
    ConnectionInfo, EngineAdapter, EngineKind, EngineSettings, EntryKind, QueryResult,
    Row as ResultRow, SchemaEntry,
};
use crate::error::{ConsoleError, Result};

const ENGINE: &str = "redis";

/// Redis engine adapter
#[derive(Debug, Clone, Copy, Default)]
pub struct RedisEngine {
    settings: EngineSettings,
}

impl RedisEngine {
    /// Create an adapter with the given settings
    #[must_use]
    pub const fn new(settings: EngineSettings) -> Self {
        Self { settings }
    }
}

impl EngineAdapter for RedisEngine {
    async fn connect(&self, descriptor: &ConnectionDescriptor) -> Result<ConnectionInfo> {
        let mut conn = open_connection(descriptor).await?;

        let info: String =
            redis::cmd("INFO").arg("server").query_async(&mut conn).await.map_err(map_redis_error)?;

        let server_version = info
            .lines()
            .find_map(|line| line.strip_prefix("redis_version:"))
            .map_or_else(|| "unknown".to_string(), |v| v.trim().to_string());

        Ok(ConnectionInfo {
            server_version,
            connected_database: database_index(descriptor)?.to_string(),
            user: descriptor.user().map(str::to_string),
        })
    }

    async fn execute(&self, descriptor: &ConnectionDescriptor, command: &str) -> Result<QueryResult> {
        let tokens = tokenize(command)?;
        let Some((verb, args)) = tokens.split_first() else {
            return Err(ConsoleError::invalid_input("Command must not be empty"));
        };

        let mut conn = open_connection(descriptor).await?;

        let mut cmd = redis::cmd(verb);
        for arg in args {
            cmd.arg(arg);
        }

        let reply: Value = cmd.query_async(&mut conn).await.map_err(map_redis_error)?;
        Ok(shape_reply(reply))
    }

    async fn list_schema(&self, descriptor: &ConnectionDescriptor) -> Result<Vec<SchemaEntry>> {
        let mut conn = open_connection(descriptor).await?;
        let limit = self.settings.scan_limit;

        let mut keys: Vec<String> = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg("*")
                .arg("COUNT")
                .arg(limit)
                .query_async(&mut conn)
                .await
                .map_err(|e| {
                    ConsoleError::engine_error(ENGINE, format!("SCAN failed at cursor {cursor}: {e}"))
                })?;

            keys.extend(batch);
            cursor = next;

            if cursor == 0 || keys.len() >= limit {
                break;
            }
        }
        debug!(keys = keys.len(), complete = cursor == 0, "redis scan finished");

        let mut entries = Vec::with_capacity(keys.len());
        for key in keys {
            let kind = match redis::cmd("TYPE").arg(&key).query_async::<_, String>(&mut conn).await {
                Ok(type_name) => EntryKind::from_redis_type(&type_name),
                Err(e) => {
                    debug!(error = %e, "TYPE failed, recording key as unknown");
                    EntryKind::Unknown
                }
            };
            entries.push(SchemaEntry::new(key, kind));
        }

        Ok(entries)
    }

    async fn sample_target(
        &self,
        descriptor: &ConnectionDescriptor,
        target: &str,
    ) -> Result<QueryResult> {
        if target.is_empty() {
            return Err(ConsoleError::invalid_input("Key name must be provided to sample"));
        }

        let mut conn = open_connection(descriptor).await?;

        let type_name: String =
            redis::cmd("TYPE").arg(target).query_async(&mut conn).await.map_err(map_redis_error)?;

        match type_name.as_str() {
            "string" => {
                let value: Value =
                    redis::cmd("GET").arg(target).query_async(&mut conn).await.map_err(map_redis_error)?;
                let entry = row([("Key", target.into()), ("Value", value_to_json(&value))]);
                Ok(QueryResult::tabular(columns(&["Key", "Value"]), vec![entry]))
            }
            "hash" => {
                let flat = fetch_items(&mut conn, redis::cmd("HGETALL").arg(target)).await?;
                let rows = flat
                    .chunks_exact(2)
                    .map(|pair| row([("Field", value_to_json(&pair[0])), ("Value", value_to_json(&pair[1]))]))
                    .collect();
                Ok(QueryResult::tabular(columns(&["Field", "Value"]), rows))
            }
            "list" => {
                let items =
                    fetch_items(&mut conn, redis::cmd("LRANGE").arg(target).arg(0).arg(-1)).await?;
                Ok(index_value_table(&items))
            }
            "set" => {
                let members = fetch_items(&mut conn, redis::cmd("SMEMBERS").arg(target)).await?;
                let rows = members.iter().map(|m| row([("Member", value_to_json(m))])).collect();
                Ok(QueryResult::tabular(columns(&["Member"]), rows))
            }
            "zset" => {
                let flat = fetch_items(
                    &mut conn,
                    redis::cmd("ZRANGE").arg(target).arg(0).arg(-1).arg("WITHSCORES"),
                )
                .await?;
                let rows = flat
                    .chunks_exact(2)
                    .map(|pair| row([("Member", value_to_json(&pair[0])), ("Score", score_to_json(&pair[1]))]))
                    .collect();
                Ok(QueryResult::tabular(columns(&["Member", "Score"]), rows))
            }
            "stream" => {
                let entries = fetch_items(
                    &mut conn,
                    redis::cmd("XRANGE").arg(target).arg("-").arg("+").arg("COUNT").arg(self.settings.sample_limit),
                )
                .await?;
                Ok(stream_table(&entries))
            }
            "none" => Err(ConsoleError::invalid_input(format!("Key '{target}' does not exist"))),
            other => Err(ConsoleError::engine_error(
                ENGINE,
                format!("Unsupported key type for sampling: {other}"),
            )),
        }
    }
}

/// Logical database index of a validated Redis descriptor
fn database_index(descriptor: &ConnectionDescriptor) -> Result<i64> {
    descriptor.database().filter(|db| !db.trim().is_empty()).map_or(Ok(0), |db| {
        db.trim().parse().map_err(|_| {
            ConsoleError::invalid_input(format!("Redis database must be numeric, got '{db}'"))
        })
    })
}

/// Build `redis` connection info from a validated descriptor
fn build_connection_info(descriptor: &ConnectionDescriptor) -> Result<redis::ConnectionInfo> {
    if descriptor.engine() != EngineKind::Redis {
        return Err(ConsoleError::invalid_input(format!(
            "Expected Redis engine, got {}",
            descriptor.engine()
        )));
    }

    let (Some(host), Some(port)) = (descriptor.host(), descriptor.port()) else {
        return Err(ConsoleError::invalid_input(format!(
            "Expected a validated Redis descriptor, got {}",
            descriptor.redacted()
        )));
    };

    Ok(redis::ConnectionInfo {
        addr: ConnectionAddr::Tcp(host.to_string(), port),
        redis: RedisConnectionInfo {
            db: database_index(descriptor)?,
            username: descriptor.user().map(str::to_string),
            password: descriptor.password().map(str::to_string),
            ..Default::default()
        },
    })
}

async fn open_connection(descriptor: &ConnectionDescriptor) -> Result<MultiplexedConnection> {
    let info = build_connection_info(descriptor)?;
    let client = redis::Client::open(info).map_err(|e| {
        ConsoleError::connection_failed(format!("Invalid Redis connection parameters: {e}"))
    })?;

    client.get_multiplexed_async_connection().await.map_err(|e| {
        warn!(db = %descriptor.redacted(), "redis connection failed");
        ConsoleError::connection_failed(format!("Failed to connect to Redis: {e}"))
    })
}

/// Classify a driver error
fn map_redis_error(e: RedisError) -> ConsoleError {
    if e.is_io_error() || e.is_connection_refusal() || e.is_connection_dropped() {
        return ConsoleError::connection_failed(format!("Redis connection lost: {e}"));
    }

    match e.kind() {
        ErrorKind::AuthenticationFailed => {
            ConsoleError::connection_failed(format!("Redis authentication failed: {e}"))
        }
        ErrorKind::ResponseError
        | ErrorKind::ExtensionError
        | ErrorKind::NoScriptError
        | ErrorKind::ReadOnly => ConsoleError::syntax_error(ENGINE, e.to_string()),
        _ => ConsoleError::engine_error(ENGINE, e.to_string()),
    }
}

async fn fetch_items(conn: &mut MultiplexedConnection, cmd: &redis::Cmd) -> Result<Vec<Value>> {
    cmd.query_async(conn).await.map_err(map_redis_error)
}

fn columns(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| (*n).to_string()).collect()
}

fn row<const N: usize>(cells: [(&str, serde_json::Value); N]) -> ResultRow {
    cells.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

fn index_value_table(items: &[Value]) -> QueryResult {
    let rows = items
        .iter()
        .enumerate()
        .map(|(i, v)| row([("Index", i.into()), ("Value", value_to_json(v))]))
        .collect();
    QueryResult::tabular(columns(&["Index", "Value"]), rows)
}

/// `XRANGE` entries as `ID`/`Fields` rows, fields folded into an object
fn stream_table(entries: &[Value]) -> QueryResult {
    let rows = entries
        .iter()
        .filter_map(|entry| match entry {
            Value::Bulk(parts) => match parts.as_slice() {
                [id, Value::Bulk(fields)] => {
                    Some(row([("ID", value_to_json(id)), ("Fields", fields_to_json(fields))]))
                }
                _ => None,
            },
            _ => None,
        })
        .collect();
    QueryResult::tabular(columns(&["ID", "Fields"]), rows)
}

fn fields_to_json(flat: &[Value]) -> serde_json::Value {
    let fields = flat
        .chunks_exact(2)
        .map(|pair| {
            let name = match value_to_json(&pair[0]) {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            (name, value_to_json(&pair[1]))
        })
        .collect();
    serde_json::Value::Object(fields)
}

/// Shape a raw command reply into a query result
fn shape_reply(reply: Value) -> QueryResult {
    match reply {
        Value::Bulk(items) => index_value_table(&items),
        Value::Nil => QueryResult::status("(nil)"),
        Value::Int(n) => QueryResult::status(n.to_string()),
        Value::Data(bytes) => QueryResult::status(String::from_utf8_lossy(&bytes)),
        Value::Status(s) => QueryResult::status(s),
        Value::Okay => QueryResult::status("OK"),
    }
}

/// Convert a Redis value to JSON value
fn value_to_json(value: &Value) -> serde_json::Value {
    use serde_json::Value as Json;

    match value {
        Value::Nil => Json::Null,
        Value::Int(n) => Json::Number((*n).into()),
        Value::Data(bytes) => Json::String(String::from_utf8_lossy(bytes).into_owned()),
        Value::Bulk(items) => Json::Array(items.iter().map(value_to_json).collect()),
        Value::Status(s) => Json::String(s.clone()),
        Value::Okay => Json::String("OK".to_string()),
    }
}

/// Sorted-set scores arrive as strings; emit them as numbers when finite
fn score_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Data(bytes) => std::str::from_utf8(bytes)
            .ok()
            .and_then(|s| s.parse::<f64>().ok())
            .and_then(serde_json::Number::from_f64)
            .map_or_else(|| value_to_json(value), serde_json::Value::Number),
        other => value_to_json(other),
    }
}
