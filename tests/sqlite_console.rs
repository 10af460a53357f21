//! `SQLite` Console Integration Tests
//!
//! Runs the full pipeline (session, gate, cache, synthesis) and the tool server against
//! real `SQLite` database files.

#![cfg(feature = "sqlite")]

use std::path::{Path, PathBuf};
use std::time::Instant;

use dbconsole::mcp::McpServer;
use dbconsole::{
    ConnectionConfig, ConnectionDescriptor, ConsoleConfig, ConsoleSession, ContextAction, Engines,
    QueryResult, RawCommand, RunStatus, SchemaEntry, REQUIRED_DELAY,
};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

// ============================================================================
// Test Helpers
// ============================================================================

/// Temporary database with `users` (3 rows) and `orders` (empty), removed on drop
struct TestDb {
    path: PathBuf,
}

impl TestDb {
    fn new() -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);

        let id = COUNTER.fetch_add(1, Ordering::SeqCst);
        let path = std::env::temp_dir()
            .join(format!("dbconsole_it_{}_{id}.db", std::process::id()));
        let _ = std::fs::remove_file(&path);

        let conn = rusqlite::Connection::open(&path).expect("create temp database");
        conn.execute_batch(
            "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL, email TEXT);
             INSERT INTO users (name, email) VALUES ('Alice', 'alice@example.com');
             INSERT INTO users (name, email) VALUES ('Bob', NULL);
             INSERT INTO users (name, email) VALUES ('Carol', 'carol@example.com');
             CREATE TABLE orders (id INTEGER PRIMARY KEY, user_id INTEGER, total REAL);",
        )
        .expect("seed temp database");

        Self { path }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn descriptor(&self) -> ConnectionDescriptor {
        ConnectionDescriptor::validate(ConnectionConfig::sqlite(&self.path)).unwrap()
    }
}

impl Drop for TestDb {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

fn names(entries: &[SchemaEntry]) -> Vec<&str> {
    entries.iter().map(|e| e.name.as_str()).collect()
}

// ============================================================================
// Session Pipeline
// ============================================================================

#[tokio::test]
async fn test_connect_reports_version() {
    let db = TestDb::new();
    let session = ConsoleSession::new(Engines::default());

    let info = session.connect(&db.descriptor()).await.unwrap();
    assert!(info.server_version.starts_with('3'));
}

#[tokio::test]
async fn test_schema_lists_user_tables() {
    let db = TestDb::new();
    let session = ConsoleSession::new(Engines::default());

    let entries = session.fetch_schema(&db.descriptor()).await.unwrap();
    assert_eq!(names(&entries), vec!["orders", "users"]);
}

#[tokio::test]
async fn test_count_action_returns_scalar() {
    let db = TestDb::new();
    let session = ConsoleSession::new(Engines::default());
    let descriptor = db.descriptor();

    let entry = SchemaEntry::table("users");
    let RunStatus::Completed(outcome) =
        session.run_action(&descriptor, &entry, ContextAction::Count).await.unwrap()
    else {
        panic!("count should run immediately")
    };

    assert_eq!(outcome.result.as_scalar(), Some(json!(3)));
    assert!(session.history().is_empty());
}

#[tokio::test]
async fn test_sample_action_returns_rows() {
    let db = TestDb::new();
    let session = ConsoleSession::new(Engines::default());

    let entry = SchemaEntry::table("users");
    let RunStatus::Completed(outcome) =
        session.run_action(&db.descriptor(), &entry, ContextAction::Sample).await.unwrap()
    else {
        panic!("sample should run immediately")
    };

    let QueryResult::Tabular { columns, rows } = outcome.result else {
        panic!("expected tabular result")
    };
    assert_eq!(columns, vec!["id", "name", "email"]);
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[1]["email"], Value::Null);
}

#[tokio::test]
async fn test_write_then_read_recorded_in_history() {
    let db = TestDb::new();
    let session = ConsoleSession::new(Engines::default());
    let descriptor = db.descriptor();

    let insert = "INSERT INTO orders (user_id, total) VALUES (1, 9.5)";
    session.run(&descriptor, RawCommand::new(insert)).await.unwrap();
    let outcome = session.run(&descriptor, RawCommand::new("SELECT total FROM orders")).await.unwrap();

    assert_eq!(outcome.meta.rows_returned, Some(1));
    let history = session.history();
    assert_eq!(history[0].command, "SELECT total FROM orders");
    assert_eq!(history[1].command, insert);
}

#[tokio::test]
async fn test_syntax_error_classified() {
    let db = TestDb::new();
    let session = ConsoleSession::new(Engines::default());

    let err = session.run(&db.descriptor(), RawCommand::new("SELEC * FROM users")).await.unwrap_err();
    assert_eq!(err.error_code(), "SYNTAX_ERROR");
}

#[tokio::test]
async fn test_missing_file_is_connection_failure() {
    let db = TestDb::new();
    let missing = db.path().with_extension("missing.db");
    let descriptor = ConnectionDescriptor::validate(ConnectionConfig::sqlite(&missing)).unwrap();

    let err = ConsoleSession::new(Engines::default()).connect(&descriptor).await.unwrap_err();
    assert_eq!(err.error_code(), "CONNECTION_FAILED");
    assert!(!missing.exists());
}

#[tokio::test]
async fn test_drop_confirmed_removes_table_and_refreshes_schema() {
    let db = TestDb::new();
    let session = ConsoleSession::new(Engines::default());
    let descriptor = db.descriptor();

    assert_eq!(names(&session.fetch_schema(&descriptor).await.unwrap()), vec!["orders", "users"]);

    let entry = SchemaEntry::table("orders");
    let status = session.run_action(&descriptor, &entry, ContextAction::Drop).await.unwrap();
    assert!(matches!(status, RunStatus::AwaitingConfirmation { .. }));

    assert_eq!(session.confirm().await.unwrap_err().error_code(), "TOO_EARLY");
    assert_eq!(names(&session.fetch_schema(&descriptor).await.unwrap()), vec!["orders", "users"]);

    session.confirm_at(Instant::now() + REQUIRED_DELAY).await.unwrap();
    assert_eq!(names(&session.fetch_schema(&descriptor).await.unwrap()), vec!["users"]);
}

// ============================================================================
// Tool Server
// ============================================================================

async fn call_tool(server: &McpServer, id: u64, name: &str, arguments: Value) -> Value {
    let request = json!({
        "jsonrpc": "2.0", "id": id, "method": "tools/call",
        "params": {"name": name, "arguments": arguments}
    });
    let response = server.handle_line(&request.to_string()).await.unwrap().unwrap();
    let response: Value = serde_json::from_str(&response).unwrap();
    serde_json::from_str(response["result"]["content"][0]["text"].as_str().unwrap()).unwrap()
}

#[tokio::test]
async fn test_server_schema_execute_history() {
    let db = TestDb::new();
    let server = McpServer::new(Engines::default(), ConsoleConfig::default());
    let conn = json!({"engine": "sqlite", "file": db.path()});

    let mut args = conn.clone();
    args["session"] = json!("s1");
    let schema = call_tool(&server, 1, "schema", args.clone()).await;
    assert_eq!(schema["ok"], true);
    assert_eq!(schema["data"]["entries"][1], json!({"name": "users", "kind": "table"}));

    args["command"] = json!("SELECT name FROM users ORDER BY id");
    let executed = call_tool(&server, 2, "execute", args).await;
    assert_eq!(executed["data"]["rows"][0]["name"], "Alice");
    assert_eq!(executed["meta"]["rows_returned"], 3);

    let history = call_tool(&server, 3, "history", json!({"session": "s1"})).await;
    assert_eq!(history["data"]["entries"][0]["command"], "SELECT name FROM users ORDER BY id");

    let other = call_tool(&server, 4, "history", json!({"session": "s2"})).await;
    assert_eq!(other["data"]["entries"], json!([]));
}

#[tokio::test]
async fn test_server_action_count() {
    let db = TestDb::new();
    let server = McpServer::new(Engines::default(), ConsoleConfig::default());

    let result = call_tool(
        &server,
        1,
        "action",
        json!({"engine": "sqlite", "file": db.path(), "name": "users", "action": "count"}),
    )
    .await;

    assert_eq!(result["ok"], true);
    assert_eq!(result["data"]["rows"][0]["COUNT(*)"], 3);
}

#[tokio::test]
async fn test_server_drop_waits_for_confirm() {
    let db = TestDb::new();
    let server = McpServer::new(Engines::default(), ConsoleConfig::default());
    let conn = json!({"engine": "sqlite", "file": db.path(), "command": "DROP TABLE orders"});

    let parked = call_tool(&server, 1, "execute", conn).await;
    assert_eq!(parked["data"]["status"], "awaiting_confirmation");

    let early = call_tool(&server, 2, "confirm", json!({})).await;
    assert_eq!(early["error"]["code"], "TOO_EARLY");

    tokio::time::sleep(REQUIRED_DELAY).await;
    let confirmed = call_tool(&server, 3, "confirm", json!({})).await;
    assert_eq!(confirmed["ok"], true);
    assert_eq!(confirmed["engine"], "sqlite");

    let schema = call_tool(&server, 4, "schema", json!({"engine": "sqlite", "file": db.path()})).await;
    assert_eq!(schema["data"]["entries"], json!([{"name": "users", "kind": "table"}]));
}
