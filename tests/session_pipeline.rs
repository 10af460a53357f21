//! Session Pipeline Tests
//!
//! Drives `ConsoleSession` end to end over an in-memory adapter that counts every call, so
//! the properties below hold for any engine:
//! - Descriptor signatures are stable and sensitive to every connection field
//! - Repeated schema fetches for one connection reach the engine once
//! - Dangerous commands are parked until confirmed after the delay, then run exactly once
//! - History deduplicates, promotes, and stays bounded
//! - Context actions never enter history, and drops always go through the gate

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dbconsole::{
    classify, ConnectionConfig, ConnectionDescriptor, ConnectionInfo, ConsoleError, ConsoleSession,
    ContextAction, EngineAdapter, EngineKind, EntryKind, QueryResult, RawCommand, Result,
    Row, RunStatus, SchemaEntry, SessionRegistry, SessionSettings, HISTORY_CAPACITY, REQUIRED_DELAY,
};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;

// ============================================================================
// Test Helpers
// ============================================================================

/// In-memory adapter recording every call
#[derive(Debug, Clone, Default)]
struct CountingAdapter {
    executed: Arc<Mutex<Vec<String>>>,
    listings: Arc<AtomicUsize>,
    delay: Option<Duration>,
}

impl CountingAdapter {
    fn slow(delay: Duration) -> Self {
        Self { delay: Some(delay), ..Self::default() }
    }

    fn executed(&self) -> Vec<String> {
        self.executed.lock().clone()
    }

    fn listings(&self) -> usize {
        self.listings.load(Ordering::SeqCst)
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

impl EngineAdapter for CountingAdapter {
    async fn connect(&self, descriptor: &ConnectionDescriptor) -> Result<ConnectionInfo> {
        self.pause().await;
        Ok(ConnectionInfo {
            server_version: "mock 1.0".into(),
            connected_database: descriptor.database().unwrap_or("main").into(),
            user: descriptor.user().map(str::to_string),
        })
    }

    async fn execute(&self, _: &ConnectionDescriptor, command: &str) -> Result<QueryResult> {
        self.pause().await;
        self.executed.lock().push(command.to_string());

        if command.contains("COUNT(*)") {
            return Ok(QueryResult::tabular(vec!["COUNT(*)".into()], vec![row("COUNT(*)", 3)]));
        }
        if command.starts_with("SELECT") {
            return Ok(QueryResult::tabular(vec!["id".into()], vec![row("id", 1), row("id", 2)]));
        }
        Ok(QueryResult::status("1 rows affected"))
    }

    async fn list_schema(&self, _: &ConnectionDescriptor) -> Result<Vec<SchemaEntry>> {
        self.pause().await;
        self.listings.fetch_add(1, Ordering::SeqCst);
        Ok(vec![SchemaEntry::table("orders"), SchemaEntry::table("users")])
    }

    async fn sample_target(&self, _: &ConnectionDescriptor, target: &str) -> Result<QueryResult> {
        self.pause().await;
        self.executed.lock().push(format!("sample:{target}"));
        Ok(QueryResult::tabular(vec!["id".into()], Vec::new()))
    }
}

fn row(column: &str, value: i64) -> Row {
    let mut row = Row::new();
    row.insert(column.to_string(), serde_json::json!(value));
    row
}

fn pg() -> ConnectionConfig {
    ConnectionConfig::postgres("db.internal", 5432, "app", "s3cret", "shop")
}

fn descriptor(config: ConnectionConfig) -> ConnectionDescriptor {
    ConnectionDescriptor::validate(config).unwrap()
}

fn settle() -> Instant {
    Instant::now() + REQUIRED_DELAY
}

// ============================================================================
// Descriptor Signatures
// ============================================================================

#[test]
fn test_signature_equal_for_equal_descriptors() {
    assert_eq!(descriptor(pg()).signature(), descriptor(pg()).signature());
}

#[test]
fn test_signature_changes_with_any_field() {
    let base = descriptor(pg());
    let perturbed = [
        ConnectionConfig { host: Some("db2.internal".into()), ..pg() },
        ConnectionConfig { port: Some(5433), ..pg() },
        ConnectionConfig { user: Some("admin".into()), ..pg() },
        ConnectionConfig { password: Some("other".into()), ..pg() },
        ConnectionConfig { database: Some("shop_test".into()), ..pg() },
    ];

    for config in perturbed {
        assert_ne!(descriptor(config.clone()).signature(), base.signature(), "{config:?}");
    }
}

#[test]
fn test_signature_does_not_contain_password() {
    let base = descriptor(pg());
    assert!(!base.signature().as_str().contains("s3cret"));
    assert!(!base.redacted().contains("s3cret"));
}

#[test]
fn test_missing_fields_rejected() {
    let err = ConnectionDescriptor::validate(ConnectionConfig { port: None, ..pg() }).unwrap_err();
    assert_eq!(ConsoleError::from(err).error_code(), "VALIDATION_ERROR");

    let sqlite = ConnectionConfig { engine: EngineKind::Sqlite, ..pg() };
    assert!(ConnectionDescriptor::validate(sqlite).is_err());
}

// ============================================================================
// Schema Cache
// ============================================================================

#[tokio::test]
async fn test_repeated_schema_fetch_hits_engine_once() {
    let adapter = CountingAdapter::default();
    let session = ConsoleSession::new(adapter.clone());
    let db = descriptor(pg());

    let first = session.fetch_schema(&db).await.unwrap();
    let second = session.fetch_schema(&descriptor(pg())).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(adapter.listings(), 1);
}

#[tokio::test]
async fn test_schema_refetched_for_other_connection_and_refresh() {
    let adapter = CountingAdapter::default();
    let session = ConsoleSession::new(adapter.clone());

    session.fetch_schema(&descriptor(pg())).await.unwrap();
    session.fetch_schema(&descriptor(ConnectionConfig { database: Some("crm".into()), ..pg() })).await.unwrap();
    assert_eq!(adapter.listings(), 2);

    session.refresh_schema(&descriptor(ConnectionConfig { database: Some("crm".into()), ..pg() })).await.unwrap();
    assert_eq!(adapter.listings(), 3);
}

// ============================================================================
// Classification and the Confirmation Gate
// ============================================================================

#[test]
fn test_classifier_cases() {
    for dangerous in ["DROP TABLE users", "delete from users where id = 1", "TRUNCATE TABLE logs", "alter table t add c int"] {
        assert!(classify(dangerous).is_dangerous(), "{dangerous}");
    }
    for safe in ["SELECT * FROM users", "INSERT INTO t VALUES (1)", "UPDATE t SET a = 1"] {
        assert!(!classify(safe).is_dangerous(), "{safe}");
    }
}

#[tokio::test]
async fn test_confirm_too_early_then_once() {
    let adapter = CountingAdapter::default();
    let session = ConsoleSession::new(adapter.clone());
    let db = descriptor(pg());

    let status = session.run_guarded(&db, RawCommand::new("DELETE FROM users")).await.unwrap();
    assert!(matches!(status, RunStatus::AwaitingConfirmation { .. }));

    let err = session.confirm().await.unwrap_err();
    let remaining_ms = match err {
        ConsoleError::TooEarly { remaining_ms } => remaining_ms,
        other => panic!("expected TooEarly, got {other:?}"),
    };
    assert!(remaining_ms > 0 && remaining_ms <= 3000);
    assert!(adapter.executed().is_empty());

    session.confirm_at(settle()).await.unwrap();
    assert_eq!(adapter.executed(), vec!["DELETE FROM users".to_string()]);

    let err = session.confirm_at(settle()).await.unwrap_err();
    assert_eq!(err.error_code(), "NO_PENDING_CONFIRMATION");
    assert_eq!(adapter.executed().len(), 1);
}

#[tokio::test]
async fn test_confirm_after_real_delay() {
    let adapter = CountingAdapter::default();
    let session = ConsoleSession::new(adapter.clone());
    let db = descriptor(pg());

    session.run_guarded(&db, RawCommand::new("DROP TABLE audit")).await.unwrap();
    assert!(!session.can_confirm());

    tokio::time::sleep(REQUIRED_DELAY + Duration::from_millis(50)).await;
    assert!(session.can_confirm());

    let outcome = session.confirm().await.unwrap();
    assert_eq!(outcome.result, QueryResult::status("1 rows affected"));
    assert_eq!(session.history()[0].command, "DROP TABLE audit");
}

#[tokio::test]
async fn test_newer_dangerous_command_replaces_pending() {
    let adapter = CountingAdapter::default();
    let session = ConsoleSession::new(adapter.clone());
    let db = descriptor(pg());

    session.run_guarded(&db, RawCommand::new("DROP TABLE a")).await.unwrap();
    session.run_guarded(&db, RawCommand::new("DROP TABLE b")).await.unwrap();
    session.confirm_at(settle()).await.unwrap();

    assert_eq!(adapter.executed(), vec!["DROP TABLE b".to_string()]);
}

#[tokio::test]
async fn test_cancel_then_confirm_has_nothing_pending() {
    let session = ConsoleSession::new(CountingAdapter::default());
    let db = descriptor(pg());

    session.run_guarded(&db, RawCommand::new("TRUNCATE TABLE logs")).await.unwrap();
    assert!(session.cancel().is_some());
    assert_eq!(session.confirm_at(settle()).await.unwrap_err().error_code(), "NO_PENDING_CONFIRMATION");
}

#[tokio::test]
async fn test_gate_state_survives_engine_failure() {
    let session = ConsoleSession::new(CountingAdapter::default());
    let db = descriptor(pg());

    session.confirm().await.unwrap_err();
    let status = session.run_guarded(&db, RawCommand::new("SELECT 1")).await.unwrap();
    assert!(matches!(status, RunStatus::Completed(_)));
}

// ============================================================================
// History
// ============================================================================

#[tokio::test]
async fn test_history_dedup_and_promote() {
    let session = ConsoleSession::new(CountingAdapter::default());
    let db = descriptor(pg());

    for text in ["SELECT 1", "SELECT 2", "SELECT 1"] {
        session.run(&db, RawCommand::new(text)).await.unwrap();
    }

    let commands: Vec<String> = session.history().into_iter().map(|r| r.command).collect();
    assert_eq!(commands, vec!["SELECT 1".to_string(), "SELECT 2".to_string()]);
}

#[tokio::test]
async fn test_history_adjacent_duplicate_recorded_once() {
    let session = ConsoleSession::new(CountingAdapter::default());
    let db = descriptor(pg());

    session.run(&db, RawCommand::new("SELECT 1")).await.unwrap();
    session.run(&db, RawCommand::new("SELECT 1")).await.unwrap();

    assert_eq!(session.history().len(), 1);
    assert_eq!(session.history()[0].row_count, Some(2));
}

#[tokio::test]
async fn test_history_is_bounded() {
    let session = ConsoleSession::new(CountingAdapter::default());
    let db = descriptor(pg());

    for i in 0..HISTORY_CAPACITY + 5 {
        session.run(&db, RawCommand::new(format!("SELECT {i}"))).await.unwrap();
    }

    let history = session.history();
    assert_eq!(history.len(), HISTORY_CAPACITY);
    assert_eq!(history[0].command, format!("SELECT {}", HISTORY_CAPACITY + 4));
    assert_eq!(session.restore(HISTORY_CAPACITY - 1).unwrap(), "SELECT 5");
}

#[tokio::test]
async fn test_targeted_samples_stay_out_of_history() {
    let adapter = CountingAdapter::default();
    let session = ConsoleSession::new(adapter.clone());
    let db = descriptor(pg());

    session.run_guarded(&db, RawCommand::new("EXPLORE_TABLE").with_target("users")).await.unwrap();
    session.run_guarded(&db, RawCommand::new("EXPLORE_TABLE").with_target("orders")).await.unwrap();

    // A deserialized command keeps `historical: true` alongside its target
    let raw = RawCommand { target: Some("users".into()), ..RawCommand::new("EXPLORE_TABLE") };
    assert!(raw.historical);
    session.run(&db, raw).await.unwrap();

    assert_eq!(adapter.executed(), vec!["sample:users", "sample:orders", "sample:users"]);
    assert!(session.history().is_empty());

    session.run(&db, RawCommand::new("SELECT 1")).await.unwrap();
    assert_eq!(session.restore(0).unwrap(), "SELECT 1");
    assert_eq!(session.history().len(), 1);
}

#[tokio::test]
async fn test_quoted_redis_verbs_are_gated() {
    let adapter = CountingAdapter::default();
    let session = ConsoleSession::new(adapter.clone());
    let redis = descriptor(ConnectionConfig::redis("cache", 6379));

    for text in [r#""FLUSHALL""#, r#""DEL" session:1"#, r#"UN"LINK" a b"#] {
        let status = session.run_guarded(&redis, RawCommand::new(text)).await.unwrap();
        assert!(matches!(status, RunStatus::AwaitingConfirmation { .. }), "{text}");
    }
    assert!(adapter.executed().is_empty());
    assert_eq!(session.cancel(), Some(RawCommand::new(r#"UN"LINK" a b"#)));
}

// ============================================================================
// Context Actions
// ============================================================================

#[tokio::test]
async fn test_count_action_end_to_end() {
    let adapter = CountingAdapter::default();
    let session = ConsoleSession::new(adapter.clone());
    let db = descriptor(pg());

    let entries = session.fetch_schema(&db).await.unwrap();
    let users = entries.iter().find(|e| e.name == "users").unwrap();

    let RunStatus::Completed(outcome) =
        session.run_action(&db, users, ContextAction::Count).await.unwrap()
    else {
        panic!("count should not need confirmation")
    };

    assert_eq!(outcome.result.as_scalar(), Some(serde_json::json!(3)));
    assert_eq!(adapter.executed(), vec![r#"SELECT COUNT(*) FROM "users";"#.to_string()]);
    assert!(session.history().is_empty());
}

#[tokio::test]
async fn test_drop_action_goes_through_gate() {
    let adapter = CountingAdapter::default();
    let session = ConsoleSession::new(adapter.clone());
    let redis = descriptor(ConnectionConfig::redis("cache", 6379));
    let entry = SchemaEntry::new("session:1", EntryKind::String);

    let status = session.run_action(&redis, &entry, ContextAction::Drop).await.unwrap();
    let RunStatus::AwaitingConfirmation { command, .. } = status else {
        panic!("drop must wait for confirmation")
    };
    assert_eq!(command.text, "DEL session:1");
    assert!(adapter.executed().is_empty());

    session.confirm_at(settle()).await.unwrap();
    assert_eq!(adapter.executed(), vec!["DEL session:1".to_string()]);
    assert!(session.history().is_empty());
}

#[tokio::test]
async fn test_unknown_key_sample_uses_target_path() {
    let adapter = CountingAdapter::default();
    let session = ConsoleSession::new(adapter.clone());
    let redis = descriptor(ConnectionConfig::redis("cache", 6379));
    let entry = SchemaEntry::new("mystery", EntryKind::Unknown);

    session.run_action(&redis, &entry, ContextAction::Sample).await.unwrap();
    assert_eq!(adapter.executed(), vec!["sample:mystery".to_string()]);
}

// ============================================================================
// Timeouts and Sessions
// ============================================================================

#[tokio::test]
async fn test_slow_engine_times_out() {
    let adapter = CountingAdapter::slow(Duration::from_millis(500));
    let settings = SessionSettings { timeout: Duration::from_millis(20) };
    let session = ConsoleSession::with_settings(adapter, settings);

    let err = session.run(&descriptor(pg()), RawCommand::new("SELECT 1")).await.unwrap_err();
    assert_eq!(err.error_code(), "TIMEOUT");
    assert!(session.history().is_empty());

    let err = session.fetch_schema(&descriptor(pg())).await.unwrap_err();
    assert!(matches!(err, ConsoleError::Timeout { timeout_ms: 20, .. }));
}

#[tokio::test]
async fn test_sessions_do_not_share_state() {
    let registry = SessionRegistry::new(CountingAdapter::default(), SessionSettings::default());
    let db = descriptor(pg());

    registry.session("alice").run_guarded(&db, RawCommand::new("DROP TABLE t")).await.unwrap();
    registry.session("alice").run(&db, RawCommand::new("SELECT 1")).await.unwrap();

    let bob = registry.session("bob");
    assert!(bob.pending().is_none());
    assert!(bob.history().is_empty());
    assert_eq!(registry.session("alice").pending(), Some(RawCommand::new("DROP TABLE t")));
}
