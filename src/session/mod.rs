//! Console Sessions
//!
//! A session owns the per-operator state of the console: one schema cache slot, one
//! confirmation gate, and one history ledger. It runs commands through an
//! [`EngineAdapter`] and is the only place adapter calls are time-bounded.
//!
//! # Pipeline
//! ```text
//! run_guarded: classify -> (dangerous) arm gate -> AwaitingConfirmation
//!                       -> (safe) run -> adapter -> shape -> history -> Completed
//! confirm:     gate.confirm -> run
//! ```
//!
//! # Locking
//! The gate and history locks are `parking_lot` mutexes taken for a single operation and
//! never held across adapter I/O. The cache slot is an async mutex, so concurrent schema
//! fetches within one session are serialized and only one reaches the engine.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::cache::SchemaCache;
use crate::classify::classify_for;
use crate::command::RawCommand;
use crate::descriptor::ConnectionDescriptor;
use crate::engine::{ConnectionInfo, EngineAdapter, EngineKind, Engines, QueryResult, SchemaEntry};
use crate::error::{ConsoleError, Result};
use crate::gate::{ConfirmationGate, REQUIRED_DELAY};
use crate::history::{ExecutionRecord, HistoryLedger};
use crate::output::Metadata;
use crate::synth::{synthesize_entry, ContextAction};

/// Adapter call bound when nothing else is configured
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Session identifier used when a caller does not name one
pub const DEFAULT_SESSION: &str = "default";

/// Session-level knobs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    /// Upper bound on every adapter call
    pub timeout: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self { timeout: DEFAULT_TIMEOUT }
    }
}

/// Result of a completed command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub result: QueryResult,
    pub meta: Metadata,
}

/// What happened to a submitted command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    /// The command ran
    Completed(ExecutionOutcome),

    /// The command is parked until `confirm` after the delay
    AwaitingConfirmation {
        command: RawCommand,
        required_delay_seconds: u64,
        /// Earlier pending command this one replaced
        #[serde(skip_serializing_if = "Option::is_none")]
        superseded: Option<RawCommand>,
    },
}

/// Per-operator console state over an adapter
#[derive(Debug)]
pub struct ConsoleSession<A = Engines> {
    adapter: A,
    settings: SessionSettings,
    cache: tokio::sync::Mutex<SchemaCache>,
    gate: Mutex<ConfirmationGate>,
    history: Mutex<HistoryLedger>,
}

impl<A: EngineAdapter> ConsoleSession<A> {
    /// Create a session with default settings
    pub fn new(adapter: A) -> Self {
        Self::with_settings(adapter, SessionSettings::default())
    }

    /// Create a session with explicit settings
    pub fn with_settings(adapter: A, settings: SessionSettings) -> Self {
        Self {
            adapter,
            settings,
            cache: tokio::sync::Mutex::new(SchemaCache::new()),
            gate: Mutex::new(ConfirmationGate::new()),
            history: Mutex::new(HistoryLedger::new()),
        }
    }

    /// Adapter this session runs commands through
    pub const fn adapter(&self) -> &A {
        &self.adapter
    }

    /// Settings in effect
    pub const fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Await an adapter call within the session timeout
    async fn bounded<T>(
        &self,
        descriptor: &ConnectionDescriptor,
        call: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.settings.timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                let timeout_ms = u64::try_from(self.settings.timeout.as_millis()).unwrap_or(u64::MAX);
                warn!(db = %descriptor.redacted(), timeout_ms, "engine call timed out");
                Err(ConsoleError::timeout(descriptor.engine().as_str(), timeout_ms))
            }
        }
    }

    /// Check that the engine is reachable and report its metadata
    pub async fn connect(&self, descriptor: &ConnectionDescriptor) -> Result<ConnectionInfo> {
        self.bounded(descriptor, self.adapter.connect(descriptor)).await
    }

    /// Run a command without classification
    ///
    /// # Errors
    /// `InvalidInput` for an empty command; adapter errors are returned unchanged.
    pub async fn run(
        &self,
        descriptor: &ConnectionDescriptor,
        command: RawCommand,
    ) -> Result<ExecutionOutcome> {
        if command.is_blank() {
            return Err(ConsoleError::invalid_input("Command must not be empty"));
        }

        let start = Instant::now();
        let target = command.target.as_deref().filter(|t| !t.is_empty());
        let result = match target {
            Some(target) => {
                self.bounded(descriptor, self.adapter.sample_target(descriptor, target)).await?
            }
            None => self.bounded(descriptor, self.adapter.execute(descriptor, &command.text)).await?,
        };
        // Samples are not re-runnable text
        let record = command.historical && target.is_none();
        let execution_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

        debug!(
            db = %descriptor.redacted(),
            execution_ms,
            rows = ?result.row_count(),
            "command executed"
        );

        if record {
            self.history.lock().record(ExecutionRecord::now(
                command.text,
                result.row_count(),
                execution_ms,
            ));
        }

        let meta = Metadata::for_result(execution_ms, &result);
        Ok(ExecutionOutcome { result, meta })
    }

    /// Run a command, parking it at the gate if it is dangerous
    pub async fn run_guarded(
        &self,
        descriptor: &ConnectionDescriptor,
        command: RawCommand,
    ) -> Result<RunStatus> {
        if command.is_blank() {
            return Err(ConsoleError::invalid_input("Command must not be empty"));
        }

        let dangerous =
            command.destructive || classify_for(descriptor.family(), &command.text).is_dangerous();

        if !dangerous {
            return self.run(descriptor, command).await.map(RunStatus::Completed);
        }

        let superseded = self.gate.lock().arm(command.clone(), descriptor.clone());
        info!(
            db = %descriptor.redacted(),
            superseded = superseded.is_some(),
            "dangerous command awaiting confirmation"
        );

        Ok(RunStatus::AwaitingConfirmation {
            command,
            required_delay_seconds: REQUIRED_DELAY.as_secs(),
            superseded,
        })
    }

    /// Release and run the pending command
    ///
    /// # Errors
    /// `TooEarly` or `NoPendingConfirmation` from the gate, otherwise adapter errors.
    pub async fn confirm(&self) -> Result<ExecutionOutcome> {
        self.confirm_at(Instant::now()).await
    }

    /// [`Self::confirm`] as of `now`
    pub async fn confirm_at(&self, now: Instant) -> Result<ExecutionOutcome> {
        let pending = self.gate.lock().confirm_at(now)?;
        info!(db = %pending.descriptor.redacted(), "confirmed pending command");

        let outcome = self.run(&pending.descriptor, pending.command).await?;

        // Whatever was dropped or altered is no longer in the cached inventory
        self.cache.lock().await.invalidate();
        Ok(outcome)
    }

    /// Discard the pending command, returning it
    pub fn cancel(&self) -> Option<RawCommand> {
        let cancelled = self.gate.lock().cancel();
        if cancelled.is_some() {
            info!("cancelled pending command");
        }
        cancelled
    }

    /// Command currently awaiting confirmation
    pub fn pending(&self) -> Option<RawCommand> {
        self.gate.lock().pending().map(|p| p.command.clone())
    }

    /// Engine the pending command will run against
    pub fn pending_engine(&self) -> Option<EngineKind> {
        self.gate.lock().pending().map(|p| p.descriptor.engine())
    }

    /// True once a pending command has waited out the delay
    pub fn can_confirm(&self) -> bool {
        self.gate.lock().can_confirm()
    }

    /// Run a context action on a schema entry
    pub async fn run_action(
        &self,
        descriptor: &ConnectionDescriptor,
        entry: &SchemaEntry,
        action: ContextAction,
    ) -> Result<RunStatus> {
        let command = synthesize_entry(entry, action, descriptor.family());
        debug!(action = %action, "synthesized context action");
        self.run_guarded(descriptor, command).await
    }

    /// Schema inventory, from cache when the connection has not changed
    pub async fn fetch_schema(&self, descriptor: &ConnectionDescriptor) -> Result<Vec<SchemaEntry>> {
        let mut cache = self.cache.lock().await;
        cache
            .fetch_with(descriptor, || self.bounded(descriptor, self.adapter.list_schema(descriptor)))
            .await
    }

    /// Schema inventory fetched from the engine regardless of the cache
    pub async fn refresh_schema(
        &self,
        descriptor: &ConnectionDescriptor,
    ) -> Result<Vec<SchemaEntry>> {
        let mut cache = self.cache.lock().await;
        cache.invalidate();
        cache
            .fetch_with(descriptor, || self.bounded(descriptor, self.adapter.list_schema(descriptor)))
            .await
    }

    /// History, most recent first
    pub fn history(&self) -> Vec<ExecutionRecord> {
        self.history.lock().to_vec()
    }

    /// Command text at a history position, for re-editing
    ///
    /// # Errors
    /// `InvalidInput` when `index` is past the end of history.
    pub fn restore(&self, index: usize) -> Result<String> {
        let history = self.history.lock();
        history.restore(index).map(str::to_string).ok_or_else(|| {
            ConsoleError::invalid_input(format!(
                "History index {index} out of range ({} entries)",
                history.len()
            ))
        })
    }
}

/// Sessions keyed by id, sharing one adapter configuration
#[derive(Debug)]
pub struct SessionRegistry<A = Engines> {
    adapter: A,
    settings: SessionSettings,
    sessions: Mutex<HashMap<String, Arc<ConsoleSession<A>>>>,
}

impl<A: EngineAdapter + Clone> SessionRegistry<A> {
    /// Create an empty registry; every session gets a clone of `adapter`
    pub fn new(adapter: A, settings: SessionSettings) -> Self {
        Self { adapter, settings, sessions: Mutex::new(HashMap::new()) }
    }

    /// Session for `id`, created on first use
    pub fn session(&self, id: &str) -> Arc<ConsoleSession<A>> {
        let mut sessions = self.sessions.lock();
        Arc::clone(sessions.entry(id.to_string()).or_insert_with(|| {
            debug!(session = id, "creating session");
            Arc::new(ConsoleSession::with_settings(self.adapter.clone(), self.settings))
        }))
    }

    /// Existing session for `id`, without creating one
    pub fn get(&self, id: &str) -> Option<Arc<ConsoleSession<A>>> {
        self.sessions.lock().get(id).map(Arc::clone)
    }

    /// Drop a session and its state; returns whether it existed
    pub fn close(&self, id: &str) -> bool {
        self.sessions.lock().remove(id).is_some()
    }

    /// Number of live sessions
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    /// True when no session is live
    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }
}
