//! JSON-RPC Tool Server
//!
//! JSON-RPC 2.0 over stdio, one request per line, exposing the console as tools.
//!
//! # Architecture
//! - **Transport**: line-delimited JSON-RPC 2.0 on stdin/stdout, logs on stderr
//! - **Protocol**: MCP-style `initialize`, `tools/list`, `tools/call`
//! - **State**: a [`SessionRegistry`]; every tool takes an optional `session` id
//!   (default `"default"`), and sessions never share gate, cache, or history
//!
//! # Tools
//! - `schema` - list tables or keys (cached per connection, `refresh` to bypass)
//! - `execute` - run a command; dangerous commands come back awaiting confirmation
//! - `confirm` / `cancel` - resolve the pending command
//! - `action` - run a context action (`sample`, `count`, `drop`) on a schema entry
//! - `history` / `restore` - read the session's command history
//! - `close` - end a session and release its state
//!
//! Sessions are created by `schema`, `execute` and `action`; the read-only tools never
//! create one.
//!
//! Tool failures are reported inside the tool result as
//! `{"ok": false, "error": {"code": "...", "message": "..."}}` with `isError: true`.
//! JSON-RPC errors are reserved for protocol problems (unknown method, malformed request).
//!
//! # Usage
//! ```json
//! { "mcpServers": { "dbconsole": { "command": "dbconsole", "args": ["serve"] } } }
//! ```

use anyhow::{anyhow, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use tracing::{debug, info};

use crate::config::ConsoleConfig;
use crate::descriptor::{ConnectionConfig, ConnectionDescriptor};
use crate::engine::{EngineAdapter, EngineFamily, EngineKind, Engines, EntryKind, SchemaEntry};
use crate::error::ConsoleError;
use crate::output::{ErrorEnvelope, Metadata, SuccessEnvelope};
use crate::session::{RunStatus, SessionRegistry, DEFAULT_SESSION};
use crate::synth::ContextAction;
use crate::RawCommand;

// ============================================================================
// JSON-RPC 2.0 Structures
// ============================================================================

#[derive(Debug, Deserialize)]
struct JsonRpcRequest {
    #[allow(dead_code)]
    jsonrpc: String,
    id: Option<Value>,
    method: String,
    params: Option<Value>,
}

#[derive(Debug, Serialize)]
struct JsonRpcResponse {
    jsonrpc: &'static str,
    id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Serialize)]
struct JsonRpcError {
    code: i32,
    message: String,
}

const PARSE_ERROR: i32 = -32700;
const METHOD_NOT_FOUND: i32 = -32601;
const INVALID_PARAMS: i32 = -32602;

impl JsonRpcResponse {
    const fn result(id: Option<Value>, result: Value) -> Self {
        Self { jsonrpc: "2.0", id, result: Some(result), error: None }
    }

    fn error(id: Option<Value>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(JsonRpcError { code, message: message.into() }),
        }
    }
}

// ============================================================================
// Tool Result Structures
// ============================================================================

#[derive(Debug, Serialize)]
struct TextContent {
    #[serde(rename = "type")]
    content_type: &'static str,
    text: String,
}

/// Tool call result: one text block holding a JSON envelope
#[derive(Debug, Serialize)]
struct CallToolResult {
    content: Vec<TextContent>,
    #[serde(rename = "isError")]
    is_error: bool,
}

impl CallToolResult {
    fn new(envelope: &impl Serialize, is_error: bool) -> Result<Value> {
        let text = serde_json::to_string_pretty(envelope)?;
        let result = Self { content: vec![TextContent { content_type: "text", text }], is_error };
        Ok(serde_json::to_value(result)?)
    }
}

// ============================================================================
// Tool Arguments
// ============================================================================

/// Connection selection shared by tools that talk to an engine
#[derive(Debug, Default, Deserialize, JsonSchema)]
struct ConnectionArgs {
    /// Name of a saved connection. When both this and `engine` are omitted, the default
    /// saved connection is used.
    connection: Option<String>,
    /// Engine for an explicit connection: postgres, sqlite, or redis
    engine: Option<String>,
    /// Host (postgres, redis)
    host: Option<String>,
    /// Port (postgres, redis)
    port: Option<u16>,
    /// User (postgres, optional ACL user for redis)
    user: Option<String>,
    /// Password
    password: Option<String>,
    /// Database name (postgres) or logical database index (redis)
    database: Option<String>,
    /// Database file (sqlite)
    file: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize, JsonSchema)]
struct SessionArgs {
    /// Session id; sessions keep separate confirmation state, schema cache, and history
    session: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct SchemaArgs {
    #[serde(flatten)]
    session: SessionArgs,
    #[serde(flatten)]
    connection: ConnectionArgs,
    /// Bypass the cached inventory
    #[serde(default)]
    refresh: bool,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct ExecuteArgs {
    #[serde(flatten)]
    session: SessionArgs,
    #[serde(flatten)]
    connection: ConnectionArgs,
    /// Command text (SQL for relational engines, a Redis command for redis)
    command: String,
    /// Table or key to sample instead of running `command`
    target: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct ActionArgs {
    #[serde(flatten)]
    session: SessionArgs,
    #[serde(flatten)]
    connection: ConnectionArgs,
    /// Table or key name
    name: String,
    /// Entry kind as reported by `schema` (table, string, hash, list, set, sorted-set,
    /// stream, unknown)
    kind: Option<String>,
    /// One of sample, count, drop
    action: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct RestoreArgs {
    #[serde(flatten)]
    session: SessionArgs,
    /// History position, 0 = most recent
    index: usize,
}

fn parse_args<T: serde::de::DeserializeOwned>(args: Value) -> Result<T, ConsoleError> {
    let args = if args.is_null() { Value::Object(serde_json::Map::new()) } else { args };
    serde_json::from_value(args)
        .map_err(|e| ConsoleError::invalid_input(format!("Invalid tool arguments: {e}")))
}

fn input_schema<T: JsonSchema>() -> Value {
    serde_json::to_value(schemars::schema_for!(T)).unwrap_or(Value::Null)
}

fn tool(name: &str, description: &str, schema: Value) -> Value {
    serde_json::json!({ "name": name, "description": description, "inputSchema": schema })
}

// ============================================================================
// Server
// ============================================================================

/// Tool server state: the session registry and the loaded configuration
pub struct McpServer<A = Engines> {
    registry: SessionRegistry<A>,
    config: ConsoleConfig,
}

impl McpServer<Engines> {
    /// Server over the compiled-in engines, configured from `config`
    #[must_use]
    pub fn from_config(config: ConsoleConfig) -> Self {
        let adapter = Engines::new(config.settings.engine());
        Self::new(adapter, config)
    }
}

impl<A: EngineAdapter + Clone> McpServer<A> {
    /// Server over `adapter` with saved connections from `config`
    pub fn new(adapter: A, config: ConsoleConfig) -> Self {
        let settings = config.settings.session();
        Self { registry: SessionRegistry::new(adapter, settings), config }
    }

    /// Handle one input line, returning the serialized response if one is due
    ///
    /// Blank lines and notifications produce no response.
    pub async fn handle_line(&self, line: &str) -> Result<Option<String>> {
        if line.trim().is_empty() {
            return Ok(None);
        }

        let response = match serde_json::from_str::<JsonRpcRequest>(line) {
            Ok(request) if request.id.is_none() && request.method.starts_with("notifications/") => {
                debug!(method = %request.method, "notification");
                return Ok(None);
            }
            Ok(request) => self.handle_request(request).await,
            Err(e) => JsonRpcResponse::error(None, PARSE_ERROR, format!("Parse error: {e}")),
        };

        Ok(Some(serde_json::to_string(&response)?))
    }

    async fn handle_request(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let id = request.id;
        match request.method.as_str() {
            "initialize" => JsonRpcResponse::result(id, initialize_result()),
            "tools/list" => JsonRpcResponse::result(id, list_tools()),
            "tools/call" => match self.handle_call_tool(request.params).await {
                Ok(value) => JsonRpcResponse::result(id, value),
                Err(e) => JsonRpcResponse::error(id, INVALID_PARAMS, e.to_string()),
            },
            other => JsonRpcResponse::error(id, METHOD_NOT_FOUND, format!("Unknown method: {other}")),
        }
    }

    async fn handle_call_tool(&self, params: Option<Value>) -> Result<Value> {
        let mut params = params.ok_or_else(|| anyhow!("Missing params"))?;
        let name = params["name"].as_str().ok_or_else(|| anyhow!("Missing tool name"))?.to_string();
        let arguments = params.get_mut("arguments").map_or(Value::Null, Value::take);

        debug!(tool = %name, "tool call");
        let (engine, outcome) = match name.as_str() {
            "schema" => self.tool_schema(arguments).await,
            "execute" => self.tool_execute(arguments).await,
            "confirm" => self.tool_confirm(arguments).await,
            "cancel" => self.tool_cancel(arguments),
            "action" => self.tool_action(arguments).await,
            "history" => self.tool_history(arguments),
            "restore" => self.tool_restore(arguments),
            "close" => self.tool_close(arguments),
            _ => return Err(anyhow!("Unknown tool: {name}")),
        };

        match outcome {
            Ok((data, meta)) => CallToolResult::new(&SuccessEnvelope::new(engine, name, data, meta), false),
            Err(err) => CallToolResult::new(&ErrorEnvelope::from_error(engine, name, &err), true),
        }
    }

    fn session_id(args: &SessionArgs) -> &str {
        args.session.as_deref().unwrap_or(DEFAULT_SESSION)
    }

    /// Explicit connection when `engine` is given, otherwise a saved one
    fn resolve_descriptor(&self, args: ConnectionArgs) -> Result<ConnectionDescriptor, ConsoleError> {
        let config = match args.engine {
            Some(engine) => ConnectionConfig {
                engine: engine.parse::<EngineKind>()?,
                host: args.host,
                port: args.port,
                user: args.user,
                password: args.password,
                database: args.database,
                file: args.file,
            },
            None => self.config.resolve_connection(args.connection.as_deref())?,
        };

        Ok(ConnectionDescriptor::validate(config)?)
    }
}

type ToolOutcome = (String, Result<(Value, Metadata), ConsoleError>);

fn to_data(value: impl Serialize) -> Result<Value, ConsoleError> {
    serde_json::to_value(value)
        .map_err(|e| ConsoleError::engine_error("", format!("Could not serialize result: {e}")))
}

/// Data and metadata for a run that either completed or is waiting on the gate
fn status_data(status: RunStatus) -> Result<(Value, Metadata), ConsoleError> {
    match status {
        RunStatus::Completed(outcome) => Ok((to_data(outcome.result)?, outcome.meta)),
        awaiting @ RunStatus::AwaitingConfirmation { .. } => Ok((to_data(awaiting)?, Metadata::new(0))),
    }
}

impl<A: EngineAdapter + Clone> McpServer<A> {
    async fn tool_schema(&self, args: Value) -> ToolOutcome {
        let args: SchemaArgs = match parse_args(args) {
            Ok(a) => a,
            Err(e) => return (String::new(), Err(e)),
        };
        let descriptor = match self.resolve_descriptor(args.connection) {
            Ok(d) => d,
            Err(e) => return (String::new(), Err(e)),
        };
        let engine = descriptor.engine().to_string();
        let session = self.registry.session(Self::session_id(&args.session));

        let start = std::time::Instant::now();
        let fetched = if args.refresh {
            session.refresh_schema(&descriptor).await
        } else {
            session.fetch_schema(&descriptor).await
        };

        let outcome = fetched.and_then(|entries| {
            let meta = Metadata::with_rows(elapsed_ms(start), entries.len());
            Ok((serde_json::json!({ "entries": to_data(entries)? }), meta))
        });
        (engine, outcome)
    }

    async fn tool_execute(&self, args: Value) -> ToolOutcome {
        let args: ExecuteArgs = match parse_args(args) {
            Ok(a) => a,
            Err(e) => return (String::new(), Err(e)),
        };
        let descriptor = match self.resolve_descriptor(args.connection) {
            Ok(d) => d,
            Err(e) => return (String::new(), Err(e)),
        };
        let engine = descriptor.engine().to_string();
        let session = self.registry.session(Self::session_id(&args.session));

        let command = match args.target.filter(|t| !t.is_empty()) {
            Some(target) => RawCommand::new(args.command).with_target(target),
            None => RawCommand::new(args.command),
        };

        let outcome = session.run_guarded(&descriptor, command).await.and_then(status_data);
        (engine, outcome)
    }

    async fn tool_confirm(&self, args: Value) -> ToolOutcome {
        let args: SessionArgs = match parse_args(args) {
            Ok(a) => a,
            Err(e) => return (String::new(), Err(e)),
        };
        let Some(session) = self.registry.get(Self::session_id(&args)) else {
            return (String::new(), Err(ConsoleError::NoPendingConfirmation));
        };
        let engine = session.pending_engine().map(|e| e.to_string()).unwrap_or_default();

        let outcome = session.confirm().await.and_then(|o| Ok((to_data(o.result)?, o.meta)));
        if outcome.is_ok() {
            info!(session = Self::session_id(&args), "confirmed command executed");
        }
        (engine, outcome)
    }

    fn tool_cancel(&self, args: Value) -> ToolOutcome {
        let args: SessionArgs = match parse_args(args) {
            Ok(a) => a,
            Err(e) => return (String::new(), Err(e)),
        };
        let session = self.registry.get(Self::session_id(&args));
        let engine = session
            .as_ref()
            .and_then(|s| s.pending_engine())
            .map(|e| e.to_string())
            .unwrap_or_default();

        let cancelled = session.and_then(|s| s.cancel());
        let outcome = to_data(serde_json::json!({ "cancelled": cancelled }))
            .map(|data| (data, Metadata::new(0)));
        (engine, outcome)
    }

    async fn tool_action(&self, args: Value) -> ToolOutcome {
        let args: ActionArgs = match parse_args(args) {
            Ok(a) => a,
            Err(e) => return (String::new(), Err(e)),
        };
        let descriptor = match self.resolve_descriptor(args.connection) {
            Ok(d) => d,
            Err(e) => return (String::new(), Err(e)),
        };
        let engine = descriptor.engine().to_string();

        let parsed = args.action.parse::<ContextAction>().and_then(|action| {
            let kind = match args.kind.as_deref() {
                Some(kind) => kind.parse::<EntryKind>()?,
                None if descriptor.family() == EngineFamily::Relational => EntryKind::Table,
                None => EntryKind::Unknown,
            };
            Ok((action, kind))
        });
        let (action, kind) = match parsed {
            Ok(p) => p,
            Err(e) => return (engine, Err(e)),
        };

        let session = self.registry.session(Self::session_id(&args.session));
        let entry = SchemaEntry::new(args.name, kind);
        let outcome = session.run_action(&descriptor, &entry, action).await.and_then(status_data);
        (engine, outcome)
    }

    fn tool_history(&self, args: Value) -> ToolOutcome {
        let outcome = parse_args::<SessionArgs>(args).and_then(|args| {
            let history =
                self.registry.get(Self::session_id(&args)).map(|s| s.history()).unwrap_or_default();
            let meta = Metadata::with_rows(0, history.len());
            Ok((serde_json::json!({ "entries": to_data(history)? }), meta))
        });
        (String::new(), outcome)
    }

    fn tool_restore(&self, args: Value) -> ToolOutcome {
        let outcome = parse_args::<RestoreArgs>(args).and_then(|args| {
            let command = match self.registry.get(Self::session_id(&args.session)) {
                Some(session) => session.restore(args.index)?,
                None => return Err(ConsoleError::invalid_input(format!(
                    "History index {} out of range (0 entries)",
                    args.index
                ))),
            };
            Ok((serde_json::json!({ "command": command }), Metadata::new(0)))
        });
        (String::new(), outcome)
    }

    /// Forget a session: its pending command, schema cache and history
    fn tool_close(&self, args: Value) -> ToolOutcome {
        let outcome = parse_args::<SessionArgs>(args).and_then(|args| {
            let id = Self::session_id(&args);
            let closed = self.registry.close(id);
            debug!(session = id, closed, "session closed");
            to_data(serde_json::json!({ "closed": closed })).map(|data| (data, Metadata::new(0)))
        });
        (String::new(), outcome)
    }
}

fn elapsed_ms(start: std::time::Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

// ============================================================================
// Protocol Handlers
// ============================================================================

fn initialize_result() -> Value {
    serde_json::json!({
        "protocolVersion": "2024-11-05",
        "capabilities": { "tools": {} },
        "serverInfo": { "name": "dbconsole", "version": env!("CARGO_PKG_VERSION") }
    })
}

fn list_tools() -> Value {
    serde_json::json!({
        "tools": [
            tool(
                "schema",
                "List tables (postgres, sqlite) or keys with their types (redis). Results are \
                 cached per connection; pass refresh=true to fetch again.",
                input_schema::<SchemaArgs>(),
            ),
            tool(
                "execute",
                "Run a command. Commands containing DROP, DELETE FROM, TRUNCATE TABLE or ALTER \
                 TABLE (and DEL/UNLINK/FLUSHDB/FLUSHALL on redis) are not run: the result is \
                 {\"status\": \"awaiting_confirmation\"} and the command must be confirmed with \
                 the confirm tool after required_delay_seconds.",
                input_schema::<ExecuteArgs>(),
            ),
            tool(
                "confirm",
                "Run the command awaiting confirmation. Fails with TOO_EARLY before the delay \
                 has elapsed and NO_PENDING_CONFIRMATION when nothing is pending.",
                input_schema::<SessionArgs>(),
            ),
            tool(
                "cancel",
                "Discard the command awaiting confirmation.",
                input_schema::<SessionArgs>(),
            ),
            tool(
                "action",
                "Run a context action on a table or key: sample (bounded read), count, or drop \
                 (always requires confirmation). Not recorded in history.",
                input_schema::<ActionArgs>(),
            ),
            tool(
                "history",
                "List the session's recent commands, most recent first.",
                input_schema::<SessionArgs>(),
            ),
            tool(
                "restore",
                "Return the command text at a history position.",
                input_schema::<RestoreArgs>(),
            ),
            tool(
                "close",
                "End a session, discarding its pending command, cached schema and history.",
                input_schema::<SessionArgs>(),
            ),
        ]
    })
}

/// Run the tool server on stdin/stdout until stdin closes
///
/// # Errors
/// Returns an error if stdio communication fails.
#[allow(clippy::future_not_send)]
pub async fn serve(config: ConsoleConfig) -> Result<()> {
    let server = McpServer::from_config(config);
    info!("tool server listening on stdio");

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = line?;
        if let Some(response) = server.handle_line(&line).await? {
            writeln!(stdout, "{response}")?;
            stdout.flush()?;
        }
    }

    Ok(())
}
