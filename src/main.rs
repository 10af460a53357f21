//! dbconsole CLI Entry Point
//!
//! Subcommands:
//! - `connect` - validate a connection (prompting for missing fields) and optionally save it
//! - `schema` - list tables or keys
//! - `exec` - run one command; dangerous commands wait out the confirmation delay
//! - `action` - run a context action (sample, count, drop) on a table or key
//! - `console` - interactive console with backslash meta-commands
//! - `serve` - JSON-RPC tool server on stdio
//!
//! All output to stdout is JSON. Logs and prompts go to stderr.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use dialoguer::{Confirm, Input, Password};
use serde::Serialize;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

use dbconsole::{
    config::{load_with_precedence, save_connection, ConfigLocation, ConsoleConfig, StoredConnection},
    console::Console,
    mcp, ConnectionConfig, ConnectionDescriptor, ConsoleError, ConsoleSession, ContextAction,
    EngineFamily, EngineKind, Engines, EntryKind, ErrorEnvelope, ExecutionOutcome, Metadata,
    RawCommand, RunStatus, SchemaEntry, SuccessEnvelope, REQUIRED_DELAY,
};

/// dbconsole - multi-engine database console
#[derive(Parser)]
#[command(name = "dbconsole")]
#[command(about = "Database console for PostgreSQL, SQLite and Redis with guarded destructive commands")]
#[command(version)]
struct Cli {
    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a connection and optionally save it
    Connect {
        #[command(flatten)]
        conn: ConnectionArgs,

        /// Save the connection under --name
        #[arg(long, value_enum)]
        save: Option<SaveTarget>,

        /// Store the password as a reference to this environment variable
        #[arg(long)]
        password_env: Option<String>,

        /// Fail instead of prompting for missing fields
        #[arg(long)]
        no_prompt: bool,
    },

    /// List tables or keys
    Schema {
        #[command(flatten)]
        conn: ConnectionArgs,

        /// Ignore cached results
        #[arg(long)]
        refresh: bool,
    },

    /// Run one command
    Exec {
        #[command(flatten)]
        conn: ConnectionArgs,

        /// Command text
        command: String,

        /// Sample this table or key instead of running the command
        #[arg(long)]
        target: Option<String>,

        /// Confirm a dangerous command without asking (the delay still applies)
        #[arg(long, short)]
        yes: bool,
    },

    /// Run a context action on a table or key
    Action {
        #[command(flatten)]
        conn: ConnectionArgs,

        /// sample, count, or drop
        action: ContextAction,

        /// Table or key name
        target: String,

        /// Entry kind (table, string, hash, list, set, sorted-set, stream)
        #[arg(long)]
        kind: Option<EntryKind>,

        /// Confirm a drop without asking (the delay still applies)
        #[arg(long, short)]
        yes: bool,
    },

    /// Interactive console
    Console {
        #[command(flatten)]
        conn: ConnectionArgs,
    },

    /// JSON-RPC tool server on stdio
    Serve,
}

/// Connection selection: a saved name, or explicit fields with --engine
#[derive(Args, Debug, Default)]
struct ConnectionArgs {
    /// Saved connection name (default connection when omitted)
    #[arg(long)]
    name: Option<String>,

    /// Engine for an explicit connection
    #[arg(long)]
    engine: Option<EngineKind>,

    #[arg(long)]
    host: Option<String>,

    #[arg(long)]
    port: Option<u16>,

    #[arg(long)]
    user: Option<String>,

    #[arg(long)]
    password: Option<String>,

    /// Database name (postgres) or logical database index (redis)
    #[arg(long)]
    database: Option<String>,

    /// Database file (sqlite)
    #[arg(long)]
    file: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum SaveTarget {
    Local,
    Global,
}

impl From<SaveTarget> for ConfigLocation {
    fn from(target: SaveTarget) -> Self {
        match target {
            SaveTarget::Local => Self::Local,
            SaveTarget::Global => Self::Global,
        }
    }
}

impl ConnectionArgs {
    fn explicit(&self) -> Option<ConnectionConfig> {
        self.engine.map(|engine| ConnectionConfig {
            engine,
            host: self.host.clone(),
            port: self.port,
            user: self.user.clone(),
            password: self.password.clone(),
            database: self.database.clone(),
            file: self.file.clone(),
        })
    }

    fn resolve(&self, config: &ConsoleConfig) -> Result<ConnectionDescriptor, ConsoleError> {
        let resolved = match self.explicit() {
            Some(explicit) => explicit,
            None => config.resolve_connection(self.name.as_deref())?,
        };
        Ok(ConnectionDescriptor::validate(resolved)?)
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli.command).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {e:#}");
            std::process::exit(2);
        }
    }
}

/// Returns whether the command succeeded; `Err` only for I/O failures of the CLI itself
async fn run(command: Commands) -> Result<bool> {
    let config = load_with_precedence().context("loading configuration")?;

    match command {
        Commands::Serve => {
            mcp::serve(config).await?;
            Ok(true)
        }
        Commands::Connect { conn, save, password_env, no_prompt } => {
            connect(&config, conn, save, password_env, no_prompt).await
        }
        Commands::Schema { conn, refresh } => {
            let descriptor = match conn.resolve(&config) {
                Ok(d) => d,
                Err(e) => return print_error("", "schema", &e),
            };
            let session = new_session(&config);
            let engine = descriptor.engine().as_str();
            let start = Instant::now();
            let fetched = if refresh {
                session.refresh_schema(&descriptor).await
            } else {
                session.fetch_schema(&descriptor).await
            };
            match fetched {
                Ok(entries) => {
                    let meta = Metadata::with_rows(elapsed_ms(start), entries.len());
                    print_success(engine, "schema", serde_json::json!({ "entries": entries }), meta)
                }
                Err(e) => print_error(engine, "schema", &e),
            }
        }
        Commands::Exec { conn, command, target, yes } => {
            let descriptor = match conn.resolve(&config) {
                Ok(d) => d,
                Err(e) => return print_error("", "execute", &e),
            };
            let session = new_session(&config);
            let raw = match target.filter(|t| !t.is_empty()) {
                Some(target) => RawCommand::new(command).with_target(target),
                None => RawCommand::new(command),
            };
            let status = session.run_guarded(&descriptor, raw).await;
            finish(&session, &descriptor, "execute", status, yes).await
        }
        Commands::Action { conn, action, target, kind, yes } => {
            let descriptor = match conn.resolve(&config) {
                Ok(d) => d,
                Err(e) => return print_error("", "action", &e),
            };
            let session = new_session(&config);
            let kind = kind.unwrap_or(match descriptor.family() {
                EngineFamily::Relational => EntryKind::Table,
                EngineFamily::KeyValue => EntryKind::Unknown,
            });
            let entry = SchemaEntry::new(target, kind);
            let status = session.run_action(&descriptor, &entry, action).await;
            finish(&session, &descriptor, "action", status, yes).await
        }
        Commands::Console { conn } => {
            let descriptor = match conn.resolve(&config) {
                Ok(d) => d,
                Err(e) => return print_error("", "console", &e),
            };
            let session = new_session(&config);
            if let Err(e) = session.connect(&descriptor).await {
                return print_error(descriptor.engine().as_str(), "console", &e);
            }
            eprintln!("Connected to {}. Type \\help for commands.", descriptor.redacted());

            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            Console::new(&session, descriptor).run(stdin, &mut std::io::stdout()).await?;
            Ok(true)
        }
    }
}

fn new_session(config: &ConsoleConfig) -> ConsoleSession {
    ConsoleSession::with_settings(Engines::new(config.settings.engine()), config.settings.session())
}

async fn connect(
    config: &ConsoleConfig,
    conn: ConnectionArgs,
    save: Option<SaveTarget>,
    password_env: Option<String>,
    no_prompt: bool,
) -> Result<bool> {
    let mut resolved = match conn.explicit() {
        Some(explicit) => explicit,
        None if conn.name.is_some() => match config.resolve_connection(conn.name.as_deref()) {
            Ok(c) => c,
            Err(e) => return print_error("", "connect", &e),
        },
        None if no_prompt || !std::io::stdin().is_terminal() => {
            let err = ConsoleError::invalid_input("--engine or --name is required");
            return print_error("", "connect", &err);
        }
        None => {
            let engine = Input::<EngineKind>::new().with_prompt("Engine (postgres, sqlite, redis)").interact_text()?;
            ConnectionConfig {
                engine,
                host: None,
                port: None,
                user: None,
                password: None,
                database: None,
                file: None,
            }
        }
    };

    if !no_prompt && std::io::stdin().is_terminal() {
        prompt_missing(&mut resolved, password_env.is_some())?;
    }

    let descriptor = match ConnectionDescriptor::validate(resolved.clone()) {
        Ok(d) => d,
        Err(e) => return print_error("", "connect", &ConsoleError::from(e)),
    };
    let engine = descriptor.engine().as_str();

    let start = Instant::now();
    let info = match new_session(config).connect(&descriptor).await {
        Ok(info) => info,
        Err(e) => return print_error(engine, "connect", &e),
    };
    let meta = Metadata::new(elapsed_ms(start));

    let mut saved = None;
    if let Some(target) = save {
        let Some(name) = conn.name.as_deref() else {
            let err = ConsoleError::invalid_input("--save requires --name");
            return print_error(engine, "connect", &err);
        };
        let mut stored = StoredConnection::new(resolved);
        if password_env.is_some() {
            stored.config.password = None;
            stored.password_env = password_env;
        }
        match save_connection(name, stored, target.into()) {
            Ok(path) => saved = Some(path),
            Err(e) => return print_error(engine, "connect", &e),
        }
    }

    let data = serde_json::json!({ "connection": info, "saved_to": saved });
    print_success(engine, "connect", data, meta)
}

/// Ask for fields the engine requires that were not given
fn prompt_missing(config: &mut ConnectionConfig, password_from_env: bool) -> Result<()> {
    match config.engine {
        EngineKind::Sqlite => {
            if config.file.is_none() {
                let file: String = Input::new().with_prompt("Database file").interact_text()?;
                config.file = Some(PathBuf::from(file));
            }
        }
        EngineKind::Postgres | EngineKind::Redis => {
            let postgres = config.engine == EngineKind::Postgres;
            if config.host.is_none() {
                config.host = Some(Input::new().with_prompt("Host").default("localhost".into()).interact_text()?);
            }
            if config.port.is_none() {
                let default_port: u16 = if postgres { 5432 } else { 6379 };
                config.port = Some(Input::new().with_prompt("Port").default(default_port).interact_text()?);
            }
            if postgres && config.user.is_none() {
                config.user = Some(Input::new().with_prompt("User").interact_text()?);
            }
            if postgres && config.database.is_none() {
                config.database = Some(Input::new().with_prompt("Database").interact_text()?);
            }
            if config.password.is_none() && !password_from_env {
                let password = Password::new().with_prompt("Password").allow_empty_password(true).interact()?;
                config.password = Some(password).filter(|p| !p.is_empty());
            }
        }
    }
    Ok(())
}

/// Print a run status; dangerous commands wait out the delay and are confirmed
async fn finish(
    session: &ConsoleSession,
    descriptor: &ConnectionDescriptor,
    name: &str,
    status: Result<RunStatus, ConsoleError>,
    yes: bool,
) -> Result<bool> {
    let engine = descriptor.engine().as_str();
    let outcome = match status {
        Ok(RunStatus::Completed(outcome)) => outcome,
        Ok(RunStatus::AwaitingConfirmation { command, required_delay_seconds, superseded }) => {
            if !yes && !std::io::stdin().is_terminal() {
                let awaiting =
                    RunStatus::AwaitingConfirmation { command, required_delay_seconds, superseded };
                return print_success(engine, name, awaiting, Metadata::new(0));
            }

            eprintln!("Dangerous command: {command}");
            eprintln!("Waiting {}s before it can be confirmed...", REQUIRED_DELAY.as_secs());
            tokio::time::sleep(REQUIRED_DELAY).await;

            let approved = yes
                || Confirm::new().with_prompt("Run this command?").default(false).interact()?;
            if !approved {
                session.cancel();
                let data = serde_json::json!({ "cancelled": command });
                return print_success(engine, name, data, Metadata::new(0));
            }

            match session.confirm().await {
                Ok(outcome) => outcome,
                Err(e) => return print_error(engine, name, &e),
            }
        }
        Err(e) => return print_error(engine, name, &e),
    };

    let ExecutionOutcome { result, meta } = outcome;
    print_success(engine, name, result, meta)
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn print_success(engine: &str, command: &str, data: impl Serialize, meta: Metadata) -> Result<bool> {
    let envelope = SuccessEnvelope::new(engine, command, data, meta);
    println!("{}", serde_json::to_string_pretty(&envelope)?);
    Ok(true)
}

fn print_error(engine: &str, command: &str, err: &ConsoleError) -> Result<bool> {
    let envelope = ErrorEnvelope::from_error(engine, command, err);
    println!("{}", serde_json::to_string_pretty(&envelope)?);
    Ok(false)
}
