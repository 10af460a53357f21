//! Interactive Console
//!
//! Line-oriented loop over one session and one connection. Plain lines are commands for the
//! engine; lines starting with `\` are console meta-commands. Every result is written as a
//! JSON envelope, one per input line.
//!
//! ```text
//! \schema            list tables or keys (cached)
//! \refresh           list again, bypassing the cache
//! \history           recent commands, most recent first
//! \restore N         print history entry N
//! \confirm           run the command awaiting confirmation
//! \cancel            discard it
//! \sample NAME       \count NAME       \drop NAME
//! \help              \quit
//! ```

use anyhow::Result;
use serde::Serialize;
use std::io::Write;
use std::time::Instant;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::command::RawCommand;
use crate::descriptor::ConnectionDescriptor;
use crate::engine::{EngineAdapter, EngineFamily, EntryKind, SchemaEntry};
use crate::error::ConsoleError;
use crate::output::{ErrorEnvelope, Metadata, SuccessEnvelope};
use crate::session::{ConsoleSession, RunStatus};
use crate::synth::ContextAction;

const HELP: &str = "\\schema  \\refresh  \\history  \\restore N  \\confirm  \\cancel  \
                    \\sample NAME  \\count NAME  \\drop NAME  \\help  \\quit";

/// One parsed console line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleInput {
    /// Command text for the engine
    Command(String),
    Schema,
    Refresh,
    History,
    Restore(usize),
    Confirm,
    Cancel,
    Action { action: ContextAction, name: String },
    Help,
    Quit,
}

/// Parse a console line; blank lines yield `None`
///
/// # Errors
/// `InvalidInput` for unknown meta-commands or missing arguments.
pub fn parse_line(line: &str) -> Result<Option<ConsoleInput>, ConsoleError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    if !trimmed.starts_with('\\') {
        return Ok(Some(ConsoleInput::Command(trimmed.to_string())));
    }

    let (meta, rest) = trimmed.split_once(char::is_whitespace).unwrap_or((trimmed, ""));
    let rest = rest.trim();

    let input = match meta {
        "\\quit" | "\\q" => ConsoleInput::Quit,
        "\\help" | "\\?" => ConsoleInput::Help,
        "\\schema" | "\\dt" => ConsoleInput::Schema,
        "\\refresh" => ConsoleInput::Refresh,
        "\\history" | "\\h" => ConsoleInput::History,
        "\\confirm" => ConsoleInput::Confirm,
        "\\cancel" => ConsoleInput::Cancel,
        "\\restore" => {
            let index = rest.parse::<usize>().map_err(|_| {
                ConsoleError::invalid_input("\\restore requires a history index, e.g. \\restore 0")
            })?;
            ConsoleInput::Restore(index)
        }
        "\\sample" | "\\count" | "\\drop" => {
            if rest.is_empty() {
                return Err(ConsoleError::invalid_input(format!("{meta} requires a table or key name")));
            }
            let action = meta.trim_start_matches('\\').parse::<ContextAction>()?;
            ConsoleInput::Action { action, name: rest.to_string() }
        }
        other => {
            return Err(ConsoleError::invalid_input(format!(
                "Unknown command '{other}'. Type \\help for a list"
            )))
        }
    };

    Ok(Some(input))
}

/// Interactive console bound to one connection
pub struct Console<'a, A> {
    session: &'a ConsoleSession<A>,
    descriptor: ConnectionDescriptor,
}

impl<'a, A: EngineAdapter> Console<'a, A> {
    /// Console over `session`, bound to one connection
    pub const fn new(session: &'a ConsoleSession<A>, descriptor: ConnectionDescriptor) -> Self {
        Self { session, descriptor }
    }

    /// Read lines from `input` until it ends or `\quit`, writing envelopes to `out`
    pub async fn run<R, W>(&self, input: R, out: &mut W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: Write,
    {
        let mut lines = input.lines();
        while let Some(line) = lines.next_line().await? {
            match parse_line(&line) {
                Ok(None) => {}
                Ok(Some(ConsoleInput::Quit)) => break,
                Ok(Some(ConsoleInput::Help)) => writeln!(out, "{HELP}")?,
                Ok(Some(parsed)) => self.dispatch(parsed, out).await?,
                Err(err) => emit_error(out, "", "console", &err)?,
            }
        }
        Ok(())
    }

    async fn dispatch<W: Write>(&self, input: ConsoleInput, out: &mut W) -> Result<()> {
        let engine = self.descriptor.engine().as_str();
        let start = Instant::now();

        match input {
            ConsoleInput::Command(text) => {
                let status = self.session.run_guarded(&self.descriptor, RawCommand::new(text)).await;
                emit_status(out, engine, "execute", status)
            }
            ConsoleInput::Schema | ConsoleInput::Refresh => {
                let (name, fetched) = if input == ConsoleInput::Refresh {
                    ("refresh", self.session.refresh_schema(&self.descriptor).await)
                } else {
                    ("schema", self.session.fetch_schema(&self.descriptor).await)
                };
                match fetched {
                    Ok(entries) => {
                        let meta = Metadata::with_rows(elapsed_ms(start), entries.len());
                        emit(out, &SuccessEnvelope::new(engine, name, entries, meta))
                    }
                    Err(err) => emit_error(out, engine, name, &err),
                }
            }
            ConsoleInput::History => {
                let history = self.session.history();
                let meta = Metadata::with_rows(0, history.len());
                emit(out, &SuccessEnvelope::new(engine, "history", history, meta))
            }
            ConsoleInput::Restore(index) => match self.session.restore(index) {
                Ok(command) => {
                    let data = serde_json::json!({ "command": command });
                    emit(out, &SuccessEnvelope::new(engine, "restore", data, Metadata::new(0)))
                }
                Err(err) => emit_error(out, engine, "restore", &err),
            },
            ConsoleInput::Confirm => match self.session.confirm().await {
                Ok(outcome) => emit(out, &SuccessEnvelope::new(engine, "confirm", outcome.result, outcome.meta)),
                Err(err) => emit_error(out, engine, "confirm", &err),
            },
            ConsoleInput::Cancel => {
                let data = serde_json::json!({ "cancelled": self.session.cancel() });
                emit(out, &SuccessEnvelope::new(engine, "cancel", data, Metadata::new(0)))
            }
            ConsoleInput::Action { action, name } => {
                let entry = SchemaEntry::new(name.clone(), self.entry_kind(&name).await);
                let status = self.session.run_action(&self.descriptor, &entry, action).await;
                emit_status(out, engine, "action", status)
            }
            ConsoleInput::Help | ConsoleInput::Quit => Ok(()),
        }
    }

    /// Kind of `name` from the cached inventory
    async fn entry_kind(&self, name: &str) -> EntryKind {
        let fallback = match self.descriptor.family() {
            EngineFamily::Relational => EntryKind::Table,
            EngineFamily::KeyValue => EntryKind::Unknown,
        };
        match self.session.fetch_schema(&self.descriptor).await {
            Ok(entries) => entries.into_iter().find(|e| e.name == name).map_or(fallback, |e| e.kind),
            Err(_) => fallback,
        }
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn emit<W: Write>(out: &mut W, envelope: &impl Serialize) -> Result<()> {
    writeln!(out, "{}", serde_json::to_string_pretty(envelope)?)?;
    Ok(())
}

fn emit_error<W: Write>(out: &mut W, engine: &str, command: &str, err: &ConsoleError) -> Result<()> {
    emit(out, &ErrorEnvelope::from_error(engine, command, err))
}

fn emit_status<W: Write>(
    out: &mut W,
    engine: &str,
    command: &str,
    status: Result<RunStatus, ConsoleError>,
) -> Result<()> {
    match status {
        Ok(RunStatus::Completed(outcome)) => {
            emit(out, &SuccessEnvelope::new(engine, command, outcome.result, outcome.meta))
        }
        Ok(awaiting) => emit(out, &SuccessEnvelope::new(engine, command, awaiting, Metadata::new(0))),
        Err(err) => emit_error(out, engine, command, &err),
    }
}
