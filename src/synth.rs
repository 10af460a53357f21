//! Command Synthesis for Context Actions
//!
//! Turns a schema entry plus an action into command text for the entry's engine family.
//! Synthesized commands never enter history, and `drop` is always routed through the
//! confirmation gate.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::command::RawCommand;
use crate::engine::{quote_identifier, EngineFamily, EntryKind, SchemaEntry};
use crate::error::{ConsoleError, Result};

/// Row limit of a synthesized relational sample
pub const SAMPLE_ROWS: usize = 100;

/// Shortcut offered for a schema entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextAction {
    /// Bounded read of the entry
    #[serde(alias = "select_100")]
    Sample,
    /// Row count or collection size
    #[serde(alias = "count_rows")]
    Count,
    /// Remove the entry
    #[serde(alias = "drop_table")]
    Drop,
}

impl ContextAction {
    /// Lowercase action name
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Sample => "sample",
            Self::Count => "count",
            Self::Drop => "drop",
        }
    }
}

impl fmt::Display for ContextAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ContextAction {
    type Err = ConsoleError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sample" | "select_100" => Ok(Self::Sample),
            "count" | "count_rows" => Ok(Self::Count),
            "drop" | "drop_table" => Ok(Self::Drop),
            other => Err(ConsoleError::invalid_input(format!(
                "Unknown action '{other}'. Must be sample, count, or drop"
            ))),
        }
    }
}

/// Render a key as a single command token
///
/// Keys with whitespace, quotes, or backslashes (and the empty key) are double-quoted
/// with `"` and `\` escaped.
#[must_use]
pub fn quote_key(key: &str) -> String {
    let needs_quotes =
        key.is_empty() || key.chars().any(|c| c.is_whitespace() || c == '"' || c == '\'' || c == '\\');

    if !needs_quotes {
        return key.to_string();
    }

    let mut quoted = String::with_capacity(key.len() + 2);
    quoted.push('"');
    for c in key.chars() {
        match c {
            '"' | '\\' => {
                quoted.push('\\');
                quoted.push(c);
            }
            '\n' => quoted.push_str("\\n"),
            '\t' => quoted.push_str("\\t"),
            '\r' => quoted.push_str("\\r"),
            _ => quoted.push(c),
        }
    }
    quoted.push('"');
    quoted
}

/// Build the command for `action` on the entry `name` of kind `kind`
#[must_use]
pub fn synthesize(name: &str, kind: EntryKind, action: ContextAction, family: EngineFamily) -> RawCommand {
    match family {
        EngineFamily::Relational => relational(name, action),
        EngineFamily::KeyValue => key_value(name, kind, action),
    }
}

/// Same as [`synthesize`] for a schema entry
#[must_use]
pub fn synthesize_entry(entry: &SchemaEntry, action: ContextAction, family: EngineFamily) -> RawCommand {
    synthesize(&entry.name, entry.kind, action, family)
}

fn relational(table: &str, action: ContextAction) -> RawCommand {
    let table = quote_identifier(table);
    match action {
        ContextAction::Sample => {
            RawCommand::synthesized(format!("SELECT * FROM {table} LIMIT {SAMPLE_ROWS};"), false)
        }
        ContextAction::Count => RawCommand::synthesized(format!("SELECT COUNT(*) FROM {table};"), false),
        ContextAction::Drop => RawCommand::synthesized(format!("DROP TABLE {table};"), true),
    }
}

fn key_value(key: &str, kind: EntryKind, action: ContextAction) -> RawCommand {
    let token = quote_key(key);
    match action {
        ContextAction::Sample => match kind {
            EntryKind::String => RawCommand::synthesized(format!("GET {token}"), false),
            EntryKind::Hash => RawCommand::synthesized(format!("HGETALL {token}"), false),
            EntryKind::List => RawCommand::synthesized(format!("LRANGE {token} 0 -1"), false),
            EntryKind::Set => RawCommand::synthesized(format!("SMEMBERS {token}"), false),
            EntryKind::SortedSet => {
                RawCommand::synthesized(format!("ZRANGE {token} 0 -1 WITHSCORES"), false)
            }
            EntryKind::Stream => {
                RawCommand::synthesized(format!("XRANGE {token} - + COUNT {SAMPLE_ROWS}"), false)
            }
            // The adapter types the key itself
            EntryKind::Unknown | EntryKind::Table => RawCommand::explore(key),
        },
        ContextAction::Count => {
            let verb = match kind {
                EntryKind::String => "STRLEN",
                EntryKind::Hash => "HLEN",
                EntryKind::Set => "SCARD",
                EntryKind::SortedSet => "ZCARD",
                EntryKind::Stream => "XLEN",
                EntryKind::List | EntryKind::Unknown | EntryKind::Table => "LLEN",
            };
            RawCommand::synthesized(format!("{verb} {token}"), false)
        }
        ContextAction::Drop => RawCommand::synthesized(format!("DEL {token}"), true),
    }
}
