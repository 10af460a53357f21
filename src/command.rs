//! Raw commands as submitted to the execution pipeline, and the shared command tokenizer

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ConsoleError, Result};

/// Command text that selects the "sample this target" path instead of raw execution
pub const EXPLORE_SENTINEL: &str = "EXPLORE_TABLE";

const fn historical_default() -> bool {
    true
}

/// A command plus the flags that steer it through the pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawCommand {
    /// Command text, opaque to the console
    pub text: String,

    /// Table or key to sample; when set, the adapter's sample path is used
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,

    /// Whether a successful run is recorded in history; ignored when `target` is set
    #[serde(default = "historical_default")]
    pub historical: bool,

    /// Forces the confirmation gate regardless of the text
    #[serde(default)]
    pub destructive: bool,
}

impl RawCommand {
    /// A command typed by the operator
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into(), target: None, historical: true, destructive: false }
    }

    /// A command produced by a context action; never recorded in history
    pub fn synthesized(text: impl Into<String>, destructive: bool) -> Self {
        Self { text: text.into(), target: None, historical: false, destructive }
    }

    /// Sample a table or key through the adapter's bounded read
    pub fn explore(target: impl Into<String>) -> Self {
        Self {
            text: EXPLORE_SENTINEL.to_string(),
            target: Some(target.into()),
            historical: false,
            destructive: false,
        }
    }

    /// Attach a sample target; the command then takes the sample path and is not recorded
    #[must_use]
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self.historical = false;
        self
    }

    /// True when there is nothing to run
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty() && self.target.as_deref().map_or(true, str::is_empty)
    }
}

impl fmt::Display for RawCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target {
            Some(target) if self.text == EXPLORE_SENTINEL => write!(f, "{EXPLORE_SENTINEL} {target}"),
            _ => f.write_str(&self.text),
        }
    }
}

impl From<&str> for RawCommand {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

impl From<String> for RawCommand {
    fn from(text: String) -> Self {
        Self::new(text)
    }
}

/// Split a command line into arguments
///
/// Tokens are separated by whitespace. A double-quoted token may contain whitespace;
/// inside quotes a backslash escapes the next character (`\n`, `\t`, `\r` are control
/// characters). `""` is an empty argument.
///
/// # Errors
/// Returns `InvalidInput` for an unterminated quote.
pub fn tokenize(command: &str) -> Result<Vec<String>> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut chars = command.chars();

    while let Some(c) = chars.next() {
        match c {
            '"' => {
                in_token = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some('n') => current.push('\n'),
                            Some('t') => current.push('\t'),
                            Some('r') => current.push('\r'),
                            Some(escaped) => current.push(escaped),
                            None => {
                                return Err(ConsoleError::invalid_input(
                                    "Unterminated escape in quoted argument",
                                ))
                            }
                        },
                        Some(other) => current.push(other),
                        None => {
                            return Err(ConsoleError::invalid_input(
                                "Unterminated quote in command",
                            ))
                        }
                    }
                }
            }
            c if c.is_whitespace() => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            other => {
                in_token = true;
                current.push(other);
            }
        }
    }

    if in_token {
        tokens.push(current);
    }

    Ok(tokens)
}
