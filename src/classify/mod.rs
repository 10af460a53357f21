//! Command Risk Classification
//!
//! Decides whether a raw command must pass through the confirmation gate.
//!
//! # Strategy
//! - Keyword heuristic, not a parser: case-insensitive substring search
//! - Over-triggers on identifiers that embed a keyword (`dropped_at` is dangerous)
//! - Relational keywords apply to every engine; key-value engines additionally gate
//!   commands whose verb deletes keys
//! - The key-value verb is read after tokenizing, exactly as the adapter will send it;
//!   text that does not tokenize is dangerous

use serde::{Deserialize, Serialize};

use crate::command::tokenize;
use crate::engine::EngineFamily;

/// Substrings that mark a command as destructive
pub const DANGEROUS_KEYWORDS: [&str; 4] = ["DROP", "DELETE FROM", "TRUNCATE TABLE", "ALTER TABLE"];

/// Key-value verbs that remove data
pub const DANGEROUS_KEYVALUE_VERBS: [&str; 4] = ["DEL", "UNLINK", "FLUSHDB", "FLUSHALL"];

/// Risk class of a command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Safety {
    /// Runs immediately
    Safe,
    /// Requires a delayed confirmation
    Dangerous,
}

impl Safety {
    /// True when the command must wait for confirmation
    #[must_use]
    pub const fn is_dangerous(self) -> bool {
        matches!(self, Self::Dangerous)
    }
}

/// Classify a command by the destructive keyword list
///
/// Dangerous iff the text contains any of [`DANGEROUS_KEYWORDS`], ignoring case.
#[must_use]
pub fn classify(text: &str) -> Safety {
    let upper = text.to_uppercase();

    if DANGEROUS_KEYWORDS.iter().any(|keyword| upper.contains(keyword)) {
        Safety::Dangerous
    } else {
        Safety::Safe
    }
}

/// Classify a command for a specific engine family
///
/// Same as [`classify`], and for key-value engines also dangerous when the first
/// token (quotes and escapes resolved) is one of [`DANGEROUS_KEYVALUE_VERBS`], or when
/// the text cannot be tokenized.
#[must_use]
pub fn classify_for(family: EngineFamily, text: &str) -> Safety {
    if classify(text).is_dangerous() {
        return Safety::Dangerous;
    }

    match family {
        EngineFamily::Relational => Safety::Safe,
        EngineFamily::KeyValue => {
            let Ok(tokens) = tokenize(text) else {
                return Safety::Dangerous;
            };
            let verb = tokens.first().map_or("", String::as_str);
            if DANGEROUS_KEYVALUE_VERBS.iter().any(|v| verb.eq_ignore_ascii_case(v)) {
                Safety::Dangerous
            } else {
                Safety::Safe
            }
        }
    }
}
