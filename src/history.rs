//! History Ledger
//!
//! Bounded, most-recent-first record of commands the operator ran. Running a command
//! that is already in the ledger moves it to the front instead of adding a second copy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Maximum number of records kept
pub const HISTORY_CAPACITY: usize = 20;

/// One successful historical execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// Command text as it was run
    pub command: String,

    /// Completion time
    pub executed_at: DateTime<Utc>,

    /// Rows returned, for tabular results
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_count: Option<usize>,

    /// Wall-clock duration of the adapter call
    pub duration_ms: u64,
}

impl ExecutionRecord {
    /// Record a command that just completed
    pub fn now(command: impl Into<String>, row_count: Option<usize>, duration_ms: u64) -> Self {
        Self { command: command.into(), executed_at: Utc::now(), row_count, duration_ms }
    }
}

/// Most-recent-first, deduplicating command history
#[derive(Debug, Clone, Default)]
pub struct HistoryLedger {
    records: VecDeque<ExecutionRecord>,
}

impl HistoryLedger {
    /// Empty ledger
    #[must_use]
    pub fn new() -> Self {
        Self { records: VecDeque::with_capacity(HISTORY_CAPACITY) }
    }

    /// Add a record at the front
    ///
    /// Returns `false` when the command already heads the ledger; nothing changes then.
    /// An older occurrence of the same command is removed before prepending, and the
    /// oldest record is dropped past capacity.
    pub fn record(&mut self, record: ExecutionRecord) -> bool {
        if self.records.front().is_some_and(|head| head.command == record.command) {
            return false;
        }

        if let Some(pos) = self.records.iter().position(|r| r.command == record.command) {
            self.records.remove(pos);
        }

        self.records.push_front(record);
        self.records.truncate(HISTORY_CAPACITY);
        true
    }

    /// Command text at `index` (0 = most recent)
    #[must_use]
    pub fn restore(&self, index: usize) -> Option<&str> {
        self.records.get(index).map(|r| r.command.as_str())
    }

    /// Record at `index`, 0 being the most recent
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&ExecutionRecord> {
        self.records.get(index)
    }

    /// Records, most recent first
    pub fn iter(&self) -> impl Iterator<Item = &ExecutionRecord> {
        self.records.iter()
    }

    /// Number of records
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when nothing has been recorded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Snapshot for reporting
    #[must_use]
    pub fn to_vec(&self) -> Vec<ExecutionRecord> {
        self.records.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn rec(command: &str) -> ExecutionRecord {
        ExecutionRecord::now(command, None, 1)
    }

    fn commands(ledger: &HistoryLedger) -> Vec<&str> {
        ledger.iter().map(|r| r.command.as_str()).collect()
    }

    #[test]
    fn test_most_recent_first() {
        let mut ledger = HistoryLedger::new();
        ledger.record(rec("A"));
        ledger.record(rec("B"));
        assert_eq!(commands(&ledger), vec!["B", "A"]);
        assert_eq!(ledger.restore(0), Some("B"));
        assert_eq!(ledger.restore(2), None);
    }

    #[test]
    fn test_dedup_promotes_existing() {
        let mut ledger = HistoryLedger::new();
        for c in ["A", "B", "C", "A"] {
            ledger.record(rec(c));
        }
        assert_eq!(commands(&ledger), vec!["A", "C", "B"]);
    }

    #[test]
    fn test_adjacent_duplicate_is_noop() {
        let mut ledger = HistoryLedger::new();
        assert!(ledger.record(rec("A")));
        let first_at = ledger.get(0).unwrap().executed_at;

        assert!(!ledger.record(ExecutionRecord::now("A", Some(5), 99)));
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.get(0).unwrap().executed_at, first_at);
        assert_eq!(ledger.get(0).unwrap().row_count, None);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let mut ledger = HistoryLedger::new();
        for i in 0..25 {
            ledger.record(rec(&format!("SELECT {i}")));
        }
        assert_eq!(ledger.len(), HISTORY_CAPACITY);
        assert_eq!(ledger.restore(0), Some("SELECT 24"));
        assert_eq!(ledger.restore(HISTORY_CAPACITY - 1), Some("SELECT 5"));
    }

    #[test]
    fn test_promote_at_capacity_keeps_size() {
        let mut ledger = HistoryLedger::new();
        for i in 0..HISTORY_CAPACITY {
            ledger.record(rec(&format!("Q{i}")));
        }
        ledger.record(rec("Q0"));
        assert_eq!(ledger.len(), HISTORY_CAPACITY);
        assert_eq!(ledger.restore(0), Some("Q0"));
        assert_eq!(ledger.restore(HISTORY_CAPACITY - 1), Some("Q1"));
    }

    #[test]
    fn test_record_serializes_timestamp() {
        let value = serde_json::to_value(ExecutionRecord::now("PING", None, 3)).unwrap();
        assert!(value["executed_at"].is_string());
        assert!(value.get("row_count").is_none());
    }
}
