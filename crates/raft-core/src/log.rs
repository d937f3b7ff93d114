//! # log
//!
//! why: represent the replicated log entries that recovery replays and carries forward
//! relations: embedded in journal records (record.rs) and snapshots (snapshot.rs)
//! what: LogEntry struct, the -1 "no index" sentinel

use serde::{Deserialize, Serialize};

/// index/term value used when nothing has been logged or applied yet
pub const NO_INDEX: i64 = -1;

/// A single entry in the replicated log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// The position of this entry in the log (0-indexed)
    pub index: i64,
    /// The term when this entry was created
    pub term: i64,
    /// The command to be applied to the state machine
    pub command: Vec<u8>,
}

impl LogEntry {
    /// Create a new log entry
    pub fn new(index: i64, term: i64, command: impl Into<Vec<u8>>) -> Self {
        Self {
            index,
            term,
            command: command.into(),
        }
    }
}
