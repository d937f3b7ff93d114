//! # record
//!
//! why: define the shapes a replica writes to its append-only journal
//! relations: persisted by raft-storage journals, classified by classify.rs,
//!            replayed by raft-recovery
//! what: JournalRecord envelope, RecordKind tagged variant

use serde::{Deserialize, Serialize};

use crate::log::LogEntry;
use crate::snapshot::{ServerConfig, CURRENT_SCHEMA_VERSION};

/// All record shapes that may appear in a replica journal
///
/// the `Legacy*` variants are no longer emitted by the current writer but are
/// still readable so old journals can be migrated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordKind {
    /// The persisted election term and the vote cast in it
    ElectionTermUpdate {
        term: i64,
        voted_for: Option<String>,
    },
    /// A replicated log entry
    LogEntry(LogEntry),
    /// Every entry with index <= `applied_through_index` has been applied
    ApplyMarker { applied_through_index: i64 },
    /// Cluster membership change
    ServerConfigUpdate(ServerConfig),
    /// Opaque snapshot bytes from writers that journaled snapshots inline
    LegacySnapshotBlob { data: Vec<u8> },
    /// Old-style suffix removal: drop log entries with index >= `from_index`
    LegacyDeleteEntries { from_index: i64 },
}

impl RecordKind {
    /// true for shapes the current writer never emits
    pub fn is_deprecated(&self) -> bool {
        matches!(
            self,
            RecordKind::LegacySnapshotBlob { .. } | RecordKind::LegacyDeleteEntries { .. }
        )
    }
}

/// One journal record with its ordering/deletion sequence number
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalRecord {
    /// journal position, strictly increasing within a replica's journal
    pub sequence: u64,
    /// absent in records written before schema versioning existed
    #[serde(default)]
    pub schema_version: u32,
    pub kind: RecordKind,
}

impl JournalRecord {
    /// a record stamped with the current schema version
    pub fn new(sequence: u64, kind: RecordKind) -> Self {
        Self {
            sequence,
            schema_version: CURRENT_SCHEMA_VERSION,
            kind,
        }
    }

    /// a record as an older writer would have stored it
    pub fn with_schema_version(sequence: u64, schema_version: u32, kind: RecordKind) -> Self {
        Self {
            sequence,
            schema_version,
            kind,
        }
    }

    pub fn election_term(sequence: u64, term: i64, voted_for: Option<&str>) -> Self {
        Self::new(
            sequence,
            RecordKind::ElectionTermUpdate {
                term,
                voted_for: voted_for.map(str::to_owned),
            },
        )
    }

    pub fn entry(sequence: u64, entry: LogEntry) -> Self {
        Self::new(sequence, RecordKind::LogEntry(entry))
    }

    pub fn apply_marker(sequence: u64, applied_through_index: i64) -> Self {
        Self::new(
            sequence,
            RecordKind::ApplyMarker {
                applied_through_index,
            },
        )
    }
}
