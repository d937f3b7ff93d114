//! # raft-core
//!
//! why: describe what a replica persists, in pure portable rust, and tell old formats from new
//! relations: used by raft-storage for persistence, raft-recovery for restart and migration
//! what: log entries, journal records, snapshots, membership, migration classifier

pub mod classify;
pub mod log;
pub mod record;
pub mod snapshot;

pub use classify::{classify_record, classify_snapshot, Classification, Classify};
pub use log::{LogEntry, NO_INDEX};
pub use record::{JournalRecord, RecordKind};
pub use snapshot::{
    ServerConfig, ServerInfo, Snapshot, SnapshotError, SnapshotState, StatePayload,
    CURRENT_SCHEMA_VERSION, CURRENT_STATE_VERSION,
};
