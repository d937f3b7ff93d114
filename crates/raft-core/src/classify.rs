//! # classify
//!
//! why: decide whether a persisted snapshot or journal record predates the current format
//! relations: called by the raft-recovery coordinator for the loaded snapshot and every replayed record
//! what: Classification enum, Classify trait, classify_snapshot / classify_record

use crate::record::JournalRecord;
use crate::snapshot::{Snapshot, SnapshotState, CURRENT_SCHEMA_VERSION};

/// Result of inspecting a persisted record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// written by the current writer path
    Current,
    /// needs migration to the current format
    Legacy,
}

impl Classification {
    pub fn is_legacy(self) -> bool {
        self == Classification::Legacy
    }
}

/// Anything recovery reads from durable storage and must classify
pub trait Classify {
    fn classify(&self) -> Classification;
}

/// a snapshot is legacy if it predates schema versioning or carries raw, untagged state
pub fn classify_snapshot(snapshot: &Snapshot) -> Classification {
    let raw_state = matches!(snapshot.state, SnapshotState::Raw(_));
    if snapshot.schema_version < CURRENT_SCHEMA_VERSION || raw_state {
        Classification::Legacy
    } else {
        Classification::Current
    }
}

/// a record is legacy if it predates the current schema or uses a deprecated shape
pub fn classify_record(record: &JournalRecord) -> Classification {
    if record.schema_version < CURRENT_SCHEMA_VERSION || record.kind.is_deprecated() {
        Classification::Legacy
    } else {
        Classification::Current
    }
}

impl Classify for Snapshot {
    fn classify(&self) -> Classification {
        classify_snapshot(self)
    }
}

impl Classify for JournalRecord {
    fn classify(&self) -> Classification {
        classify_record(self)
    }
}
