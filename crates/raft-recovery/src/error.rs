//! # error
//!
//! why: one error taxonomy for everything that can stop a recovery or a compaction
//! relations: wraps raft-storage's StorageError, raft-core's SnapshotError and the
//!            cohort's CohortError; returned by the coordinator and compaction executor
//! what: RecoveryError, CompactionStage

use raft_core::SnapshotError;
use raft_storage::StorageError;
use thiserror::Error;

use crate::cohort::CohortError;

/// Which compaction step failed to acknowledge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionStage {
    /// waiting on the cohort's state capture
    Capture,
    /// persisting the regenerated snapshot
    SaveSnapshot,
    /// deleting superseded journal records
    DeleteJournal,
    /// deleting superseded snapshots
    DeleteSnapshots,
    /// the background task itself died
    Background,
}

impl std::fmt::Display for CompactionStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CompactionStage::Capture => "capture",
            CompactionStage::SaveSnapshot => "save snapshot",
            CompactionStage::DeleteJournal => "delete journal",
            CompactionStage::DeleteSnapshots => "delete snapshots",
            CompactionStage::Background => "background task",
        };
        f.write_str(name)
    }
}

/// Errors that can occur while recovering or migrating a replica.
#[derive(Debug, Error)]
pub enum RecoveryError {
    /// A load, save, or delete could not complete. Aborts recovery.
    #[error("store unavailable for {replica_id} during {operation}: {source}")]
    StoreUnavailable {
        replica_id: String,
        operation: &'static str,
        #[source]
        source: StorageError,
    },

    /// A legacy state blob had to be decoded but the cohort cannot.
    /// Never aborts recovery; the regenerate path does not need it.
    #[error("cohort cannot decode legacy state for {replica_id}")]
    UnsupportedLegacyDecode { replica_id: String },

    /// Persisted history is out of order or references missing entries.
    #[error("ordering violation in {replica_id}: {detail}")]
    OrderingViolation { replica_id: String, detail: String },

    /// The loaded snapshot breaks its own invariants.
    #[error("corrupt snapshot for {replica_id}: {source}")]
    CorruptSnapshot {
        replica_id: String,
        #[source]
        source: SnapshotError,
    },

    /// The cohort failed to install or apply during replay.
    #[error("cohort failed during recovery of {replica_id}: {source}")]
    Cohort {
        replica_id: String,
        #[source]
        source: CohortError,
    },

    /// A compaction step was not acknowledged. Recorded, retried on next startup.
    #[error("compaction for {replica_id} stopped at {stage}: {reason}")]
    CompactionPartialFailure {
        replica_id: String,
        stage: CompactionStage,
        reason: String,
    },

    /// A second recovery was attempted while one is running.
    #[error("recovery already in flight for {0}")]
    RecoveryInFlight(String),

    /// A second compaction was attempted while one is running.
    #[error("compaction already in flight for {0}")]
    CompactionInFlight(String),
}

impl RecoveryError {
    pub(crate) fn store(replica_id: &str, operation: &'static str, source: StorageError) -> Self {
        RecoveryError::StoreUnavailable {
            replica_id: replica_id.to_owned(),
            operation,
            source,
        }
    }

    pub(crate) fn ordering(replica_id: &str, detail: impl Into<String>) -> Self {
        RecoveryError::OrderingViolation {
            replica_id: replica_id.to_owned(),
            detail: detail.into(),
        }
    }

    pub(crate) fn partial(replica_id: &str, stage: CompactionStage, reason: impl ToString) -> Self {
        RecoveryError::CompactionPartialFailure {
            replica_id: replica_id.to_owned(),
            stage,
            reason: reason.to_string(),
        }
    }
}
