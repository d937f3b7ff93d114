//! # compaction
//!
//! why: make the regenerated snapshot durable and drop the records it supersedes
//! relations: spawned by the coordinator after a migration-triggering recovery, or
//!            after a recovery that finds an earlier compaction left unfinished
//! what: CompactionExecutor, CompactionSlot, CompactionHandle, CompactionReport

use std::sync::Arc;

use raft_core::Snapshot;
use raft_storage::{JournalStore, SnapshotStore};
use tokio::task::JoinHandle;
use tracing::{info, warn, Instrument};

use crate::error::{CompactionStage, RecoveryError};
use crate::inflight::{InFlight, InFlightGuard};
use crate::regenerator::PendingSnapshot;

/// What a compaction run writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionKind {
    /// save a regenerated snapshot, then delete what it supersedes
    Migration,
    /// the latest snapshot is already durable; only delete what it supersedes
    Cleanup,
}

/// Acknowledgement that a compaction ran to completion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactionReport {
    pub replica_id: String,
    pub kind: CompactionKind,
    /// `last_index` of the snapshot now on disk
    pub last_index: i64,
    /// journal records with sequence <= this were deleted
    pub journal_through: u64,
}

/// Background compaction whose completion can be awaited
#[derive(Debug)]
pub struct CompactionHandle {
    replica_id: String,
    kind: CompactionKind,
    task: JoinHandle<Result<CompactionReport, RecoveryError>>,
}

impl CompactionHandle {
    pub fn replica_id(&self) -> &str {
        &self.replica_id
    }

    pub fn kind(&self) -> CompactionKind {
        self.kind
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// wait for the compaction-complete acknowledgement
    pub async fn wait(self) -> Result<CompactionReport, RecoveryError> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(RecoveryError::partial(
                &self.replica_id,
                CompactionStage::Background,
                e,
            )),
        }
    }
}

/// Exclusive claim on compacting one replica, released on drop
#[derive(Debug)]
pub struct CompactionSlot {
    replica_id: String,
    _guard: InFlightGuard,
}

impl CompactionSlot {
    pub fn replica_id(&self) -> &str {
        &self.replica_id
    }
}

/// Persists a snapshot and deletes what it supersedes, at most once per replica at a time
///
/// every step is idempotent, so a run abandoned by a crash or a store failure
/// is finished by a cleanup run after the next recovery
pub struct CompactionExecutor<J, S> {
    journal: Arc<J>,
    snapshots: Arc<S>,
    in_flight: InFlight,
}

impl<J, S> Clone for CompactionExecutor<J, S> {
    fn clone(&self) -> Self {
        Self {
            journal: Arc::clone(&self.journal),
            snapshots: Arc::clone(&self.snapshots),
            in_flight: self.in_flight.clone(),
        }
    }
}

impl<J, S> CompactionExecutor<J, S>
where
    J: JournalStore + 'static,
    S: SnapshotStore + 'static,
{
    pub fn new(journal: Arc<J>, snapshots: Arc<S>) -> Self {
        Self {
            journal,
            snapshots,
            in_flight: InFlight::default(),
        }
    }

    /// claim `replica_id`, failing fast if a compaction for it is already running
    pub fn reserve(&self, replica_id: &str) -> Result<CompactionSlot, RecoveryError> {
        let guard = self
            .in_flight
            .try_acquire(replica_id)
            .ok_or_else(|| RecoveryError::CompactionInFlight(replica_id.to_owned()))?;
        Ok(CompactionSlot {
            replica_id: replica_id.to_owned(),
            _guard: guard,
        })
    }

    /// save `snapshot`, delete the journal records it covers
    /// (`sequence <= snapshot.journal_through`), then delete every older snapshot
    pub async fn compact(
        &self,
        replica_id: &str,
        snapshot: &Snapshot,
    ) -> Result<CompactionReport, RecoveryError> {
        let _slot = self.reserve(replica_id)?;
        self.run(replica_id, Some(snapshot), snapshot.last_index, snapshot.journal_through)
            .await
    }

    /// finish an earlier compaction whose snapshot is already the latest
    pub async fn cleanup(
        &self,
        replica_id: &str,
        last_index: i64,
        journal_through: u64,
    ) -> Result<CompactionReport, RecoveryError> {
        let _slot = self.reserve(replica_id)?;
        self.run(replica_id, None, last_index, journal_through).await
    }

    /// resolve the pending snapshot and compact on a background task
    pub fn spawn(&self, slot: CompactionSlot, pending: PendingSnapshot) -> CompactionHandle {
        let executor = self.clone();
        let id = slot.replica_id.clone();
        let span = tracing::info_span!("compaction", replica_id = %id, kind = "migration");
        let replica_id = id.clone();
        let task = tokio::spawn(
            async move {
                let _slot = slot;
                let snapshot = match pending.resolve().await {
                    Ok(snapshot) => snapshot,
                    Err(e) => {
                        warn!(error = %e, "state capture failed; migration retried on next startup");
                        return Err(RecoveryError::partial(&id, CompactionStage::Capture, e));
                    }
                };
                executor
                    .run(&id, Some(&snapshot), snapshot.last_index, snapshot.journal_through)
                    .await
            }
            .instrument(span),
        );

        CompactionHandle {
            replica_id,
            kind: CompactionKind::Migration,
            task,
        }
    }

    /// run `cleanup` on a background task
    pub fn spawn_cleanup(
        &self,
        slot: CompactionSlot,
        last_index: i64,
        journal_through: u64,
    ) -> CompactionHandle {
        let executor = self.clone();
        let id = slot.replica_id.clone();
        let span = tracing::info_span!("compaction", replica_id = %id, kind = "cleanup");
        let replica_id = id.clone();
        let task = tokio::spawn(
            async move {
                let _slot = slot;
                executor.run(&id, None, last_index, journal_through).await
            }
            .instrument(span),
        );

        CompactionHandle {
            replica_id,
            kind: CompactionKind::Cleanup,
            task,
        }
    }

    async fn run(
        &self,
        replica_id: &str,
        save: Option<&Snapshot>,
        last_index: i64,
        journal_through: u64,
    ) -> Result<CompactionReport, RecoveryError> {
        let result = self.steps(replica_id, save, last_index, journal_through).await;
        match &result {
            Ok(report) => info!(
                kind = ?report.kind,
                last_index = report.last_index,
                journal_through = report.journal_through,
                "compaction complete"
            ),
            Err(e) => warn!(error = %e, "compaction incomplete; retried on next startup"),
        }
        result
    }

    async fn steps(
        &self,
        replica_id: &str,
        save: Option<&Snapshot>,
        last_index: i64,
        journal_through: u64,
    ) -> Result<CompactionReport, RecoveryError> {
        if let Some(snapshot) = save {
            self.snapshots
                .save(replica_id, snapshot)
                .await
                .map_err(|e| RecoveryError::partial(replica_id, CompactionStage::SaveSnapshot, e))?;
        }

        self.journal
            .delete_through(replica_id, journal_through)
            .await
            .map_err(|e| RecoveryError::partial(replica_id, CompactionStage::DeleteJournal, e))?;

        self.snapshots
            .delete_all_except_latest(replica_id)
            .await
            .map_err(|e| RecoveryError::partial(replica_id, CompactionStage::DeleteSnapshots, e))?;

        Ok(CompactionReport {
            replica_id: replica_id.to_owned(),
            kind: if save.is_some() {
                CompactionKind::Migration
            } else {
                CompactionKind::Cleanup
            },
            last_index,
            journal_through,
        })
    }
}
