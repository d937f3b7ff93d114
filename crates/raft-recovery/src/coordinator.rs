//! # coordinator
//!
//! why: rebuild a replica's authoritative state from its snapshot and journal on restart
//! relations: drives the cohort during replay, uses raft-core's classifier, hands legacy
//!            storage to the regenerator and compaction executor
//! what: RecoveryCoordinator, RecoveryResult, journal replay

use std::sync::Arc;

use raft_core::{
    Classification, Classify, JournalRecord, LogEntry, RecordKind, Snapshot, SnapshotState,
    NO_INDEX,
};
use raft_storage::{JournalStore, SnapshotStore};
use tracing::{debug, info, trace, warn};

use crate::cohort::{CohortError, SnapshotCohort};
use crate::compaction::{CompactionExecutor, CompactionHandle, CompactionKind};
use crate::config::{LegacyStatePolicy, RecoveryConfig};
use crate::error::RecoveryError;
use crate::inflight::InFlight;
use crate::regenerator;
use crate::state::{RecoveredState, ReplayStats};

/// Outcome of a completed recovery
///
/// returning this is the recovery-complete milestone: the replica may join
/// the protocol even while `compaction` is still running
#[derive(Debug)]
pub struct RecoveryResult {
    pub replica_id: String,
    pub state: RecoveredState,
    pub stats: ReplayStats,
    /// present when legacy storage was found and a migration was started, or
    /// when an earlier compaction left superseded records behind
    pub compaction: Option<CompactionHandle>,
}

impl RecoveryResult {
    pub fn migration_started(&self) -> bool {
        self.compaction
            .as_ref()
            .is_some_and(|c| c.kind() == CompactionKind::Migration)
    }
}

/// Orchestrates startup recovery for any number of replicas
///
/// replicas recover independently; the same replica id may only have one
/// recovery in flight at a time
pub struct RecoveryCoordinator<J, S> {
    journal: Arc<J>,
    snapshots: Arc<S>,
    config: RecoveryConfig,
    recoveries: InFlight,
    compactor: CompactionExecutor<J, S>,
}

impl<J, S> RecoveryCoordinator<J, S>
where
    J: JournalStore + 'static,
    S: SnapshotStore + 'static,
{
    pub fn new(journal: Arc<J>, snapshots: Arc<S>) -> Self {
        Self::with_config(journal, snapshots, RecoveryConfig::default())
    }

    pub fn with_config(journal: Arc<J>, snapshots: Arc<S>, config: RecoveryConfig) -> Self {
        let compactor = CompactionExecutor::new(Arc::clone(&journal), Arc::clone(&snapshots));
        Self {
            journal,
            snapshots,
            config,
            recoveries: InFlight::default(),
            compactor,
        }
    }

    pub fn config(&self) -> &RecoveryConfig {
        &self.config
    }

    pub fn compactor(&self) -> &CompactionExecutor<J, S> {
        &self.compactor
    }

    /// recover `replica_id` into `cohort`
    ///
    /// load latest snapshot, replay the journal, and start a background
    /// migration if anything legacy was seen, or a cleanup if an earlier
    /// compaction did not finish deleting
    #[tracing::instrument(level = "info", skip(self, cohort))]
    pub async fn recover<C>(
        &self,
        replica_id: &str,
        cohort: &C,
    ) -> Result<RecoveryResult, RecoveryError>
    where
        C: SnapshotCohort + ?Sized,
    {
        let _guard = self
            .recoveries
            .try_acquire(replica_id)
            .ok_or_else(|| RecoveryError::RecoveryInFlight(replica_id.to_owned()))?;

        let mut replay = Replay::new(replica_id, cohort);

        let snapshot = self
            .snapshots
            .load_latest(replica_id)
            .await
            .map_err(|e| RecoveryError::store(replica_id, "load snapshot", e))?;
        if let Some(snapshot) = snapshot {
            let held = self
                .snapshots
                .count(replica_id)
                .await
                .map_err(|e| RecoveryError::store(replica_id, "count snapshots", e))?;
            replay.stats.superseded_snapshots = held.saturating_sub(1);
            replay.restore_snapshot(snapshot, self.config.legacy_state).await?;
        }

        let records = self
            .journal
            .read_all(replica_id)
            .await
            .map_err(|e| RecoveryError::store(replica_id, "read journal", e))?;
        for record in records {
            replay.apply_record(record).await?;
        }

        let Replay {
            state,
            stats,
            snapshot_last_index,
            covered_through,
            ..
        } = replay;
        info!(
            last_index = state.last_index,
            last_applied_index = state.last_applied_index,
            election_term = state.election_term,
            records = stats.records,
            applied = stats.applied,
            "recovery complete"
        );

        let compaction = if !stats.migration_required() && !stats.cleanup_required() {
            None
        } else if !self.config.migrate_on_recovery {
            info!("storage needs rewriting, migration disabled");
            None
        } else {
            self.start_compaction(
                replica_id,
                &state,
                &stats,
                cohort,
                snapshot_last_index,
                covered_through,
            )
        };

        Ok(RecoveryResult {
            replica_id: replica_id.to_owned(),
            state,
            stats,
            compaction,
        })
    }

    fn start_compaction<C>(
        &self,
        replica_id: &str,
        state: &RecoveredState,
        stats: &ReplayStats,
        cohort: &C,
        snapshot_last_index: i64,
        covered_through: u64,
    ) -> Option<CompactionHandle>
    where
        C: SnapshotCohort + ?Sized,
    {
        // claim the replica before the cohort is asked for a capture
        let slot = match self.compactor.reserve(replica_id) {
            Ok(slot) => slot,
            Err(e) => {
                warn!(error = %e, "compaction not started");
                return None;
            }
        };

        if stats.migration_required() {
            info!(
                legacy_snapshot = stats.legacy_snapshot,
                legacy_records = stats.legacy_records,
                "legacy records found, migrating storage"
            );
            let pending = regenerator::request(state, cohort);
            Some(self.compactor.spawn(slot, pending))
        } else {
            info!(
                covered_records = stats.covered_records,
                superseded_snapshots = stats.superseded_snapshots,
                "earlier compaction unfinished, cleaning up"
            );
            Some(
                self.compactor
                    .spawn_cleanup(slot, snapshot_last_index, covered_through),
            )
        }
    }
}

/// replay state for a single recovery run
struct Replay<'a, C: ?Sized> {
    replica_id: &'a str,
    cohort: &'a C,
    state: RecoveredState,
    stats: ReplayStats,
    last_sequence: Option<u64>,
    snapshot_last_index: i64,
    /// journal sequences the loaded snapshot already covers
    covered_through: u64,
}

impl<'a, C> Replay<'a, C>
where
    C: SnapshotCohort + ?Sized,
{
    fn new(replica_id: &'a str, cohort: &'a C) -> Self {
        Self {
            replica_id,
            cohort,
            state: RecoveredState::default(),
            stats: ReplayStats::default(),
            last_sequence: None,
            snapshot_last_index: NO_INDEX,
            covered_through: 0,
        }
    }

    fn cohort_error(&self, source: CohortError) -> RecoveryError {
        RecoveryError::Cohort {
            replica_id: self.replica_id.to_owned(),
            source,
        }
    }

    async fn restore_snapshot(
        &mut self,
        snapshot: Snapshot,
        policy: LegacyStatePolicy,
    ) -> Result<(), RecoveryError> {
        snapshot
            .validate()
            .map_err(|source| RecoveryError::CorruptSnapshot {
                replica_id: self.replica_id.to_owned(),
                source,
            })?;

        self.state = RecoveredState::from_snapshot(&snapshot);
        self.snapshot_last_index = snapshot.last_index;
        self.covered_through = snapshot.journal_through;

        match (snapshot.classify(), snapshot.state) {
            (Classification::Current, SnapshotState::Versioned(payload)) => {
                debug!(last_index = snapshot.last_index, "installing snapshot");
                self.cohort
                    .install(payload)
                    .await
                    .map_err(|e| self.cohort_error(e))?;
            }
            (_, state) => {
                debug!(
                    schema_version = snapshot.schema_version,
                    last_index = snapshot.last_index,
                    "legacy snapshot, carrying metadata only"
                );
                self.stats.legacy_snapshot = true;
                if let (LegacyStatePolicy::Decode, SnapshotState::Raw(bytes)) = (policy, &state) {
                    self.try_decode_legacy(bytes).await?;
                }
            }
        }
        Ok(())
    }

    /// best effort; the regenerate path does not depend on it
    async fn try_decode_legacy(&self, bytes: &[u8]) -> Result<(), RecoveryError> {
        match self.cohort.decode_legacy_state(bytes) {
            Ok(payload) => self
                .cohort
                .install(payload)
                .await
                .map_err(|e| self.cohort_error(e)),
            Err(CohortError::Unsupported(_)) => {
                let e = RecoveryError::UnsupportedLegacyDecode {
                    replica_id: self.replica_id.to_owned(),
                };
                warn!(error = %e, "falling back to regenerate from replay");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "legacy state decode failed, falling back to regenerate from replay");
                Ok(())
            }
        }
    }

    async fn apply_record(&mut self, record: JournalRecord) -> Result<(), RecoveryError> {
        if let Some(last) = self.last_sequence {
            if record.sequence <= last {
                return Err(RecoveryError::ordering(
                    self.replica_id,
                    format!("journal sequence {} follows {}", record.sequence, last),
                ));
            }
        }
        self.last_sequence = Some(record.sequence);
        self.stats.records += 1;

        if record.sequence <= self.covered_through {
            trace!(sequence = record.sequence, "record already covered by snapshot");
            self.stats.covered_records += 1;
            return Ok(());
        }
        self.state.journal_high_water = record.sequence;

        if record.classify().is_legacy() {
            trace!(sequence = record.sequence, "legacy journal record");
            self.stats.legacy_records += 1;
        }

        match record.kind {
            RecordKind::ElectionTermUpdate { term, voted_for } => {
                self.update_term(term, voted_for);
            }
            RecordKind::LogEntry(entry) => self.append_entry(entry)?,
            RecordKind::ApplyMarker {
                applied_through_index,
            } => self.apply_through(applied_through_index).await?,
            RecordKind::ServerConfigUpdate(config) => {
                self.state.server_config = config;
            }
            RecordKind::LegacyDeleteEntries { from_index } => {
                let from_index = from_index.max(self.state.last_applied_index + 1);
                self.state.truncate_from(from_index);
            }
            RecordKind::LegacySnapshotBlob { .. } => {
                debug!(sequence = record.sequence, "dropping inline legacy snapshot blob");
            }
        }
        Ok(())
    }

    fn update_term(&mut self, term: i64, voted_for: Option<String>) {
        // terms never move backwards; a stale update from an already
        // compacted prefix must not undo a newer vote
        if term < self.state.election_term {
            trace!(term, current = self.state.election_term, "ignoring stale term");
            return;
        }
        self.state.election_term = term;
        self.state.election_voted_for = voted_for;
    }

    fn append_entry(&mut self, entry: LogEntry) -> Result<(), RecoveryError> {
        if entry.index <= self.state.last_applied_index {
            trace!(index = entry.index, "skipping already applied entry");
            self.stats.skipped += 1;
            return Ok(());
        }

        let next = self.state.next_index();
        if entry.index > next {
            return Err(RecoveryError::ordering(
                self.replica_id,
                format!("log entry {} leaves a gap, expected {}", entry.index, next),
            ));
        }
        if entry.index < next {
            if self.state.held(entry.index).map(|e| e.term) == Some(entry.term) {
                trace!(index = entry.index, "skipping already held entry");
                self.stats.skipped += 1;
                return Ok(());
            }
            debug!(index = entry.index, "conflicting entry replaces log suffix");
            self.state.truncate_from(entry.index);
        }

        self.state.last_index = entry.index;
        self.state.last_term = entry.term;
        self.state.unapplied.push(entry);
        Ok(())
    }

    async fn apply_through(&mut self, through: i64) -> Result<(), RecoveryError> {
        if through <= self.state.last_applied_index {
            return Ok(());
        }
        if self.state.held(through).is_none() {
            return Err(RecoveryError::ordering(
                self.replica_id,
                format!("apply marker {} references an entry never appended", through),
            ));
        }

        let count = usize::try_from(through - self.state.last_applied_index).unwrap_or(0);
        let entries: Vec<LogEntry> = self.state.unapplied.drain(..count).collect();
        for entry in entries {
            self.cohort
                .apply(&entry)
                .await
                .map_err(|e| self.cohort_error(e))?;
            self.state.last_applied_index = entry.index;
            self.state.last_applied_term = entry.term;
            self.stats.applied += 1;
        }
        Ok(())
    }
}
