//! # state
//!
//! why: the metadata recovery rebuilds from a snapshot plus journal replay
//! relations: produced by the coordinator, consumed by the regenerator
//! what: RecoveredState, ReplayStats

use raft_core::{LogEntry, ServerConfig, Snapshot, NO_INDEX};

/// Replica metadata as reconstructed from durable storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveredState {
    /// highest log index known (applied or held)
    pub last_index: i64,
    pub last_term: i64,
    pub last_applied_index: i64,
    pub last_applied_term: i64,
    pub election_term: i64,
    pub election_voted_for: Option<String>,
    /// committed entries not yet applied, contiguous from `last_applied_index + 1`
    pub unapplied: Vec<LogEntry>,
    pub server_config: ServerConfig,
    /// highest journal sequence folded into this state, 0 if none
    pub journal_high_water: u64,
}

impl Default for RecoveredState {
    fn default() -> Self {
        Self {
            last_index: NO_INDEX,
            last_term: NO_INDEX,
            last_applied_index: NO_INDEX,
            last_applied_term: NO_INDEX,
            election_term: 0,
            election_voted_for: None,
            unapplied: Vec::new(),
            server_config: ServerConfig::new(),
            journal_high_water: 0,
        }
    }
}

impl RecoveredState {
    /// carry forward a snapshot's metadata; its state payload is handled separately
    pub fn from_snapshot(snapshot: &Snapshot) -> Self {
        Self {
            last_index: snapshot.last_index,
            last_term: snapshot.last_term,
            last_applied_index: snapshot.last_applied_index,
            last_applied_term: snapshot.last_applied_term,
            election_term: snapshot.election_term,
            election_voted_for: snapshot.election_voted_for.clone(),
            unapplied: snapshot.unapplied_entries.clone(),
            server_config: snapshot.server_config.clone(),
            journal_high_water: snapshot.journal_through,
        }
    }

    /// index the next appended entry must have
    pub fn next_index(&self) -> i64 {
        self.unapplied
            .last()
            .map_or(self.last_applied_index, |e| e.index)
            + 1
    }

    /// held entry at `index`, if any
    pub fn held(&self, index: i64) -> Option<&LogEntry> {
        let offset = index - (self.last_applied_index + 1);
        usize::try_from(offset).ok().and_then(|o| self.unapplied.get(o))
    }

    /// drop held entries with index >= `from_index` and move the tip back
    pub fn truncate_from(&mut self, from_index: i64) {
        self.unapplied.retain(|e| e.index < from_index);
        match self.unapplied.last() {
            Some(tip) => {
                self.last_index = tip.index;
                self.last_term = tip.term;
            }
            None if from_index <= self.last_index => {
                self.last_index = self.last_applied_index;
                self.last_term = self.last_applied_term;
            }
            None => {}
        }
    }
}

/// Counters collected while replaying one replica
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayStats {
    /// the loaded snapshot was in a legacy format
    pub legacy_snapshot: bool,
    /// journal records classified legacy
    pub legacy_records: usize,
    /// journal records read
    pub records: usize,
    /// entries applied to the cohort
    pub applied: usize,
    /// entries skipped as already applied or already held
    pub skipped: usize,
    /// journal records the loaded snapshot already covers
    pub covered_records: usize,
    /// snapshots held besides the latest one
    pub superseded_snapshots: usize,
}

impl ReplayStats {
    pub fn migration_required(&self) -> bool {
        self.legacy_snapshot || self.legacy_records > 0
    }

    /// a previous compaction saved its snapshot but did not finish deleting
    pub fn cleanup_required(&self) -> bool {
        self.covered_records > 0 || self.superseded_snapshots > 0
    }
}
