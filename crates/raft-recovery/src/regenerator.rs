//! # regenerator
//!
//! why: turn recovered metadata plus freshly captured cohort state into a current-format snapshot
//! relations: fed by the coordinator after replay, output handed to the compaction executor
//! what: request / regenerate, PendingSnapshot, build_snapshot

use raft_core::{Snapshot, SnapshotState, StatePayload, CURRENT_SCHEMA_VERSION};

use crate::cohort::{CaptureReply, CohortError, SnapshotCohort};
use crate::state::RecoveredState;

/// A snapshot waiting on the cohort's capture reply
#[derive(Debug)]
pub struct PendingSnapshot {
    metadata: RecoveredState,
    reply: CaptureReply,
}

impl PendingSnapshot {
    /// highest journal sequence the finished snapshot will cover
    pub fn journal_through(&self) -> u64 {
        self.metadata.journal_high_water
    }

    pub fn metadata(&self) -> &RecoveredState {
        &self.metadata
    }

    /// wait for the captured state and assemble the snapshot
    pub async fn resolve(self) -> Result<Snapshot, CohortError> {
        let payload = self.reply.await.map_err(|_| CohortError::ReplyDropped)??;
        Ok(build_snapshot(&self.metadata, payload))
    }
}

/// issue the capture request now; the payload is collected by `resolve`
///
/// the request is ordered against the cohort at this call, so the captured
/// state is exactly the state replay left behind
pub fn request<C>(metadata: &RecoveredState, cohort: &C) -> PendingSnapshot
where
    C: SnapshotCohort + ?Sized,
{
    PendingSnapshot {
        metadata: metadata.clone(),
        reply: cohort.capture(),
    }
}

/// capture and build in one step
pub async fn regenerate<C>(metadata: &RecoveredState, cohort: &C) -> Result<Snapshot, CohortError>
where
    C: SnapshotCohort + ?Sized,
{
    request(metadata, cohort).resolve().await
}

/// combine recovered metadata with a captured payload
///
/// unapplied entries are copied verbatim: they are still pending application
/// and must replay identically downstream
pub fn build_snapshot(metadata: &RecoveredState, payload: StatePayload) -> Snapshot {
    Snapshot {
        schema_version: CURRENT_SCHEMA_VERSION,
        last_index: metadata.last_index,
        last_term: metadata.last_term,
        last_applied_index: metadata.last_applied_index,
        last_applied_term: metadata.last_applied_term,
        election_term: metadata.election_term,
        election_voted_for: metadata.election_voted_for.clone(),
        state: SnapshotState::Versioned(payload),
        unapplied_entries: metadata.unapplied.clone(),
        server_config: metadata.server_config.iter().cloned().collect(),
        journal_through: metadata.journal_high_water,
    }
}
