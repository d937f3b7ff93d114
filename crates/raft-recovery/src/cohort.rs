//! # cohort
//!
//! why: the slice of the replicated application that recovery needs
//! relations: driven by the coordinator during replay, captured by the regenerator
//! what: SnapshotCohort trait, CaptureReply, CohortError

use async_trait::async_trait;
use raft_core::{LogEntry, StatePayload};
use thiserror::Error;
use tokio::sync::oneshot;

/// errors reported by the application state machine
#[derive(Debug, Error)]
pub enum CohortError {
    /// the cohort does not implement this capability
    #[error("unsupported cohort operation: {0}")]
    Unsupported(&'static str),

    #[error("cohort failed: {0}")]
    Failed(String),

    /// the cohort dropped a capture request without replying
    #[error("cohort dropped the capture reply")]
    ReplyDropped,
}

/// pending answer to a capture request
pub type CaptureReply = oneshot::Receiver<Result<StatePayload, CohortError>>;

/// Snapshot and apply capability of the replicated application
///
/// capture is a request/reply exchange: the request is ordered at the moment
/// `capture` is called, the payload arrives later on the returned receiver
#[async_trait]
pub trait SnapshotCohort: Send + Sync + 'static {
    /// request the current state; the reply reflects everything applied so far
    fn capture(&self) -> CaptureReply;

    /// replace the current state with a previously captured payload
    async fn install(&self, state: StatePayload) -> Result<(), CohortError>;

    /// apply one committed log entry
    async fn apply(&self, entry: &LogEntry) -> Result<(), CohortError>;

    /// interpret raw bytes from a legacy snapshot
    ///
    /// optional; recovery never needs it on the default regenerate path
    fn decode_legacy_state(&self, _bytes: &[u8]) -> Result<StatePayload, CohortError> {
        Err(CohortError::Unsupported("decode_legacy_state"))
    }
}

/// helper for cohorts that can answer a capture immediately
pub fn ready_reply(result: Result<StatePayload, CohortError>) -> CaptureReply {
    let (tx, rx) = oneshot::channel();
    // the receiver is still held here, so this cannot fail
    let _ = tx.send(result);
    rx
}
