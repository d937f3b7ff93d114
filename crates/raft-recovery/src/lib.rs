//! # raft-recovery
//!
//! why: bring a replica back from durable storage on restart, including storage
//!      written by older protocol versions, and normalize that storage once
//! relations: reads/writes raft-storage stores, uses raft-core's data model and classifier,
//!            drives the application through the SnapshotCohort capability
//! what: RecoveryCoordinator, snapshot regeneration, background compaction, config, errors

pub mod cohort;
pub mod compaction;
pub mod config;
pub mod coordinator;
pub mod error;
mod inflight;
pub mod regenerator;
pub mod state;

pub use cohort::{ready_reply, CaptureReply, CohortError, SnapshotCohort};
pub use compaction::{
    CompactionExecutor, CompactionHandle, CompactionKind, CompactionReport, CompactionSlot,
};
pub use config::{LegacyStatePolicy, RecoveryConfig};
pub use coordinator::{RecoveryCoordinator, RecoveryResult};
pub use error::{CompactionStage, RecoveryError};
pub use regenerator::{build_snapshot, regenerate, PendingSnapshot};
pub use state::{RecoveredState, ReplayStats};
