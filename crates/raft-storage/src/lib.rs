//! # raft-storage
//!
//! why: provide the durable journal and snapshot stores a replica recovers from
//! relations: read and rewritten by raft-recovery during restart and migration
//! what: JournalStore / SnapshotStore traits, file-backed stores, in-memory stores for testing

use async_trait::async_trait;
use raft_core::{JournalRecord, Snapshot};
use thiserror::Error;

pub mod file;
pub mod memory;

pub use file::{FileJournal, FileSnapshotStore};
pub use memory::{InMemoryJournal, InMemorySnapshotStore};

/// errors surfaced by journal and snapshot stores
#[derive(Debug, Error)]
pub enum StorageError {
    /// the store cannot complete the operation right now
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("invalid replica id {0:?}")]
    InvalidReplicaId(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

/// durable, per-replica append-only journal
///
/// every method is namespaced by replica id; replicas never share records
#[async_trait]
pub trait JournalStore: Send + Sync {
    /// append a record after any existing records
    async fn append(&self, replica_id: &str, record: JournalRecord) -> Result<(), StorageError>;

    /// all records in stored order
    ///
    /// stores return records exactly as written and never re-sort, so a
    /// corrupted ordering stays visible to the reader
    async fn read_all(&self, replica_id: &str) -> Result<Vec<JournalRecord>, StorageError>;

    /// delete every record with `sequence <= through`
    async fn delete_through(&self, replica_id: &str, through: u64) -> Result<(), StorageError>;
}

/// durable, per-replica snapshot store
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// persist a snapshot; it becomes the latest
    async fn save(&self, replica_id: &str, snapshot: &Snapshot) -> Result<(), StorageError>;

    /// the most recently saved snapshot, if any
    async fn load_latest(&self, replica_id: &str) -> Result<Option<Snapshot>, StorageError>;

    /// number of snapshots held, the latest included
    async fn count(&self, replica_id: &str) -> Result<usize, StorageError>;

    /// drop every snapshot except the most recently saved one
    async fn delete_all_except_latest(&self, replica_id: &str) -> Result<(), StorageError>;
}
