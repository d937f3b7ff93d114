//! # memory
//!
//! why: journal and snapshot stores that live only in memory, for tests
//! relations: implements the traits in lib.rs
//! what: InMemoryJournal, InMemorySnapshotStore, fault injection, inspection helpers

use std::collections::HashMap;

use async_trait::async_trait;
use raft_core::{JournalRecord, Snapshot};
use tokio::sync::Mutex;

use crate::{JournalStore, SnapshotStore, StorageError};

/// one-shot and sticky failures a test can arm on an in-memory store
#[derive(Debug, Default)]
struct Faults {
    unavailable: bool,
    fail_next_write: bool,
    fail_next_delete: bool,
}

impl Faults {
    fn check_read(&self) -> Result<(), StorageError> {
        if self.unavailable {
            return Err(StorageError::Unavailable("injected: store offline".into()));
        }
        Ok(())
    }

    fn check_write(&mut self) -> Result<(), StorageError> {
        self.check_read()?;
        if std::mem::take(&mut self.fail_next_write) {
            return Err(StorageError::Unavailable("injected: write not acknowledged".into()));
        }
        Ok(())
    }

    fn check_delete(&mut self) -> Result<(), StorageError> {
        self.check_read()?;
        if std::mem::take(&mut self.fail_next_delete) {
            return Err(StorageError::Unavailable("injected: delete not acknowledged".into()));
        }
        Ok(())
    }
}

// -- journal --

#[derive(Debug, Default)]
struct ReplicaJournal {
    records: Vec<JournalRecord>,
    deletes: usize,
}

#[derive(Debug, Default)]
struct JournalInner {
    replicas: HashMap<String, ReplicaJournal>,
    faults: Faults,
}

/// in-memory journal store
///
/// stores all records in memory, no persistence across process restarts; a
/// "restart" in tests is a new coordinator over the same store
#[derive(Debug, Default)]
pub struct InMemoryJournal {
    inner: Mutex<JournalInner>,
}

impl InMemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    /// snapshot of the records currently held for a replica
    pub async fn records(&self, replica_id: &str) -> Vec<JournalRecord> {
        let inner = self.inner.lock().await;
        inner
            .replicas
            .get(replica_id)
            .map(|j| j.records.clone())
            .unwrap_or_default()
    }

    /// number of acknowledged `delete_through` calls for a replica
    pub async fn delete_count(&self, replica_id: &str) -> usize {
        let inner = self.inner.lock().await;
        inner.replicas.get(replica_id).map_or(0, |j| j.deletes)
    }

    /// make every operation fail until cleared
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.inner.lock().await.faults.unavailable = unavailable;
    }

    /// fail the next `delete_through` without deleting anything
    pub async fn fail_next_delete(&self) {
        self.inner.lock().await.faults.fail_next_delete = true;
    }
}

#[async_trait]
impl JournalStore for InMemoryJournal {
    async fn append(&self, replica_id: &str, record: JournalRecord) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().await;
        inner.faults.check_write()?;
        inner
            .replicas
            .entry(replica_id.to_owned())
            .or_default()
            .records
            .push(record);
        Ok(())
    }

    async fn read_all(&self, replica_id: &str) -> Result<Vec<JournalRecord>, StorageError> {
        let inner = self.inner.lock().await;
        inner.faults.check_read()?;
        Ok(inner
            .replicas
            .get(replica_id)
            .map(|j| j.records.clone())
            .unwrap_or_default())
    }

    async fn delete_through(&self, replica_id: &str, through: u64) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().await;
        inner.faults.check_delete()?;
        let journal = inner.replicas.entry(replica_id.to_owned()).or_default();
        journal.records.retain(|r| r.sequence > through);
        journal.deletes += 1;
        Ok(())
    }
}

// -- snapshots --

#[derive(Debug, Default)]
struct ReplicaSnapshots {
    snapshots: Vec<Snapshot>,
    saves: usize,
    deletes: usize,
}

#[derive(Debug, Default)]
struct SnapshotInner {
    replicas: HashMap<String, ReplicaSnapshots>,
    faults: Faults,
}

/// in-memory snapshot store, newest snapshot last
#[derive(Debug, Default)]
pub struct InMemorySnapshotStore {
    inner: Mutex<SnapshotInner>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// all snapshots held for a replica, oldest first
    pub async fn snapshots(&self, replica_id: &str) -> Vec<Snapshot> {
        let inner = self.inner.lock().await;
        inner
            .replicas
            .get(replica_id)
            .map(|s| s.snapshots.clone())
            .unwrap_or_default()
    }

    /// number of acknowledged `save` calls for a replica
    pub async fn save_count(&self, replica_id: &str) -> usize {
        let inner = self.inner.lock().await;
        inner.replicas.get(replica_id).map_or(0, |s| s.saves)
    }

    /// number of acknowledged `delete_all_except_latest` calls for a replica
    pub async fn delete_count(&self, replica_id: &str) -> usize {
        let inner = self.inner.lock().await;
        inner.replicas.get(replica_id).map_or(0, |s| s.deletes)
    }

    pub async fn set_unavailable(&self, unavailable: bool) {
        self.inner.lock().await.faults.unavailable = unavailable;
    }

    /// fail the next `save` without storing anything
    pub async fn fail_next_save(&self) {
        self.inner.lock().await.faults.fail_next_write = true;
    }

    pub async fn fail_next_delete(&self) {
        self.inner.lock().await.faults.fail_next_delete = true;
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn save(&self, replica_id: &str, snapshot: &Snapshot) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().await;
        inner.faults.check_write()?;
        let replica = inner.replicas.entry(replica_id.to_owned()).or_default();
        replica.snapshots.push(snapshot.clone());
        replica.saves += 1;
        Ok(())
    }

    async fn load_latest(&self, replica_id: &str) -> Result<Option<Snapshot>, StorageError> {
        let inner = self.inner.lock().await;
        inner.faults.check_read()?;
        Ok(inner
            .replicas
            .get(replica_id)
            .and_then(|s| s.snapshots.last().cloned()))
    }

    async fn count(&self, replica_id: &str) -> Result<usize, StorageError> {
        let inner = self.inner.lock().await;
        inner.faults.check_read()?;
        Ok(inner.replicas.get(replica_id).map_or(0, |s| s.snapshots.len()))
    }

    async fn delete_all_except_latest(&self, replica_id: &str) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().await;
        inner.faults.check_delete()?;
        let replica = inner.replicas.entry(replica_id.to_owned()).or_default();
        let keep_from = replica.snapshots.len().saturating_sub(1);
        replica.snapshots.drain(..keep_from);
        replica.deletes += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use raft_core::LogEntry;

    #[tokio::test]
    async fn journal_deletes_prefix_only() {
        let journal = InMemoryJournal::new();
        for seq in 1..=4 {
            journal
                .append("r1", JournalRecord::entry(seq, LogEntry::new(seq as i64 - 1, 1, "x")))
                .await
                .unwrap();
        }

        journal.delete_through("r1", 2).await.unwrap();

        let left: Vec<u64> = journal.records("r1").await.iter().map(|r| r.sequence).collect();
        assert_eq!(left, vec![3, 4]);
        assert_eq!(journal.delete_count("r1").await, 1);
    }

    #[tokio::test]
    async fn journals_are_namespaced_by_replica() {
        let journal = InMemoryJournal::new();
        journal
            .append("r1", JournalRecord::apply_marker(1, 0))
            .await
            .unwrap();

        assert!(journal.read_all("r2").await.unwrap().is_empty());
        assert_eq!(journal.read_all("r1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn injected_delete_failure_is_one_shot() {
        let journal = InMemoryJournal::new();
        journal
            .append("r1", JournalRecord::apply_marker(1, 0))
            .await
            .unwrap();
        journal.fail_next_delete().await;

        assert!(journal.delete_through("r1", 1).await.is_err());
        assert_eq!(journal.records("r1").await.len(), 1);

        journal.delete_through("r1", 1).await.unwrap();
        assert!(journal.records("r1").await.is_empty());
    }

    #[tokio::test]
    async fn snapshot_store_keeps_latest() {
        let store = InMemorySnapshotStore::new();
        let older = Snapshot::empty();
        let newer = Snapshot {
            last_index: 4,
            last_term: 1,
            ..Snapshot::empty()
        };
        store.save("r1", &older).await.unwrap();
        store.save("r1", &newer).await.unwrap();

        assert_eq!(store.load_latest("r1").await.unwrap(), Some(newer.clone()));
        assert_eq!(store.count("r1").await.unwrap(), 2);

        store.delete_all_except_latest("r1").await.unwrap();
        assert_eq!(store.count("r1").await.unwrap(), 1);
        assert_eq!(store.snapshots("r1").await, vec![newer]);
        assert_eq!(store.save_count("r1").await, 2);
    }

    #[tokio::test]
    async fn unavailable_store_fails_reads() {
        let store = InMemorySnapshotStore::new();
        store.set_unavailable(true).await;
        assert!(matches!(
            store.load_latest("r1").await,
            Err(StorageError::Unavailable(_))
        ));
        assert!(store.count("r1").await.is_err());
    }
}
