//! # file
//!
//! why: durable journal and snapshot stores on the local filesystem
//! relations: implements the traits in lib.rs; what a replica restarts from in production
//! what: FileJournal, FileSnapshotStore, atomic json writes

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use raft_core::{JournalRecord, Snapshot};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::{JournalStore, SnapshotStore, StorageError};

/// replica ids become directory names, so reject anything that could escape the root
fn replica_dir(root: &Path, replica_id: &str) -> Result<PathBuf, StorageError> {
    let valid = !replica_id.is_empty()
        && replica_id != "."
        && replica_id != ".."
        && !replica_id.contains(['/', '\\']);
    if !valid {
        return Err(StorageError::InvalidReplicaId(replica_id.to_owned()));
    }
    Ok(root.join(replica_id))
}

/// atomic write: write to temp file, sync, then rename over the target
async fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StorageError> {
    let json = serde_json::to_vec_pretty(value)?;

    let temp_path = path.with_extension("tmp");
    let mut file = fs::File::create(&temp_path).await?;
    file.write_all(&json).await?;
    file.sync_all().await?;
    fs::rename(&temp_path, path).await?;

    Ok(())
}

/// read a json document, `None` if it was never written
async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StorageError> {
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

// -- journal --

/// file-backed journal
///
/// each replica gets `<root>/<replica_id>/journal.json`, an array of records
/// rewritten atomically on every mutation
pub struct FileJournal {
    root: PathBuf,
}

impl FileJournal {
    /// create a journal rooted at the given directory, creating it if needed
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    async fn journal_path(&self, replica_id: &str) -> Result<PathBuf, StorageError> {
        let dir = replica_dir(&self.root, replica_id)?;
        fs::create_dir_all(&dir).await?;
        Ok(dir.join("journal.json"))
    }
}

#[async_trait]
impl JournalStore for FileJournal {
    #[tracing::instrument(level = "trace", skip(self, record), fields(sequence = record.sequence))]
    async fn append(&self, replica_id: &str, record: JournalRecord) -> Result<(), StorageError> {
        let path = self.journal_path(replica_id).await?;
        let mut records: Vec<JournalRecord> = read_json(&path).await?.unwrap_or_default();
        records.push(record);
        write_json_atomic(&path, &records).await
    }

    #[tracing::instrument(level = "trace", skip(self))]
    async fn read_all(&self, replica_id: &str) -> Result<Vec<JournalRecord>, StorageError> {
        let path = self.journal_path(replica_id).await?;
        Ok(read_json(&path).await?.unwrap_or_default())
    }

    #[tracing::instrument(level = "trace", skip(self))]
    async fn delete_through(&self, replica_id: &str, through: u64) -> Result<(), StorageError> {
        let path = self.journal_path(replica_id).await?;
        let Some(mut records) = read_json::<Vec<JournalRecord>>(&path).await? else {
            return Ok(());
        };
        records.retain(|r| r.sequence > through);
        write_json_atomic(&path, &records).await
    }
}

// -- snapshots --

/// file-backed snapshot store
///
/// each snapshot is `<root>/<replica_id>/snapshots/<generation>.json`; the
/// highest generation is the latest
pub struct FileSnapshotStore {
    root: PathBuf,
}

impl FileSnapshotStore {
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    async fn snapshot_dir(&self, replica_id: &str) -> Result<PathBuf, StorageError> {
        let dir = replica_dir(&self.root, replica_id)?.join("snapshots");
        fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    /// generations present on disk, ascending
    async fn generations(dir: &Path) -> Result<Vec<u64>, StorageError> {
        let mut generations = Vec::new();
        let mut entries = fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(generation) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<u64>().ok())
            {
                generations.push(generation);
            }
        }
        generations.sort_unstable();
        Ok(generations)
    }

    fn generation_path(dir: &Path, generation: u64) -> PathBuf {
        dir.join(format!("{generation:020}.json"))
    }
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    #[tracing::instrument(level = "trace", skip(self, snapshot), fields(last_index = snapshot.last_index))]
    async fn save(&self, replica_id: &str, snapshot: &Snapshot) -> Result<(), StorageError> {
        let dir = self.snapshot_dir(replica_id).await?;
        let next = Self::generations(&dir).await?.last().map_or(1, |g| g + 1);
        write_json_atomic(&Self::generation_path(&dir, next), snapshot).await
    }

    #[tracing::instrument(level = "trace", skip(self))]
    async fn load_latest(&self, replica_id: &str) -> Result<Option<Snapshot>, StorageError> {
        let dir = self.snapshot_dir(replica_id).await?;
        match Self::generations(&dir).await?.last() {
            Some(&latest) => read_json(&Self::generation_path(&dir, latest)).await,
            None => Ok(None),
        }
    }

    #[tracing::instrument(level = "trace", skip(self))]
    async fn count(&self, replica_id: &str) -> Result<usize, StorageError> {
        let dir = self.snapshot_dir(replica_id).await?;
        Ok(Self::generations(&dir).await?.len())
    }

    #[tracing::instrument(level = "trace", skip(self))]
    async fn delete_all_except_latest(&self, replica_id: &str) -> Result<(), StorageError> {
        let dir = self.snapshot_dir(replica_id).await?;
        let generations = Self::generations(&dir).await?;
        let Some((_, older)) = generations.split_last() else {
            return Ok(());
        };
        for &generation in older {
            match fs::remove_file(Self::generation_path(&dir, generation)).await {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}
