//! # comprehensive storage tests
//!
//! why: verify all journal and snapshot store scenarios work correctly
//! relations: tests raft-storage crate
//! what: persistence, restart, prefix deletion, snapshot pruning, legacy documents, edge cases

use raft_core::{
    JournalRecord, LogEntry, RecordKind, ServerInfo, Snapshot, SnapshotState, StatePayload,
};
use raft_storage::{
    FileJournal, FileSnapshotStore, InMemoryJournal, InMemorySnapshotStore, JournalStore,
    SnapshotStore, StorageError,
};
use std::fs;
use tempfile::tempdir;

fn sample_records() -> Vec<JournalRecord> {
    vec![
        JournalRecord::election_term(1, 1, Some("r1")),
        JournalRecord::entry(2, LogEntry::new(0, 1, "cmd1")),
        JournalRecord::entry(3, LogEntry::new(1, 1, "cmd2")),
        JournalRecord::apply_marker(4, 1),
    ]
}

async fn fill<J: JournalStore>(journal: &J, replica_id: &str) {
    for record in sample_records() {
        journal.append(replica_id, record).await.unwrap();
    }
}

fn snapshot_at(last_index: i64) -> Snapshot {
    Snapshot {
        last_index,
        last_term: 1,
        last_applied_index: last_index,
        last_applied_term: 1,
        state: SnapshotState::Versioned(StatePayload::new(format!("state-{last_index}"))),
        ..Snapshot::empty()
    }
}

// =============================================================================
// SECTION 1: IN-MEMORY JOURNAL TESTS
// =============================================================================

mod in_memory_journal {
    use super::*;

    #[tokio::test]
    async fn new_journal_is_empty() {
        let journal = InMemoryJournal::new();
        assert!(journal.read_all("r1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn records_come_back_in_append_order() {
        let journal = InMemoryJournal::new();
        fill(&journal, "r1").await;

        let records = journal.read_all("r1").await.unwrap();
        assert_eq!(records, sample_records());
    }

    #[tokio::test]
    async fn out_of_order_appends_are_not_resorted() {
        let journal = InMemoryJournal::new();
        journal.append("r1", JournalRecord::apply_marker(5, 0)).await.unwrap();
        journal.append("r1", JournalRecord::apply_marker(2, 0)).await.unwrap();

        let sequences: Vec<u64> = journal
            .read_all("r1")
            .await
            .unwrap()
            .iter()
            .map(|r| r.sequence)
            .collect();
        assert_eq!(sequences, vec![5, 2]);
    }

    #[tokio::test]
    async fn delete_through_everything() {
        let journal = InMemoryJournal::new();
        fill(&journal, "r1").await;

        journal.delete_through("r1", u64::MAX).await.unwrap();
        assert!(journal.read_all("r1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_through_is_idempotent() {
        let journal = InMemoryJournal::new();
        fill(&journal, "r1").await;

        journal.delete_through("r1", 2).await.unwrap();
        journal.delete_through("r1", 2).await.unwrap();

        assert_eq!(journal.read_all("r1").await.unwrap().len(), 2);
        assert_eq!(journal.delete_count("r1").await, 2);
    }

    #[tokio::test]
    async fn unavailable_journal_rejects_everything() {
        let journal = InMemoryJournal::new();
        journal.set_unavailable(true).await;

        assert!(journal.append("r1", JournalRecord::apply_marker(1, 0)).await.is_err());
        assert!(journal.read_all("r1").await.is_err());
        assert!(journal.delete_through("r1", 1).await.is_err());

        journal.set_unavailable(false).await;
        assert!(journal.read_all("r1").await.is_ok());
    }
}

// =============================================================================
// SECTION 2: IN-MEMORY SNAPSHOT TESTS
// =============================================================================

mod in_memory_snapshots {
    use super::*;

    #[tokio::test]
    async fn no_snapshot_by_default() {
        let store = InMemorySnapshotStore::new();
        assert_eq!(store.load_latest("r1").await.unwrap(), None);
        assert_eq!(store.count("r1").await.unwrap(), 0);
        assert_eq!(store.save_count("r1").await, 0);
    }

    #[tokio::test]
    async fn latest_wins() {
        let store = InMemorySnapshotStore::new();
        store.save("r1", &snapshot_at(1)).await.unwrap();
        store.save("r1", &snapshot_at(3)).await.unwrap();

        assert_eq!(store.load_latest("r1").await.unwrap(), Some(snapshot_at(3)));
    }

    #[tokio::test]
    async fn pruning_empty_store_is_ok() {
        let store = InMemorySnapshotStore::new();
        store.delete_all_except_latest("r1").await.unwrap();
        assert!(store.snapshots("r1").await.is_empty());
    }

    #[tokio::test]
    async fn failed_save_stores_nothing() {
        let store = InMemorySnapshotStore::new();
        store.fail_next_save().await;

        assert!(matches!(
            store.save("r1", &snapshot_at(1)).await,
            Err(StorageError::Unavailable(_))
        ));
        assert!(store.snapshots("r1").await.is_empty());
        assert_eq!(store.save_count("r1").await, 0);
    }

    #[tokio::test]
    async fn failed_prune_keeps_all() {
        let store = InMemorySnapshotStore::new();
        store.save("r1", &snapshot_at(1)).await.unwrap();
        store.save("r1", &snapshot_at(2)).await.unwrap();
        store.fail_next_delete().await;

        assert!(store.delete_all_except_latest("r1").await.is_err());
        assert_eq!(store.count("r1").await.unwrap(), 2);
    }
}

// =============================================================================
// SECTION 3: FILE JOURNAL TESTS
// =============================================================================

mod file_journal {
    use super::*;

    #[tokio::test]
    async fn creates_root_directory() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("nested").join("journal");

        FileJournal::new(&root).await.unwrap();
        assert!(root.exists());
    }

    #[tokio::test]
    async fn survives_restart() {
        let dir = tempdir().unwrap();

        {
            let journal = FileJournal::new(dir.path()).await.unwrap();
            fill(&journal, "r1").await;
        }

        let journal = FileJournal::new(dir.path()).await.unwrap();
        assert_eq!(journal.read_all("r1").await.unwrap(), sample_records());
    }

    #[tokio::test]
    async fn delete_through_keeps_suffix() {
        let dir = tempdir().unwrap();
        let journal = FileJournal::new(dir.path()).await.unwrap();
        fill(&journal, "r1").await;

        journal.delete_through("r1", 3).await.unwrap();

        let records = journal.read_all("r1").await.unwrap();
        assert_eq!(records, vec![JournalRecord::apply_marker(4, 1)]);
    }

    #[tokio::test]
    async fn replicas_use_separate_directories() {
        let dir = tempdir().unwrap();
        let journal = FileJournal::new(dir.path()).await.unwrap();
        fill(&journal, "r1").await;
        journal.append("r2", JournalRecord::apply_marker(1, 0)).await.unwrap();

        assert!(dir.path().join("r1").join("journal.json").exists());
        assert!(dir.path().join("r2").join("journal.json").exists());
        assert_eq!(journal.read_all("r2").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn no_temp_file_left_behind() {
        let dir = tempdir().unwrap();
        let journal = FileJournal::new(dir.path()).await.unwrap();
        fill(&journal, "r1").await;

        assert!(!dir.path().join("r1").join("journal.tmp").exists());
    }

    #[tokio::test]
    async fn corrupted_file_is_an_error() {
        let dir = tempdir().unwrap();
        let journal = FileJournal::new(dir.path()).await.unwrap();
        fs::create_dir_all(dir.path().join("r1")).unwrap();
        fs::write(dir.path().join("r1").join("journal.json"), "not json").unwrap();

        assert!(matches!(
            journal.read_all("r1").await,
            Err(StorageError::Serialization(_))
        ));
    }

    #[tokio::test]
    async fn reads_records_without_schema_version() {
        let dir = tempdir().unwrap();
        let journal = FileJournal::new(dir.path()).await.unwrap();
        fs::create_dir_all(dir.path().join("r1")).unwrap();
        fs::write(
            dir.path().join("r1").join("journal.json"),
            r#"[{"sequence": 1, "kind": {"LegacyDeleteEntries": {"from_index": 3}}}]"#,
        )
        .unwrap();

        let records = journal.read_all("r1").await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].schema_version, 0);
        assert_eq!(records[0].kind, RecordKind::LegacyDeleteEntries { from_index: 3 });
    }
}

// =============================================================================
// SECTION 4: FILE SNAPSHOT TESTS
// =============================================================================

mod file_snapshots {
    use super::*;

    #[tokio::test]
    async fn latest_survives_restart() {
        let dir = tempdir().unwrap();

        {
            let store = FileSnapshotStore::new(dir.path()).await.unwrap();
            store.save("r1", &snapshot_at(1)).await.unwrap();
            store.save("r1", &snapshot_at(2)).await.unwrap();
        }

        let store = FileSnapshotStore::new(dir.path()).await.unwrap();
        assert_eq!(store.load_latest("r1").await.unwrap(), Some(snapshot_at(2)));
    }

    #[tokio::test]
    async fn prune_keeps_only_latest() {
        let dir = tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path()).await.unwrap();
        for i in 1..=3 {
            store.save("r1", &snapshot_at(i)).await.unwrap();
        }

        store.delete_all_except_latest("r1").await.unwrap();
        store.delete_all_except_latest("r1").await.unwrap();

        let files = fs::read_dir(dir.path().join("r1").join("snapshots")).unwrap().count();
        assert_eq!(files, 1);
        assert_eq!(store.load_latest("r1").await.unwrap(), Some(snapshot_at(3)));
    }

    #[tokio::test]
    async fn new_save_after_prune_is_latest() {
        let dir = tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path()).await.unwrap();
        store.save("r1", &snapshot_at(1)).await.unwrap();
        store.save("r1", &snapshot_at(2)).await.unwrap();
        store.delete_all_except_latest("r1").await.unwrap();

        store.save("r1", &snapshot_at(4)).await.unwrap();
        assert_eq!(store.load_latest("r1").await.unwrap(), Some(snapshot_at(4)));
    }

    #[tokio::test]
    async fn ignores_stray_files() {
        let dir = tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path()).await.unwrap();
        store.save("r1", &snapshot_at(1)).await.unwrap();
        fs::write(dir.path().join("r1").join("snapshots").join("notes.txt"), "hi").unwrap();

        assert_eq!(store.load_latest("r1").await.unwrap(), Some(snapshot_at(1)));
        store.delete_all_except_latest("r1").await.unwrap();
    }

    #[tokio::test]
    async fn reads_snapshot_written_before_versioning() {
        let dir = tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path()).await.unwrap();
        let snapshot_dir = dir.path().join("r1").join("snapshots");
        fs::create_dir_all(&snapshot_dir).unwrap();
        fs::write(
            snapshot_dir.join(format!("{:020}.json", 1)),
            r#"{
                "last_index": 6, "last_term": 2,
                "last_applied_index": 5, "last_applied_term": 1,
                "election_term": 3, "election_voted_for": "member-1",
                "state": {"Raw": [1]},
                "unapplied_entries": [{"index": 6, "term": 2, "command": []}],
                "server_config": [
                    {"id": "r1", "is_voting": true},
                    {"id": "2", "is_voting": false},
                    {"id": "2", "is_voting": false}
                ]
            }"#,
        )
        .unwrap();

        let snapshot = store.load_latest("r1").await.unwrap().unwrap();
        assert_eq!(snapshot.schema_version, 0);
        assert_eq!(snapshot.state, SnapshotState::Raw(vec![1]));
        assert_eq!(snapshot.server_config.len(), 2);
        assert_eq!(
            snapshot.server_config.get("2"),
            Some(&ServerInfo::new("2", false))
        );
    }
}
