//! # common test helpers
//!
//! why: share a controllable cohort and store fixtures between recovery test files
//! relations: used by migration_tests.rs and comprehensive_tests.rs
//! what: MockCohort, gates, legacy fixtures, bounded waits

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use raft_core::{LogEntry, ServerInfo, Snapshot, SnapshotState, StatePayload};
use raft_recovery::{CaptureReply, CohortError, CompactionHandle, CompactionReport, RecoveryError, SnapshotCohort};
use raft_storage::{InMemoryJournal, InMemorySnapshotStore};
use tokio::sync::{oneshot, Notify};

/// upper bound for any single wait in tests; never used to prove absence
pub const WAIT: Duration = Duration::from_secs(5);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn stores() -> (Arc<InMemoryJournal>, Arc<InMemorySnapshotStore>) {
    (Arc::new(InMemoryJournal::new()), Arc::new(InMemorySnapshotStore::new()))
}

/// wait for a compaction acknowledgement, failing the test if it never comes
pub async fn wait_for(handle: CompactionHandle) -> Result<CompactionReport, RecoveryError> {
    tokio::time::timeout(WAIT, handle.wait())
        .await
        .expect("compaction did not finish in time")
}

/// pause point a test can observe and release
#[derive(Clone, Default)]
pub struct Gate {
    pub entered: Arc<Notify>,
    pub release: Arc<Notify>,
}

impl Gate {
    async fn pass(&self) {
        self.entered.notify_one();
        self.release.notified().await;
    }

    pub async fn wait_entered(&self) {
        tokio::time::timeout(WAIT, self.entered.notified())
            .await
            .expect("gate never entered");
    }

    pub fn open(&self) {
        self.release.notify_one();
    }
}

/// cohort double that records what recovery does to it
#[derive(Default)]
pub struct MockCohort {
    applied: Mutex<Vec<LogEntry>>,
    installed: Mutex<Vec<StatePayload>>,
    captures: AtomicUsize,
    capture_payload: Option<StatePayload>,
    decodes_legacy: bool,
    fail_apply_at: Option<i64>,
    install_gate: Option<Gate>,
    capture_gate: Option<Gate>,
}

impl MockCohort {
    pub fn new() -> Self {
        Self::default()
    }

    /// always capture this payload instead of one derived from applied entries
    pub fn capturing(payload: StatePayload) -> Self {
        Self {
            capture_payload: Some(payload),
            ..Self::default()
        }
    }

    pub fn decoding_legacy(mut self) -> Self {
        self.decodes_legacy = true;
        self
    }

    pub fn failing_apply_at(mut self, index: i64) -> Self {
        self.fail_apply_at = Some(index);
        self
    }

    pub fn with_install_gate(mut self, gate: Gate) -> Self {
        self.install_gate = Some(gate);
        self
    }

    pub fn with_capture_gate(mut self, gate: Gate) -> Self {
        self.capture_gate = Some(gate);
        self
    }

    pub fn applied(&self) -> Vec<LogEntry> {
        self.applied.lock().unwrap().clone()
    }

    pub fn applied_indices(&self) -> Vec<i64> {
        self.applied().iter().map(|e| e.index).collect()
    }

    pub fn installed(&self) -> Vec<StatePayload> {
        self.installed.lock().unwrap().clone()
    }

    /// number of capture requests received
    pub fn captures(&self) -> usize {
        self.captures.load(Ordering::SeqCst)
    }

    /// state as the application would serialize it: the applied commands
    pub fn current_state(&self) -> StatePayload {
        if let Some(payload) = &self.capture_payload {
            return payload.clone();
        }
        let commands: Vec<Vec<u8>> = self.applied().into_iter().map(|e| e.command).collect();
        StatePayload::new(serde_json::to_vec(&commands).unwrap())
    }
}

#[async_trait]
impl SnapshotCohort for MockCohort {
    fn capture(&self) -> CaptureReply {
        self.captures.fetch_add(1, Ordering::SeqCst);
        // state is fixed at request time; the reply is delivered later
        let payload = self.current_state();
        let gate = self.capture_gate.clone();
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            if let Some(gate) = gate {
                gate.pass().await;
            }
            tokio::task::yield_now().await;
            let _ = tx.send(Ok(payload));
        });
        rx
    }

    async fn install(&self, state: StatePayload) -> Result<(), CohortError> {
        if let Some(gate) = &self.install_gate {
            gate.pass().await;
        }
        self.installed.lock().unwrap().push(state);
        Ok(())
    }

    async fn apply(&self, entry: &LogEntry) -> Result<(), CohortError> {
        if self.fail_apply_at == Some(entry.index) {
            return Err(CohortError::Failed(format!("cannot apply {}", entry.index)));
        }
        self.applied.lock().unwrap().push(entry.clone());
        Ok(())
    }

    fn decode_legacy_state(&self, bytes: &[u8]) -> Result<StatePayload, CohortError> {
        if self.decodes_legacy {
            Ok(StatePayload::new(bytes.to_vec()))
        } else {
            Err(CohortError::Unsupported("decode_legacy_state"))
        }
    }
}

/// a snapshot as a writer without versioned state encoding stored it
pub fn legacy_snapshot(replica_id: &str) -> Snapshot {
    Snapshot {
        schema_version: 0,
        last_index: 6,
        last_term: 2,
        last_applied_index: 5,
        last_applied_term: 1,
        election_term: 3,
        election_voted_for: Some("member-1".into()),
        state: SnapshotState::Raw(serde_json::to_vec(&["1"]).unwrap()),
        unapplied_entries: vec![LogEntry::new(6, 2, "payload")],
        server_config: vec![ServerInfo::new(replica_id, true), ServerInfo::new("2", false)].into(),
        journal_through: 0,
    }
}
