//! # snapshot
//!
//! why: describe the durable checkpoint a replica restarts from
//! relations: loaded and saved through raft-storage, classified by classify.rs,
//!            regenerated by raft-recovery
//! what: Snapshot, SnapshotState, StatePayload, ServerInfo, ServerConfig, invariant checks

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::log::{LogEntry, NO_INDEX};

/// schema version written by the current snapshot/journal writer
///
/// anything below this (including the implicit 0 of pre-versioning writers)
/// is legacy and triggers a one-time migration on recovery
pub const CURRENT_SCHEMA_VERSION: u32 = 2;

/// version tag stamped on state payloads produced by the current cohort encoding
pub const CURRENT_STATE_VERSION: u32 = 1;

/// A cluster member as recorded in the membership configuration
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServerInfo {
    pub id: String,
    pub is_voting: bool,
}

impl ServerInfo {
    pub fn new(id: impl Into<String>, is_voting: bool) -> Self {
        Self {
            id: id.into(),
            is_voting,
        }
    }
}

/// Membership set, unique by server id
///
/// persisted as a plain list; duplicate ids collapse on load with the last
/// occurrence winning. equality ignores order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<ServerInfo>", into = "Vec<ServerInfo>")]
pub struct ServerConfig {
    servers: BTreeMap<String, ServerInfo>,
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// add a server, replacing any existing entry with the same id
    pub fn insert(&mut self, server: ServerInfo) {
        self.servers.insert(server.id.clone(), server);
    }

    pub fn get(&self, id: &str) -> Option<&ServerInfo> {
        self.servers.get(id)
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ServerInfo> {
        self.servers.values()
    }

    pub fn voting_members(&self) -> impl Iterator<Item = &ServerInfo> {
        self.iter().filter(|s| s.is_voting)
    }
}

impl FromIterator<ServerInfo> for ServerConfig {
    fn from_iter<I: IntoIterator<Item = ServerInfo>>(iter: I) -> Self {
        let mut config = ServerConfig::new();
        for server in iter {
            config.insert(server);
        }
        config
    }
}

impl From<Vec<ServerInfo>> for ServerConfig {
    fn from(servers: Vec<ServerInfo>) -> Self {
        servers.into_iter().collect()
    }
}

impl From<ServerConfig> for Vec<ServerInfo> {
    fn from(config: ServerConfig) -> Self {
        config.servers.into_values().collect()
    }
}

/// Opaque application state, tagged with the encoding version that produced it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatePayload {
    pub version: u32,
    pub data: Vec<u8>,
}

impl StatePayload {
    /// payload in the current encoding
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            version: CURRENT_STATE_VERSION,
            data: data.into(),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }
}

/// How the state machine payload is stored inside a snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SnapshotState {
    /// tagged payload written by the current cohort encoding
    Versioned(StatePayload),
    /// raw untagged bytes from writers that predate versioned state
    Raw(Vec<u8>),
}

/// Violations of the snapshot's own structural invariants
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SnapshotError {
    #[error("last applied index {last_applied_index} is beyond last index {last_index}")]
    AppliedBeyondLast {
        last_applied_index: i64,
        last_index: i64,
    },

    #[error("unapplied entry {index} is outside ({last_applied_index}, {last_index}]")]
    UnappliedOutOfRange {
        index: i64,
        last_applied_index: i64,
        last_index: i64,
    },

    #[error("unapplied entries are not contiguous: expected index {expected}, found {found}")]
    UnappliedGap { expected: i64, found: i64 },
}

/// A durable checkpoint of replica state at a log position
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// absent in snapshots written before schema versioning existed
    #[serde(default)]
    pub schema_version: u32,
    pub last_index: i64,
    pub last_term: i64,
    pub last_applied_index: i64,
    pub last_applied_term: i64,
    pub election_term: i64,
    pub election_voted_for: Option<String>,
    pub state: SnapshotState,
    #[serde(default)]
    pub unapplied_entries: Vec<LogEntry>,
    #[serde(default)]
    pub server_config: ServerConfig,
    /// highest journal sequence folded into this snapshot, 0 if none
    #[serde(default)]
    pub journal_through: u64,
}

impl Snapshot {
    /// an empty current-format snapshot (nothing logged, nothing applied)
    pub fn empty() -> Self {
        Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            last_index: NO_INDEX,
            last_term: NO_INDEX,
            last_applied_index: NO_INDEX,
            last_applied_term: NO_INDEX,
            election_term: 0,
            election_voted_for: None,
            state: SnapshotState::Versioned(StatePayload::empty()),
            unapplied_entries: Vec::new(),
            server_config: ServerConfig::new(),
            journal_through: 0,
        }
    }

    /// the versioned payload, if this snapshot carries one
    pub fn payload(&self) -> Option<&StatePayload> {
        match &self.state {
            SnapshotState::Versioned(payload) => Some(payload),
            SnapshotState::Raw(_) => None,
        }
    }

    /// check `last_applied_index <= last_index` and that unapplied entries are
    /// contiguous, ascending, and inside `(last_applied_index, last_index]`
    pub fn validate(&self) -> Result<(), SnapshotError> {
        if self.last_applied_index > self.last_index {
            return Err(SnapshotError::AppliedBeyondLast {
                last_applied_index: self.last_applied_index,
                last_index: self.last_index,
            });
        }

        let mut expected = self.last_applied_index + 1;
        for entry in &self.unapplied_entries {
            if entry.index <= self.last_applied_index || entry.index > self.last_index {
                return Err(SnapshotError::UnappliedOutOfRange {
                    index: entry.index,
                    last_applied_index: self.last_applied_index,
                    last_index: self.last_index,
                });
            }
            if entry.index != expected {
                return Err(SnapshotError::UnappliedGap {
                    expected,
                    found: entry.index,
                });
            }
            expected += 1;
        }

        Ok(())
    }
}
