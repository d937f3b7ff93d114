//! # inflight
//!
//! why: a replica may only have one recovery and one compaction running at a time
//! relations: held by the coordinator for recoveries and by the compaction executor
//! what: InFlight registry, InFlightGuard released on drop

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Debug, Clone, Default)]
pub(crate) struct InFlight {
    ids: Arc<Mutex<HashSet<String>>>,
}

impl InFlight {
    /// claim `replica_id`, or `None` if someone already holds it
    pub(crate) fn try_acquire(&self, replica_id: &str) -> Option<InFlightGuard> {
        let mut ids = self.ids.lock().unwrap_or_else(PoisonError::into_inner);
        if !ids.insert(replica_id.to_owned()) {
            return None;
        }
        Some(InFlightGuard {
            ids: Arc::clone(&self.ids),
            replica_id: replica_id.to_owned(),
        })
    }
}

/// releases the claim on drop
#[derive(Debug)]
pub(crate) struct InFlightGuard {
    ids: Arc<Mutex<HashSet<String>>>,
    replica_id: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut ids = self.ids.lock().unwrap_or_else(PoisonError::into_inner);
        ids.remove(&self.replica_id);
    }
}
