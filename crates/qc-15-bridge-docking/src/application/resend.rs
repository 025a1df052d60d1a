//! # Resend Manager
//!
//! Bounds how many times a locally originated failed transaction may be
//! resubmitted. Counters are process-local and reset on restart; the
//! relation table recording which hashes this node sent is persisted.

use crate::domain::{DockingResult, TxHash};
use crate::ports::outbound::TxRelationStore;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Resend/retry manager.
pub struct ResendManager {
    ceiling: u32,
    counters: Mutex<HashMap<String, u32>>,
    relations: Arc<dyn TxRelationStore>,
}

impl ResendManager {
    /// Create with a resend ceiling.
    pub fn new(ceiling: u32, relations: Arc<dyn TxRelationStore>) -> Self {
        Self {
            ceiling,
            counters: Mutex::new(HashMap::new()),
            relations,
        }
    }

    /// Count one more failure for `internal_id`; returns the new count.
    pub fn increase(&self, internal_id: &str) -> u32 {
        let mut counters = self.counters.lock();
        let count = counters.entry(internal_id.to_string()).or_insert(0);
        *count += 1;
        debug!("[qc-15] Resend counter for {} is now {}", internal_id, *count);
        *count
    }

    /// Check if the counter is still below the ceiling.
    pub fn can_resend(&self, internal_id: &str) -> bool {
        self.attempts(internal_id) < self.ceiling
    }

    /// Current counter.
    pub fn attempts(&self, internal_id: &str) -> u32 {
        self.counters.lock().get(internal_id).copied().unwrap_or(0)
    }

    /// Forget the counter (terminal state).
    pub fn clear(&self, internal_id: &str) {
        self.counters.lock().remove(internal_id);
    }

    /// Remember that this node sent `hash` for `internal_id`.
    pub fn record_sent(&self, hash: TxHash, internal_id: &str) -> DockingResult<()> {
        self.relations.put(hash, internal_id)
    }

    /// Check if this node originated `hash`.
    pub fn current_node_sent(&self, hash: &TxHash) -> DockingResult<bool> {
        Ok(self.relations.get(hash)?.is_some())
    }

    /// Drop the relation entry for `hash`.
    pub fn forget(&self, hash: &TxHash) -> DockingResult<()> {
        self.relations.remove(hash)
    }
}
