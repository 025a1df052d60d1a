//! # Pending Book
//!
//! Bookkeeping over the pending transaction store: status updates, the
//! single-active-hash lookup, tombstoning and rollback-window purging.

use crate::domain::{
    invariant_single_active, BridgeTxType, DockingResult, PendingBridgeTx, PendingStatus, TxHash,
};
use crate::ports::outbound::PendingTxStore;
use std::sync::Arc;
use tracing::{debug, info};

/// Pending transaction bookkeeping.
pub struct PendingBook {
    store: Arc<dyn PendingTxStore>,
    rollback_window: u64,
}

impl PendingBook {
    /// Create over `store` with the given rollback window (in blocks).
    pub fn new(store: Arc<dyn PendingTxStore>, rollback_window: u64) -> Self {
        Self {
            store,
            rollback_window,
        }
    }

    /// Insert or replace a record.
    pub fn put(&self, record: PendingBridgeTx) -> DockingResult<()> {
        self.store.put(record)
    }

    /// Lookup by hash (tombstoned included).
    pub fn get(&self, hash: &TxHash) -> DockingResult<Option<PendingBridgeTx>> {
        self.store.get(hash)
    }

    /// Every record for an internal id.
    pub fn by_internal_id(&self, internal_id: &str) -> DockingResult<Vec<PendingBridgeTx>> {
        self.store.get_by_internal_id(internal_id)
    }

    /// Non-tombstoned records.
    pub fn list_active(&self) -> DockingResult<Vec<PendingBridgeTx>> {
        self.store.list_active()
    }

    /// The active local record for a contract key and type, if any.
    pub fn active_local(
        &self,
        internal_id: &str,
        tx_key: &str,
        tx_type: BridgeTxType,
    ) -> DockingResult<Option<PendingBridgeTx>> {
        let records = self.store.get_by_internal_id(internal_id)?;
        Ok(invariant_single_active(&records, tx_key, tx_type).cloned())
    }

    /// Move a record to `status`. Returns the updated record, or `None` if
    /// the hash is unknown.
    pub fn set_status(
        &self,
        hash: &TxHash,
        status: PendingStatus,
    ) -> DockingResult<Option<PendingBridgeTx>> {
        let Some(mut record) = self.store.get(hash)? else {
            return Ok(None);
        };
        record.transition_to(status)?;
        self.store.put(record.clone())?;
        Ok(Some(record))
    }

    /// Tombstone a record at `height`.
    pub fn tombstone(&self, hash: &TxHash, height: u64) -> DockingResult<bool> {
        let done = self.store.tombstone(hash, height)?;
        if done {
            debug!("[qc-15] Tombstoned {:?} at {}", hash, height);
        }
        Ok(done)
    }

    /// Restore a tombstoned record still inside the rollback window.
    pub fn restore(&self, hash: &TxHash) -> DockingResult<bool> {
        let restored = self.store.restore(hash)?;
        if restored {
            info!("[qc-15] Restored {:?} after rollback notice", hash);
        }
        Ok(restored)
    }

    /// Physically delete tombstoned records whose window has elapsed.
    pub fn purge_expired(&self, current_height: u64) -> DockingResult<usize> {
        let mut purged = 0;
        for record in self.store.list_tombstoned()? {
            if record.is_purgeable(current_height, self.rollback_window) {
                self.store.remove(&record.hash)?;
                purged += 1;
            }
        }
        if purged > 0 {
            debug!(
                "[qc-15] Purged {} tombstoned records at height {}",
                purged, current_height
            );
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryPendingStore;
    use crate::domain::TxOrigin;

    fn create_test_book(window: u64) -> PendingBook {
        PendingBook::new(Arc::new(InMemoryPendingStore::new()), window)
    }

    fn create_test_record(byte: u8) -> PendingBridgeTx {
        PendingBridgeTx::new(TxHash::repeat_byte(byte), BridgeTxType::Withdraw, TxOrigin::Local)
            .with_internal_id("a1", "a1")
    }

    #[test]
    fn test_window_keeps_record_queryable() {
        let book = create_test_book(10);
        book.put(create_test_record(1)).unwrap();
        book.tombstone(&TxHash::repeat_byte(1), 100).unwrap();

        assert_eq!(book.purge_expired(109).unwrap(), 0);
        assert!(book.get(&TxHash::repeat_byte(1)).unwrap().is_some());
        assert_eq!(book.purge_expired(110).unwrap(), 1);
        assert!(book.get(&TxHash::repeat_byte(1)).unwrap().is_none());
    }

    #[test]
    fn test_restore_within_window() {
        let book = create_test_book(10);
        book.put(create_test_record(1)).unwrap();
        book.tombstone(&TxHash::repeat_byte(1), 100).unwrap();

        assert!(book.restore(&TxHash::repeat_byte(1)).unwrap());
        assert_eq!(book.purge_expired(500).unwrap(), 0);
        assert!(book.get(&TxHash::repeat_byte(1)).unwrap().unwrap().is_active());
    }

    #[test]
    fn test_restore_after_purge_fails() {
        let book = create_test_book(1);
        book.put(create_test_record(1)).unwrap();
        book.tombstone(&TxHash::repeat_byte(1), 100).unwrap();
        book.purge_expired(101).unwrap();
        assert!(!book.restore(&TxHash::repeat_byte(1)).unwrap());
    }

    #[test]
    fn test_active_local_lookup() {
        let book = create_test_book(10);
        book.put(create_test_record(1)).unwrap();
        let active = book.active_local("a1", "a1", BridgeTxType::Withdraw).unwrap();
        assert_eq!(active.map(|r| r.hash), Some(TxHash::repeat_byte(1)));

        book.set_status(&TxHash::repeat_byte(1), PendingStatus::Failed).unwrap();
        assert!(book.active_local("a1", "a1", BridgeTxType::Withdraw).unwrap().is_none());
    }

    #[test]
    fn test_set_status_rejects_backwards() {
        let book = create_test_book(10);
        book.put(create_test_record(1).with_status(PendingStatus::Completed)).unwrap();
        assert!(book.set_status(&TxHash::repeat_byte(1), PendingStatus::Doing).is_err());
    }
}
