//! In-Memory Storage Adapters
//!
//! Implements the storage ports on `parking_lot` locked maps. Used by tests
//! and by nodes that do not need durability.

use crate::domain::{
    Address, DockingError, DockingResult, ExternalAssetBinding, LocalBlockHeader,
    PendingBridgeTx, TxHash,
};
use crate::ports::outbound::{AssetStore, BlockHeaderStore, PendingTxStore, TxRelationStore};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

#[derive(Default)]
struct PendingTables {
    by_hash: HashMap<TxHash, PendingBridgeTx>,
    by_internal_id: HashMap<String, Vec<TxHash>>,
}

/// In-memory pending transaction store.
#[derive(Default)]
pub struct InMemoryPendingStore {
    tables: RwLock<PendingTables>,
}

impl InMemoryPendingStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records, tombstoned included.
    pub fn len(&self) -> usize {
        self.tables.read().by_hash.len()
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PendingTxStore for InMemoryPendingStore {
    fn put(&self, record: PendingBridgeTx) -> DockingResult<()> {
        let mut tables = self.tables.write();
        if let Some(id) = &record.internal_id {
            let hashes = tables.by_internal_id.entry(id.clone()).or_default();
            if !hashes.contains(&record.hash) {
                hashes.push(record.hash);
            }
        }
        tables.by_hash.insert(record.hash, record);
        Ok(())
    }

    fn get(&self, hash: &TxHash) -> DockingResult<Option<PendingBridgeTx>> {
        Ok(self.tables.read().by_hash.get(hash).cloned())
    }

    fn get_by_internal_id(&self, internal_id: &str) -> DockingResult<Vec<PendingBridgeTx>> {
        let tables = self.tables.read();
        Ok(tables
            .by_internal_id
            .get(internal_id)
            .map(|hashes| {
                hashes
                    .iter()
                    .filter_map(|h| tables.by_hash.get(h).cloned())
                    .collect()
            })
            .unwrap_or_default())
    }

    fn tombstone(&self, hash: &TxHash, height: u64) -> DockingResult<bool> {
        match self.tables.write().by_hash.get_mut(hash) {
            Some(record) => {
                record.tombstone(height);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn restore(&self, hash: &TxHash) -> DockingResult<bool> {
        match self.tables.write().by_hash.get_mut(hash) {
            Some(record) if record.tombstoned => {
                record.restore();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn list_active(&self) -> DockingResult<Vec<PendingBridgeTx>> {
        Ok(self
            .tables
            .read()
            .by_hash
            .values()
            .filter(|r| !r.tombstoned)
            .cloned()
            .collect())
    }

    fn list_tombstoned(&self) -> DockingResult<Vec<PendingBridgeTx>> {
        Ok(self
            .tables
            .read()
            .by_hash
            .values()
            .filter(|r| r.tombstoned)
            .cloned()
            .collect())
    }

    fn remove(&self, hash: &TxHash) -> DockingResult<()> {
        let mut tables = self.tables.write();
        if let Some(record) = tables.by_hash.remove(hash) {
            if let Some(id) = record.internal_id {
                if let Some(hashes) = tables.by_internal_id.get_mut(&id) {
                    hashes.retain(|h| h != hash);
                    if hashes.is_empty() {
                        tables.by_internal_id.remove(&id);
                    }
                }
            }
        }
        Ok(())
    }
}

#[derive(Default)]
struct AssetTables {
    by_contract: HashMap<Address, ExternalAssetBinding>,
    by_id: HashMap<u32, Address>,
    max_asset_id: u32,
}

/// In-memory asset binding store.
#[derive(Default)]
pub struct InMemoryAssetStore {
    tables: RwLock<AssetTables>,
}

impl InMemoryAssetStore {
    /// Create a store whose id counter starts at `max_asset_id`.
    pub fn with_max_asset_id(max_asset_id: u32) -> Self {
        let store = Self::default();
        store.tables.write().max_asset_id = max_asset_id;
        store
    }

    /// Number of bindings.
    pub fn len(&self) -> usize {
        self.tables.read().by_contract.len()
    }

    /// Check if there are no bindings.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AssetStore for InMemoryAssetStore {
    fn get_by_contract(&self, contract: &Address) -> DockingResult<Option<ExternalAssetBinding>> {
        Ok(self.tables.read().by_contract.get(contract).cloned())
    }

    fn get_by_id(&self, asset_id: u32) -> DockingResult<Option<ExternalAssetBinding>> {
        let tables = self.tables.read();
        Ok(tables
            .by_id
            .get(&asset_id)
            .and_then(|c| tables.by_contract.get(c))
            .cloned())
    }

    fn put(&self, binding: ExternalAssetBinding) -> DockingResult<()> {
        let mut tables = self.tables.write();
        tables.by_id.insert(binding.asset_id, binding.contract);
        tables.by_contract.insert(binding.contract, binding);
        Ok(())
    }

    fn delete(&self, contract: &Address) -> DockingResult<()> {
        let mut tables = self.tables.write();
        if let Some(binding) = tables.by_contract.remove(contract) {
            tables.by_id.remove(&binding.asset_id);
        }
        Ok(())
    }

    fn max_asset_id(&self) -> DockingResult<u32> {
        Ok(self.tables.read().max_asset_id)
    }

    fn set_max_asset_id(&self, asset_id: u32) -> DockingResult<()> {
        self.tables.write().max_asset_id = asset_id;
        Ok(())
    }
}

/// Asset store that fails the n-th `put` (1-based). Used to exercise the
/// registry's compensating deletes.
pub struct FailingAssetStore {
    inner: InMemoryAssetStore,
    fail_on_put: usize,
    puts: Mutex<usize>,
}

impl FailingAssetStore {
    /// Wrap an empty store failing on the `fail_on_put`-th insert.
    pub fn new(fail_on_put: usize) -> Self {
        Self {
            inner: InMemoryAssetStore::default(),
            fail_on_put,
            puts: Mutex::new(0),
        }
    }

    /// Number of bindings actually stored.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Check if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl AssetStore for FailingAssetStore {
    fn get_by_contract(&self, contract: &Address) -> DockingResult<Option<ExternalAssetBinding>> {
        self.inner.get_by_contract(contract)
    }

    fn get_by_id(&self, asset_id: u32) -> DockingResult<Option<ExternalAssetBinding>> {
        self.inner.get_by_id(asset_id)
    }

    fn put(&self, binding: ExternalAssetBinding) -> DockingResult<()> {
        let mut puts = self.puts.lock();
        *puts += 1;
        if *puts == self.fail_on_put {
            debug!("[qc-15] Injected asset store failure on put #{}", *puts);
            return Err(DockingError::Storage(format!(
                "injected failure writing asset {}",
                binding.asset_id
            )));
        }
        self.inner.put(binding)
    }

    fn delete(&self, contract: &Address) -> DockingResult<()> {
        self.inner.delete(contract)
    }

    fn max_asset_id(&self) -> DockingResult<u32> {
        self.inner.max_asset_id()
    }

    fn set_max_asset_id(&self, asset_id: u32) -> DockingResult<()> {
        self.inner.set_max_asset_id(asset_id)
    }
}

/// In-memory block header store.
#[derive(Default)]
pub struct InMemoryBlockHeaderStore {
    headers: RwLock<BTreeMap<u64, LocalBlockHeader>>,
}

impl InMemoryBlockHeaderStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlockHeaderStore for InMemoryBlockHeaderStore {
    fn put(&self, header: LocalBlockHeader) -> DockingResult<()> {
        self.headers.write().insert(header.height, header);
        Ok(())
    }

    fn get(&self, height: u64) -> DockingResult<Option<LocalBlockHeader>> {
        Ok(self.headers.read().get(&height).cloned())
    }

    fn latest(&self) -> DockingResult<Option<LocalBlockHeader>> {
        Ok(self.headers.read().values().next_back().cloned())
    }

    fn remove(&self, height: u64) -> DockingResult<()> {
        self.headers.write().remove(&height);
        Ok(())
    }

    fn heights(&self) -> DockingResult<Vec<u64>> {
        Ok(self.headers.read().keys().copied().collect())
    }
}

/// In-memory relation table of locally sent hashes.
#[derive(Default)]
pub struct InMemoryTxRelationStore {
    relations: RwLock<HashMap<TxHash, String>>,
}

impl InMemoryTxRelationStore {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }
}

impl TxRelationStore for InMemoryTxRelationStore {
    fn put(&self, hash: TxHash, internal_id: &str) -> DockingResult<()> {
        self.relations.write().insert(hash, internal_id.to_string());
        Ok(())
    }

    fn get(&self, hash: &TxHash) -> DockingResult<Option<String>> {
        Ok(self.relations.read().get(hash).cloned())
    }

    fn remove(&self, hash: &TxHash) -> DockingResult<()> {
        self.relations.write().remove(hash);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BridgeTxType, TxOrigin};
    use primitive_types::H256;

    fn create_test_record(byte: u8, id: &str) -> PendingBridgeTx {
        PendingBridgeTx::new(TxHash::repeat_byte(byte), BridgeTxType::Withdraw, TxOrigin::Local)
            .with_internal_id(id, id)
    }

    #[test]
    fn test_pending_secondary_index() {
        let store = InMemoryPendingStore::new();
        store.put(create_test_record(1, "aa")).unwrap();
        store.put(create_test_record(2, "aa")).unwrap();
        store.put(create_test_record(3, "bb")).unwrap();

        assert_eq!(store.get_by_internal_id("aa").unwrap().len(), 2);
        store.remove(&TxHash::repeat_byte(1)).unwrap();
        assert_eq!(store.get_by_internal_id("aa").unwrap().len(), 1);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_pending_tombstone_visible() {
        let store = InMemoryPendingStore::new();
        store.put(create_test_record(1, "aa")).unwrap();
        assert!(store.tombstone(&TxHash::repeat_byte(1), 50).unwrap());

        assert!(store.get(&TxHash::repeat_byte(1)).unwrap().unwrap().tombstoned);
        assert!(store.list_active().unwrap().is_empty());
        assert_eq!(store.list_tombstoned().unwrap().len(), 1);
        assert!(store.restore(&TxHash::repeat_byte(1)).unwrap());
        assert!(!store.restore(&TxHash::repeat_byte(1)).unwrap());
    }

    #[test]
    fn test_failing_asset_store() {
        let store = FailingAssetStore::new(2);
        let binding = |b: u8, id: u32| ExternalAssetBinding {
            contract: Address::repeat_byte(b),
            asset_id: id,
            symbol: "T".to_string(),
            decimals: 6,
        };
        assert!(store.put(binding(1, 1)).is_ok());
        assert!(store.put(binding(2, 2)).is_err());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_header_store_latest() {
        let store = InMemoryBlockHeaderStore::new();
        for height in [3u64, 1, 2] {
            store
                .put(LocalBlockHeader {
                    height,
                    hash: H256::repeat_byte(height as u8),
                    parent_hash: H256::zero(),
                })
                .unwrap();
        }
        assert_eq!(store.latest().unwrap().unwrap().height, 3);
        assert_eq!(store.heights().unwrap(), vec![1, 2, 3]);
    }
}
