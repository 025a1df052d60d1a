//! # Outbound Ports
//!
//! Traits for external dependencies: the external-chain RPC client, the
//! signer, the home-chain collaborator and the storage engine.

use crate::domain::{
    abi, Address, ConfirmedTx, DockingResult, ExternalAssetBinding, ExternalBlock,
    ExternalTransaction, LocalBlockHeader, PendingBridgeTx, TxHash, TxReceipt, UnsignedTx,
};
use async_trait::async_trait;
use primitive_types::U256;

/// Result of a static contract call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CallOutcome {
    /// Call succeeded with return data.
    Success(Vec<u8>),
    /// Call reverted with raw revert data.
    Revert(Vec<u8>),
}

impl CallOutcome {
    /// Decoded `Error(string)` reason, if the call reverted with one.
    pub fn revert_reason(&self) -> Option<String> {
        match self {
            Self::Revert(data) => abi::decode_revert_reason(data),
            Self::Success(_) => None,
        }
    }
}

/// External chain JSON-RPC client - outbound port.
#[async_trait]
pub trait ExternalChainRpc: Send + Sync {
    /// Current tip height.
    async fn block_number(&self) -> DockingResult<u64>;

    /// Block with full transactions, `None` if not produced yet.
    async fn get_block(&self, height: u64) -> DockingResult<Option<ExternalBlock>>;

    /// Transaction by hash.
    async fn get_transaction(&self, hash: TxHash) -> DockingResult<Option<ExternalTransaction>>;

    /// Receipt by hash, `None` while unmined.
    async fn get_receipt(&self, hash: TxHash) -> DockingResult<Option<TxReceipt>>;

    /// Current gas price.
    async fn gas_price(&self) -> DockingResult<U256>;

    /// Static call against the latest state.
    async fn call(&self, from: Address, to: Address, data: &[u8]) -> DockingResult<CallOutcome>;

    /// Gas estimate for a call.
    async fn estimate_gas(&self, from: Address, to: Address, data: &[u8]) -> DockingResult<U256>;

    /// Broadcast a signed transaction.
    async fn send_raw_transaction(&self, raw: &[u8]) -> DockingResult<TxHash>;
}

/// Local administrator key - outbound port.
pub trait TxSigner: Send + Sync {
    /// External address of the local administrator.
    fn address(&self) -> Address;

    /// Sign a transaction and return raw bytes ready to broadcast.
    fn sign(&self, tx: &UnsignedTx) -> DockingResult<Vec<u8>>;
}

/// Home-chain round rotation - outbound port.
#[async_trait]
pub trait SignerSetProvider: Send + Sync {
    /// External addresses of the current signer bank, in bank order.
    async fn current_signers(&self) -> DockingResult<Vec<Address>>;
}

/// Home-chain confirmation sink - outbound port.
#[async_trait]
pub trait HomeChainCallback: Send + Sync {
    /// Report a confirmed bridge action.
    async fn tx_confirmed(&self, confirmed: ConfirmedTx) -> DockingResult<()>;
}

/// Pending transaction storage - outbound port.
pub trait PendingTxStore: Send + Sync {
    /// Insert or replace a record.
    fn put(&self, record: PendingBridgeTx) -> DockingResult<()>;

    /// Lookup by external hash (tombstoned records included).
    fn get(&self, hash: &TxHash) -> DockingResult<Option<PendingBridgeTx>>;

    /// All records for an internal id (tombstoned records included).
    fn get_by_internal_id(&self, internal_id: &str) -> DockingResult<Vec<PendingBridgeTx>>;

    /// Tombstone at height; `false` if unknown.
    fn tombstone(&self, hash: &TxHash, height: u64) -> DockingResult<bool>;

    /// Undo a tombstone; `false` if unknown or not tombstoned.
    fn restore(&self, hash: &TxHash) -> DockingResult<bool>;

    /// Non-tombstoned records.
    fn list_active(&self) -> DockingResult<Vec<PendingBridgeTx>>;

    /// Tombstoned records.
    fn list_tombstoned(&self) -> DockingResult<Vec<PendingBridgeTx>>;

    /// Physically delete a record and its index entry.
    fn remove(&self, hash: &TxHash) -> DockingResult<()>;
}

/// Asset binding storage - outbound port.
pub trait AssetStore: Send + Sync {
    /// Lookup by contract address.
    fn get_by_contract(&self, contract: &Address) -> DockingResult<Option<ExternalAssetBinding>>;

    /// Lookup by internal asset id.
    fn get_by_id(&self, asset_id: u32) -> DockingResult<Option<ExternalAssetBinding>>;

    /// Insert a binding under both indexes.
    fn put(&self, binding: ExternalAssetBinding) -> DockingResult<()>;

    /// Delete a binding from both indexes.
    fn delete(&self, contract: &Address) -> DockingResult<()>;

    /// Highest asset id assigned so far.
    fn max_asset_id(&self) -> DockingResult<u32>;

    /// Persist the highest asset id.
    fn set_max_asset_id(&self, asset_id: u32) -> DockingResult<()>;
}

/// Local block window storage - outbound port.
pub trait BlockHeaderStore: Send + Sync {
    /// Store a header by height.
    fn put(&self, header: LocalBlockHeader) -> DockingResult<()>;

    /// Header at height.
    fn get(&self, height: u64) -> DockingResult<Option<LocalBlockHeader>>;

    /// Highest stored header.
    fn latest(&self) -> DockingResult<Option<LocalBlockHeader>>;

    /// Delete the header at height.
    fn remove(&self, height: u64) -> DockingResult<()>;

    /// Stored heights, ascending.
    fn heights(&self) -> DockingResult<Vec<u64>>;
}

/// Local relation table: hashes this node sent - outbound port.
pub trait TxRelationStore: Send + Sync {
    /// Remember that this node sent `hash` for `internal_id`.
    fn put(&self, hash: TxHash, internal_id: &str) -> DockingResult<()>;

    /// Internal id for a locally sent hash.
    fn get(&self, hash: &TxHash) -> DockingResult<Option<String>>;

    /// Forget a hash.
    fn remove(&self, hash: &TxHash) -> DockingResult<()>;
}
