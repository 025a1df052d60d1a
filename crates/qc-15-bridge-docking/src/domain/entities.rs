//! # Domain Entities
//!
//! Core entities for Bridge Docking: pending bridge transactions, asset
//! bindings, and the external-chain views the listener works on.

use super::errors::{Address, DockingError, TxHash};
use super::value_objects::{AssetDescriptor, BridgeTxType, PendingStatus, TxOrigin};
use primitive_types::{H256, U256};
use serde::{Deserialize, Serialize};

/// In-flight bridge action, keyed by external transaction hash.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingBridgeTx {
    /// External transaction hash.
    pub hash: TxHash,
    /// Home-chain action id (`None` for deposits).
    pub internal_id: Option<String>,
    /// Custody-contract key (internal id, or recovery phase key).
    pub tx_key: Option<String>,
    /// Action kind.
    pub tx_type: BridgeTxType,
    /// Current status.
    pub status: PendingStatus,
    /// Sent by this node or observed.
    pub origin: TxOrigin,
    /// Sender on the external chain.
    pub from: Address,
    /// Withdrawal / deposit counterparty.
    pub to: Address,
    /// Asset moved (withdraw / deposit only).
    pub asset: Option<AssetDescriptor>,
    /// Amount moved, in external decimals.
    pub amount: U256,
    /// External block height (0 until mined).
    pub block_height: u64,
    /// External block timestamp.
    pub block_time: u64,
    /// Addresses that co-signed; filled once multisig completes.
    pub signers: Vec<Address>,
    /// Administrators to add (manager change / recovery).
    pub adds: Vec<Address>,
    /// Administrators to remove (manager change / recovery).
    pub removes: Vec<Address>,
    /// Expected sub-action count (manager change).
    pub expected_count: u8,
    /// Soft-deleted on confirmation.
    pub tombstoned: bool,
    /// Height at which the record was tombstoned.
    pub tombstone_height: Option<u64>,
}

impl PendingBridgeTx {
    /// Create an empty record for a hash.
    pub fn new(hash: TxHash, tx_type: BridgeTxType, origin: TxOrigin) -> Self {
        Self {
            hash,
            internal_id: None,
            tx_key: None,
            tx_type,
            status: PendingStatus::default(),
            origin,
            from: Address::zero(),
            to: Address::zero(),
            asset: None,
            amount: U256::zero(),
            block_height: 0,
            block_time: 0,
            signers: Vec::new(),
            adds: Vec::new(),
            removes: Vec::new(),
            expected_count: 0,
            tombstoned: false,
            tombstone_height: None,
        }
    }

    /// Set the internal id and contract key.
    pub fn with_internal_id(mut self, internal_id: &str, tx_key: &str) -> Self {
        self.internal_id = Some(internal_id.to_string());
        self.tx_key = Some(tx_key.to_string());
        self
    }

    /// Set sender and counterparty.
    pub fn with_parties(mut self, from: Address, to: Address) -> Self {
        self.from = from;
        self.to = to;
        self
    }

    /// Set the moved asset and amount.
    pub fn with_transfer(mut self, asset: AssetDescriptor, amount: U256) -> Self {
        self.asset = Some(asset);
        self.amount = amount;
        self
    }

    /// Set manager-change lists.
    pub fn with_manager_change(
        mut self,
        adds: Vec<Address>,
        removes: Vec<Address>,
        expected_count: u8,
    ) -> Self {
        self.adds = adds;
        self.removes = removes;
        self.expected_count = expected_count;
        self
    }

    /// Set block position.
    pub fn with_block(mut self, height: u64, time: u64) -> Self {
        self.block_height = height;
        self.block_time = time;
        self
    }

    /// Set initial status.
    pub fn with_status(mut self, status: PendingStatus) -> Self {
        self.status = status;
        self
    }

    /// Transition to new status.
    pub fn transition_to(&mut self, next: PendingStatus) -> Result<(), DockingError> {
        if !self.status.can_transition_to(next) {
            return Err(DockingError::InvalidTransition {
                from: format!("{:?}", self.status),
                to: format!("{:?}", next),
            });
        }
        self.status = next;
        Ok(())
    }

    /// Soft-delete at a confirmation height.
    pub fn tombstone(&mut self, height: u64) {
        self.tombstoned = true;
        self.tombstone_height = Some(height);
    }

    /// Undo a tombstone (rollback notice).
    pub fn restore(&mut self) {
        self.tombstoned = false;
        self.tombstone_height = None;
    }

    /// Check if the record may be physically purged at `current_height`.
    pub fn is_purgeable(&self, current_height: u64, rollback_window: u64) -> bool {
        match self.tombstone_height {
            Some(h) if self.tombstoned => current_height >= h.saturating_add(rollback_window),
            _ => false,
        }
    }

    /// Active = not tombstoned and not failed.
    pub fn is_active(&self) -> bool {
        !self.tombstoned && self.status != PendingStatus::Failed
    }

    /// Check if this node originated the record.
    pub fn is_local(&self) -> bool {
        self.origin == TxOrigin::Local
    }
}

/// Binding between an external contract and an internal asset id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalAssetBinding {
    /// ERC-20 contract address.
    pub contract: Address,
    /// Internal asset id.
    pub asset_id: u32,
    /// Token symbol.
    pub symbol: String,
    /// Token decimals.
    pub decimals: u8,
}

/// Registration request for one external token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRegistration {
    /// ERC-20 contract address.
    pub contract: Address,
    /// Token symbol.
    pub symbol: String,
    /// Token decimals.
    pub decimals: u8,
}

/// Compact header kept in the local block window.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalBlockHeader {
    /// Block height.
    pub height: u64,
    /// Block hash.
    pub hash: H256,
    /// Parent hash.
    pub parent_hash: H256,
}

/// External transaction as returned by the chain RPC.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalTransaction {
    /// Transaction hash.
    pub hash: TxHash,
    /// Sender.
    pub from: Address,
    /// Recipient (`None` for contract creation).
    pub to: Option<Address>,
    /// Native value transferred.
    pub value: U256,
    /// Call-data.
    pub input: Vec<u8>,
    /// Block it was mined in, if any.
    pub block_number: Option<u64>,
}

/// Event log entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Emitting contract.
    pub address: Address,
    /// Indexed topics (topic 0 is the event signature).
    pub topics: Vec<H256>,
    /// Non-indexed data.
    pub data: Vec<u8>,
}

/// Transaction receipt.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    /// Transaction hash.
    pub hash: TxHash,
    /// `true` if execution succeeded.
    pub success: bool,
    /// Block it was mined in.
    pub block_number: u64,
    /// Gas consumed.
    pub gas_used: U256,
    /// Emitted logs.
    pub logs: Vec<LogEntry>,
}

/// External block with full transactions.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalBlock {
    /// Block height.
    pub height: u64,
    /// Block hash.
    pub hash: H256,
    /// Parent hash.
    pub parent_hash: H256,
    /// Unix timestamp.
    pub timestamp: u64,
    /// Transactions in block order.
    pub transactions: Vec<ExternalTransaction>,
}

impl ExternalBlock {
    /// Compact header for the local window.
    pub fn header(&self) -> LocalBlockHeader {
        LocalBlockHeader {
            height: self.height,
            hash: self.hash,
            parent_hash: self.parent_hash,
        }
    }
}

/// Unsigned outbound transaction handed to the signer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsignedTx {
    /// Signing account (the local administrator).
    pub from: Address,
    /// Custody contract.
    pub to: Address,
    /// Encoded contract call.
    pub data: Vec<u8>,
    /// Native value (always zero for custody calls).
    pub value: U256,
    /// Gas limit after floor/clamp.
    pub gas_limit: U256,
    /// Gas price at submission time.
    pub gas_price: U256,
}

/// Value movement attached to a confirmation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferInfo {
    /// Sender on the external chain.
    pub from: Address,
    /// Recipient on the external chain.
    pub to: Address,
    /// Amount in external decimals.
    pub amount: U256,
    /// Asset moved.
    pub asset: AssetDescriptor,
}

/// Payload of the `TxConfirmed` callback into the home chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmedTx {
    /// Action kind.
    pub tx_type: BridgeTxType,
    /// Home-chain action id (`None` for deposits).
    pub internal_id: Option<String>,
    /// External hash (`None` when confirmed without an on-chain call).
    pub external_hash: Option<TxHash>,
    /// External block height.
    pub height: u64,
    /// External block time.
    pub time: u64,
    /// Custody contract the action ran against.
    pub custody: Address,
    /// Co-signers.
    pub signers: Vec<Address>,
    /// Free-form remark.
    pub remark: Option<String>,
    /// Value movement for deposits and withdrawals.
    pub transfer: Option<TransferInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_record() -> PendingBridgeTx {
        PendingBridgeTx::new(TxHash::repeat_byte(1), BridgeTxType::Withdraw, TxOrigin::Local)
            .with_internal_id("ab01", "ab01")
            .with_transfer(AssetDescriptor::native(101, 1), U256::from(1000))
    }

    #[test]
    fn test_new_record_is_submitted() {
        let record = create_test_record();
        assert_eq!(record.status, PendingStatus::Submitted);
        assert!(record.is_active());
        assert!(record.is_local());
        assert!(record.signers.is_empty());
    }

    #[test]
    fn test_transition_rejects_backwards() {
        let mut record = create_test_record();
        record.transition_to(PendingStatus::Completed).unwrap();
        assert!(record.transition_to(PendingStatus::Doing).is_err());
    }

    #[test]
    fn test_tombstone_window() {
        let mut record = create_test_record();
        record.tombstone(100);
        assert!(!record.is_active());
        assert!(!record.is_purgeable(100, 10));
        assert!(!record.is_purgeable(109, 10));
        assert!(record.is_purgeable(110, 10));
    }

    #[test]
    fn test_restore_clears_tombstone() {
        let mut record = create_test_record();
        record.tombstone(100);
        record.restore();
        assert!(record.is_active());
        assert!(!record.is_purgeable(1_000, 10));
    }

    #[test]
    fn test_failed_record_not_active() {
        let mut record = create_test_record();
        record.transition_to(PendingStatus::Failed).unwrap();
        assert!(!record.is_active());
    }
}
