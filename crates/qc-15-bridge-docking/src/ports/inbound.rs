//! # Inbound Ports
//!
//! API trait defining what the Bridge Docking subsystem can do for the
//! home chain.

use crate::domain::{Address, DockingOutcome, DockingResult, TxHash};
use async_trait::async_trait;
use primitive_types::U256;

/// Bridge docking API - inbound port.
///
/// Every docking call returns a hash, an explicit no-op, or a typed error.
#[async_trait]
pub trait BridgeDockingApi: Send + Sync {
    /// Create or co-sign a withdrawal of `amount` (external decimals) of
    /// `asset_id` to `to`.
    async fn create_or_sign_withdraw(
        &self,
        internal_id: &str,
        to: Address,
        amount: U256,
        asset_id: u32,
    ) -> DockingResult<DockingOutcome>;

    /// Create or co-sign an administrator change.
    async fn create_or_sign_manager_change(
        &self,
        internal_id: &str,
        adds: Vec<Address>,
        removes: Vec<Address>,
        expected_count: u8,
    ) -> DockingResult<DockingOutcome>;

    /// Create or co-sign a contract-upgrade authorization.
    async fn create_or_sign_upgrade(&self, internal_id: &str) -> DockingResult<DockingOutcome>;

    /// Run the two-phase emergency recovery of the administrator set.
    async fn force_recovery(
        &self,
        internal_id: &str,
        seed_managers: Vec<Address>,
        all_managers: Vec<Address>,
    ) -> DockingResult<DockingOutcome>;

    /// Home chain confirmed the action: tombstone after the rollback window.
    async fn tx_confirmed_completed(
        &self,
        hash: TxHash,
        height: u64,
        internal_id: Option<&str>,
        remark: Option<&str>,
    ) -> DockingResult<()>;

    /// Home chain rolled back its confirmation: restore the record.
    /// Returns `false` if the record was already purged or never tombstoned.
    async fn tx_confirmed_rollback(&self, hash: TxHash) -> DockingResult<bool>;
}
