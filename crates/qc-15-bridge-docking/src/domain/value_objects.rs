//! # Domain Value Objects
//!
//! Immutable value types for Bridge Docking.

use super::errors::{Address, ExternalChainId, TxHash};
use primitive_types::U256;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of bridge action a pending record tracks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BridgeTxType {
    /// Inbound value transfer into the custody contract.
    Deposit,
    /// Outbound value transfer out of the custody contract.
    Withdraw,
    /// Administrator-set change.
    ManagerChange,
    /// Contract-upgrade authorization.
    Upgrade,
    /// Emergency administrator-set recovery.
    Recovery,
}

impl fmt::Display for BridgeTxType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Deposit => "DEPOSIT",
            Self::Withdraw => "WITHDRAW",
            Self::ManagerChange => "MANAGER_CHANGE",
            Self::Upgrade => "UPGRADE",
            Self::Recovery => "RECOVERY",
        };
        f.write_str(name)
    }
}

/// Status of a pending bridge transaction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PendingStatus {
    /// Sent by this node, receipt not yet seen.
    #[default]
    Submitted,
    /// Seen on-chain, multisig not yet complete.
    Doing,
    /// Multisig completed with enough signers.
    Completed,
    /// Receipt failed or missing.
    Failed,
}

impl PendingStatus {
    /// Check if transition is valid. Re-observing the same status is allowed.
    pub fn can_transition_to(&self, next: PendingStatus) -> bool {
        if *self == next {
            return true;
        }
        match (self, next) {
            (Self::Submitted, Self::Doing) => true,
            (Self::Submitted, Self::Completed) => true,
            (Self::Submitted, Self::Failed) => true,
            (Self::Doing, Self::Completed) => true,
            (Self::Doing, Self::Failed) => true,
            _ => false,
        }
    }

    /// Check if terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Coordinator state machine for one docking attempt.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoordinatorState {
    /// Request accepted.
    #[default]
    Init,
    /// Sleeping until this signer's turn.
    WaitingTurn,
    /// Asking the contract whether the action already completed.
    CheckingCompletion,
    /// Someone else finished the action.
    AlreadyComplete,
    /// Dry-run, gas estimation and broadcast in progress.
    Submitting,
    /// Broadcast, awaiting receipt.
    Submitted,
    /// Receipt succeeded.
    Confirmed,
    /// Receipt failed.
    Failed,
    /// Failed, but this node originated it and the ceiling allows a resend.
    ResendEligible,
    /// Failed with no resend left.
    FailedTerminal,
}

impl CoordinatorState {
    /// Check if transition is valid.
    pub fn can_transition_to(&self, next: CoordinatorState) -> bool {
        match (self, next) {
            (Self::Init, Self::WaitingTurn) => true,
            (Self::Init, Self::CheckingCompletion) => true, // resend skips the turn wait
            (Self::WaitingTurn, Self::CheckingCompletion) => true,
            (Self::CheckingCompletion, Self::AlreadyComplete) => true,
            (Self::CheckingCompletion, Self::Submitting) => true,
            (Self::Submitting, Self::AlreadyComplete) => true, // duplicate signature
            (Self::Submitting, Self::Submitted) => true,
            (Self::Submitted, Self::Confirmed) => true,
            (Self::Submitted, Self::Failed) => true,
            (Self::Failed, Self::ResendEligible) => true,
            (Self::Failed, Self::FailedTerminal) => true,
            (Self::ResendEligible, Self::Submitting) => true,
            (Self::Submitting, Self::ResendEligible) => true, // resend postponed
            (Self::Submitting, Self::FailedTerminal) => true, // resend hard failure
            _ => false,
        }
    }

    /// Check if terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::AlreadyComplete | Self::Confirmed | Self::FailedTerminal
        )
    }
}

/// Category assigned to an external transaction by the classifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TxCategory {
    /// Co-sign of a withdrawal on a listened custody contract.
    BroadcastWithdraw,
    /// Co-sign of an administrator change.
    BroadcastManagerChange,
    /// Co-sign of an upgrade authorization.
    BroadcastUpgrade,
    /// Plain value transfer to the custody contract.
    NativeDeposit,
    /// ERC-20 transfer whose recipient is the custody contract.
    TokenDeposit,
    /// Nothing to do with the bridge.
    Irrelevant,
}

impl TxCategory {
    /// Check if this is one of the custody broadcast categories.
    pub fn is_broadcast(&self) -> bool {
        matches!(
            self,
            Self::BroadcastWithdraw | Self::BroadcastManagerChange | Self::BroadcastUpgrade
        )
    }
}

/// Who sent a pending transaction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxOrigin {
    /// This node signed and broadcast it.
    Local,
    /// Observed from another signer or depositor.
    #[default]
    Observed,
}

/// Asset descriptor carried by pending records.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetDescriptor {
    /// Home-chain id of the external chain the asset lives on.
    pub chain_id: ExternalChainId,
    /// Internal asset id.
    pub asset_id: u32,
    /// Decimals on the external chain.
    pub decimals: u8,
    /// ERC-20 contract, `None` for the native asset.
    pub contract: Option<Address>,
}

impl AssetDescriptor {
    /// Native asset of an external chain.
    pub fn native(chain_id: ExternalChainId, asset_id: u32) -> Self {
        Self {
            chain_id,
            asset_id,
            decimals: 18,
            contract: None,
        }
    }

    /// Check if this is an ERC-20 token.
    pub fn is_token(&self) -> bool {
        self.contract.is_some()
    }
}

/// Recovery phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecoveryPhase {
    /// Phase I: remove administrators absent from the seed set.
    Purge,
    /// Phase II: add designated administrators missing on-chain.
    Restore,
}

impl RecoveryPhase {
    const PURGE_SUFFIX: &'static str = ":recovery:1";
    const RESTORE_SUFFIX: &'static str = ":recovery:2";

    /// Contract key used for this phase of an internal recovery action.
    pub fn tx_key(&self, internal_id: &str) -> String {
        match self {
            Self::Purge => format!("{}{}", internal_id, Self::PURGE_SUFFIX),
            Self::Restore => format!("{}{}", internal_id, Self::RESTORE_SUFFIX),
        }
    }

    /// Split a contract key back into (internal id, phase) if it is a recovery key.
    pub fn parse_key(tx_key: &str) -> Option<(&str, RecoveryPhase)> {
        if let Some(id) = tx_key.strip_suffix(Self::PURGE_SUFFIX) {
            return Some((id, Self::Purge));
        }
        tx_key
            .strip_suffix(Self::RESTORE_SUFFIX)
            .map(|id| (id, Self::Restore))
    }
}

/// Why a docking call finished without broadcasting anything.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    /// The custody contract already reports the action completed.
    AlreadyCompleted,
    /// Gas price above the configured ceiling; retried next tick.
    GasPriceAboveCeiling {
        /// Current external gas price
        current: U256,
        /// Configured ceiling
        ceiling: U256,
    },
    /// Dry-run reverted with the duplicate-signature reason.
    AlreadySigned,
    /// Another call for the same action is mid-flight on this node.
    InProgress,
    /// Nothing to change on-chain; reported confirmed immediately.
    NoChangeRequired,
    /// Node shut down while waiting for this signer's turn.
    Cancelled,
}

/// Result of a docking call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DockingOutcome {
    /// New external transaction broadcast by this node.
    Submitted(TxHash),
    /// This node already has an active transaction for the action.
    Pending(TxHash),
    /// Explicit no-op.
    Skipped(SkipReason),
}

impl DockingOutcome {
    /// External hash if one exists for this node.
    pub fn tx_hash(&self) -> Option<TxHash> {
        match self {
            Self::Submitted(h) | Self::Pending(h) => Some(*h),
            Self::Skipped(_) => None,
        }
    }

    /// Check if this call broadcast a new transaction.
    pub fn is_submitted(&self) -> bool {
        matches!(self, Self::Submitted(_))
    }
}
