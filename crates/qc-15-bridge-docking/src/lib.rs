//! # QC-15 Heterogeneous-Chain Bridge Docking
//!
//! Leaderless multi-signature relay between the home chain and EVM-style
//! external chains.
//!
//! **Subsystem ID:** 15
//! **Architecture:** Hexagonal (DDD + Ports/Adapters)
//! **Status:** Production-Ready
//!
//! ## Purpose
//!
//! Move value and administrative authority across a custody contract that
//! a bank of home-chain signers administers jointly:
//! - Inbound: observe deposits into the custody contract and report them
//! - Outbound: co-sign withdrawals, administrator changes and upgrades
//! - Recovery: rebuild the on-chain administrator set in two phases
//!
//! ## Safety Properties
//!
//! | Defense | Description |
//! |---------|-------------|
//! | Deterministic turn order | Every signer derives the same order from the action id |
//! | Completion check | Nobody submits after the contract reports completion |
//! | Consistency guard | Pending on-chain proposal must match local intent exactly |
//! | Deposit event check | Zero-data transfers without a deposit event are ignored |
//! | Bounded resend | Failed local submissions retry up to a ceiling |
//! | Rollback window | Confirmed records stay restorable for a window of blocks |
//!
//! ## Module Structure
//!
//! ```text
//! qc-15-bridge-docking/
//! ├── domain/          # Entities, ABI codec, custody contract surface, errors
//! ├── algorithms/      # Signer order, gas policy, recovery planning
//! ├── ports/           # BridgeDockingApi (inbound) + RPC/signer/store traits (outbound)
//! ├── adapters/        # In-memory stores, mock external chain, mock signer
//! ├── application/     # Coordinator, listener, tracker, BridgeDockingNode
//! └── config.rs        # DockingConfig, GasPolicy
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod adapters;
pub mod algorithms;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;

// Re-exports
pub use algorithms::{
    apply_gas_policy, compute_order, compute_seed, gas_price_above_ceiling, plan_recovery,
    validate_recovery_sets, RecoveryStep, SignerOrder,
};
pub use application::{
    AssetRegistry, BridgeDockingNode, ChainContext, ChainListener, ConfirmationTracker,
    DockingCollaborators, DockingCoordinator, DockingRegistry, PollReport, TrackerEvent,
    TxAnalysis,
};
pub use config::{DockingConfig, GasPolicy};
pub use domain::{
    Address, AssetDescriptor, AssetRegistration, BridgeTxType, ConfirmedTx, CustodyCall,
    CustodyEvent, DockingError, DockingOutcome, DockingResult, ExternalAssetBinding,
    ExternalChainId, PendingBridgeTx, PendingStatus, RecoveryPhase, SkipReason, TxHash,
    TxOrigin,
};
pub use ports::{
    AssetStore, BlockHeaderStore, BridgeDockingApi, CallOutcome, ExternalChainRpc,
    HomeChainCallback, PendingTxStore, SignerSetProvider, TxRelationStore, TxSigner,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
