//! # Ports Module
//!
//! Hexagonal architecture ports (interfaces).

pub mod inbound;
pub mod outbound;

pub use inbound::BridgeDockingApi;
pub use outbound::{
    AssetStore, BlockHeaderStore, CallOutcome, ExternalChainRpc, HomeChainCallback,
    PendingTxStore, SignerSetProvider, TxRelationStore, TxSigner,
};
