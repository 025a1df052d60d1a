//! # Chain Context
//!
//! Explicit per-external-chain state injected into every component, and the
//! registry that maps external chain ids to wired docking nodes.

use super::node::BridgeDockingNode;
use crate::domain::{Address, DockingError, DockingResult, ExternalChainId};
use parking_lot::RwLock;
use primitive_types::U256;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::info;

#[derive(Debug)]
struct MutableContext {
    custody: Address,
    listened: HashSet<Address>,
    history: Vec<Address>,
    gas_price_ceiling: U256,
    threshold: usize,
}

/// Per-chain runtime context.
#[derive(Debug)]
pub struct ChainContext {
    chain_id: ExternalChainId,
    signer: Address,
    native_asset_id: u32,
    state: RwLock<MutableContext>,
}

impl ChainContext {
    /// Create a context for one external chain.
    pub fn new(
        chain_id: ExternalChainId,
        signer: Address,
        custody: Address,
        native_asset_id: u32,
        threshold: usize,
    ) -> Self {
        Self {
            chain_id,
            signer,
            native_asset_id,
            state: RwLock::new(MutableContext {
                custody,
                listened: HashSet::from([custody]),
                history: vec![custody],
                gas_price_ceiling: U256::zero(),
                threshold,
            }),
        }
    }

    /// Set the initial gas-price ceiling.
    pub fn with_gas_price_ceiling(self, ceiling: U256) -> Self {
        self.state.write().gas_price_ceiling = ceiling;
        self
    }

    /// External chain id.
    pub fn chain_id(&self) -> ExternalChainId {
        self.chain_id
    }

    /// Local administrator address.
    pub fn signer(&self) -> Address {
        self.signer
    }

    /// Internal id of the chain's native asset.
    pub fn native_asset_id(&self) -> u32 {
        self.native_asset_id
    }

    /// Current custody contract.
    pub fn custody(&self) -> Address {
        self.state.read().custody
    }

    /// Check if `address` is a current or historical custody contract.
    pub fn is_listened(&self, address: &Address) -> bool {
        self.state.read().listened.contains(address)
    }

    /// Every custody contract ever used, oldest first.
    pub fn custody_history(&self) -> Vec<Address> {
        self.state.read().history.clone()
    }

    /// Replace the custody contract. The old contract stays listened so
    /// in-flight actions against it are still observed.
    pub fn update_custody(&self, custody: Address) {
        let mut state = self.state.write();
        if state.custody == custody {
            return;
        }
        let old = state.custody;
        state.custody = custody;
        state.listened.insert(custody);
        if !state.history.contains(&custody) {
            state.history.push(custody);
        }
        info!(
            chain_id = self.chain_id,
            "[qc-15] Custody contract updated {:?} -> {:?}", old, custody
        );
    }

    /// Gas-price ceiling (`0` = none).
    pub fn gas_price_ceiling(&self) -> U256 {
        self.state.read().gas_price_ceiling
    }

    /// Update the gas-price ceiling.
    pub fn set_gas_price_ceiling(&self, ceiling: U256) {
        self.state.write().gas_price_ceiling = ceiling;
    }

    /// Signature threshold of the custody contract.
    pub fn threshold(&self) -> usize {
        self.state.read().threshold
    }

    /// Update the signature threshold.
    pub fn set_threshold(&self, threshold: usize) {
        self.state.write().threshold = threshold;
    }
}

/// External chain id -> docking node.
#[derive(Default)]
pub struct DockingRegistry {
    nodes: RwLock<BTreeMap<ExternalChainId, Arc<BridgeDockingNode>>>,
}

impl DockingRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the node for its chain.
    pub fn register(&self, node: Arc<BridgeDockingNode>) {
        let chain_id = node.context().chain_id();
        self.nodes.write().insert(chain_id, node);
        info!(chain_id, "[qc-15] Registered docking node");
    }

    /// Node for `chain_id`.
    pub fn get(&self, chain_id: ExternalChainId) -> DockingResult<Arc<BridgeDockingNode>> {
        self.nodes
            .read()
            .get(&chain_id)
            .cloned()
            .ok_or(DockingError::UnknownChain(chain_id))
    }

    /// Registered chain ids, ascending.
    pub fn chain_ids(&self) -> Vec<ExternalChainId> {
        self.nodes.read().keys().copied().collect()
    }

    /// All registered nodes.
    pub fn nodes(&self) -> Vec<Arc<BridgeDockingNode>> {
        self.nodes.read().values().cloned().collect()
    }
}
