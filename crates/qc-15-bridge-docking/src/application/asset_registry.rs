//! # Asset Registry
//!
//! Maps external contract addresses to internal asset ids and decimals.
//! Batch registration assigns contiguous ids and never leaves a partial
//! batch behind.

use super::context::ChainContext;
use crate::domain::{
    Address, AssetDescriptor, AssetRegistration, DockingError, DockingResult,
    ExternalAssetBinding,
};
use crate::ports::outbound::AssetStore;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{error, info};

/// Asset registry for one external chain.
pub struct AssetRegistry {
    ctx: Arc<ChainContext>,
    store: Arc<dyn AssetStore>,
    register_lock: Mutex<()>,
}

impl AssetRegistry {
    /// Create a registry over `store`.
    pub fn new(ctx: Arc<ChainContext>, store: Arc<dyn AssetStore>) -> Self {
        Self {
            ctx,
            store,
            register_lock: Mutex::new(()),
        }
    }

    /// Check if `contract` is a registered token.
    pub fn is_token(&self, contract: &Address) -> DockingResult<bool> {
        Ok(self.store.get_by_contract(contract)?.is_some())
    }

    /// Descriptor for an internal asset id (native or token).
    pub fn load_asset(&self, asset_id: u32) -> DockingResult<AssetDescriptor> {
        if asset_id == self.ctx.native_asset_id() {
            return Ok(AssetDescriptor::native(self.ctx.chain_id(), asset_id));
        }
        self.store
            .get_by_id(asset_id)?
            .map(|binding| self.descriptor(&binding))
            .ok_or_else(|| DockingError::validation(format!("unknown asset id {}", asset_id)))
    }

    /// Descriptor for a token contract, `None` if unregistered.
    pub fn load_by_contract(&self, contract: &Address) -> DockingResult<Option<AssetDescriptor>> {
        Ok(self
            .store
            .get_by_contract(contract)?
            .map(|binding| self.descriptor(&binding)))
    }

    fn descriptor(&self, binding: &ExternalAssetBinding) -> AssetDescriptor {
        AssetDescriptor {
            chain_id: self.ctx.chain_id(),
            asset_id: binding.asset_id,
            decimals: binding.decimals,
            contract: Some(binding.contract),
        }
    }

    /// Register a batch of tokens under contiguous ids after the current
    /// maximum. On failure every binding inserted by this batch is deleted
    /// and the counter is left untouched.
    pub fn register(
        &self,
        batch: &[AssetRegistration],
    ) -> DockingResult<Vec<ExternalAssetBinding>> {
        let _guard = self.register_lock.lock();

        let mut seen = HashSet::with_capacity(batch.len());
        for item in batch {
            if item.contract.is_zero() {
                return Err(DockingError::validation("asset contract is zero"));
            }
            if !seen.insert(item.contract) || self.store.get_by_contract(&item.contract)?.is_some()
            {
                return Err(DockingError::validation(format!(
                    "asset {:?} already registered",
                    item.contract
                )));
            }
        }

        let base = self.store.max_asset_id()?;
        let mut inserted: Vec<ExternalAssetBinding> = Vec::with_capacity(batch.len());
        for (offset, item) in batch.iter().enumerate() {
            let binding = ExternalAssetBinding {
                contract: item.contract,
                asset_id: base + 1 + offset as u32,
                symbol: item.symbol.clone(),
                decimals: item.decimals,
            };
            if let Err(e) = self.store.put(binding.clone()) {
                error!(
                    chain_id = self.ctx.chain_id(),
                    "[qc-15] Asset registration failed at item {}: {}; rolling back {}",
                    offset + 1,
                    e,
                    inserted.len()
                );
                self.compensate(&inserted);
                return Err(e);
            }
            inserted.push(binding);
        }

        let last = base + batch.len() as u32;
        if let Err(e) = self.store.set_max_asset_id(last) {
            self.compensate(&inserted);
            return Err(e);
        }

        info!(
            chain_id = self.ctx.chain_id(),
            "[qc-15] Registered {} assets, ids {}..={}",
            inserted.len(),
            base + 1,
            last
        );
        Ok(inserted)
    }

    fn compensate(&self, inserted: &[ExternalAssetBinding]) {
        for binding in inserted.iter().rev() {
            if let Err(e) = self.store.delete(&binding.contract) {
                error!(
                    "[qc-15] Compensating delete failed for {:?}: {}",
                    binding.contract, e
                );
            }
        }
    }
}
