//! # Bridge Docking Node
//!
//! Wires coordinator, listener, tracker and stores for one external chain
//! and exposes them through [`BridgeDockingApi`].

use super::asset_registry::AssetRegistry;
use super::block_window::LocalBlockWindow;
use super::context::ChainContext;
use super::coordinator::{CoordinatorDeps, DockingCoordinator};
use super::listener::{ChainListener, ListenerDeps, PollReport, TxAnalysis};
use super::pending_book::PendingBook;
use super::resend::ResendManager;
use super::tracker::ConfirmationTracker;
use crate::config::DockingConfig;
use crate::domain::{
    Address, AssetRegistration, DockingError, DockingOutcome, DockingResult, ExternalAssetBinding,
    TxHash,
};
use crate::ports::inbound::BridgeDockingApi;
use crate::ports::outbound::{
    AssetStore, BlockHeaderStore, ExternalChainRpc, HomeChainCallback, PendingTxStore,
    SignerSetProvider, TxRelationStore, TxSigner,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use primitive_types::U256;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// External collaborators of a docking node.
pub struct DockingCollaborators {
    /// External chain client.
    pub rpc: Arc<dyn ExternalChainRpc>,
    /// Local administrator key.
    pub signer: Arc<dyn TxSigner>,
    /// Home-chain signer bank.
    pub signer_set: Arc<dyn SignerSetProvider>,
    /// Home-chain confirmation sink.
    pub callback: Arc<dyn HomeChainCallback>,
    /// Pending record storage.
    pub pending_store: Arc<dyn PendingTxStore>,
    /// Asset binding storage.
    pub asset_store: Arc<dyn AssetStore>,
    /// Local block window storage.
    pub header_store: Arc<dyn BlockHeaderStore>,
    /// Sent-hash relation storage.
    pub relation_store: Arc<dyn TxRelationStore>,
}

/// Docking node for one external chain.
pub struct BridgeDockingNode {
    ctx: Arc<ChainContext>,
    config: DockingConfig,
    pending: Arc<PendingBook>,
    resend: Arc<ResendManager>,
    assets: Arc<AssetRegistry>,
    tracker: Arc<ConfirmationTracker>,
    coordinator: Arc<DockingCoordinator>,
    listener: Arc<ChainListener>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl BridgeDockingNode {
    /// Wire a node. Fails on invalid configuration or when the signer key
    /// does not belong to the context's administrator address.
    pub fn new(
        ctx: Arc<ChainContext>,
        config: DockingConfig,
        deps: DockingCollaborators,
    ) -> DockingResult<Self> {
        config.validate()?;
        if deps.signer.address() != ctx.signer() {
            return Err(DockingError::validation(format!(
                "signer key {:?} does not match administrator {:?}",
                deps.signer.address(),
                ctx.signer()
            )));
        }

        if !config.gas_price_ceiling.is_zero() {
            ctx.set_gas_price_ceiling(config.gas_price_ceiling);
        }

        let cancel = CancellationToken::new();
        let pending = Arc::new(PendingBook::new(deps.pending_store, config.rollback_window));
        let resend = Arc::new(ResendManager::new(config.resend_ceiling, deps.relation_store));
        let assets = Arc::new(AssetRegistry::new(ctx.clone(), deps.asset_store));
        let tracker = Arc::new(ConfirmationTracker::new(
            deps.rpc.clone(),
            pending.clone(),
            resend.clone(),
        ));
        let coordinator = Arc::new(DockingCoordinator::new(
            ctx.clone(),
            config.clone(),
            CoordinatorDeps {
                rpc: deps.rpc.clone(),
                signer: deps.signer,
                signer_set: deps.signer_set,
                callback: deps.callback.clone(),
                pending: pending.clone(),
                resend: resend.clone(),
                assets: assets.clone(),
                tracker: tracker.clone(),
            },
            cancel.child_token(),
        ));
        let listener = Arc::new(ChainListener::new(
            ctx.clone(),
            config.clone(),
            ListenerDeps {
                rpc: deps.rpc,
                callback: deps.callback,
                pending: pending.clone(),
                assets: assets.clone(),
                window: LocalBlockWindow::new(deps.header_store, config.block_window_depth),
                tracker: tracker.clone(),
                coordinator: coordinator.clone(),
            },
        ));

        info!(
            chain_id = ctx.chain_id(),
            "[qc-15] Docking node ready, custody {:?}",
            ctx.custody()
        );
        Ok(Self {
            ctx,
            config,
            pending,
            resend,
            assets,
            tracker,
            coordinator,
            listener,
            cancel,
            task: Mutex::new(None),
        })
    }

    /// Per-chain context.
    pub fn context(&self) -> &Arc<ChainContext> {
        &self.ctx
    }

    /// Node configuration.
    pub fn config(&self) -> &DockingConfig {
        &self.config
    }

    /// Pending records.
    pub fn pending(&self) -> &Arc<PendingBook> {
        &self.pending
    }

    /// Confirmation tracker.
    pub fn tracker(&self) -> &Arc<ConfirmationTracker> {
        &self.tracker
    }

    /// Broadcast coordinator.
    pub fn coordinator(&self) -> &Arc<DockingCoordinator> {
        &self.coordinator
    }

    /// Register a batch of external tokens atomically.
    pub fn register_assets(
        &self,
        batch: &[AssetRegistration],
    ) -> DockingResult<Vec<ExternalAssetBinding>> {
        self.assets.register(batch)
    }

    /// Asset registry.
    pub fn assets(&self) -> &Arc<AssetRegistry> {
        &self.assets
    }

    /// One listener pass.
    pub async fn poll_once(&self) -> DockingResult<PollReport> {
        self.listener.poll_once().await
    }

    /// Re-run analysis for one mined transaction.
    pub async fn reanalyze_tx(&self, hash: TxHash) -> DockingResult<TxAnalysis> {
        self.listener.reanalyze_tx(hash).await
    }

    /// Purge tombstones whose rollback window elapsed at `current_height`.
    pub fn purge_expired(&self, current_height: u64) -> DockingResult<usize> {
        self.pending.purge_expired(current_height)
    }

    /// Start the background polling loop. No-op if already running.
    pub fn spawn(self: &Arc<Self>) {
        let mut task = self.task.lock();
        if task.is_some() {
            return;
        }
        let node = Arc::clone(self);
        let cancel = self.cancel.child_token();
        *task = Some(tokio::spawn(async move {
            node.listener.run(cancel).await;
        }));
    }

    /// Cancel pending turn waits and stop the polling loop.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(chain_id = self.ctx.chain_id(), "[qc-15] Listener task ended abnormally: {}", e);
            }
        }
        info!(chain_id = self.ctx.chain_id(), "[qc-15] Docking node stopped");
    }
}

#[async_trait]
impl BridgeDockingApi for BridgeDockingNode {
    async fn create_or_sign_withdraw(
        &self,
        internal_id: &str,
        to: Address,
        amount: U256,
        asset_id: u32,
    ) -> DockingResult<DockingOutcome> {
        self.coordinator
            .create_or_sign_withdraw(internal_id, to, amount, asset_id)
            .await
    }

    async fn create_or_sign_manager_change(
        &self,
        internal_id: &str,
        adds: Vec<Address>,
        removes: Vec<Address>,
        expected_count: u8,
    ) -> DockingResult<DockingOutcome> {
        self.coordinator
            .create_or_sign_manager_change(internal_id, adds, removes, expected_count)
            .await
    }

    async fn create_or_sign_upgrade(&self, internal_id: &str) -> DockingResult<DockingOutcome> {
        self.coordinator.create_or_sign_upgrade(internal_id).await
    }

    async fn force_recovery(
        &self,
        internal_id: &str,
        seed_managers: Vec<Address>,
        all_managers: Vec<Address>,
    ) -> DockingResult<DockingOutcome> {
        self.coordinator
            .force_recovery(internal_id, seed_managers, all_managers)
            .await
    }

    async fn tx_confirmed_completed(
        &self,
        hash: TxHash,
        height: u64,
        internal_id: Option<&str>,
        remark: Option<&str>,
    ) -> DockingResult<()> {
        let record = self.pending.get(&hash)?;
        let internal_id = internal_id
            .map(str::to_string)
            .or_else(|| record.as_ref().and_then(|r| r.internal_id.clone()));

        let mut tombstoned = usize::from(self.pending.tombstone(&hash, height)?);
        self.tracker.untrack(&hash);
        self.resend.forget(&hash)?;

        if let Some(id) = &internal_id {
            for sibling in self.pending.by_internal_id(id)? {
                if sibling.tombstoned {
                    continue;
                }
                if self.pending.tombstone(&sibling.hash, height)? {
                    tombstoned += 1;
                }
                self.tracker.untrack(&sibling.hash);
                self.resend.forget(&sibling.hash)?;
            }
            self.resend.clear(id);
        }

        if tombstoned == 0 {
            debug!("[qc-15] Confirmation for unknown {:?}", hash);
        }
        info!(
            chain_id = self.ctx.chain_id(),
            "[qc-15] Confirmed {:?} ({:?}) at {}: {} records tombstoned{}",
            hash,
            internal_id,
            height,
            tombstoned,
            remark.map(|r| format!(", {}", r)).unwrap_or_default()
        );
        Ok(())
    }

    async fn tx_confirmed_rollback(&self, hash: TxHash) -> DockingResult<bool> {
        let Some(record) = self.pending.get(&hash)? else {
            warn!("[qc-15] Rollback for {:?} arrived after purge", hash);
            return Ok(false);
        };
        let Some(height) = record.tombstone_height else {
            return Ok(false);
        };
        if let Some(latest) = self.listener.latest_height()? {
            if record.is_purgeable(latest, self.config.rollback_window) {
                warn!(
                    "[qc-15] Rollback for {:?} refused: tombstoned at {}, window closed at {}",
                    hash,
                    height,
                    height.saturating_add(self.config.rollback_window)
                );
                return Ok(false);
            }
        }

        let restored = self.pending.restore(&hash)?;
        if let Some(id) = &record.internal_id {
            for sibling in self.pending.by_internal_id(id)? {
                if sibling.hash != hash && sibling.tombstone_height == Some(height) {
                    self.pending.restore(&sibling.hash)?;
                }
            }
        }
        Ok(restored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{
        InMemoryAssetStore, InMemoryBlockHeaderStore, InMemoryPendingStore,
        InMemoryTxRelationStore, MockExternalChain, MockSigner, RecordingCallback,
        StaticSignerSet,
    };

    fn addr(b: u8) -> Address {
        Address::repeat_byte(b)
    }

    fn create_test_node(key: u8) -> DockingResult<(Arc<MockExternalChain>, BridgeDockingNode)> {
        let managers = vec![addr(1), addr(2), addr(3)];
        let chain = Arc::new(MockExternalChain::new(addr(0xCC), managers.clone(), 2));
        let ctx = Arc::new(ChainContext::new(101, addr(1), addr(0xCC), 1, 2));
        let node = BridgeDockingNode::new(
            ctx,
            DockingConfig::for_testing(),
            DockingCollaborators {
                rpc: chain.clone(),
                signer: Arc::new(MockSigner::new(addr(key))),
                signer_set: Arc::new(StaticSignerSet::new(managers)),
                callback: Arc::new(RecordingCallback::new()),
                pending_store: Arc::new(InMemoryPendingStore::new()),
                asset_store: Arc::new(InMemoryAssetStore::with_max_asset_id(1)),
                header_store: Arc::new(InMemoryBlockHeaderStore::new()),
                relation_store: Arc::new(InMemoryTxRelationStore::new()),
            },
        )?;
        Ok((chain, node))
    }

    #[test]
    fn test_signer_mismatch_rejected() {
        assert!(matches!(
            create_test_node(9),
            Err(DockingError::Validation(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirm_and_rollback() {
        let (_chain, node) = create_test_node(1).unwrap();
        let hash = node
            .create_or_sign_upgrade("c3")
            .await
            .unwrap()
            .tx_hash()
            .unwrap();

        node.tx_confirmed_completed(hash, 40, Some("c3"), None)
            .await
            .unwrap();
        assert!(node.pending().get(&hash).unwrap().unwrap().tombstoned);
        assert!(!node.tracker().is_tracked(&hash));

        assert!(node.tx_confirmed_rollback(hash).await.unwrap());
        assert!(node.pending().get(&hash).unwrap().unwrap().is_active());
        assert!(!node.tx_confirmed_rollback(hash).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rollback_refused_after_window() {
        let (chain, node) = create_test_node(1).unwrap();
        let hash = node
            .create_or_sign_upgrade("c3")
            .await
            .unwrap()
            .tx_hash()
            .unwrap();
        chain.mine_empty_blocks(10);
        node.poll_once().await.unwrap();
        let latest = node.listener.latest_height().unwrap().unwrap();

        // tombstoned exactly one window below the local tip
        let height = latest - node.config().rollback_window;
        node.tx_confirmed_completed(hash, height, Some("c3"), None)
            .await
            .unwrap();

        assert!(!node.tx_confirmed_rollback(hash).await.unwrap());
        assert!(node.pending().get(&hash).unwrap().unwrap().tombstoned);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawn_and_shutdown() {
        let (_chain, node) = create_test_node(1).unwrap();
        let node = Arc::new(node);
        node.spawn();
        tokio::time::sleep(node.config().poll_interval() * 3).await;
        node.shutdown().await;
        assert!(node.pending().list_active().unwrap().is_empty());
    }
}
