//! # Chain Listener
//!
//! Walks confirmed external blocks, classifies every transaction and turns
//! custody activity into pending-record updates and home-chain
//! confirmations.
//!
//! ```text
//! tip - confirmations ─► get_block ─► continuity ─► analyze txs ─► record header
//!                                         │
//!                                         └─ reorg: drop headers, re-walk
//! ```

use super::asset_registry::AssetRegistry;
use super::block_window::{Continuity, LocalBlockWindow};
use super::classifier::{BroadcastTx, ParsedTx, TxClassifier};
use super::context::ChainContext;
use super::coordinator::{DockingCoordinator, DockingRequest};
use super::pending_book::PendingBook;
use super::tracker::{ConfirmationTracker, TrackerEvent};
use crate::config::DockingConfig;
use crate::domain::{
    invariant_threshold_reached, AssetDescriptor, BridgeTxType, ConfirmedTx, CustodyCall,
    DockingError, DockingResult, ExternalTransaction, PendingBridgeTx, PendingStatus,
    RecoveryPhase, TransferInfo, TxHash, TxOrigin, TxReceipt,
};
use crate::ports::outbound::{ExternalChainRpc, HomeChainCallback};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Summary of one listener pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PollReport {
    /// Blocks analyzed.
    pub blocks: usize,
    /// Reorgs detected.
    pub reorgs: usize,
    /// Tracker activity.
    pub tracker_events: Vec<TrackerEvent>,
    /// Tombstoned records physically removed.
    pub purged: usize,
}

/// What analyzing one transaction produced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TxAnalysis {
    /// Not bridge related, or already settled.
    Ignored,
    /// Deposit reported to the home chain.
    Deposit(TxHash),
    /// Custody broadcast now in the given status.
    Broadcast(TxHash, PendingStatus),
}

/// Collaborators of the listener.
pub struct ListenerDeps {
    /// External chain client.
    pub rpc: Arc<dyn ExternalChainRpc>,
    /// Home-chain confirmation sink.
    pub callback: Arc<dyn HomeChainCallback>,
    /// Pending records.
    pub pending: Arc<PendingBook>,
    /// Asset registry.
    pub assets: Arc<AssetRegistry>,
    /// Local header window.
    pub window: LocalBlockWindow,
    /// Receipt follower.
    pub tracker: Arc<ConfirmationTracker>,
    /// Coordinator used for resends.
    pub coordinator: Arc<DockingCoordinator>,
}

/// Block listener for one external chain.
pub struct ChainListener {
    ctx: Arc<ChainContext>,
    config: DockingConfig,
    classifier: TxClassifier,
    deps: ListenerDeps,
    // serializes block walks with manual re-analysis
    analysis: tokio::sync::Mutex<()>,
}

impl ChainListener {
    /// Create a listener.
    pub fn new(ctx: Arc<ChainContext>, config: DockingConfig, deps: ListenerDeps) -> Self {
        let classifier = TxClassifier::new(ctx.clone(), deps.assets.clone());
        Self {
            ctx,
            config,
            classifier,
            deps,
            analysis: tokio::sync::Mutex::new(()),
        }
    }

    /// Process every newly confirmed block, then tick the tracker and purge
    /// expired tombstones.
    pub async fn poll_once(&self) -> DockingResult<PollReport> {
        let walk = self.analysis.lock().await;
        let mut report = PollReport::default();

        let tip = self.deps.rpc.block_number().await?;
        let target = tip.saturating_sub(self.config.confirmations);
        let next = match self.deps.window.latest()? {
            Some(latest) => latest.height + 1,
            None => self.config.start_height.unwrap_or(target),
        };

        for height in next..=target {
            let Some(block) = self.deps.rpc.get_block(height).await? else {
                break;
            };
            let header = block.header();
            if let Continuity::Reorg { orphaned_height } =
                self.deps.window.check_continuity(&header)?
            {
                warn!(
                    chain_id = self.ctx.chain_id(),
                    "[qc-15] Reorg detected at {}, re-walking from {}", height, orphaned_height
                );
                self.deps.window.rollback_to_below(orphaned_height)?;
                report.reorgs += 1;
                break;
            }

            for tx in &block.transactions {
                let receipt = self.deps.rpc.get_receipt(tx.hash).await?;
                match self
                    .analyze_tx(tx, receipt.as_ref(), block.height, block.timestamp)
                    .await
                {
                    Ok(_) => {}
                    Err(e @ (DockingError::Decode(_) | DockingError::Validation(_))) => {
                        warn!("[qc-15] Skipping malformed tx {:?}: {}", tx.hash, e);
                    }
                    Err(e) => return Err(e),
                }
            }
            self.deps.window.record(header)?;
            report.blocks += 1;
        }
        drop(walk);

        report.tracker_events = self.deps.tracker.tick(&self.deps.coordinator).await?;
        report.purged = self.deps.pending.purge_expired(target)?;
        if report.blocks > 0 || report.reorgs > 0 {
            debug!(
                "[qc-15] Poll: {} blocks, {} reorgs, {} tracker events, {} purged",
                report.blocks,
                report.reorgs,
                report.tracker_events.len(),
                report.purged
            );
        }
        Ok(report)
    }

    /// Height of the highest header in the local window.
    pub fn latest_height(&self) -> DockingResult<Option<u64>> {
        Ok(self.deps.window.latest()?.map(|h| h.height))
    }

    /// Re-run analysis for one mined transaction.
    pub async fn reanalyze_tx(&self, hash: TxHash) -> DockingResult<TxAnalysis> {
        let _walk = self.analysis.lock().await;
        let tx = self
            .deps
            .rpc
            .get_transaction(hash)
            .await?
            .ok_or_else(|| DockingError::validation(format!("transaction {:?} not found", hash)))?;
        let height = tx.block_number.ok_or_else(|| {
            DockingError::validation(format!("transaction {:?} not mined yet", hash))
        })?;
        let time = self
            .deps
            .rpc
            .get_block(height)
            .await?
            .map(|b| b.timestamp)
            .unwrap_or_default();
        let receipt = self.deps.rpc.get_receipt(hash).await?;
        info!("[qc-15] Re-analyzing {:?} at height {}", hash, height);
        self.analyze_tx(&tx, receipt.as_ref(), height, time).await
    }

    /// Poll until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.poll_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(chain_id = self.ctx.chain_id(), "[qc-15] Listener started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = self.poll_once().await {
                        warn!(chain_id = self.ctx.chain_id(), "[qc-15] Poll failed: {}", e);
                    }
                }
            }
        }
        info!(chain_id = self.ctx.chain_id(), "[qc-15] Listener stopped");
    }

    async fn analyze_tx(
        &self,
        tx: &ExternalTransaction,
        receipt: Option<&TxReceipt>,
        height: u64,
        time: u64,
    ) -> DockingResult<TxAnalysis> {
        let Some(parsed) = self.classifier.parse(tx, receipt)? else {
            return Ok(TxAnalysis::Ignored);
        };
        let existing = self.deps.pending.get(&tx.hash)?;
        if existing.as_ref().is_some_and(|r| r.tombstoned) {
            debug!("[qc-15] {:?} already confirmed, ignoring", tx.hash);
            return Ok(TxAnalysis::Ignored);
        }

        match parsed {
            ParsedTx::Deposit(info) => {
                if existing.is_some() {
                    return Ok(TxAnalysis::Ignored);
                }
                self.on_deposit(tx.hash, info, height, time).await
            }
            ParsedTx::Broadcast(broadcast) => {
                self.on_broadcast(tx, broadcast, existing, height, time)
                    .await
            }
        }
    }

    async fn on_deposit(
        &self,
        hash: TxHash,
        info: TransferInfo,
        height: u64,
        time: u64,
    ) -> DockingResult<TxAnalysis> {
        info!(
            "[qc-15] Deposit {:?}: {} of asset {} from {:?}",
            hash, info.amount, info.asset.asset_id, info.from
        );
        self.deps
            .callback
            .tx_confirmed(ConfirmedTx {
                tx_type: BridgeTxType::Deposit,
                internal_id: None,
                external_hash: Some(hash),
                height,
                time,
                custody: info.to,
                signers: Vec::new(),
                remark: None,
                transfer: Some(info.clone()),
            })
            .await?;

        let record = PendingBridgeTx::new(hash, BridgeTxType::Deposit, TxOrigin::Observed)
            .with_parties(info.from, info.to)
            .with_transfer(info.asset, info.amount)
            .with_block(height, time)
            .with_status(PendingStatus::Completed);
        self.deps.pending.put(record)?;
        Ok(TxAnalysis::Deposit(hash))
    }

    async fn on_broadcast(
        &self,
        tx: &ExternalTransaction,
        broadcast: BroadcastTx,
        existing: Option<PendingBridgeTx>,
        height: u64,
        time: u64,
    ) -> DockingResult<TxAnalysis> {
        let custody = tx.to.unwrap_or_default();
        let previous = existing.as_ref().map(|r| r.status);
        let mut record = match existing {
            Some(record) => record,
            None => self
                .observed_request(&broadcast)?
                .record(tx.hash, TxOrigin::Observed, tx.from, custody),
        };

        let observed = match (&broadcast.completed_signers, broadcast.succeeded) {
            (_, false) => PendingStatus::Failed,
            (Some(signers), true)
                if invariant_threshold_reached(signers, self.ctx.threshold()) =>
            {
                PendingStatus::Completed
            }
            (Some(signers), true) => {
                warn!(
                    "[qc-15] {} completed with {} signers, threshold is {}",
                    broadcast.internal_id,
                    signers.len(),
                    self.ctx.threshold()
                );
                PendingStatus::Doing
            }
            (None, true) => PendingStatus::Doing,
        };
        if record.status.can_transition_to(observed) {
            record.status = observed;
        } else {
            debug!(
                "[qc-15] Keeping {:?} in {:?}, observed {:?}",
                tx.hash, record.status, observed
            );
        }
        record = record.with_block(height, time);
        if let Some(signers) = &broadcast.completed_signers {
            record.signers = signers.clone();
        }

        let newly_completed =
            record.status == PendingStatus::Completed && previous != Some(PendingStatus::Completed);
        let purge_phase = matches!(
            RecoveryPhase::parse_key(broadcast.call.tx_key()),
            Some((_, RecoveryPhase::Purge))
        );
        if newly_completed && !purge_phase {
            info!(
                "[qc-15] {} {} completed in {:?}",
                broadcast.tx_type, broadcast.internal_id, tx.hash
            );
            let transfer = match (&broadcast.call, &record.asset) {
                (CustodyCall::Withdraw(call), Some(asset)) => Some(TransferInfo {
                    from: custody,
                    to: call.to,
                    amount: call.amount,
                    asset: asset.clone(),
                }),
                _ => None,
            };
            self.deps
                .callback
                .tx_confirmed(ConfirmedTx {
                    tx_type: broadcast.tx_type,
                    internal_id: Some(broadcast.internal_id.clone()),
                    external_hash: Some(tx.hash),
                    height,
                    time,
                    custody,
                    signers: record.signers.clone(),
                    remark: None,
                    transfer,
                })
                .await?;
        }

        let status = record.status;
        self.deps.pending.put(record)?;
        Ok(TxAnalysis::Broadcast(tx.hash, status))
    }

    fn observed_request(&self, broadcast: &BroadcastTx) -> DockingResult<DockingRequest> {
        let asset = match &broadcast.call {
            CustodyCall::Withdraw(call) => match call.erc20 {
                Some(contract) => self.deps.assets.load_by_contract(&contract)?,
                None => Some(AssetDescriptor::native(
                    self.ctx.chain_id(),
                    self.ctx.native_asset_id(),
                )),
            },
            _ => None,
        };
        Ok(DockingRequest {
            internal_id: broadcast.internal_id.clone(),
            tx_type: broadcast.tx_type,
            call: broadcast.call.clone(),
            asset,
        })
    }
}
