//! # Multi-Sig Broadcast Coordinator
//!
//! Leaderless submission protocol. Every signer computes the same turn
//! order, sleeps until its turn, asks the custody contract whether the
//! action already completed, checks any pending on-chain proposal against
//! its own intent, dry-runs the call and only then broadcasts its co-sign.
//!
//! ```text
//! INIT → WAITING_TURN → CHECKING_COMPLETION → ALREADY_COMPLETE
//!                                           → SUBMITTING → SUBMITTED
//! ```
//!
//! Post-submission states (`CONFIRMED`, `FAILED`, `RESEND_ELIGIBLE`,
//! `FAILED_TERMINAL`) are driven by the confirmation tracker.

use super::asset_registry::AssetRegistry;
use super::context::ChainContext;
use super::pending_book::PendingBook;
use super::resend::ResendManager;
use super::tracker::ConfirmationTracker;
use crate::algorithms::{
    apply_gas_policy, compute_order, gas_price_above_ceiling, plan_recovery,
    validate_recovery_sets, RecoveryStep, SignerOrder,
};
use crate::config::DockingConfig;
use crate::domain::contract::{self, custody};
use crate::domain::{
    invariant_no_duplicate_addresses, invariant_not_self_removal, invariant_valid_internal_id,
    invariant_valid_withdraw, Address, AssetDescriptor, BridgeTxType, ConfirmedTx,
    ContractFunction, CoordinatorState, CustodyCall, DockingError, DockingOutcome, DockingResult,
    ManagerChangeCall, PendingBridgeTx, PendingManagerChange, PendingWithdraw, RecoveryPhase,
    SkipReason, TxHash, TxOrigin, UnsignedTx, UpgradeCall, WithdrawCall, DUPLICATE_SIGNATURES,
};
use crate::ports::outbound::{
    CallOutcome, ExternalChainRpc, HomeChainCallback, SignerSetProvider, TxSigner,
};
use parking_lot::Mutex;
use primitive_types::U256;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// One custody action, either requested locally or observed on-chain.
#[derive(Clone, Debug)]
pub(crate) struct DockingRequest {
    pub(crate) internal_id: String,
    pub(crate) tx_type: BridgeTxType,
    pub(crate) call: CustodyCall,
    pub(crate) asset: Option<AssetDescriptor>,
}

impl DockingRequest {
    fn tx_key(&self) -> &str {
        self.call.tx_key()
    }

    /// Pending record for this action sent as `hash`.
    pub(crate) fn record(
        &self,
        hash: TxHash,
        origin: TxOrigin,
        from: Address,
        custody: Address,
    ) -> PendingBridgeTx {
        let record = PendingBridgeTx::new(hash, self.tx_type, origin)
            .with_internal_id(&self.internal_id, self.tx_key());
        match &self.call {
            CustodyCall::Withdraw(call) => {
                let record = record.with_parties(from, call.to);
                match &self.asset {
                    Some(asset) => record.with_transfer(asset.clone(), call.amount),
                    None => record,
                }
            }
            CustodyCall::ManagerChange(call) => record
                .with_parties(from, custody)
                .with_manager_change(call.adds.clone(), call.removes.clone(), call.count),
            CustodyCall::Upgrade(_) => record.with_parties(from, custody),
        }
    }
}

/// Proposal already pending on-chain.
enum OnChainProposal {
    Withdraw(PendingWithdraw),
    ManagerChange(PendingManagerChange),
}

struct InFlightGuard<'a> {
    set: &'a Mutex<HashSet<(BridgeTxType, String)>>,
    key: (BridgeTxType, String),
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.set.lock().remove(&self.key);
    }
}

fn same_members(a: &[Address], b: &[Address]) -> bool {
    a.len() == b.len() && a.iter().collect::<HashSet<_>>() == b.iter().collect::<HashSet<_>>()
}

/// Collaborators of the coordinator.
pub struct CoordinatorDeps {
    /// External chain client.
    pub rpc: Arc<dyn ExternalChainRpc>,
    /// Local administrator key.
    pub signer: Arc<dyn TxSigner>,
    /// Home-chain signer bank.
    pub signer_set: Arc<dyn SignerSetProvider>,
    /// Home-chain confirmation sink.
    pub callback: Arc<dyn HomeChainCallback>,
    /// Pending records.
    pub pending: Arc<PendingBook>,
    /// Resend counters and relation table.
    pub resend: Arc<ResendManager>,
    /// Asset registry.
    pub assets: Arc<AssetRegistry>,
    /// Confirmation tracker for submitted hashes.
    pub tracker: Arc<ConfirmationTracker>,
}

/// Multi-sig broadcast coordinator for one external chain.
pub struct DockingCoordinator {
    ctx: Arc<ChainContext>,
    config: DockingConfig,
    deps: CoordinatorDeps,
    in_flight: Mutex<HashSet<(BridgeTxType, String)>>,
    cancel: CancellationToken,
}

impl DockingCoordinator {
    /// Create a coordinator.
    pub fn new(
        ctx: Arc<ChainContext>,
        config: DockingConfig,
        deps: CoordinatorDeps,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            ctx,
            config,
            deps,
            in_flight: Mutex::new(HashSet::new()),
            cancel,
        }
    }

    // =========================================================================
    // Inbound operations
    // =========================================================================

    /// Create or co-sign a withdrawal.
    pub async fn create_or_sign_withdraw(
        &self,
        internal_id: &str,
        to: Address,
        amount: U256,
        asset_id: u32,
    ) -> DockingResult<DockingOutcome> {
        invariant_valid_internal_id(internal_id)?;
        invariant_valid_withdraw(&to, amount.is_zero())?;
        let asset = self.deps.assets.load_asset(asset_id)?;

        let request = DockingRequest {
            internal_id: internal_id.to_string(),
            tx_type: BridgeTxType::Withdraw,
            call: CustodyCall::Withdraw(WithdrawCall {
                tx_key: internal_id.to_string(),
                to,
                amount,
                erc20: asset.contract,
            }),
            asset: Some(asset),
        };
        self.dock(request, true).await
    }

    /// Create or co-sign an administrator change.
    pub async fn create_or_sign_manager_change(
        &self,
        internal_id: &str,
        adds: Vec<Address>,
        removes: Vec<Address>,
        expected_count: u8,
    ) -> DockingResult<DockingOutcome> {
        invariant_valid_internal_id(internal_id)?;
        invariant_no_duplicate_addresses(&adds, &removes)?;
        invariant_not_self_removal(&self.ctx.signer(), &removes)?;

        if adds.is_empty() && removes.is_empty() {
            info!(
                internal_id,
                "[qc-15] Manager change has nothing to add or remove, confirming"
            );
            self.confirm_without_call(BridgeTxType::ManagerChange, internal_id)
                .await?;
            return Ok(DockingOutcome::Skipped(SkipReason::NoChangeRequired));
        }
        if expected_count as usize != adds.len() + removes.len() {
            return Err(DockingError::validation(format!(
                "expected count {} but request has {} changes",
                expected_count,
                adds.len() + removes.len()
            )));
        }

        let request = manager_change_request(
            BridgeTxType::ManagerChange,
            internal_id,
            internal_id.to_string(),
            adds,
            removes,
        )?;
        self.dock(request, true).await
    }

    /// Create or co-sign an upgrade authorization.
    pub async fn create_or_sign_upgrade(&self, internal_id: &str) -> DockingResult<DockingOutcome> {
        invariant_valid_internal_id(internal_id)?;
        let request = DockingRequest {
            internal_id: internal_id.to_string(),
            tx_type: BridgeTxType::Upgrade,
            call: CustodyCall::Upgrade(UpgradeCall {
                tx_key: internal_id.to_string(),
            }),
            asset: None,
        };
        self.dock(request, true).await
    }

    /// Two-phase administrator-set recovery.
    ///
    /// Phase I purges on-chain administrators absent from `seed`; phase II
    /// restores administrators of `all` missing on-chain. Re-invoking picks
    /// up from whatever the contract currently holds.
    pub async fn force_recovery(
        &self,
        internal_id: &str,
        seed: Vec<Address>,
        all: Vec<Address>,
    ) -> DockingResult<DockingOutcome> {
        invariant_valid_internal_id(internal_id)?;
        validate_recovery_sets(&seed, &all)?;
        let Some(_guard) = self.try_acquire(BridgeTxType::Recovery, internal_id) else {
            return Ok(DockingOutcome::Skipped(SkipReason::InProgress));
        };

        let on_chain = self.all_managers().await?;
        let phase_one = match plan_recovery(&on_chain, &seed, &all) {
            RecoveryStep::Complete => return self.recovery_complete(internal_id, None).await,
            RecoveryStep::Restore(adds) => {
                return self.recovery_restore(internal_id, adds).await;
            }
            RecoveryStep::Purge(removes) => {
                info!(
                    internal_id,
                    "[qc-15] Recovery phase I: removing {} administrators",
                    removes.len()
                );
                invariant_not_self_removal(&self.ctx.signer(), &removes)?;
                let key = RecoveryPhase::Purge.tx_key(internal_id);
                let request = manager_change_request(
                    BridgeTxType::Recovery,
                    internal_id,
                    key.clone(),
                    Vec::new(),
                    removes,
                )?;
                let outcome = self.dock(request, true).await?;
                if !self.wait_for_completion(&key).await? {
                    info!(
                        internal_id,
                        "[qc-15] Recovery phase I not completed yet, phase II postponed"
                    );
                    return Ok(outcome);
                }
                outcome
            }
        };

        let on_chain = self.all_managers().await?;
        match plan_recovery(&on_chain, &seed, &all) {
            RecoveryStep::Restore(adds) => self.recovery_restore(internal_id, adds).await,
            RecoveryStep::Complete => self.recovery_complete(internal_id, Some(phase_one)).await,
            RecoveryStep::Purge(_) => {
                warn!(
                    internal_id,
                    "[qc-15] Recovery phase I completed but non-seed administrators remain"
                );
                Ok(phase_one)
            }
        }
    }

    /// Resubmit a failed locally originated record. Skips the turn wait but
    /// re-checks completion and the gas-price ceiling.
    pub async fn resubmit(&self, record: &PendingBridgeTx) -> DockingResult<DockingOutcome> {
        let internal_id = record
            .internal_id
            .clone()
            .ok_or_else(|| DockingError::validation("record has no internal id"))?;
        let tx_key = record.tx_key.clone().unwrap_or_else(|| internal_id.clone());

        let call = match record.tx_type {
            BridgeTxType::Withdraw => CustodyCall::Withdraw(WithdrawCall {
                tx_key,
                to: record.to,
                amount: record.amount,
                erc20: record.asset.as_ref().and_then(|a| a.contract),
            }),
            BridgeTxType::ManagerChange | BridgeTxType::Recovery => {
                CustodyCall::ManagerChange(ManagerChangeCall {
                    tx_key,
                    adds: record.adds.clone(),
                    removes: record.removes.clone(),
                    count: record.expected_count,
                })
            }
            BridgeTxType::Upgrade => CustodyCall::Upgrade(UpgradeCall { tx_key }),
            BridgeTxType::Deposit => {
                return Err(DockingError::validation("deposits are never resubmitted"));
            }
        };

        let request = DockingRequest {
            internal_id,
            tx_type: record.tx_type,
            call,
            asset: record.asset.clone(),
        };
        self.dock(request, false).await
    }

    // =========================================================================
    // Submission protocol
    // =========================================================================

    async fn dock(&self, request: DockingRequest, wait_turn: bool) -> DockingResult<DockingOutcome> {
        let span = info_span!(
            "docking",
            attempt = %Uuid::new_v4(),
            chain_id = self.ctx.chain_id(),
            internal_id = %request.internal_id,
            tx_type = %request.tx_type,
        );
        self.dock_inner(request, wait_turn).instrument(span).await
    }

    async fn dock_inner(
        &self,
        request: DockingRequest,
        wait_turn: bool,
    ) -> DockingResult<DockingOutcome> {
        let key = request.tx_key().to_string();
        let Some(_guard) = self.try_acquire(request.tx_type, &key) else {
            debug!("[qc-15] {} already in flight", key);
            return Ok(DockingOutcome::Skipped(SkipReason::InProgress));
        };
        if let Some(active) =
            self.deps
                .pending
                .active_local(&request.internal_id, &key, request.tx_type)?
        {
            debug!("[qc-15] Active local transaction {:?} for {}", active.hash, key);
            return Ok(DockingOutcome::Pending(active.hash));
        }

        let mut state = CoordinatorState::Init;

        if request.tx_type == BridgeTxType::Withdraw {
            let current = self.deps.rpc.gas_price().await?;
            let ceiling = self.ctx.gas_price_ceiling();
            if gas_price_above_ceiling(current, ceiling) {
                if self.is_completed(&key).await? {
                    return Ok(DockingOutcome::Skipped(SkipReason::AlreadyCompleted));
                }
                info!(
                    "[qc-15] Withdrawal {} deferred: gas price {} above ceiling {}",
                    key, current, ceiling
                );
                return Ok(DockingOutcome::Skipped(SkipReason::GasPriceAboveCeiling {
                    current,
                    ceiling,
                }));
            }
        }

        let order = self.local_order(&request.internal_id).await?;
        if wait_turn {
            state = advance(state, CoordinatorState::WaitingTurn)?;
            let wait = order.wait(self.config.turn_interval());
            debug!(
                "[qc-15] Signer order {} (seed {}), waiting {:?}",
                order.order, order.seed, wait
            );
            if !self.sleep_cancellable(wait).await {
                return Ok(DockingOutcome::Skipped(SkipReason::Cancelled));
            }
        }

        state = advance(state, CoordinatorState::CheckingCompletion)?;
        if self.is_completed(&key).await? {
            advance(state, CoordinatorState::AlreadyComplete)?;
            info!("[qc-15] {} already completed on-chain", key);
            return Ok(DockingOutcome::Skipped(SkipReason::AlreadyCompleted));
        }

        if !self.check_consistency(&request, &order).await? {
            return Ok(DockingOutcome::Skipped(SkipReason::Cancelled));
        }

        state = advance(state, CoordinatorState::Submitting)?;
        let from = self.ctx.signer();
        let custody = self.ctx.custody();
        let data = request.call.encode();

        let dry_run = self.deps.rpc.call(from, custody, &data).await?;
        if let CallOutcome::Revert(_) = &dry_run {
            let reason = dry_run.revert_reason();
            if reason.as_deref() == Some(DUPLICATE_SIGNATURES) {
                advance(state, CoordinatorState::AlreadyComplete)?;
                info!("[qc-15] {} already signed by this node", key);
                return Ok(DockingOutcome::Skipped(SkipReason::AlreadySigned));
            }
            return Err(DockingError::validation(format!(
                "dry-run of {} reverted: {}",
                key,
                reason.unwrap_or_else(|| "no reason".to_string())
            )));
        }

        let estimate = self.deps.rpc.estimate_gas(from, custody, &data).await?;
        let gas_limit = apply_gas_policy(request.tx_type, estimate, &self.config.gas)?;
        let gas_price = self.deps.rpc.gas_price().await?;
        let unsigned = UnsignedTx {
            from,
            to: custody,
            data,
            value: U256::zero(),
            gas_limit,
            gas_price,
        };
        let raw = self.deps.signer.sign(&unsigned)?;
        let hash = self.deps.rpc.send_raw_transaction(&raw).await?;
        advance(state, CoordinatorState::Submitted)?;

        self.deps
            .pending
            .put(request.record(hash, TxOrigin::Local, from, custody))?;
        self.deps.resend.record_sent(hash, &request.internal_id)?;
        self.deps.tracker.track(hash, &request.internal_id);
        info!(
            "[qc-15] Submitted {} co-sign for {}: {:?} (gas limit {})",
            request.tx_type, key, hash, gas_limit
        );
        Ok(DockingOutcome::Submitted(hash))
    }

    fn try_acquire(&self, tx_type: BridgeTxType, key: &str) -> Option<InFlightGuard<'_>> {
        let entry = (tx_type, key.to_string());
        if !self.in_flight.lock().insert(entry.clone()) {
            return None;
        }
        Some(InFlightGuard {
            set: &self.in_flight,
            key: entry,
        })
    }

    async fn local_order(&self, internal_id: &str) -> DockingResult<SignerOrder> {
        let signers = self.deps.signer_set.current_signers().await?;
        let me = self.ctx.signer();
        let index = signers.iter().position(|s| *s == me).ok_or_else(|| {
            DockingError::validation(format!("account {:?} is not in the signer set", me))
        })?;
        compute_order(signers.len(), index, internal_id)
    }

    async fn sleep_cancellable(&self, wait: Duration) -> bool {
        if wait.is_zero() {
            return !self.cancel.is_cancelled();
        }
        tokio::select! {
            _ = tokio::time::sleep(wait) => true,
            _ = self.cancel.cancelled() => false,
        }
    }

    /// Compare the pending on-chain proposal with the local intent. Returns
    /// `false` when cancelled during the re-check wait.
    async fn check_consistency(
        &self,
        request: &DockingRequest,
        order: &SignerOrder,
    ) -> DockingResult<bool> {
        if request.tx_type == BridgeTxType::Upgrade {
            return Ok(true);
        }

        let mut on_chain = self.pending_proposal(request).await?;
        if on_chain.is_none() && !order.is_first() {
            debug!(
                "[qc-15] No proposal visible for {} at order {}, re-checking once",
                request.tx_key(),
                order.order
            );
            if !self.sleep_cancellable(self.config.turn_interval()).await {
                return Ok(false);
            }
            on_chain = self.pending_proposal(request).await?;
        }

        let Some(proposal) = on_chain else {
            return Ok(true);
        };
        let mismatch = match (&request.call, &proposal) {
            (CustodyCall::Withdraw(mine), OnChainProposal::Withdraw(theirs)) => {
                if mine.to != theirs.to || mine.amount != theirs.amount || mine.erc20 != theirs.erc20
                {
                    Some(format!(
                        "withdraw on-chain ({:?}, {}, {:?}) local ({:?}, {}, {:?})",
                        theirs.to, theirs.amount, theirs.erc20, mine.to, mine.amount, mine.erc20
                    ))
                } else {
                    None
                }
            }
            (CustodyCall::ManagerChange(mine), OnChainProposal::ManagerChange(theirs)) => {
                if !same_members(&mine.adds, &theirs.adds)
                    || !same_members(&mine.removes, &theirs.removes)
                    || mine.count != theirs.count
                {
                    Some(format!(
                        "manager change on-chain (+{:?}, -{:?}, {}) local (+{:?}, -{:?}, {})",
                        theirs.adds, theirs.removes, theirs.count, mine.adds, mine.removes, mine.count
                    ))
                } else {
                    None
                }
            }
            _ => Some("on-chain proposal has a different kind".to_string()),
        };

        match mismatch {
            Some(detail) => {
                error!(
                    "[qc-15] CONSISTENCY VIOLATION for {}: {}",
                    request.internal_id, detail
                );
                Err(DockingError::ConsistencyViolation {
                    internal_id: request.internal_id.clone(),
                    detail,
                })
            }
            None => Ok(true),
        }
    }

    // =========================================================================
    // Custody contract views
    // =========================================================================

    async fn view(&self, data: &[u8]) -> DockingResult<Vec<u8>> {
        match self
            .deps
            .rpc
            .call(self.ctx.signer(), self.ctx.custody(), data)
            .await?
        {
            CallOutcome::Success(output) => Ok(output),
            revert => Err(DockingError::Rpc(format!(
                "custody view reverted: {}",
                revert.revert_reason().unwrap_or_default()
            ))),
        }
    }

    /// Ask the custody contract whether `tx_key` completed.
    pub async fn is_completed(&self, tx_key: &str) -> DockingResult<bool> {
        let output = self
            .view(&contract::encode_key_view(&custody::IS_COMPLETED_TX, tx_key))
            .await?;
        contract::decode_bool_return(&output)
    }

    /// Current on-chain administrator set.
    pub async fn all_managers(&self) -> DockingResult<Vec<Address>> {
        let output = self.view(&contract::encode_all_managers()).await?;
        contract::decode_managers_return(&output)
    }

    async fn pending_proposal(
        &self,
        request: &DockingRequest,
    ) -> DockingResult<Option<OnChainProposal>> {
        match &request.call {
            CustodyCall::Withdraw(call) => {
                let output = self
                    .view(&contract::encode_key_view(
                        &custody::PENDING_WITHDRAW_TX,
                        &call.tx_key,
                    ))
                    .await?;
                Ok(PendingWithdraw::decode_return(&output)?.map(OnChainProposal::Withdraw))
            }
            CustodyCall::ManagerChange(call) => {
                let output = self
                    .view(&contract::encode_key_view(
                        &custody::PENDING_MANAGER_CHANGE_TX,
                        &call.tx_key,
                    ))
                    .await?;
                Ok(PendingManagerChange::decode_return(&output)?
                    .map(OnChainProposal::ManagerChange))
            }
            CustodyCall::Upgrade(_) => Ok(None),
        }
    }

    // =========================================================================
    // Recovery helpers
    // =========================================================================

    async fn wait_for_completion(&self, tx_key: &str) -> DockingResult<bool> {
        for _ in 0..self.config.recovery_poll_limit {
            if self.is_completed(tx_key).await? {
                return Ok(true);
            }
            if !self.sleep_cancellable(self.config.poll_interval()).await {
                return Ok(false);
            }
        }
        self.is_completed(tx_key).await
    }

    async fn recovery_restore(
        &self,
        internal_id: &str,
        adds: Vec<Address>,
    ) -> DockingResult<DockingOutcome> {
        info!(
            internal_id,
            "[qc-15] Recovery phase II: adding {} administrators",
            adds.len()
        );
        let request = manager_change_request(
            BridgeTxType::Recovery,
            internal_id,
            RecoveryPhase::Restore.tx_key(internal_id),
            adds,
            Vec::new(),
        )?;
        self.dock(request, true).await
    }

    async fn recovery_complete(
        &self,
        internal_id: &str,
        phase_one: Option<DockingOutcome>,
    ) -> DockingResult<DockingOutcome> {
        info!(
            internal_id,
            "[qc-15] Recovery needs no phase II call, confirming"
        );
        self.confirm_without_call(BridgeTxType::Recovery, internal_id)
            .await?;
        Ok(match phase_one {
            Some(outcome) if outcome.tx_hash().is_some() => outcome,
            _ => DockingOutcome::Skipped(SkipReason::NoChangeRequired),
        })
    }

    async fn confirm_without_call(
        &self,
        tx_type: BridgeTxType,
        internal_id: &str,
    ) -> DockingResult<()> {
        let height = self.deps.rpc.block_number().await?;
        let time = self
            .deps
            .rpc
            .get_block(height)
            .await?
            .map(|b| b.timestamp)
            .unwrap_or_default();
        self.deps
            .callback
            .tx_confirmed(ConfirmedTx {
                tx_type,
                internal_id: Some(internal_id.to_string()),
                external_hash: None,
                height,
                time,
                custody: self.ctx.custody(),
                signers: Vec::new(),
                remark: Some("no on-chain change required".to_string()),
                transfer: None,
            })
            .await
    }
}

pub(crate) fn advance(
    from: CoordinatorState,
    to: CoordinatorState,
) -> DockingResult<CoordinatorState> {
    if !from.can_transition_to(to) {
        return Err(DockingError::InvalidTransition {
            from: format!("{:?}", from),
            to: format!("{:?}", to),
        });
    }
    Ok(to)
}

fn manager_change_request(
    tx_type: BridgeTxType,
    internal_id: &str,
    tx_key: String,
    adds: Vec<Address>,
    removes: Vec<Address>,
) -> DockingResult<DockingRequest> {
    let count = u8::try_from(adds.len() + removes.len())
        .map_err(|_| DockingError::validation("too many administrator changes"))?;
    Ok(DockingRequest {
        internal_id: internal_id.to_string(),
        tx_type,
        call: CustodyCall::ManagerChange(ManagerChangeCall {
            tx_key,
            adds,
            removes,
            count,
        }),
        asset: None,
    })
}
