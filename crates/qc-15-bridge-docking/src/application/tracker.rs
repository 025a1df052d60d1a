//! # Confirmation Tracker
//!
//! Follows hashes this node broadcast until their receipts arrive. A failed
//! receipt counts against the resend ceiling and, while the ceiling allows,
//! is resubmitted through the coordinator without waiting for a turn.
//!
//! Resubmissions run in their own tasks so a slow resend never holds up the
//! polling loop. Their results are collected at the start of the next tick.
//!
//! ```text
//! SUBMITTED → CONFIRMED
//!           → FAILED → RESEND_ELIGIBLE → SUBMITTING → (new hash) SUBMITTED
//!                    → FAILED_TERMINAL              → RESEND_ELIGIBLE (postponed)
//!                                                   → FAILED_TERMINAL
//! ```

use super::coordinator::{advance, DockingCoordinator};
use super::pending_book::PendingBook;
use super::resend::ResendManager;
use crate::domain::{
    CoordinatorState, DockingOutcome, DockingResult, PendingStatus, SkipReason, TxHash,
};
use crate::ports::outbound::ExternalChainRpc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// What a tracker tick did with one hash.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TrackerEvent {
    /// Receipt succeeded.
    Confirmed {
        /// Tracked hash
        hash: TxHash,
        /// Home-chain action id
        internal_id: String,
    },
    /// Failed and resubmitted under a new hash.
    Resent {
        /// Failed hash
        old: TxHash,
        /// Replacement hash
        new: TxHash,
    },
    /// Resend postponed (gas ceiling or transient error); retried next tick.
    Deferred {
        /// Failed hash
        hash: TxHash,
    },
    /// Resend found nothing left to do.
    Superseded {
        /// Failed hash
        hash: TxHash,
        /// Why no replacement was sent
        reason: SkipReason,
    },
    /// Resend ceiling reached.
    Failed {
        /// Last failed hash
        hash: TxHash,
        /// Home-chain action id
        internal_id: String,
        /// Failure detail
        reason: String,
    },
}

#[derive(Clone, Debug)]
struct Tracked {
    internal_id: String,
    state: CoordinatorState,
}

struct ResendResult {
    hash: TxHash,
    outcome: DockingResult<DockingOutcome>,
}

/// Receipt follower for locally originated transactions.
pub struct ConfirmationTracker {
    rpc: Arc<dyn ExternalChainRpc>,
    pending: Arc<PendingBook>,
    resend: Arc<ResendManager>,
    tracked: Mutex<HashMap<TxHash, Tracked>>,
    results_tx: mpsc::UnboundedSender<ResendResult>,
    results_rx: Mutex<mpsc::UnboundedReceiver<ResendResult>>,
}

impl ConfirmationTracker {
    /// Create a tracker.
    pub fn new(
        rpc: Arc<dyn ExternalChainRpc>,
        pending: Arc<PendingBook>,
        resend: Arc<ResendManager>,
    ) -> Self {
        let (results_tx, results_rx) = mpsc::unbounded_channel();
        Self {
            rpc,
            pending,
            resend,
            tracked: Mutex::new(HashMap::new()),
            results_tx,
            results_rx: Mutex::new(results_rx),
        }
    }

    /// Start following `hash`.
    pub fn track(&self, hash: TxHash, internal_id: &str) {
        self.tracked.lock().insert(
            hash,
            Tracked {
                internal_id: internal_id.to_string(),
                state: CoordinatorState::Submitted,
            },
        );
    }

    /// Stop following `hash`.
    pub fn untrack(&self, hash: &TxHash) {
        self.tracked.lock().remove(hash);
    }

    /// Check if `hash` is followed.
    pub fn is_tracked(&self, hash: &TxHash) -> bool {
        self.tracked.lock().contains_key(hash)
    }

    /// Lifecycle state of a followed hash.
    pub fn state(&self, hash: &TxHash) -> Option<CoordinatorState> {
        self.tracked.lock().get(hash).map(|t| t.state)
    }

    /// Number of followed hashes.
    pub fn len(&self) -> usize {
        self.tracked.lock().len()
    }

    /// Check if nothing is followed.
    pub fn is_empty(&self) -> bool {
        self.tracked.lock().is_empty()
    }

    /// Collect finished resends, then poll receipts of every followed hash
    /// once. Never waits on a resubmission.
    pub async fn tick(
        &self,
        coordinator: &Arc<DockingCoordinator>,
    ) -> DockingResult<Vec<TrackerEvent>> {
        let mut events = self.collect_resends()?;

        let snapshot: Vec<(TxHash, Tracked)> = self
            .tracked
            .lock()
            .iter()
            .map(|(h, t)| (*h, t.clone()))
            .collect();

        for (hash, tracked) in snapshot {
            match tracked.state {
                CoordinatorState::Submitting => continue,
                CoordinatorState::ResendEligible => {
                    events.extend(self.spawn_resend(coordinator, hash)?);
                    continue;
                }
                _ => {}
            }

            let failure = match self.rpc.get_receipt(hash).await? {
                Some(receipt) if receipt.success => {
                    self.advance_tracked(&hash, CoordinatorState::Confirmed)?;
                    self.untrack(&hash);
                    debug!("[qc-15] Receipt for {:?} succeeded", hash);
                    events.push(TrackerEvent::Confirmed {
                        hash,
                        internal_id: tracked.internal_id,
                    });
                    continue;
                }
                Some(_) => "receipt reverted",
                None => {
                    if self.rpc.get_transaction(hash).await?.is_some() {
                        continue;
                    }
                    "transaction dropped"
                }
            };

            warn!("[qc-15] {:?} for {}: {}", hash, tracked.internal_id, failure);
            self.advance_tracked(&hash, CoordinatorState::Failed)?;
            self.mark_failed(&hash)?;
            if !self.resend.current_node_sent(&hash)? {
                self.untrack(&hash);
                continue;
            }

            let attempts = self.resend.increase(&tracked.internal_id);
            if !self.resend.can_resend(&tracked.internal_id) {
                events.push(self.give_up(hash, &tracked.internal_id, attempts, failure)?);
                continue;
            }
            self.advance_tracked(&hash, CoordinatorState::ResendEligible)?;
            events.extend(self.spawn_resend(coordinator, hash)?);
        }
        Ok(events)
    }

    fn spawn_resend(
        &self,
        coordinator: &Arc<DockingCoordinator>,
        hash: TxHash,
    ) -> DockingResult<Option<TrackerEvent>> {
        let Some(record) = self.pending.get(&hash)? else {
            self.untrack(&hash);
            return Ok(Some(TrackerEvent::Superseded {
                hash,
                reason: SkipReason::NoChangeRequired,
            }));
        };
        self.advance_tracked(&hash, CoordinatorState::Submitting)?;

        let coordinator = Arc::clone(coordinator);
        let results = self.results_tx.clone();
        tokio::spawn(async move {
            let outcome = coordinator.resubmit(&record).await;
            // Receiver lives as long as the tracker.
            let _ = results.send(ResendResult { hash, outcome });
        });
        debug!("[qc-15] Resend of {:?} started", hash);
        Ok(None)
    }

    fn collect_resends(&self) -> DockingResult<Vec<TrackerEvent>> {
        let finished: Vec<ResendResult> = {
            let mut rx = self.results_rx.lock();
            std::iter::from_fn(|| rx.try_recv().ok()).collect()
        };

        let mut events = Vec::with_capacity(finished.len());
        for result in finished {
            if let Some(event) = self.settle_resend(result)? {
                events.push(event);
            }
        }
        Ok(events)
    }

    fn settle_resend(&self, result: ResendResult) -> DockingResult<Option<TrackerEvent>> {
        let ResendResult { hash, outcome } = result;
        let Some(tracked) = self.tracked.lock().get(&hash).cloned() else {
            // Confirmed through the home chain while the resend ran.
            return Ok(None);
        };

        let event = match outcome {
            Ok(DockingOutcome::Submitted(new)) => {
                self.untrack(&hash);
                self.resend.forget(&hash)?;
                info!("[qc-15] Resent {:?} as {:?}", hash, new);
                TrackerEvent::Resent { old: hash, new }
            }
            Ok(DockingOutcome::Pending(active)) => {
                self.untrack(&hash);
                TrackerEvent::Resent {
                    old: hash,
                    new: active,
                }
            }
            Ok(DockingOutcome::Skipped(
                SkipReason::GasPriceAboveCeiling { .. }
                | SkipReason::InProgress
                | SkipReason::Cancelled,
            )) => {
                self.advance_tracked(&hash, CoordinatorState::ResendEligible)?;
                TrackerEvent::Deferred { hash }
            }
            Ok(DockingOutcome::Skipped(reason)) => {
                self.advance_tracked(&hash, CoordinatorState::AlreadyComplete)?;
                self.untrack(&hash);
                self.resend.clear(&tracked.internal_id);
                debug!("[qc-15] No resend needed for {:?}: {:?}", hash, reason);
                TrackerEvent::Superseded { hash, reason }
            }
            Err(e) if e.is_retryable() => {
                warn!("[qc-15] Resend of {:?} postponed: {}", hash, e);
                self.advance_tracked(&hash, CoordinatorState::ResendEligible)?;
                TrackerEvent::Deferred { hash }
            }
            Err(e) => {
                let attempts = self.resend.attempts(&tracked.internal_id);
                self.give_up(hash, &tracked.internal_id, attempts, &e.to_string())?
            }
        };
        Ok(Some(event))
    }

    fn give_up(
        &self,
        hash: TxHash,
        internal_id: &str,
        attempts: u32,
        reason: &str,
    ) -> DockingResult<TrackerEvent> {
        error!(
            "[qc-15] Giving up on {} after {} failed submissions: {}",
            internal_id, attempts, reason
        );
        self.advance_tracked(&hash, CoordinatorState::FailedTerminal)?;
        self.untrack(&hash);
        self.resend.clear(internal_id);
        self.resend.forget(&hash)?;
        Ok(TrackerEvent::Failed {
            hash,
            internal_id: internal_id.to_string(),
            reason: reason.to_string(),
        })
    }

    fn advance_tracked(&self, hash: &TxHash, next: CoordinatorState) -> DockingResult<()> {
        if let Some(entry) = self.tracked.lock().get_mut(hash) {
            entry.state = advance(entry.state, next)?;
        }
        Ok(())
    }

    fn mark_failed(&self, hash: &TxHash) -> DockingResult<()> {
        if let Some(record) = self.pending.get(hash)? {
            if !record.status.is_terminal() {
                self.pending.set_status(hash, PendingStatus::Failed)?;
            }
        }
        Ok(())
    }
}
