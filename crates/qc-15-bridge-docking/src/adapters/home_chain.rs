//! Home Chain Adapters
//!
//! Static signer bank and a recording confirmation sink, standing in for the
//! home-chain round rotation and its confirmation handler.

use crate::domain::{Address, ConfirmedTx, DockingResult};
use crate::ports::outbound::{HomeChainCallback, SignerSetProvider};
use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

/// Fixed signer bank.
pub struct StaticSignerSet {
    signers: RwLock<Vec<Address>>,
}

impl StaticSignerSet {
    /// Bank in the given order.
    pub fn new(signers: Vec<Address>) -> Self {
        Self {
            signers: RwLock::new(signers),
        }
    }

    /// Replace the bank (round rotation).
    pub fn replace(&self, signers: Vec<Address>) {
        *self.signers.write() = signers;
    }
}

#[async_trait]
impl SignerSetProvider for StaticSignerSet {
    async fn current_signers(&self) -> DockingResult<Vec<Address>> {
        Ok(self.signers.read().clone())
    }
}

/// Confirmation sink that keeps every `TxConfirmed` it receives.
#[derive(Default)]
pub struct RecordingCallback {
    confirmed: RwLock<Vec<ConfirmedTx>>,
}

impl RecordingCallback {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Confirmations received so far.
    pub fn confirmed(&self) -> Vec<ConfirmedTx> {
        self.confirmed.read().clone()
    }

    /// Confirmations for one internal id.
    pub fn confirmed_for(&self, internal_id: &str) -> Vec<ConfirmedTx> {
        self.confirmed
            .read()
            .iter()
            .filter(|c| c.internal_id.as_deref() == Some(internal_id))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl HomeChainCallback for RecordingCallback {
    async fn tx_confirmed(&self, confirmed: ConfirmedTx) -> DockingResult<()> {
        debug!(
            "[qc-15] TxConfirmed {} {:?} at {}",
            confirmed.tx_type, confirmed.internal_id, confirmed.height
        );
        self.confirmed.write().push(confirmed);
        Ok(())
    }
}
