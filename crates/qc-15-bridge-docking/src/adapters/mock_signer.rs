//! Mock Signer Adapter
//!
//! Implements `TxSigner` without real keys: the "signed" transaction is a
//! JSON envelope with a per-signer nonce, which `MockExternalChain` decodes.

use crate::domain::{Address, DockingError, DockingResult, UnsignedTx};
use crate::ports::outbound::TxSigner;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Raw transaction format shared by `MockSigner` and `MockExternalChain`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MockSignedTx {
    /// Sender nonce.
    pub nonce: u64,
    /// Signed payload.
    pub tx: UnsignedTx,
}

impl MockSignedTx {
    /// Decode raw bytes produced by [`MockSigner`].
    pub fn decode(raw: &[u8]) -> DockingResult<Self> {
        serde_json::from_slice(raw)
            .map_err(|e| DockingError::Decode(format!("invalid raw transaction: {}", e)))
    }
}

/// Signer for tests.
pub struct MockSigner {
    address: Address,
    nonce: AtomicU64,
}

impl MockSigner {
    /// Signer for `address`.
    pub fn new(address: Address) -> Self {
        Self {
            address,
            nonce: AtomicU64::new(0),
        }
    }
}

impl TxSigner for MockSigner {
    fn address(&self) -> Address {
        self.address
    }

    fn sign(&self, tx: &UnsignedTx) -> DockingResult<Vec<u8>> {
        if tx.from != self.address {
            return Err(DockingError::validation(format!(
                "signer {:?} cannot sign for {:?}",
                self.address, tx.from
            )));
        }
        let envelope = MockSignedTx {
            nonce: self.nonce.fetch_add(1, Ordering::SeqCst),
            tx: tx.clone(),
        };
        serde_json::to_vec(&envelope)
            .map_err(|e| DockingError::Decode(format!("cannot encode transaction: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use primitive_types::U256;

    fn create_test_tx(from: Address) -> UnsignedTx {
        UnsignedTx {
            from,
            to: Address::repeat_byte(0xCC),
            data: vec![1, 2, 3],
            value: U256::zero(),
            gas_limit: U256::from(100_000),
            gas_price: U256::from(1),
        }
    }

    #[test]
    fn test_nonce_changes_raw_bytes() {
        let signer = MockSigner::new(Address::repeat_byte(1));
        let tx = create_test_tx(signer.address());
        let a = signer.sign(&tx).unwrap();
        let b = signer.sign(&tx).unwrap();
        assert_ne!(a, b);
        assert_eq!(MockSignedTx::decode(&b).unwrap().nonce, 1);
    }

    #[test]
    fn test_rejects_foreign_sender() {
        let signer = MockSigner::new(Address::repeat_byte(1));
        assert!(signer.sign(&create_test_tx(Address::repeat_byte(2))).is_err());
    }
}
