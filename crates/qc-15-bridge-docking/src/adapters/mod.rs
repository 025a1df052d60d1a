//! # Adapters Layer (Hexagonal Architecture)
//!
//! In-process implementations of the outbound ports: storage, external
//! chain, signer and home-chain collaborators.

mod home_chain;
mod memory;
mod mock_chain;
mod mock_signer;

pub use home_chain::{RecordingCallback, StaticSignerSet};
pub use memory::{
    FailingAssetStore, InMemoryAssetStore, InMemoryBlockHeaderStore, InMemoryPendingStore,
    InMemoryTxRelationStore,
};
pub use mock_chain::MockExternalChain;
pub use mock_signer::{MockSignedTx, MockSigner};
