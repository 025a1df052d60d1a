//! # Algorithms Module
//!
//! Pure algorithms for Bridge Docking: turn ordering, gas policy and
//! recovery planning.

pub mod gas;
pub mod recovery;
pub mod signer_order;

pub use gas::{apply_gas_policy, gas_price_above_ceiling};
pub use recovery::{plan_recovery, validate_recovery_sets, RecoveryStep};
pub use signer_order::{compute_order, compute_seed, SignerOrder};
