//! # Recovery Planning
//!
//! Two-phase administrator-set recovery. Phase I purges on-chain
//! administrators absent from the seed set; phase II restores designated
//! administrators missing on-chain.

use crate::domain::{invariant_no_duplicate_addresses, Address, DockingError, DockingResult};
use std::collections::HashSet;

/// Next step for a recovery action given the current on-chain set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RecoveryStep {
    /// Phase I: remove these administrators.
    Purge(Vec<Address>),
    /// Phase II: add these administrators.
    Restore(Vec<Address>),
    /// Nothing left to do on-chain.
    Complete,
}

/// Validate the designated sets: seed non-empty and contained in `all`,
/// no duplicates.
pub fn validate_recovery_sets(seed: &[Address], all: &[Address]) -> DockingResult<()> {
    if seed.is_empty() {
        return Err(DockingError::validation("recovery seed set is empty"));
    }
    invariant_no_duplicate_addresses(seed, &[])?;
    invariant_no_duplicate_addresses(all, &[])?;
    let all_set: HashSet<&Address> = all.iter().collect();
    if let Some(missing) = seed.iter().find(|a| !all_set.contains(a)) {
        return Err(DockingError::validation(format!(
            "seed administrator {:?} missing from full set",
            missing
        )));
    }
    Ok(())
}

fn same_set(a: &[Address], b: &[Address]) -> bool {
    let a: HashSet<&Address> = a.iter().collect();
    let b: HashSet<&Address> = b.iter().collect();
    a == b
}

/// Plan the next recovery step.
pub fn plan_recovery(on_chain: &[Address], seed: &[Address], all: &[Address]) -> RecoveryStep {
    if same_set(on_chain, all) {
        return RecoveryStep::Complete;
    }

    let seed_set: HashSet<&Address> = seed.iter().collect();
    let removes: Vec<Address> = on_chain
        .iter()
        .filter(|a| !seed_set.contains(a))
        .copied()
        .collect();
    if !removes.is_empty() {
        return RecoveryStep::Purge(removes);
    }

    let chain_set: HashSet<&Address> = on_chain.iter().collect();
    let adds: Vec<Address> = all
        .iter()
        .filter(|a| !chain_set.contains(a))
        .copied()
        .collect();
    if adds.is_empty() {
        RecoveryStep::Complete
    } else {
        RecoveryStep::Restore(adds)
    }
}
