//! # Domain Invariants
//!
//! Business rules for Bridge Docking.

use super::entities::PendingBridgeTx;
use super::errors::{Address, DockingError, DockingResult};
use super::value_objects::BridgeTxType;
use std::collections::HashSet;

/// Invariant: No address appears twice within one manager-change request,
/// neither inside one list nor across `adds` and `removes`.
pub fn invariant_no_duplicate_addresses(
    adds: &[Address],
    removes: &[Address],
) -> DockingResult<()> {
    let mut seen = HashSet::with_capacity(adds.len() + removes.len());
    for address in adds.iter().chain(removes) {
        if !seen.insert(*address) {
            return Err(DockingError::validation(format!(
                "duplicate address {:?} in manager change",
                address
            )));
        }
    }
    Ok(())
}

/// Invariant: An administrator being removed never co-signs its own removal.
pub fn invariant_not_self_removal(signer: &Address, removes: &[Address]) -> DockingResult<()> {
    if removes.contains(signer) {
        return Err(DockingError::validation(format!(
            "administrator {:?} cannot sign its own removal",
            signer
        )));
    }
    Ok(())
}

/// Invariant: This node keeps at most one active external hash per contract
/// key (the internal id, or a recovery phase key) per action type.
///
/// Returns the already-active local record if there is one.
pub fn invariant_single_active<'a>(
    records: &'a [PendingBridgeTx],
    tx_key: &str,
    tx_type: BridgeTxType,
) -> Option<&'a PendingBridgeTx> {
    records.iter().find(|r| {
        r.is_local()
            && r.is_active()
            && r.tx_type == tx_type
            && r.tx_key.as_deref() == Some(tx_key)
    })
}

/// Invariant: COMPLETED requires the signer set to reach the threshold.
pub fn invariant_threshold_reached(signers: &[Address], threshold: usize) -> bool {
    threshold > 0 && signers.len() >= threshold
}

/// Invariant: A withdrawal moves a non-zero amount to a non-zero address.
pub fn invariant_valid_withdraw(to: &Address, amount_is_zero: bool) -> DockingResult<()> {
    if to.is_zero() {
        return Err(DockingError::validation("withdraw to zero address"));
    }
    if amount_is_zero {
        return Err(DockingError::validation("withdraw amount is zero"));
    }
    Ok(())
}

/// Invariant: Internal ids are non-empty hex strings (optional `0x` prefix).
pub fn invariant_valid_internal_id(internal_id: &str) -> DockingResult<()> {
    let digits = internal_id.strip_prefix("0x").unwrap_or(internal_id);
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(DockingError::validation(format!(
            "internal id {:?} is not hex",
            internal_id
        )));
    }
    Ok(())
}
