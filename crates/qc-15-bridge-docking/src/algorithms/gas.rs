//! # Gas Policy
//!
//! Gas-limit floors/caps and the gas-price deferral check.

use crate::config::GasPolicy;
use crate::domain::{BridgeTxType, DockingError, DockingResult};
use primitive_types::U256;

/// Apply the type-specific floor (and the manager-change cap) to an estimate.
///
/// A zero estimate means the node cannot execute the call and is rejected.
pub fn apply_gas_policy(
    tx_type: BridgeTxType,
    estimate: U256,
    policy: &GasPolicy,
) -> DockingResult<U256> {
    if estimate.is_zero() {
        return Err(DockingError::validation(format!(
            "zero gas estimate for {}",
            tx_type
        )));
    }

    let limit = match tx_type {
        BridgeTxType::Withdraw => estimate.max(U256::from(policy.withdraw_floor)),
        BridgeTxType::ManagerChange | BridgeTxType::Recovery => estimate
            .max(U256::from(policy.manager_change_floor))
            .min(U256::from(policy.manager_change_cap)),
        BridgeTxType::Upgrade => estimate.max(U256::from(policy.upgrade_floor)),
        BridgeTxType::Deposit => {
            return Err(DockingError::validation("deposits are never submitted"));
        }
    };
    Ok(limit)
}

/// Check whether the current gas price is above the ceiling. A zero ceiling
/// disables the check.
pub fn gas_price_above_ceiling(current: U256, ceiling: U256) -> bool {
    !ceiling.is_zero() && current > ceiling
}
