//! # Signer Order
//!
//! Leaderless turn assignment. Every signer computes the same rotation of
//! the signer bank from the internal action id, so without talking to each
//! other exactly one signer goes first, one second, and so on.
//!
//! ```text
//! seed    = leading hex digits of internal id + 1
//! modulus = seed % bank_size + 1
//! rank    = signer_index + 1
//! order   = rank - (modulus - 1)              if rank >= modulus
//!         = rank + bank_size - (modulus - 1)  otherwise
//! wait    = (order - 1) * interval
//! ```
//!
//! One hex digit is used for banks of up to 16 signers, two digits beyond.

use crate::domain::{DockingError, DockingResult};
use std::time::Duration;

/// Bank size above which two seed digits are used.
pub const SINGLE_DIGIT_BANK_LIMIT: usize = 16;

/// Result of an order computation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SignerOrder {
    /// Seed from the internal id.
    pub seed: u64,
    /// Rotation modulus in `1..=bank_size`.
    pub modulus: u64,
    /// Submission order in `1..=bank_size`.
    pub order: u64,
}

impl SignerOrder {
    /// Time to sleep before this signer's turn.
    pub fn wait(&self, interval: Duration) -> Duration {
        interval.saturating_mul(self.order.saturating_sub(1) as u32)
    }

    /// First in line.
    pub fn is_first(&self) -> bool {
        self.order == 1
    }
}

/// Seed taken from the leading hex digits of `internal_id`.
pub fn compute_seed(internal_id: &str, bank_size: usize) -> DockingResult<u64> {
    let digits = internal_id.strip_prefix("0x").unwrap_or(internal_id);
    let take = if bank_size > SINGLE_DIGIT_BANK_LIMIT { 2 } else { 1 };
    let prefix = digits.get(..take.min(digits.len())).unwrap_or_default();
    if prefix.is_empty() {
        return Err(DockingError::validation(format!(
            "internal id {:?} has no seed digits",
            internal_id
        )));
    }
    let value = u64::from_str_radix(prefix, 16).map_err(|_| {
        DockingError::validation(format!("internal id {:?} is not hex", internal_id))
    })?;
    Ok(value + 1)
}

/// Compute this signer's submission order.
///
/// `signer_index` is the 0-based position of the local signer in the bank.
pub fn compute_order(
    bank_size: usize,
    signer_index: usize,
    internal_id: &str,
) -> DockingResult<SignerOrder> {
    if bank_size == 0 {
        return Err(DockingError::validation("empty signer bank"));
    }
    if signer_index >= bank_size {
        return Err(DockingError::validation(format!(
            "signer index {} outside bank of {}",
            signer_index, bank_size
        )));
    }

    let size = bank_size as u64;
    let seed = compute_seed(internal_id, bank_size)?;
    let modulus = seed % size + 1;
    let rank = signer_index as u64 + 1;
    let order = if rank < modulus {
        rank + size - (modulus - 1)
    } else {
        rank - (modulus - 1)
    };

    Ok(SignerOrder {
        seed,
        modulus,
        order,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    #[test]
    fn test_worked_example() {
        let order = compute_order(5, 3, "a").unwrap();
        assert_eq!(order.seed, 11);
        assert_eq!(order.order, 3);
        let interval = Duration::from_secs(10);
        assert_eq!(order.wait(interval), interval * 2);
    }

    #[test]
    fn test_prefix_and_case() {
        assert_eq!(compute_seed("0xA1", 5).unwrap(), 11);
        assert_eq!(compute_seed("a1", 5).unwrap(), 11);
        assert_eq!(compute_seed("a1", 20).unwrap(), 0xa1 + 1);
    }

    #[test]
    fn test_short_id_large_bank() {
        assert_eq!(compute_seed("f", 20).unwrap(), 16);
    }

    #[test]
    fn test_invalid_inputs() {
        assert!(compute_order(0, 0, "a").is_err());
        assert!(compute_order(3, 3, "a").is_err());
        assert!(compute_order(3, 0, "zz").is_err());
        assert!(compute_order(3, 0, "0x").is_err());
    }

    #[test]
    fn test_single_signer_is_first() {
        let order = compute_order(1, 0, "7").unwrap();
        assert!(order.is_first());
        assert_eq!(order.wait(Duration::from_secs(5)), Duration::ZERO);
    }

    proptest! {
        #[test]
        fn test_order_is_deterministic(size in 1usize..40, index in 0usize..40, id in "[0-9a-f]{1,8}") {
            prop_assume!(index < size);
            let a = compute_order(size, index, &id).unwrap();
            let b = compute_order(size, index, &id).unwrap();
            prop_assert_eq!(a, b);
            prop_assert!(a.order >= 1 && a.order <= size as u64);
        }

        #[test]
        fn test_orders_form_permutation(size in 1usize..40, id in "[0-9a-f]{1,8}") {
            let orders: HashSet<u64> = (0..size)
                .map(|i| compute_order(size, i, &id).unwrap().order)
                .collect();
            prop_assert_eq!(orders.len(), size);
        }
    }
}
