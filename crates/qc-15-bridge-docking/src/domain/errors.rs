//! # Domain Errors
//!
//! Error types for Bridge Docking.
//!
//! Validation and consistency failures are fatal and never retried.
//! Transient external failures are retried by the resend manager up to its
//! ceiling. Deferred conditions (gas above ceiling) are not errors at all and
//! surface as [`crate::domain::SkipReason`].

use primitive_types::{H160, H256};
use thiserror::Error;

/// External-chain account address (20-byte).
pub type Address = H160;

/// External-chain transaction or block hash (32-byte Keccak).
pub type TxHash = H256;

/// External-chain identifier as assigned by the home chain.
pub type ExternalChainId = u16;

/// Bridge docking error types.
#[derive(Debug, Error)]
pub enum DockingError {
    /// Request failed validation (bad format, unknown account, duplicate
    /// address, self-removal, hard dry-run revert, zero gas estimate).
    #[error("Validation failed: {0}")]
    Validation(String),

    /// On-chain pending proposal disagrees with local intent.
    #[error("Consistency violation for {internal_id}: {detail}")]
    ConsistencyViolation {
        /// Home-chain action id
        internal_id: String,
        /// What differed
        detail: String,
    },

    /// External transaction failed (e.g. failed receipt status).
    #[error("Transient external failure for {hash:?}: {reason}")]
    TransientExternal {
        /// External transaction hash
        hash: TxHash,
        /// Failure description
        reason: String,
    },

    /// External RPC call failed.
    #[error("RPC error: {0}")]
    Rpc(String),

    /// Storage collaborator failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Call-data, return data or event log could not be decoded.
    #[error("ABI decode error: {0}")]
    Decode(String),

    /// No docking node registered for this external chain.
    #[error("Unknown external chain: {0}")]
    UnknownChain(ExternalChainId),

    /// Invalid pending-record status transition.
    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition {
        /// Current status
        from: String,
        /// Attempted status
        to: String,
    },

    /// Resend ceiling reached for an internal action.
    #[error("Resend limit reached for {0}")]
    ResendExhausted(String),
}

impl DockingError {
    /// Shorthand for a validation failure.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Whether the resend manager may retry after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientExternal { .. } | Self::Rpc(_))
    }

    /// Whether this error must stop the action permanently.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Validation(_)
                | Self::ConsistencyViolation { .. }
                | Self::ResendExhausted(_)
                | Self::InvalidTransition { .. }
        )
    }
}

/// Result type for docking operations.
pub type DockingResult<T> = Result<T, DockingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_message() {
        let err = DockingError::validation("duplicate address");
        assert!(err.to_string().contains("duplicate address"));
        assert!(err.is_fatal());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_consistency_violation_is_fatal() {
        let err = DockingError::ConsistencyViolation {
            internal_id: "ab12".to_string(),
            detail: "amount differs".to_string(),
        };
        assert!(err.to_string().contains("ab12"));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_transient_external_is_retryable() {
        let err = DockingError::TransientExternal {
            hash: TxHash::repeat_byte(1),
            reason: "receipt status 0".to_string(),
        };
        assert!(err.is_retryable());
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_unknown_chain_error() {
        let err = DockingError::UnknownChain(101);
        assert!(err.to_string().contains("101"));
    }
}
