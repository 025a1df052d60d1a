//! # Bridge Docking Configuration
//!
//! Static per-chain configuration. Values that change at runtime (custody
//! address, gas-price ceiling, threshold) live in
//! [`crate::application::ChainContext`].

use crate::domain::{DockingError, DockingResult};
use primitive_types::U256;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Block-window retention depth.
pub const DEFAULT_BLOCK_WINDOW_DEPTH: usize = 30;

/// Gas-limit policy applied to estimates before submission.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GasPolicy {
    /// Floor for withdrawals.
    pub withdraw_floor: u64,
    /// Floor for administrator changes (and recovery phases).
    pub manager_change_floor: u64,
    /// Upper clamp for administrator changes.
    pub manager_change_cap: u64,
    /// Floor for upgrade authorizations.
    pub upgrade_floor: u64,
}

impl Default for GasPolicy {
    fn default() -> Self {
        Self {
            withdraw_floor: 150_000,
            manager_change_floor: 250_000,
            manager_change_cap: 3_000_000,
            upgrade_floor: 100_000,
        }
    }
}

/// Bridge docking configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DockingConfig {
    /// Fixed interval between two signers' turns, in milliseconds.
    pub turn_interval_ms: u64,

    /// Listener poll interval, in milliseconds.
    pub poll_interval_ms: u64,

    /// Blocks behind the tip before a block is analysed.
    pub confirmations: u64,

    /// Retention depth of the local block window.
    pub block_window_depth: usize,

    /// Blocks a tombstoned record stays visible before purge.
    pub rollback_window: u64,

    /// Resend ceiling per internal id.
    pub resend_ceiling: u32,

    /// Initial gas-price ceiling in wei (`0` disables the check).
    pub gas_price_ceiling: U256,

    /// Gas-limit floors and caps.
    pub gas: GasPolicy,

    /// Completion polls between recovery phase I and phase II.
    pub recovery_poll_limit: u32,

    /// Height to start listening from (`None` = current tip).
    pub start_height: Option<u64>,
}

impl Default for DockingConfig {
    fn default() -> Self {
        Self {
            turn_interval_ms: 60_000,
            poll_interval_ms: 10_000,
            confirmations: 6,
            block_window_depth: DEFAULT_BLOCK_WINDOW_DEPTH,
            rollback_window: 30,
            resend_ceiling: 3,
            gas_price_ceiling: U256::zero(),
            gas: GasPolicy::default(),
            recovery_poll_limit: 20,
            start_height: None,
        }
    }
}

impl DockingConfig {
    /// Create a config for testing (short intervals, no confirmations).
    pub fn for_testing() -> Self {
        Self {
            turn_interval_ms: 1_000,
            poll_interval_ms: 100,
            confirmations: 0,
            block_window_depth: DEFAULT_BLOCK_WINDOW_DEPTH,
            rollback_window: 5,
            resend_ceiling: 2,
            gas_price_ceiling: U256::zero(),
            gas: GasPolicy::default(),
            recovery_poll_limit: 3,
            start_height: Some(0),
        }
    }

    /// Load from a JSON document; missing fields take defaults.
    pub fn from_json(json: &str) -> DockingResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| DockingError::validation(format!("invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check internal consistency.
    pub fn validate(&self) -> DockingResult<()> {
        if self.block_window_depth == 0 {
            return Err(DockingError::validation("block_window_depth must be positive"));
        }
        if self.poll_interval_ms == 0 {
            return Err(DockingError::validation("poll_interval_ms must be positive"));
        }
        if self.gas.manager_change_cap < self.gas.manager_change_floor {
            return Err(DockingError::validation(
                "manager_change_cap below manager_change_floor",
            ));
        }
        Ok(())
    }

    /// Turn interval as a duration.
    pub fn turn_interval(&self) -> Duration {
        Duration::from_millis(self.turn_interval_ms)
    }

    /// Poll interval as a duration.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
