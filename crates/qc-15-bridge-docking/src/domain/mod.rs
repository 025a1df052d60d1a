//! # Domain Module
//!
//! Core domain types for Bridge Docking.

pub mod abi;
pub mod contract;
pub mod entities;
pub mod errors;
pub mod invariants;
pub mod value_objects;

pub use contract::{
    ContractFunction, CustodyCall, CustodyEvent, ManagerChangeCall, PendingManagerChange,
    PendingWithdraw, UpgradeCall, WithdrawCall, DUPLICATE_SIGNATURES,
};
pub use entities::*;
pub use errors::*;
pub use invariants::*;
pub use value_objects::*;
