//! # Application Module
//!
//! Services orchestrating the domain and outbound ports for one external
//! chain: broadcast coordination, block listening, confirmation tracking
//! and the node that wires them together.

pub mod asset_registry;
pub mod block_window;
pub mod classifier;
pub mod context;
pub mod coordinator;
pub mod listener;
pub mod node;
pub mod pending_book;
pub mod resend;
pub mod tracker;

pub use asset_registry::AssetRegistry;
pub use block_window::{Continuity, LocalBlockWindow};
pub use classifier::{BroadcastTx, ParsedTx, TxClassifier};
pub use context::{ChainContext, DockingRegistry};
pub use coordinator::{CoordinatorDeps, DockingCoordinator};
pub use listener::{ChainListener, ListenerDeps, PollReport, TxAnalysis};
pub use node::{BridgeDockingNode, DockingCollaborators};
pub use pending_book::PendingBook;
pub use resend::ResendManager;
pub use tracker::{ConfirmationTracker, TrackerEvent};
