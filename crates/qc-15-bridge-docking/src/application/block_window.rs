//! # Local Block Window
//!
//! Bounded window of recent external block headers used for reorg
//! bookkeeping. A new block whose parent hash does not match the stored
//! header below it signals a reorg.

use crate::domain::{DockingResult, LocalBlockHeader};
use crate::ports::outbound::BlockHeaderStore;
use std::sync::Arc;
use tracing::{debug, warn};

/// Continuity check result.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Continuity {
    /// Parent matches (or nothing stored below).
    Linked,
    /// Parent hash differs from the stored header at `height - 1`.
    Reorg {
        /// Height of the stored header that was orphaned.
        orphaned_height: u64,
    },
}

/// Local block window over a header store.
pub struct LocalBlockWindow {
    store: Arc<dyn BlockHeaderStore>,
    depth: usize,
}

impl LocalBlockWindow {
    /// Create a window retaining `depth` headers.
    pub fn new(store: Arc<dyn BlockHeaderStore>, depth: usize) -> Self {
        Self { store, depth }
    }

    /// Highest stored header.
    pub fn latest(&self) -> DockingResult<Option<LocalBlockHeader>> {
        self.store.latest()
    }

    /// Check that `header` extends the stored chain.
    pub fn check_continuity(&self, header: &LocalBlockHeader) -> DockingResult<Continuity> {
        if header.height == 0 {
            return Ok(Continuity::Linked);
        }
        let below = header.height - 1;
        match self.store.get(below)? {
            Some(prev) if prev.hash != header.parent_hash => {
                warn!(
                    "[qc-15] Chain discontinuity at block {}: expected parent {:?} but got {:?}",
                    header.height, prev.hash, header.parent_hash
                );
                Ok(Continuity::Reorg {
                    orphaned_height: below,
                })
            }
            _ => Ok(Continuity::Linked),
        }
    }

    /// Persist `header` and prune headers older than the retention depth.
    pub fn record(&self, header: LocalBlockHeader) -> DockingResult<()> {
        let height = header.height;
        self.store.put(header)?;

        let keep_from = height.saturating_sub((self.depth as u64).saturating_sub(1));
        for old in self.store.heights()? {
            if old >= keep_from {
                break;
            }
            self.store.remove(old)?;
        }
        Ok(())
    }

    /// Drop the header at `height` and everything above it.
    pub fn rollback_to_below(&self, height: u64) -> DockingResult<()> {
        let mut removed = 0;
        for stored in self.store.heights()? {
            if stored >= height {
                self.store.remove(stored)?;
                removed += 1;
            }
        }
        debug!(
            "[qc-15] Rolled back {} headers from height {}",
            removed, height
        );
        Ok(())
    }

    /// Number of stored headers.
    pub fn len(&self) -> DockingResult<usize> {
        Ok(self.store.heights()?.len())
    }
}
