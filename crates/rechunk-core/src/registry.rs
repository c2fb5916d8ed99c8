//! Live-region accounting.
//!
//! Every constructed [`Region`](crate::Region) holds a [`Registration`] taken
//! from a [`LiveRegions`] counter. The registration decrements the counter
//! when it is dropped, so a region is counted out exactly once no matter how
//! its disposal is triggered.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::trace;

/// Shared counter of regions that have been constructed and not yet disposed.
///
/// Cloning the handle shares the underlying counter.
#[derive(Debug, Clone, Default)]
pub struct LiveRegions {
    count: Arc<AtomicUsize>,
}

impl LiveRegions {
    /// Creates a registry with a count of zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of regions currently alive
    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    /// Records one construction
    pub fn increment(&self) {
        let live = self.count.fetch_add(1, Ordering::SeqCst) + 1;
        trace!("region registered, {} live", live);
    }

    /// Records one disposal
    ///
    /// Saturates at zero.
    pub fn decrement(&self) {
        let previous = self
            .count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_sub(1)))
            .unwrap_or(0);
        trace!("region disposed, {} live", previous.saturating_sub(1));
    }

    /// Increments the counter and returns the guard that will undo it
    pub fn register(&self) -> Registration {
        self.increment();
        Registration {
            registry: self.clone(),
        }
    }

    /// Returns true if both handles share one counter
    pub fn same_registry(&self, other: &LiveRegions) -> bool {
        Arc::ptr_eq(&self.count, &other.count)
    }
}

/// Guard tying one region's lifetime to one registry slot.
///
/// Not `Clone`: the only way to release the slot is to drop the guard.
#[derive(Debug)]
pub struct Registration {
    registry: LiveRegions,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.decrement();
    }
}
