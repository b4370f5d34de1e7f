//! The busy flag raised for the duration of an agent transition.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared read view of the busy flag.
///
/// Only the lifecycle manager raises it, through a [`BusyGuard`] held while
/// the lifecycle lock is held. Everyone else just reads.
#[derive(Debug, Clone, Default)]
pub struct BusyFlag(Arc<AtomicBool>);

impl BusyFlag {
    /// A lowered flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a transition is in progress.
    pub fn is_busy(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Raises the flag until the returned guard is dropped.
    pub(crate) fn raise(&self) -> BusyGuard {
        self.0.store(true, Ordering::SeqCst);
        BusyGuard(self.0.clone())
    }
}

/// Lowers the busy flag when dropped, on every exit path.
#[derive(Debug)]
#[must_use = "the flag is lowered as soon as the guard is dropped"]
pub struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}
