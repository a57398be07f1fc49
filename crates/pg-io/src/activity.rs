//! Counting activity trackers with bounded idle waits.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// Counts live units of work (threads, teardowns) and lets a caller wait,
/// with a timeout, until none are left.
#[derive(Clone, Default)]
pub struct ActivityTracker {
    inner: Arc<TrackerInner>,
}

#[derive(Default)]
struct TrackerInner {
    active: Mutex<usize>,
    idle: Condvar,
}

impl ActivityTracker {
    /// A tracker with nothing active.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one unit of activity; it ends when the guard drops.
    #[must_use = "activity ends as soon as the guard is dropped"]
    pub fn enter(&self) -> ActivityGuard {
        *self.inner.active.lock() += 1;
        ActivityGuard {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Number of active units.
    #[must_use]
    pub fn active(&self) -> usize {
        *self.inner.active.lock()
    }

    /// Whether nothing is active.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.active() == 0
    }

    /// Block until nothing is active or `timeout` elapses.
    ///
    /// Returns `true` if the tracker went idle.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let mut active = self.inner.active.lock();
        if *active == 0 {
            return true;
        }
        self.inner
            .idle
            .wait_while_for(&mut active, |n| *n > 0, timeout);
        *active == 0
    }
}

impl fmt::Debug for ActivityTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActivityTracker")
            .field("active", &self.active())
            .finish()
    }
}

/// One unit of activity registered with an [`ActivityTracker`].
pub struct ActivityGuard {
    inner: Arc<TrackerInner>,
}

impl Drop for ActivityGuard {
    fn drop(&mut self) {
        let mut active = self.inner.active.lock();
        *active = active.saturating_sub(1);
        if *active == 0 {
            self.inner.idle.notify_all();
        }
    }
}

impl fmt::Debug for ActivityGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActivityGuard").finish_non_exhaustive()
    }
}
