//! Named worker thread creation.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, Thread};

use crate::activity::ActivityTracker;

/// Creates worker threads named `"<base> (<n>)"`, with `n` counting from 1.
///
/// Threads are detached: they never keep the process alive on their own.
/// Every thread is registered with the registry's live-thread tracker until
/// it exits.
#[derive(Debug, Clone)]
pub struct ThreadFactory {
    base: Arc<str>,
    next_index: Arc<AtomicUsize>,
    live: ActivityTracker,
}

impl ThreadFactory {
    /// A factory whose threads are tracked by `live`.
    #[must_use]
    pub fn new(base: impl Into<Arc<str>>, live: ActivityTracker) -> Self {
        Self {
            base: base.into(),
            next_index: Arc::new(AtomicUsize::new(1)),
            live,
        }
    }

    /// Base name of the threads.
    #[must_use]
    pub fn base_name(&self) -> &str {
        &self.base
    }

    /// Reserve the next thread name.
    pub fn next_name(&self) -> String {
        let n = self.next_index.fetch_add(1, Ordering::Relaxed);
        format!("{} ({n})", self.base)
    }

    /// Spawn a detached, tracked worker thread running `f`.
    pub fn spawn<F>(&self, f: F) -> io::Result<Thread>
    where
        F: FnOnce() + Send + 'static,
    {
        let name = self.next_name();
        let live = self.live.enter();
        let handle = thread::Builder::new().name(name).spawn(move || {
            let _live = live;
            f();
        })?;
        Ok(handle.thread().clone())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn test_sequential_names() {
        let factory = ThreadFactory::new("PG I/O", ActivityTracker::new());
        assert_eq!(factory.next_name(), "PG I/O (1)");
        assert_eq!(factory.next_name(), "PG I/O (2)");
    }

    #[test]
    fn test_spawned_thread_is_named_and_tracked() {
        let live = ActivityTracker::new();
        let factory = ThreadFactory::new("worker", live.clone());
        let (tx, rx) = mpsc::channel();
        let thread = factory
            .spawn(move || {
                let name = thread::current().name().map(str::to_string);
                tx.send(name).ok();
            })
            .unwrap();
        assert_eq!(thread.name(), Some("worker (1)"));
        assert_eq!(rx.recv().unwrap().as_deref(), Some("worker (1)"));
        assert!(live.wait_idle(Duration::from_secs(5)));
    }
}
