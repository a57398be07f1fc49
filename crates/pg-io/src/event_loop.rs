//! Event loops and the fixed-size pools that own them.
//!
//! An [`EventLoop`] is one worker thread driving a single-threaded tokio
//! runtime. Every task spawned on it runs on that thread, which gives each
//! channel bound to the loop single-threaded execution without a global
//! lock. An [`IoPool`] owns a fixed set of loops and hands them out round
//! robin.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, ThreadId};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::{Builder, Handle};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::activity::{ActivityGuard, ActivityTracker};
use crate::error::RegistryError;
use crate::thread::ThreadFactory;

#[derive(Debug, Clone, Copy, Default)]
struct Grace {
    quiet: Duration,
    cap: Duration,
}

/// A single worker thread running a current-thread tokio runtime.
#[derive(Clone)]
pub struct EventLoop {
    inner: Arc<EventLoopInner>,
}

struct EventLoopInner {
    name: String,
    handle: Handle,
    thread: ThreadId,
}

impl EventLoop {
    fn start(
        threads: &ThreadFactory,
        shutdown: watch::Receiver<Option<Grace>>,
        shared: Arc<PoolShared>,
    ) -> Result<Self, RegistryError> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        let handle = runtime.handle().clone();
        let running = shared.termination.enter();

        let thread = threads.spawn(move || run_loop(runtime, shutdown, running, shared))?;
        let name = thread.name().unwrap_or_default().to_string();
        tracing::trace!(thread = %name, "event loop started");

        Ok(Self {
            inner: Arc::new(EventLoopInner {
                name,
                handle,
                thread: thread.id(),
            }),
        })
    }

    /// Name of the worker thread.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Runtime handle for this loop.
    #[must_use]
    pub fn handle(&self) -> &Handle {
        &self.inner.handle
    }

    /// Whether the caller is running on this loop's thread.
    #[must_use]
    pub fn in_event_loop(&self) -> bool {
        thread::current().id() == self.inner.thread
    }

    /// Spawn a task on this loop.
    ///
    /// Tasks spawned after the loop stopped are cancelled immediately; their
    /// handle resolves to a cancellation error.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.inner.handle.spawn(future)
    }
}

impl fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoop")
            .field("name", &self.inner.name)
            .finish_non_exhaustive()
    }
}

fn run_loop(
    runtime: tokio::runtime::Runtime,
    mut shutdown: watch::Receiver<Option<Grace>>,
    running: ActivityGuard,
    shared: Arc<PoolShared>,
) {
    // A dropped pool handle without an explicit teardown stops immediately.
    let grace = runtime
        .block_on(async {
            shutdown
                .wait_for(Option::is_some)
                .await
                .ok()
                .and_then(|grace| *grace)
        })
        .unwrap_or_default();

    if !grace.quiet.is_zero() {
        runtime.block_on(tokio::time::sleep(grace.quiet));
    }
    runtime.shutdown_timeout(grace.cap.saturating_sub(grace.quiet));

    tracing::trace!(
        thread = thread::current().name().unwrap_or_default(),
        "event loop stopped"
    );
    drop(running);
    if shared.termination.is_idle() {
        shared.teardown.lock().take();
    }
}

/// State shared between a pool handle and its worker threads.
struct PoolShared {
    termination: ActivityTracker,
    /// Held while the pool is being torn down; dropped by the last worker out.
    teardown: Mutex<Option<ActivityGuard>>,
}

/// Completion of a pool teardown.
#[derive(Debug, Clone)]
pub struct Termination {
    tracker: ActivityTracker,
}

impl Termination {
    /// Whether every worker thread has stopped.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.tracker.is_idle()
    }

    /// Block until every worker thread stopped or `timeout` elapses.
    ///
    /// Returns `true` if the pool terminated in time.
    pub fn wait(&self, timeout: Duration) -> bool {
        self.tracker.wait_idle(timeout)
    }
}

/// A fixed-size set of event loops.
#[derive(Clone)]
pub struct IoPool {
    inner: Arc<IoPoolInner>,
}

struct IoPoolInner {
    loops: Vec<EventLoop>,
    next: AtomicUsize,
    shutdown: watch::Sender<Option<Grace>>,
    shared: Arc<PoolShared>,
}

impl IoPool {
    /// Start `threads` event loops, naming their threads through `factory`.
    ///
    /// If any loop fails to start, the loops already started are stopped.
    pub fn new(threads: usize, factory: &ThreadFactory) -> Result<Self, RegistryError> {
        if threads == 0 {
            return Err(RegistryError::Configuration(
                "an I/O pool needs at least one thread".to_string(),
            ));
        }

        let (shutdown, receiver) = watch::channel(None);
        let shared = Arc::new(PoolShared {
            termination: ActivityTracker::new(),
            teardown: Mutex::new(None),
        });

        let mut loops = Vec::with_capacity(threads);
        for _ in 0..threads {
            match EventLoop::start(factory, receiver.clone(), Arc::clone(&shared)) {
                Ok(event_loop) => loops.push(event_loop),
                Err(e) => {
                    shutdown.send_replace(Some(Grace::default()));
                    return Err(e);
                }
            }
        }

        Ok(Self {
            inner: Arc::new(IoPoolInner {
                loops,
                next: AtomicUsize::new(0),
                shutdown,
                shared,
            }),
        })
    }

    /// The next event loop, round robin.
    #[must_use]
    pub fn next(&self) -> EventLoop {
        let loops = &self.inner.loops;
        let idx = self.inner.next.fetch_add(1, Ordering::Relaxed) % loops.len();
        loops[idx].clone()
    }

    /// All event loops of this pool.
    #[must_use]
    pub fn event_loops(&self) -> &[EventLoop] {
        &self.inner.loops
    }

    /// Number of worker threads.
    #[must_use]
    pub fn thread_count(&self) -> usize {
        self.inner.loops.len()
    }

    /// Whether teardown has begun.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutdown.borrow().is_some()
    }

    /// Whether both handles refer to the same pool.
    #[must_use]
    pub fn ptr_eq(&self, other: &IoPool) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Begin a graceful teardown.
    ///
    /// Each loop keeps running for `quiet_period`, then stops; tasks still
    /// pending at that point are dropped, and the whole teardown is bounded
    /// by `timeout`. Does not block. Calling it again only returns the
    /// existing [`Termination`].
    pub fn shutdown_gracefully(&self, quiet_period: Duration, timeout: Duration) -> Termination {
        self.shutdown_tracked(quiet_period, timeout, None)
    }

    /// Like [`shutdown_gracefully`](Self::shutdown_gracefully), holding
    /// `in_flight` until the last worker thread has exited.
    pub(crate) fn shutdown_tracked(
        &self,
        quiet_period: Duration,
        timeout: Duration,
        in_flight: Option<ActivityGuard>,
    ) -> Termination {
        let grace = Grace {
            quiet: quiet_period,
            cap: timeout.max(quiet_period),
        };
        let inner = &self.inner;
        let first = inner.shutdown.send_if_modified(|state| {
            if state.is_some() {
                return false;
            }
            if in_flight.is_some() && !inner.shared.termination.is_idle() {
                *inner.shared.teardown.lock() = in_flight;
            }
            *state = Some(grace);
            true
        });
        if first {
            tracing::debug!(
                threads = inner.loops.len(),
                quiet_ms = grace.quiet.as_millis() as u64,
                timeout_ms = grace.cap.as_millis() as u64,
                "I/O pool shutting down"
            );
        }
        self.termination()
    }

    /// Termination handle for this pool.
    #[must_use]
    pub fn termination(&self) -> Termination {
        Termination {
            tracker: self.inner.shared.termination.clone(),
        }
    }
}

impl fmt::Debug for IoPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoPool")
            .field("threads", &self.inner.loops.len())
            .field("shutting_down", &self.is_shutting_down())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn factory() -> ThreadFactory {
        ThreadFactory::new("test-loop", ActivityTracker::new())
    }

    #[test]
    fn test_round_robin() {
        let pool = IoPool::new(3, &factory()).unwrap();
        let names: Vec<_> = (0..4).map(|_| pool.next().name().to_string()).collect();
        assert_eq!(
            names,
            ["test-loop (1)", "test-loop (2)", "test-loop (3)", "test-loop (1)"]
        );
        assert!(pool.shutdown_gracefully(Duration::ZERO, Duration::from_millis(50))
            .wait(Duration::from_secs(5)));
    }

    #[test]
    fn test_tasks_run_on_loop_thread() {
        let pool = IoPool::new(1, &factory()).unwrap();
        let event_loop = pool.next();
        assert!(!event_loop.in_event_loop());

        let (tx, rx) = mpsc::channel();
        let probe = event_loop.clone();
        event_loop.spawn(async move {
            tx.send((thread::current().name().map(str::to_string), probe.in_event_loop()))
                .ok();
        });
        let (name, inside) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(name.as_deref(), Some("test-loop (1)"));
        assert!(inside);
        pool.shutdown_gracefully(Duration::ZERO, Duration::ZERO);
    }

    #[test]
    fn test_zero_threads_rejected() {
        assert!(matches!(
            IoPool::new(0, &factory()),
            Err(RegistryError::Configuration(_))
        ));
    }

    #[test]
    fn test_graceful_shutdown_terminates() {
        let live = ActivityTracker::new();
        let pool = IoPool::new(2, &ThreadFactory::new("drain", live.clone())).unwrap();
        assert!(!pool.is_shutting_down());

        let termination = pool.shutdown_gracefully(Duration::from_millis(10), Duration::from_millis(100));
        assert!(pool.is_shutting_down());
        assert!(termination.wait(Duration::from_secs(5)));
        assert!(termination.is_terminated());
        assert!(live.wait_idle(Duration::from_secs(5)));
    }

    #[test]
    fn test_in_flight_guard_released_by_last_worker() {
        let in_flight = ActivityTracker::new();
        let pool = IoPool::new(2, &factory()).unwrap();
        let termination =
            pool.shutdown_tracked(Duration::ZERO, Duration::from_millis(50), Some(in_flight.enter()));
        assert!(termination.wait(Duration::from_secs(5)));
        assert!(in_flight.wait_idle(Duration::from_secs(5)));
    }

    #[test]
    fn test_dropping_pool_stops_loops() {
        let live = ActivityTracker::new();
        let pool = IoPool::new(1, &ThreadFactory::new("dropped", live.clone())).unwrap();
        drop(pool);
        assert!(live.wait_idle(Duration::from_secs(5)));
    }
}
