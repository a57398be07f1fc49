//! Process-wide registry of shared, reference-counted I/O pools.
//!
//! Sessions that choose the same [`PoolKey`] share one [`IoPool`]. Each
//! [`SharedRegistry::acquire`] hands out a [`Ref`]; the pool is built the
//! first time someone asks for it and torn down when the last `Ref` for the
//! key is released. Entries are never removed, so acquiring again after a
//! teardown rebuilds the pool under the same entry.
//!
//! Every mutation of entry state (create, increment, decrement, build,
//! teardown) happens under one registry-wide lock.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::activity::ActivityTracker;
use crate::config::RegistryConfig;
use crate::error::RegistryError;
use crate::event_loop::{IoPool, Termination};
use crate::thread::ThreadFactory;

/// Identifies an I/O pool implementation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolKey(Cow<'static, str>);

impl PoolKey {
    /// The built-in pool of single-threaded tokio event loops.
    pub const EVENT_LOOP: PoolKey = PoolKey(Cow::Borrowed("event-loop"));

    /// A key with a static name.
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    /// A key with a runtime name, e.g. parsed from configuration.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self(Cow::Owned(name.into()))
    }

    /// The key's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl Default for PoolKey {
    fn default() -> Self {
        Self::EVENT_LOOP
    }
}

impl fmt::Display for PoolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Builds the pool for one key.
pub trait PoolFactory: Send + Sync {
    /// Build a pool bounded by `max_threads`, creating its threads through `threads`.
    ///
    /// Returning [`RegistryError::Configuration`] marks the configuration as
    /// unusable; it is not retried automatically.
    fn build(&self, max_threads: usize, threads: &ThreadFactory) -> Result<IoPool, RegistryError>;
}

impl<F> PoolFactory for F
where
    F: Fn(usize, &ThreadFactory) -> Result<IoPool, RegistryError> + Send + Sync,
{
    fn build(&self, max_threads: usize, threads: &ThreadFactory) -> Result<IoPool, RegistryError> {
        self(max_threads, threads)
    }
}

/// Factory for [`PoolKey::EVENT_LOOP`]: one event loop per allowed thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct EventLoopPoolFactory;

impl PoolFactory for EventLoopPoolFactory {
    fn build(&self, max_threads: usize, threads: &ThreadFactory) -> Result<IoPool, RegistryError> {
        if max_threads == 0 {
            return Err(RegistryError::Configuration(
                "max_threads must be at least 1".to_string(),
            ));
        }
        IoPool::new(max_threads, threads)
    }
}

/// Builder for a [`SharedRegistry`] with custom pool factories.
pub struct RegistryBuilder {
    config: RegistryConfig,
    factories: HashMap<PoolKey, Arc<dyn PoolFactory>>,
}

impl RegistryBuilder {
    /// Use `config` for timing and thread naming.
    #[must_use]
    pub fn config(mut self, config: RegistryConfig) -> Self {
        self.config = config;
        self
    }

    /// Register (or replace) the factory for `key`.
    #[must_use]
    pub fn register(mut self, key: PoolKey, factory: impl PoolFactory + 'static) -> Self {
        self.factories.insert(key, Arc::new(factory));
        self
    }

    /// Build the registry.
    #[must_use]
    pub fn build(self) -> SharedRegistry {
        SharedRegistry {
            inner: Arc::new(RegistryInner {
                config: self.config,
                factories: self.factories,
                entries: Mutex::new(HashMap::new()),
                live_threads: ActivityTracker::new(),
                teardowns: ActivityTracker::new(),
            }),
        }
    }
}

/// Registry of shared I/O pools.
///
/// Cloning is cheap; clones refer to the same registry.
#[derive(Clone)]
pub struct SharedRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    config: RegistryConfig,
    factories: HashMap<PoolKey, Arc<dyn PoolFactory>>,
    entries: Mutex<HashMap<PoolKey, EntryState>>,
    /// Worker threads still running, across all pools.
    live_threads: ActivityTracker,
    /// Teardowns begun whose worker threads have not all exited.
    teardowns: ActivityTracker,
}

struct EntryState {
    max_threads: usize,
    pool: Option<IoPool>,
    count: usize,
    teardowns: usize,
}

static GLOBAL: Lazy<SharedRegistry> = Lazy::new(|| SharedRegistry::new(RegistryConfig::default()));

impl SharedRegistry {
    /// A registry with the built-in [`PoolKey::EVENT_LOOP`] factory.
    #[must_use]
    pub fn new(config: RegistryConfig) -> Self {
        Self::builder()
            .config(config)
            .register(PoolKey::EVENT_LOOP, EventLoopPoolFactory)
            .build()
    }

    /// A registry with no factories registered.
    #[must_use]
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder {
            config: RegistryConfig::default(),
            factories: HashMap::new(),
        }
    }

    /// The lazily created process-wide registry.
    #[must_use]
    pub fn global() -> &'static SharedRegistry {
        &GLOBAL
    }

    /// Registry configuration.
    #[must_use]
    pub fn config(&self) -> &RegistryConfig {
        &self.inner.config
    }

    /// Take a reference on the entry for `key`, creating it if needed.
    ///
    /// The first acquisition of a key fixes its `max_threads`. Never fails;
    /// an unusable key is reported when the pool is first requested.
    pub fn acquire(&self, key: PoolKey, max_threads: usize) -> Ref {
        let mut entries = self.inner.entries.lock();
        let state = entries.entry(key.clone()).or_insert_with(|| EntryState {
            max_threads,
            pool: None,
            count: 0,
            teardowns: 0,
        });
        state.count += 1;
        tracing::trace!(key = %key, count = state.count, "I/O pool reference acquired");
        drop(entries);

        Ref {
            entry: SharedEntry {
                registry: Arc::clone(&self.inner),
                key,
            },
            released: AtomicBool::new(false),
        }
    }

    /// Tear down every live pool and wait, bounded, for full quiescence.
    ///
    /// Intended for process exit, after sessions have been released; pools
    /// are torn down even if references remain. Waits up to
    /// [`RegistryConfig::entry_drain`] on each pool, then up to
    /// [`RegistryConfig::facility_drain`] for all worker threads and
    /// in-flight teardowns to finish. Timeouts are logged and swallowed.
    ///
    /// Returns `true` if everything went idle in time.
    pub fn wait_for_shutdown(&self) -> bool {
        let config = &self.inner.config;
        let terminations: Vec<(PoolKey, Termination)> = {
            let mut entries = self.inner.entries.lock();
            entries
                .iter_mut()
                .filter_map(|(key, state)| {
                    self.inner.teardown(key, state).map(|t| (key.clone(), t))
                })
                .collect()
        };

        let mut quiescent = true;
        for (key, termination) in &terminations {
            if !termination.wait(config.entry_drain) {
                tracing::debug!(key = %key, "I/O pool did not terminate within drain period");
                quiescent = false;
            }
        }

        let deadline = Instant::now() + config.facility_drain;
        let threads_idle = self
            .inner
            .live_threads
            .wait_idle(deadline.saturating_duration_since(Instant::now()));
        let teardowns_idle = self
            .inner
            .teardowns
            .wait_idle(deadline.saturating_duration_since(Instant::now()));
        if !threads_idle || !teardowns_idle {
            tracing::debug!(
                live_threads = self.inner.live_threads.active(),
                teardowns = self.inner.teardowns.active(),
                "I/O facilities still active after drain period"
            );
        }
        quiescent && threads_idle && teardowns_idle
    }

    /// Worker threads currently running across all pools.
    #[must_use]
    pub fn live_threads(&self) -> usize {
        self.inner.live_threads.active()
    }
}

impl fmt::Debug for SharedRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<_> = self.inner.factories.keys().map(PoolKey::name).collect();
        keys.sort_unstable();
        f.debug_struct("SharedRegistry")
            .field("factories", &keys)
            .field("live_threads", &self.inner.live_threads.active())
            .finish()
    }
}

impl RegistryInner {
    /// Begin graceful teardown of the entry's pool, if it has one.
    fn teardown(&self, key: &PoolKey, state: &mut EntryState) -> Option<Termination> {
        let pool = state.pool.take()?;
        state.teardowns += 1;
        tracing::debug!(key = %key, threads = pool.thread_count(), "tearing down I/O pool");
        Some(pool.shutdown_tracked(
            self.config.quiet_period,
            self.config.shutdown_timeout,
            Some(self.teardowns.enter()),
        ))
    }

    fn release(&self, key: &PoolKey) {
        let mut entries = self.entries.lock();
        let Some(state) = entries.get_mut(key) else {
            return;
        };
        match state.count {
            0 => tracing::warn!(key = %key, "released an I/O pool with no outstanding references"),
            1 => {
                state.count = 0;
                if self.teardown(key, state).is_none() {
                    // Never materialized; the transition still counts.
                    state.teardowns += 1;
                }
            }
            _ => state.count -= 1,
        }
        tracing::trace!(key = %key, count = state.count, "I/O pool reference released");
    }

    fn pool(&self, key: &PoolKey) -> Result<IoPool, RegistryError> {
        let mut entries = self.entries.lock();
        let state = entries
            .get_mut(key)
            .filter(|state| state.count > 0)
            .ok_or_else(|| RegistryError::NotAcquired(key.clone()))?;

        if let Some(pool) = &state.pool {
            return Ok(pool.clone());
        }

        let factory = self
            .factories
            .get(key)
            .ok_or_else(|| RegistryError::UnsupportedPoolKind(key.clone()))?;
        let threads = ThreadFactory::new(self.config.thread_name.as_str(), self.live_threads.clone());
        let pool = factory.build(state.max_threads, &threads)?;

        tracing::info!(key = %key, threads = pool.thread_count(), "I/O pool started");
        state.pool = Some(pool.clone());
        Ok(pool)
    }
}

/// Read-only view of one registry entry.
#[derive(Clone)]
pub struct SharedEntry {
    registry: Arc<RegistryInner>,
    key: PoolKey,
}

impl SharedEntry {
    /// The entry's key.
    #[must_use]
    pub fn key(&self) -> &PoolKey {
        &self.key
    }

    /// The pool, built on first use.
    ///
    /// Fails with a configuration error when no factory is registered for
    /// the key or the factory rejects the entry's settings, and with
    /// [`RegistryError::NotAcquired`] when no reference is outstanding.
    pub fn pool(&self) -> Result<IoPool, RegistryError> {
        self.registry.pool(&self.key)
    }

    /// Thread bound fixed by the first acquisition.
    #[must_use]
    pub fn max_threads(&self) -> usize {
        self.with_state(|s| s.max_threads)
    }

    /// Outstanding references.
    #[must_use]
    pub fn ref_count(&self) -> usize {
        self.with_state(|s| s.count)
    }

    /// Whether the pool is currently built.
    #[must_use]
    pub fn is_materialized(&self) -> bool {
        self.with_state(|s| s.pool.is_some())
    }

    /// Number of teardowns this entry went through.
    #[must_use]
    pub fn teardown_count(&self) -> usize {
        self.with_state(|s| s.teardowns)
    }

    fn with_state<T: Default>(&self, f: impl FnOnce(&EntryState) -> T) -> T {
        self.registry
            .entries
            .lock()
            .get(&self.key)
            .map(f)
            .unwrap_or_default()
    }
}

impl fmt::Debug for SharedEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedEntry")
            .field("key", &self.key)
            .field("ref_count", &self.ref_count())
            .field("materialized", &self.is_materialized())
            .finish()
    }
}

/// One reference on a shared pool entry.
///
/// Released explicitly with [`release`](Self::release) or on drop; only the
/// first release has an effect.
pub struct Ref {
    entry: SharedEntry,
    released: AtomicBool,
}

impl Ref {
    /// The entry this reference counts against.
    #[must_use]
    pub fn get(&self) -> &SharedEntry {
        &self.entry
    }

    /// The entry's pool, unless this reference was released.
    pub fn pool(&self) -> Result<IoPool, RegistryError> {
        if self.is_released() {
            return Err(RegistryError::Released);
        }
        self.entry.pool()
    }

    /// Give up this reference. Tears the pool down if it was the last one.
    pub fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        self.entry.registry.release(&self.entry.key);
    }

    /// Whether this reference was released.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }
}

impl Drop for Ref {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ref")
            .field("key", &self.entry.key)
            .field("released", &self.is_released())
            .finish()
    }
}
