//! # pg-io
//!
//! Shared I/O infrastructure for PostgreSQL sessions.
//!
//! Event-loop pools are expensive, so every session that picks the same
//! pool kind shares one. The [`SharedRegistry`] reference-counts pools per
//! [`PoolKey`], builds each pool lazily on first use, and tears it down
//! gracefully when the last [`Ref`] is released.
//!
//! ## Example
//!
//! ```
//! use pg_io::{PoolKey, RegistryConfig, SharedRegistry};
//!
//! let registry = SharedRegistry::new(RegistryConfig::default());
//! let shared = registry.acquire(PoolKey::EVENT_LOOP, 2);
//! let pool = shared.pool().unwrap();
//! assert_eq!(pool.thread_count(), 2);
//! assert_eq!(pool.next().name(), "PG I/O (1)");
//!
//! // Last reference out: the pool shuts down gracefully.
//! shared.release();
//! assert!(pool.is_shutting_down());
//! registry.wait_for_shutdown();
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod activity;
pub mod config;
pub mod error;
pub mod event_loop;
pub mod registry;
pub mod thread;

pub use activity::{ActivityGuard, ActivityTracker};
pub use config::RegistryConfig;
pub use error::RegistryError;
pub use event_loop::{EventLoop, IoPool, Termination};
pub use registry::{
    EventLoopPoolFactory, PoolFactory, PoolKey, Ref, RegistryBuilder, SharedEntry, SharedRegistry,
};
pub use thread::ThreadFactory;
