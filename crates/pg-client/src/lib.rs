//! # pg-client
//!
//! PostgreSQL connection sessions.
//!
//! A [`ServerConnection`] owns one channel to a backend and one reference to
//! the shared I/O pool that channel runs on. Query layers drive it through
//! the [`RequestExecutor`] trait: each operation becomes a protocol request,
//! submitted in order and completed on the channel's event loop.
//!
//! ## Lifecycle
//!
//! ```text
//! connect_tcp ──> Open ──shutdown()──> Terminating ──> Closing ──> Closed
//!                   └─────kill()──────────────────────────┘
//! ```
//!
//! `shutdown` writes Terminate before closing; `kill` closes at once. Both
//! release the pool reference exactly once, and the last release of a pool
//! begins its graceful teardown.
//!
//! ## Example
//!
//! ```rust,ignore
//! use pg_client::{Config, RequestExecutor, connect_tcp};
//! use pg_codec::response_channel;
//! use pg_io::SharedRegistry;
//!
//! let config = Config::from_connection_string("sqlTrace=true;ioThreads=2")?;
//! let session = connect_tcp(config, SharedRegistry::global(), addr).await?;
//!
//! let (handler, rows) = response_channel();
//! session.query("SELECT 1", handler);
//! let batches = rows.await??;
//!
//! session.shutdown().await?;
//! SharedRegistry::global().wait_for_shutdown();
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod connect;
pub mod connection;
pub mod error;
pub mod executor;
pub mod params;
pub mod state;
pub mod trace;

pub use config::Config;
pub use connect::connect_tcp;
pub use connection::ServerConnection;
pub use error::{Error, Result};
pub use executor::RequestExecutor;
pub use params::{bind_parameters, parameter_types};
pub use state::SessionState;
pub use trace::SqlTrace;
