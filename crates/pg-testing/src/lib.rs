//! # pg-testing
//!
//! Test infrastructure for PostgreSQL transport development.
//!
//! ## Features
//!
//! - Mock PostgreSQL backend for tests (no database required)
//! - A journal of every frontend message the mock receives
//! - In-memory trace sinks
//!
//! ## Mock Backend Example
//!
//! ```rust,ignore
//! use pg_testing::{MockBackend, MockColumn, MockResponse};
//!
//! #[tokio::test]
//! async fn test_with_mock_backend() {
//!     let backend = MockBackend::builder()
//!         .with_response(
//!             "SELECT id, name FROM users",
//!             MockResponse::rows(
//!                 vec![MockColumn::int4("id"), MockColumn::text("name")],
//!                 vec![vec![Some("1".into()), Some("Alice".into())]],
//!             ),
//!         )
//!         .build()
//!         .await
//!         .unwrap();
//!
//!     // Connect to backend.addr(), then inspect backend.received()
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod fixtures;
pub mod mock_backend;

pub use fixtures::{FailingSink, TraceBuffer};
pub use mock_backend::{
    BackendEvent, MockBackend, MockBackendBuilder, MockBackendConfig, MockBackendError,
    MockColumn, MockResponse,
};
