//! # pg-protocol
//!
//! Pure implementation of the PostgreSQL frontend/backend protocol, version 3.
//!
//! This crate provides the message structures exchanged between a client and
//! a PostgreSQL backend, along with their wire encoding and decoding.
//!
//! ## Design Philosophy
//!
//! This crate is intentionally IO-agnostic. It contains no networking logic and
//! makes no assumptions about the async runtime. Higher-level crates build upon
//! this foundation to provide channels, framing, and sessions.
//!
//! ## Example
//!
//! ```
//! use bytes::BytesMut;
//! use pg_protocol::frontend;
//!
//! let mut buf = BytesMut::new();
//! frontend::query(&mut buf, "SELECT 1").unwrap();
//! frontend::terminate(&mut buf);
//!
//! assert_eq!(buf[0], b'Q');
//! assert_eq!(&buf[buf.len() - 5..], &[b'X', 0, 0, 0, 4]);
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod backend;
pub mod codec;
pub mod error;
pub mod frontend;
pub mod types;

pub use backend::{BackendMessage, FieldDescription, ServerNotice};
pub use error::ProtocolError;
pub use frontend::FrontendMessage;
pub use types::{FieldFormat, Oid, ServerObjectType, TransactionStatus};

/// Size of a message header: one tag byte plus a four byte length.
pub const MESSAGE_HEADER_SIZE: usize = 5;

/// Largest message body this crate will accept by default (64 MiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;
