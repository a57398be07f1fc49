//! # pg-codec
//!
//! Async channel layer for PostgreSQL connections.
//!
//! This crate turns a raw byte stream into an ordered request pipeline: it
//! frames frontend and backend messages, writes requests in the order they
//! were queued, and routes every backend message to the request it answers.
//!
//! ## Architecture
//!
//! ```text
//! Channel::write(ServerRequest)
//!     → writer task (FrontendCodec) → TCP
//!     → reader task (BackendCodec) → MessageDispatch → request handler
//! ```
//!
//! A [`Channel`] is bound to one [`pg_io::EventLoop`]. Its reader, writer
//! and every request handler run on that loop's thread.
//!
//! ## Requests
//!
//! Each [`ServerRequest`] ends its message sequence with Sync (or is a
//! single-message protocol operation), so the backend answers it with
//! exactly one ReadyForQuery. Dispatch completes the request there.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod channel;
pub mod codec;
pub mod dispatch;
pub mod error;
pub mod framed;
pub mod request;

pub use channel::{ByteAllocator, Channel, ChannelConfig, ChannelFuture, Outbound};
pub use codec::{BackendCodec, FrontendCodec};
pub use dispatch::{DispatchHandle, MAX_PENDING_NOTIFICATIONS, Notification};
pub use error::{ChannelError, CodecError, RequestError};
pub use framed::{MessageReader, MessageWriter};
pub use request::{
    ExecuteHandler, ExtendedQueryHandler, FunctionCallHandler, Handler, Parameters,
    PrepareHandler, PreparedDescription, QueryHandler, ResultBatch, ResumeHandler,
    ServerRequest, SynchronizedHandler, handler, response_channel,
};
