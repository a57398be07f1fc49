//! The request-executor contract.
//!
//! Query APIs above the transport talk to a session only through this
//! trait. Every operation queues one protocol request; its handler is
//! invoked later on the session's event loop.

use std::net::SocketAddr;

use bytes::Bytes;
use pg_codec::{
    ByteAllocator, ExecuteHandler, ExtendedQueryHandler, FunctionCallHandler, Parameters,
    PrepareHandler, QueryHandler, ResumeHandler, SynchronizedHandler,
};
use pg_io::EventLoop;
use pg_protocol::{FieldFormat, Oid, ServerObjectType, TransactionStatus};

use crate::error::Result;

/// Executes protocol requests on one backend session.
pub trait RequestExecutor: Send + Sync {
    /// Run `sql` with the simple query protocol.
    fn query(&self, sql: &str, handler: QueryHandler);

    /// Run `sql` once with the extended protocol through the unnamed
    /// statement, binding `portal`.
    ///
    /// `max_rows` of zero fetches every row; values above `i32::MAX` are
    /// sent as `i32::MAX`.
    fn query_extended(
        &self,
        sql: &str,
        portal: &str,
        parameters: Parameters,
        max_rows: u32,
        handler: ExtendedQueryHandler,
    );

    /// Prepare `sql` as `statement`.
    fn prepare(&self, statement: &str, sql: &str, parameter_types: &[Oid], handler: PrepareHandler);

    /// Bind `statement` to `portal` and execute it.
    ///
    /// `max_rows` of zero fetches every row; values above `i32::MAX` are
    /// sent as `i32::MAX`.
    fn execute(
        &self,
        portal: &str,
        statement: &str,
        parameters: Parameters,
        max_rows: u32,
        handler: ExecuteHandler,
    );

    /// Fetch up to `max_rows` more rows from a suspended portal.
    ///
    /// Zero fetches the rest; values above `i32::MAX` are sent as
    /// `i32::MAX`.
    fn resume(&self, portal: &str, max_rows: u32, handler: ResumeHandler);

    /// Close `portal`.
    fn finish(&self, portal: &str, handler: SynchronizedHandler);

    /// Execute `statement` without parameters, discarding its results.
    fn lazy_execute(&self, statement: &str);

    /// Call the server function `function`.
    fn call(
        &self,
        function: Oid,
        argument_formats: Vec<FieldFormat>,
        arguments: Vec<Option<Bytes>>,
        handler: FunctionCallHandler,
    );

    /// Close a statement or portal without waiting for the outcome.
    fn close(&self, target: ServerObjectType, name: &str);

    /// Buffer allocator of the session's channel.
    fn allocator(&self) -> ByteAllocator;

    /// Address of the backend.
    fn remote_address(&self) -> SocketAddr;

    /// Event loop running the session's I/O.
    fn io_executor(&self) -> &EventLoop;

    /// Transaction status from the latest ReadyForQuery.
    ///
    /// Fails with [`Error::ChannelClosed`](crate::Error::ChannelClosed) once
    /// the channel is inactive.
    fn transaction_status(&self) -> Result<TransactionStatus>;

    /// Whether the channel is open.
    fn is_connected(&self) -> bool;
}
