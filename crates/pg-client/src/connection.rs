//! The per-backend session.

use std::fmt;
use std::io::{self, Write};
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use pg_codec::{
    ByteAllocator, Channel, ChannelFuture, ExecuteHandler, ExtendedQueryHandler,
    FunctionCallHandler, MAX_PENDING_NOTIFICATIONS, Notification, Outbound, Parameters,
    PrepareHandler, QueryHandler, ResumeHandler, ServerRequest, SynchronizedHandler,
};
use pg_io::{EventLoop, Ref};
use pg_protocol::{FieldFormat, Oid, ServerObjectType, TransactionStatus};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::executor::RequestExecutor;
use crate::state::SessionState;
use crate::trace::SqlTrace;

/// A session with one backend.
///
/// The session owns its channel and a reference to the shared I/O pool the
/// channel runs on. Requests may be submitted from any thread; they are
/// written in the order [`submit`](Self::submit) was entered.
///
/// Dropping a session closes its channel and releases its pool reference
/// without sending Terminate. Use [`shutdown`](Self::shutdown) for a clean
/// end of session.
pub struct ServerConnection {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    config: Config,
    channel: Channel,
    shared_ref: Ref,
    submit_lock: Mutex<()>,
    sql_trace: SqlTrace,
    state: Mutex<SessionState>,
}

impl SessionInner {
    fn kill(&self) -> ChannelFuture {
        {
            let mut state = self.state.lock();
            if *state != SessionState::Closed {
                *state = SessionState::Closing;
            }
        }
        self.shared_ref.release();
        tracing::debug!(remote = %self.channel.remote_address(), "closing session channel");
        self.channel.close()
    }
}

impl ServerConnection {
    /// Bind an open channel and a pool reference into a session.
    ///
    /// Trace sinks enabled in `config` write to stdout.
    pub fn new(config: Config, channel: Channel, shared_ref: Ref) -> Self {
        let sql_sink = config.sql_trace.then(stdout_sink);
        if config.protocol_trace {
            channel.dispatch().set_protocol_trace(Some(stdout_sink()));
        }
        tracing::debug!(
            remote = %channel.remote_address(),
            event_loop = channel.event_loop().name(),
            pool = %shared_ref.get().key(),
            "session open"
        );
        Self {
            inner: Arc::new(SessionInner {
                config,
                channel,
                shared_ref,
                submit_lock: Mutex::new(()),
                sql_trace: SqlTrace::new(sql_sink),
                state: Mutex::new(SessionState::Open),
            }),
        }
    }

    /// The configuration this session was opened with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Install or remove the SQL trace sink.
    pub fn set_sql_trace(&self, sink: Option<Box<dyn Write + Send>>) {
        self.inner.sql_trace.set_sink(sink);
    }

    /// Install or remove the protocol message trace sink.
    pub fn set_protocol_trace(&self, sink: Option<Box<dyn Write + Send>>) {
        self.inner.channel.dispatch().set_protocol_trace(sink);
    }

    /// Queue `request` on the channel.
    ///
    /// Concurrent callers are serialized; requests are written in the order
    /// they entered this method. On a closed channel the request's handler
    /// completes with a channel-closed error.
    pub fn submit(&self, request: ServerRequest) {
        let _ordered = self.inner.submit_lock.lock();
        tracing::trace!(request = request.name(), "submit");
        self.inner.channel.write_void(request);
    }

    /// End the session cleanly.
    ///
    /// Stops reading, writes Terminate, then closes the channel whatever
    /// the outcome of that write. The returned future reports only the
    /// close. On an inactive channel nothing is written.
    pub fn shutdown(&self) -> ChannelFuture {
        let inner = &self.inner;
        if !inner.channel.is_active() {
            tracing::debug!("shutdown of an inactive session");
            {
                let mut state = inner.state.lock();
                if *state != SessionState::Closed {
                    *state = SessionState::Closing;
                }
            }
            inner.shared_ref.release();
            return ChannelFuture::ready(Ok(()));
        }

        {
            let mut state = inner.state.lock();
            if *state != SessionState::Open {
                return inner.channel.close_future();
            }
            *state = SessionState::Terminating;
        }

        inner.channel.config().set_auto_read(false);
        let terminate = inner.channel.write(Outbound::Terminate);
        let session = Arc::clone(inner);
        let continuation = inner.channel.event_loop().spawn(async move {
            if let Err(e) = terminate.await {
                tracing::warn!(error = %e, "terminate write failed, closing anyway");
            }
            session.kill().await
        });

        let fallback = Arc::clone(inner);
        ChannelFuture::new(async move {
            match continuation.await {
                Ok(result) => result,
                // The event loop stopped before the continuation ran.
                Err(_) => fallback.kill().await,
            }
        })
    }

    /// Release the pool reference and close the channel immediately.
    pub fn kill(&self) -> ChannelFuture {
        self.inner.kill()
    }

    /// Lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        if self.inner.channel.is_closed() {
            return SessionState::Closed;
        }
        *self.inner.state.lock()
    }

    /// The pool reference this session holds.
    #[must_use]
    pub fn shared_ref(&self) -> &Ref {
        &self.inner.shared_ref
    }

    /// The session's channel.
    #[must_use]
    pub fn channel(&self) -> &Channel {
        &self.inner.channel
    }

    /// Drain the LISTEN/NOTIFY deliveries received so far, oldest first.
    ///
    /// Up to [`MAX_PENDING_NOTIFICATIONS`] are buffered between calls;
    /// beyond that the oldest are dropped.
    pub fn take_notifications(&self) -> Vec<Notification> {
        self.inner.channel.dispatch().take_notifications()
    }

    /// This session as a request executor.
    #[must_use]
    pub fn request_executor(&self) -> &dyn RequestExecutor {
        self
    }
}

impl RequestExecutor for ServerConnection {
    fn query(&self, sql: &str, handler: QueryHandler) {
        self.inner.sql_trace.query(sql);
        self.submit(ServerRequest::Query {
            sql: sql.to_string(),
            handler,
        });
    }

    fn query_extended(
        &self,
        sql: &str,
        portal: &str,
        parameters: Parameters,
        max_rows: u32,
        handler: ExtendedQueryHandler,
    ) {
        self.inner.sql_trace.query(sql);
        self.submit(ServerRequest::ExecuteQuery {
            sql: sql.to_string(),
            portal: portal.to_string(),
            parameters,
            max_rows,
            handler,
        });
    }

    fn prepare(&self, statement: &str, sql: &str, parameter_types: &[Oid], handler: PrepareHandler) {
        self.inner.sql_trace.prepare(statement, sql);
        self.submit(ServerRequest::Prepare {
            statement: statement.to_string(),
            sql: sql.to_string(),
            parameter_types: parameter_types.to_vec(),
            handler,
        });
    }

    fn execute(
        &self,
        portal: &str,
        statement: &str,
        parameters: Parameters,
        max_rows: u32,
        handler: ExecuteHandler,
    ) {
        self.inner.sql_trace.execute(statement);
        self.submit(ServerRequest::ExecuteStatement {
            portal: portal.to_string(),
            statement: statement.to_string(),
            parameters,
            max_rows,
            handler,
        });
    }

    fn resume(&self, portal: &str, max_rows: u32, handler: ResumeHandler) {
        self.submit(ServerRequest::ResumePortal {
            portal: portal.to_string(),
            max_rows,
            handler,
        });
    }

    fn finish(&self, portal: &str, handler: SynchronizedHandler) {
        self.submit(ServerRequest::Close {
            target: ServerObjectType::Portal,
            name: portal.to_string(),
            handler: Some(handler),
        });
    }

    fn lazy_execute(&self, statement: &str) {
        self.inner.sql_trace.query(statement);
        self.submit(ServerRequest::LazyExecute {
            statement: statement.to_string(),
        });
    }

    fn call(
        &self,
        function: Oid,
        argument_formats: Vec<FieldFormat>,
        arguments: Vec<Option<Bytes>>,
        handler: FunctionCallHandler,
    ) {
        self.inner.sql_trace.call(function.0);
        self.submit(ServerRequest::FunctionCall {
            function,
            argument_formats,
            arguments,
            handler,
        });
    }

    fn close(&self, target: ServerObjectType, name: &str) {
        if target == ServerObjectType::Statement {
            self.inner.sql_trace.forget(name);
        }
        self.submit(ServerRequest::Close {
            target,
            name: name.to_string(),
            handler: None,
        });
    }

    fn allocator(&self) -> ByteAllocator {
        self.inner.channel.allocator()
    }

    fn remote_address(&self) -> SocketAddr {
        self.inner.channel.remote_address()
    }

    fn io_executor(&self) -> &EventLoop {
        self.inner.channel.event_loop()
    }

    fn transaction_status(&self) -> Result<TransactionStatus> {
        if !self.inner.channel.is_active() {
            return Err(Error::ChannelClosed);
        }
        Ok(self.inner.channel.dispatch().transaction_status())
    }

    fn is_connected(&self) -> bool {
        self.inner.channel.is_active()
    }
}

impl fmt::Debug for ServerConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConnection")
            .field("channel", &self.inner.channel)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

fn stdout_sink() -> Box<dyn Write + Send> {
    Box::new(io::stdout())
}
