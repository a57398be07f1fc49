//! Protocol requests and their completion handlers.
//!
//! A [`ServerRequest`] is one client operation. It knows the frontend
//! messages it sends and carries the handler that receives its outcome.
//! Every request ends its message sequence with Sync, so each one is
//! answered by exactly one ReadyForQuery and completes there.

use bytes::{Bytes, BytesMut};
use pg_protocol::{
    FieldDescription, FieldFormat, Oid, ProtocolError, ServerObjectType, frontend,
};
use tokio::sync::oneshot;

use crate::error::RequestError;

/// Receives the outcome of one request, exactly once.
pub trait Handler<T>: Send {
    /// Deliver the outcome.
    fn complete(self: Box<Self>, result: Result<T, RequestError>);
}

impl<T, F> Handler<T> for F
where
    F: FnOnce(Result<T, RequestError>) + Send,
{
    fn complete(self: Box<Self>, result: Result<T, RequestError>) {
        (*self)(result)
    }
}

/// Box a closure as a handler.
pub fn handler<T, F>(f: F) -> Box<dyn Handler<T>>
where
    F: FnOnce(Result<T, RequestError>) + Send + 'static,
{
    Box::new(f)
}

/// A handler that forwards the outcome to a oneshot channel.
///
/// If the handler is dropped without being completed, the receiver reports
/// a receive error.
pub fn response_channel<T>() -> (
    Box<dyn Handler<T>>,
    oneshot::Receiver<Result<T, RequestError>>,
)
where
    T: Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    let handler = handler(move |result| {
        let _ = tx.send(result);
    });
    (handler, rx)
}

/// Handler for a simple query; one batch per statement.
pub type QueryHandler = Box<dyn Handler<Vec<ResultBatch>>>;
/// Handler for an unnamed parse + bind + execute.
pub type ExtendedQueryHandler = Box<dyn Handler<ResultBatch>>;
/// Handler for a statement preparation.
pub type PrepareHandler = Box<dyn Handler<PreparedDescription>>;
/// Handler for execution of a prepared statement.
pub type ExecuteHandler = Box<dyn Handler<ResultBatch>>;
/// Handler for resuming a suspended portal.
pub type ResumeHandler = Box<dyn Handler<ResultBatch>>;
/// Handler for requests that only report completion.
pub type SynchronizedHandler = Box<dyn Handler<()>>;
/// Handler for a function call; `None` is a NULL result.
pub type FunctionCallHandler = Box<dyn Handler<Option<Bytes>>>;

/// Rows and completion of one executed statement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultBatch {
    /// Command tag (`SELECT 2`, `INSERT 0 1`); empty for an empty query or
    /// a suspended portal.
    pub command: String,
    /// Row count parsed from the command tag.
    pub rows_affected: Option<u64>,
    /// Column layout, when the statement returns rows and was described.
    pub fields: Vec<FieldDescription>,
    /// Row values in column order (`None` is NULL).
    pub rows: Vec<Vec<Option<Bytes>>>,
    /// The row limit was reached; the portal can be resumed.
    pub suspended: bool,
}

/// Parameter and result layout of a prepared statement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreparedDescription {
    /// Parameter types inferred or pinned by the server.
    pub parameter_types: Vec<Oid>,
    /// Result columns; empty if the statement returns no rows.
    pub fields: Vec<FieldDescription>,
}

/// Bound parameters plus requested result formats.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Parameters {
    /// Format code per parameter (or one for all, or none for text).
    pub formats: Vec<FieldFormat>,
    /// Parameter values (`None` is NULL).
    pub values: Vec<Option<Bytes>>,
    /// Format code per result column (or one for all, or none for text).
    pub result_formats: Vec<FieldFormat>,
}

/// One outstanding client operation.
pub enum ServerRequest {
    /// Simple query.
    Query {
        /// SQL text; may hold several statements.
        sql: String,
        /// Completion handler.
        handler: QueryHandler,
    },
    /// Parse into the unnamed statement, bind, describe and execute.
    ExecuteQuery {
        /// SQL text.
        sql: String,
        /// Portal to bind.
        portal: String,
        /// Parameters and formats.
        parameters: Parameters,
        /// Row limit, zero for none.
        max_rows: u32,
        /// Completion handler.
        handler: ExtendedQueryHandler,
    },
    /// Parse a named statement and describe it.
    Prepare {
        /// Statement name.
        statement: String,
        /// SQL text.
        sql: String,
        /// Pinned parameter types.
        parameter_types: Vec<Oid>,
        /// Completion handler.
        handler: PrepareHandler,
    },
    /// Bind a prepared statement, describe the portal and execute it.
    ExecuteStatement {
        /// Portal to bind.
        portal: String,
        /// Prepared statement name.
        statement: String,
        /// Parameters and formats.
        parameters: Parameters,
        /// Row limit, zero for none.
        max_rows: u32,
        /// Completion handler.
        handler: ExecuteHandler,
    },
    /// Fetch more rows from a suspended portal.
    ResumePortal {
        /// Portal name.
        portal: String,
        /// Row limit, zero for none.
        max_rows: u32,
        /// Completion handler.
        handler: ResumeHandler,
    },
    /// Close a statement or portal.
    Close {
        /// Statement or portal.
        target: ServerObjectType,
        /// Object name.
        name: String,
        /// Completion handler, if the caller wants one.
        handler: Option<SynchronizedHandler>,
    },
    /// Execute a prepared statement without parameters, discarding results.
    LazyExecute {
        /// Prepared statement name.
        statement: String,
    },
    /// Call a server function.
    FunctionCall {
        /// Function oid.
        function: Oid,
        /// Argument formats.
        argument_formats: Vec<FieldFormat>,
        /// Argument values.
        arguments: Vec<Option<Bytes>>,
        /// Completion handler.
        handler: FunctionCallHandler,
    },
}

impl ServerRequest {
    /// Request name, as used in logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Query { .. } => "Query",
            Self::ExecuteQuery { .. } => "ExecuteQuery",
            Self::Prepare { .. } => "Prepare",
            Self::ExecuteStatement { .. } => "ExecuteStatement",
            Self::ResumePortal { .. } => "ResumePortal",
            Self::Close { .. } => "Close",
            Self::LazyExecute { .. } => "LazyExecute",
            Self::FunctionCall { .. } => "FunctionCall",
        }
    }

    /// Names of the frontend messages this request sends, in order.
    #[must_use]
    pub fn messages(&self) -> &'static [&'static str] {
        match self {
            Self::Query { .. } => &["Query"],
            Self::ExecuteQuery { .. } => &["Parse", "Bind", "Describe", "Execute", "Sync"],
            Self::Prepare { .. } => &["Parse", "Describe", "Sync"],
            Self::ExecuteStatement { .. } => &["Bind", "Describe", "Execute", "Sync"],
            Self::ResumePortal { .. } => &["Execute", "Sync"],
            Self::Close { .. } => &["Close", "Sync"],
            Self::LazyExecute { .. } => &["Bind", "Execute", "Sync"],
            Self::FunctionCall { .. } => &["FunctionCall"],
        }
    }

    /// Append this request's frontend messages to `dst`.
    ///
    /// On failure `dst` is left as it was, so no partial request reaches
    /// the wire.
    pub fn encode(&self, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        let start = dst.len();
        let result = self.write_messages(dst);
        if result.is_err() {
            dst.truncate(start);
        }
        result
    }

    fn write_messages(&self, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        match self {
            Self::Query { sql, .. } => frontend::query(dst, sql)?,
            Self::ExecuteQuery {
                sql,
                portal,
                parameters,
                max_rows,
                ..
            } => {
                frontend::parse(dst, "", sql, &[])?;
                bind(dst, portal, "", parameters)?;
                frontend::describe(dst, ServerObjectType::Portal, portal)?;
                frontend::execute(dst, portal, *max_rows)?;
                frontend::sync(dst);
            }
            Self::Prepare {
                statement,
                sql,
                parameter_types,
                ..
            } => {
                frontend::parse(dst, statement, sql, parameter_types)?;
                frontend::describe(dst, ServerObjectType::Statement, statement)?;
                frontend::sync(dst);
            }
            Self::ExecuteStatement {
                portal,
                statement,
                parameters,
                max_rows,
                ..
            } => {
                bind(dst, portal, statement, parameters)?;
                frontend::describe(dst, ServerObjectType::Portal, portal)?;
                frontend::execute(dst, portal, *max_rows)?;
                frontend::sync(dst);
            }
            Self::ResumePortal {
                portal, max_rows, ..
            } => {
                frontend::execute(dst, portal, *max_rows)?;
                frontend::sync(dst);
            }
            Self::Close { target, name, .. } => {
                frontend::close(dst, *target, name)?;
                frontend::sync(dst);
            }
            Self::LazyExecute { statement } => {
                frontend::bind(dst, "", statement, &[], &[], &[])?;
                frontend::execute(dst, "", 0)?;
                frontend::sync(dst);
            }
            Self::FunctionCall {
                function,
                argument_formats,
                arguments,
                ..
            } => frontend::function_call(dst, *function, argument_formats, arguments)?,
        }
        Ok(())
    }

    /// Split off the handler side of the request.
    pub(crate) fn into_response(self) -> PendingResponse {
        match self {
            Self::Query { handler, .. } => PendingResponse::Batches(handler),
            Self::ExecuteQuery { handler, .. }
            | Self::ExecuteStatement { handler, .. }
            | Self::ResumePortal { handler, .. } => PendingResponse::Batch(handler),
            Self::Prepare { handler, .. } => PendingResponse::Prepare(handler),
            Self::Close { handler, .. } => PendingResponse::Synchronized(handler),
            Self::LazyExecute { .. } => PendingResponse::Discard,
            Self::FunctionCall { handler, .. } => PendingResponse::FunctionCall(handler),
        }
    }

    /// Complete the request's handler with `error` without sending it.
    pub fn fail(self, error: RequestError) {
        self.into_response().fail(error);
    }
}

impl std::fmt::Debug for ServerRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerRequest")
            .field("kind", &self.name())
            .finish_non_exhaustive()
    }
}

fn bind(
    dst: &mut BytesMut,
    portal: &str,
    statement: &str,
    parameters: &Parameters,
) -> Result<(), ProtocolError> {
    frontend::bind(
        dst,
        portal,
        statement,
        &parameters.formats,
        &parameters.values,
        &parameters.result_formats,
    )
}

/// Handler side of a request awaiting its ReadyForQuery.
pub(crate) enum PendingResponse {
    Batches(QueryHandler),
    Batch(Box<dyn Handler<ResultBatch>>),
    Prepare(PrepareHandler),
    Synchronized(Option<SynchronizedHandler>),
    FunctionCall(FunctionCallHandler),
    Discard,
}

impl PendingResponse {
    pub(crate) fn fail(self, error: RequestError) {
        match self {
            Self::Batches(h) => h.complete(Err(error)),
            Self::Batch(h) => h.complete(Err(error)),
            Self::Prepare(h) => h.complete(Err(error)),
            Self::Synchronized(Some(h)) => h.complete(Err(error)),
            Self::FunctionCall(h) => h.complete(Err(error)),
            Self::Synchronized(None) | Self::Discard => {
                tracing::debug!(error = %error, "request without handler failed");
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::codec::FrontendCodec;
    use pg_protocol::FrontendMessage;
    use tokio_util::codec::Decoder;

    fn sent(request: &ServerRequest) -> Vec<FrontendMessage> {
        let mut buf = BytesMut::new();
        request.encode(&mut buf).unwrap();
        let mut codec = FrontendCodec::new();
        let mut out = Vec::new();
        while let Some(m) = codec.decode(&mut buf).unwrap() {
            out.push(m);
        }
        out
    }

    fn names(messages: &[FrontendMessage]) -> Vec<&'static str> {
        messages.iter().map(FrontendMessage::name).collect()
    }

    #[test]
    fn test_every_request_sends_what_it_declares() {
        let requests = vec![
            ServerRequest::Query {
                sql: "SELECT 1".into(),
                handler: handler(|_| {}),
            },
            ServerRequest::ExecuteQuery {
                sql: "SELECT $1".into(),
                portal: String::new(),
                parameters: Parameters::default(),
                max_rows: 0,
                handler: handler(|_| {}),
            },
            ServerRequest::Prepare {
                statement: "S1".into(),
                sql: "SELECT 1".into(),
                parameter_types: vec![],
                handler: handler(|_| {}),
            },
            ServerRequest::ExecuteStatement {
                portal: "P1".into(),
                statement: "S1".into(),
                parameters: Parameters::default(),
                max_rows: 10,
                handler: handler(|_| {}),
            },
            ServerRequest::ResumePortal {
                portal: "P1".into(),
                max_rows: 10,
                handler: handler(|_| {}),
            },
            ServerRequest::Close {
                target: ServerObjectType::Portal,
                name: "P1".into(),
                handler: None,
            },
            ServerRequest::LazyExecute {
                statement: "S1".into(),
            },
            ServerRequest::FunctionCall {
                function: Oid(1598),
                argument_formats: vec![],
                arguments: vec![],
                handler: handler(|_| {}),
            },
        ];
        for request in &requests {
            assert_eq!(names(&sent(request)), request.messages(), "{}", request.name());
        }
    }

    #[test]
    fn test_execute_statement_binds_named_portal() {
        let request = ServerRequest::ExecuteStatement {
            portal: "P1".into(),
            statement: "S1".into(),
            parameters: Parameters {
                formats: vec![FieldFormat::Binary],
                values: vec![Some(Bytes::from_static(&[0, 0, 0, 7])), None],
                result_formats: vec![FieldFormat::Binary],
            },
            max_rows: 5,
            handler: handler(|_| {}),
        };
        let messages = sent(&request);
        assert_eq!(
            messages[0],
            FrontendMessage::Bind {
                portal: "P1".into(),
                statement: "S1".into(),
                parameter_formats: vec![FieldFormat::Binary],
                parameters: vec![Some(Bytes::from_static(&[0, 0, 0, 7])), None],
                result_formats: vec![FieldFormat::Binary],
            }
        );
        assert_eq!(
            messages[2],
            FrontendMessage::Execute {
                portal: "P1".into(),
                max_rows: 5
            }
        );
    }

    #[test]
    fn test_fail_completes_handler() {
        let (h, mut rx) = response_channel::<ResultBatch>();
        ServerRequest::ResumePortal {
            portal: "P1".into(),
            max_rows: 0,
            handler: h,
        }
        .fail(RequestError::ChannelClosed);
        assert!(matches!(rx.try_recv().unwrap(), Err(RequestError::ChannelClosed)));
    }

    #[test]
    fn test_failed_encode_leaves_no_partial_request() {
        let request = ServerRequest::ExecuteQuery {
            sql: "SELECT $1".into(),
            portal: "P\0".into(),
            parameters: Parameters::default(),
            max_rows: 0,
            handler: handler(|_| {}),
        };
        let mut buf = BytesMut::from(&b"queued"[..]);
        assert!(matches!(
            request.encode(&mut buf),
            Err(ProtocolError::EmbeddedNul)
        ));
        assert_eq!(&buf[..], b"queued");
    }
}
