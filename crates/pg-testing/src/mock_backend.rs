//! Mock PostgreSQL backend for tests.
//!
//! The mock speaks the message flow that follows startup: simple queries,
//! the extended protocol (Parse, Bind, Describe, Execute, Close, Sync),
//! function calls and Terminate. Every frontend message is recorded in a
//! journal that tests can inspect or wait on.
//!
//! ## Example
//!
//! ```rust,ignore
//! use pg_testing::{MockBackend, MockResponse};
//!
//! #[tokio::test]
//! async fn test_query() {
//!     let backend = MockBackend::builder()
//!         .with_response("SELECT 1", MockResponse::scalar_int(1))
//!         .build()
//!         .await
//!         .unwrap();
//!
//!     let addr = backend.addr();
//!     // Open a channel to addr...
//! }
//! ```

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use pg_codec::{CodecError, FrontendCodec};
use pg_protocol::{
    BackendMessage, FieldDescription, FrontendMessage, Oid, ProtocolError, ServerNotice,
    ServerObjectType, TransactionStatus,
};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Notify, broadcast};
use tokio::time::Instant;
use tokio_util::codec::Framed;

/// Error type for mock backend operations.
#[derive(Debug, Error)]
pub enum MockBackendError {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Framing error.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// A configured response could not be encoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Result type for mock backend operations.
pub type Result<T> = std::result::Result<T, MockBackendError>;

/// A result column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockColumn {
    /// Column name.
    pub name: String,
    /// Column type.
    pub type_oid: Oid,
}

impl MockColumn {
    /// Create a column.
    pub fn new(name: impl Into<String>, type_oid: Oid) -> Self {
        Self {
            name: name.into(),
            type_oid,
        }
    }

    /// An `int4` column.
    pub fn int4(name: impl Into<String>) -> Self {
        Self::new(name, Oid::INT4)
    }

    /// A `text` column.
    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, Oid::TEXT)
    }
}

/// Canned answer to a statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockResponse {
    /// Rows in text format; `None` is NULL.
    Rows {
        /// Column layout.
        columns: Vec<MockColumn>,
        /// Row values.
        rows: Vec<Vec<Option<String>>>,
    },
    /// A statement without rows, completing with this command tag.
    Command(String),
    /// An ErrorResponse.
    Error {
        /// SQLSTATE.
        code: String,
        /// Message text.
        message: String,
    },
    /// EmptyQueryResponse.
    Empty,
}

impl MockResponse {
    /// A single `int4` value.
    pub fn scalar_int(value: i32) -> Self {
        Self::Rows {
            columns: vec![MockColumn::int4("?column?")],
            rows: vec![vec![Some(value.to_string())]],
        }
    }

    /// Rows with the given columns.
    pub fn rows(columns: Vec<MockColumn>, rows: Vec<Vec<Option<String>>>) -> Self {
        Self::Rows { columns, rows }
    }

    /// A command completing with `tag`.
    pub fn command(tag: impl Into<String>) -> Self {
        Self::Command(tag.into())
    }

    /// A server error.
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.into(),
            message: message.into(),
        }
    }

    /// An empty query.
    pub fn empty() -> Self {
        Self::Empty
    }

    fn row_description(&self) -> BackendMessage {
        match self {
            Self::Rows { columns, .. } => BackendMessage::RowDescription {
                fields: columns
                    .iter()
                    .map(|c| FieldDescription::new(c.name.clone(), c.type_oid))
                    .collect(),
            },
            _ => BackendMessage::NoData,
        }
    }
}

/// Something the mock observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendEvent {
    /// A client connected.
    Connected {
        /// Connection number, starting at 1.
        connection: usize,
    },
    /// A frontend message arrived.
    Received {
        /// Connection number.
        connection: usize,
        /// The decoded message.
        message: FrontendMessage,
    },
    /// A client connection ended.
    Disconnected {
        /// Connection number.
        connection: usize,
    },
}

#[derive(Default)]
struct Journal {
    events: Mutex<Vec<BackendEvent>>,
    changed: Notify,
    connections: Mutex<usize>,
}

impl Journal {
    fn record(&self, event: BackendEvent) {
        self.events.lock().push(event);
        self.changed.notify_waiters();
    }

    fn next_connection(&self) -> usize {
        let mut count = self.connections.lock();
        *count += 1;
        *count
    }
}

/// Mock backend configuration.
#[derive(Debug, Clone)]
pub struct MockBackendConfig {
    /// Responses keyed by exact SQL text.
    pub responses: HashMap<String, MockResponse>,
    /// Response for SQL without a configured response.
    pub default_response: MockResponse,
    /// Function call results keyed by function oid.
    pub functions: HashMap<u32, Option<Bytes>>,
}

impl Default for MockBackendConfig {
    fn default() -> Self {
        Self {
            responses: HashMap::new(),
            default_response: MockResponse::command("SELECT 0"),
            functions: HashMap::new(),
        }
    }
}

impl MockBackendConfig {
    fn response_for(&self, sql: &str) -> &MockResponse {
        self.responses.get(sql).unwrap_or(&self.default_response)
    }
}

/// Builder for a [`MockBackend`].
#[derive(Debug, Default)]
pub struct MockBackendBuilder {
    config: MockBackendConfig,
}

impl MockBackendBuilder {
    /// Create a builder with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `sql` with `response`.
    pub fn with_response(mut self, sql: impl Into<String>, response: MockResponse) -> Self {
        self.config.responses.insert(sql.into(), response);
        self
    }

    /// Answer unknown SQL with `response`.
    pub fn with_default_response(mut self, response: MockResponse) -> Self {
        self.config.default_response = response;
        self
    }

    /// Answer calls of `function` with `result`.
    pub fn with_function_result(mut self, function: Oid, result: Option<Bytes>) -> Self {
        self.config.functions.insert(function.0, result);
        self
    }

    /// Start listening.
    pub async fn build(self) -> Result<MockBackend> {
        MockBackend::start(self.config).await
    }
}

/// A mock PostgreSQL backend listening on a local port.
pub struct MockBackend {
    addr: SocketAddr,
    shutdown_tx: broadcast::Sender<()>,
    journal: Arc<Journal>,
}

impl MockBackend {
    /// Create a new builder.
    pub fn builder() -> MockBackendBuilder {
        MockBackendBuilder::new()
    }

    /// Start a mock backend on an available port.
    pub async fn start(config: MockBackendConfig) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (shutdown_tx, _) = broadcast::channel(1);
        let config = Arc::new(config);
        let journal = Arc::new(Journal::default());

        let mut shutdown_rx = shutdown_tx.subscribe();
        let accept_shutdown = shutdown_tx.clone();
        let accept_journal = Arc::clone(&journal);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => match result {
                        Ok((stream, _peer)) => {
                            let connection = accept_journal.next_connection();
                            let config = Arc::clone(&config);
                            let journal = Arc::clone(&accept_journal);
                            let stop = accept_shutdown.subscribe();
                            tokio::spawn(async move {
                                journal.record(BackendEvent::Connected { connection });
                                if let Err(e) =
                                    handle_connection(connection, stream, &config, &journal, stop).await
                                {
                                    tracing::debug!(connection, error = %e, "mock connection error");
                                }
                                journal.record(BackendEvent::Disconnected { connection });
                            });
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "mock accept error");
                            break;
                        }
                    },
                    _ = shutdown_rx.recv() => break,
                }
            }
        });

        Ok(Self {
            addr,
            shutdown_tx,
            journal,
        })
    }

    /// The listening address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Everything observed so far.
    pub fn events(&self) -> Vec<BackendEvent> {
        self.journal.events.lock().clone()
    }

    /// Frontend messages received on any connection, in arrival order.
    pub fn received(&self) -> Vec<FrontendMessage> {
        self.journal
            .events
            .lock()
            .iter()
            .filter_map(|e| match e {
                BackendEvent::Received { message, .. } => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    /// Connections currently open.
    pub fn connection_count(&self) -> usize {
        let events = self.journal.events.lock();
        let opened = events
            .iter()
            .filter(|e| matches!(e, BackendEvent::Connected { .. }))
            .count();
        let closed = events
            .iter()
            .filter(|e| matches!(e, BackendEvent::Disconnected { .. }))
            .count();
        opened - closed
    }

    /// Wait until `condition` holds for the journal, or `timeout` elapses.
    ///
    /// Returns whether the condition held.
    pub async fn wait_until<F>(&self, timeout: Duration, mut condition: F) -> bool
    where
        F: FnMut(&[BackendEvent]) -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            let changed = self.journal.changed.notified();
            if condition(&self.journal.events.lock()) {
                return true;
            }
            if tokio::time::timeout_at(deadline, changed).await.is_err() {
                return condition(&self.journal.events.lock());
            }
        }
    }

    /// Wait until at least `count` frontend messages arrived.
    pub async fn wait_for_messages(&self, count: usize, timeout: Duration) -> Vec<FrontendMessage> {
        self.wait_until(timeout, |events| {
            events
                .iter()
                .filter(|e| matches!(e, BackendEvent::Received { .. }))
                .count()
                >= count
        })
        .await;
        self.received()
    }

    /// Stop accepting and drop every open connection.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

impl fmt::Debug for MockBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockBackend")
            .field("addr", &self.addr)
            .finish_non_exhaustive()
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn handle_connection(
    connection: usize,
    stream: TcpStream,
    config: &MockBackendConfig,
    journal: &Journal,
    mut stop: broadcast::Receiver<()>,
) -> Result<()> {
    let mut framed = Framed::new(stream, FrontendCodec::new());
    let mut session = Session::default();

    loop {
        let message = tokio::select! {
            next = framed.next() => match next {
                Some(message) => message?,
                None => break,
            },
            _ = stop.recv() => break,
        };
        journal.record(BackendEvent::Received {
            connection,
            message: message.clone(),
        });
        if matches!(message, FrontendMessage::Terminate) {
            break;
        }

        let mut out = BytesMut::new();
        session.respond(message, config, &mut out)?;
        if !out.is_empty() {
            framed.send(out.freeze()).await?;
        }
    }
    Ok(())
}

struct Statement {
    sql: String,
    parameter_types: Vec<Oid>,
}

struct Portal {
    sql: String,
    position: usize,
}

/// Per-connection protocol state.
#[derive(Default)]
struct Session {
    statements: HashMap<String, Statement>,
    portals: HashMap<String, Portal>,
    status: TransactionStatus,
    /// An extended-protocol error occurred; skip until Sync.
    failed: bool,
}

impl Session {
    fn respond(
        &mut self,
        message: FrontendMessage,
        config: &MockBackendConfig,
        out: &mut BytesMut,
    ) -> Result<()> {
        if self.failed && !matches!(message, FrontendMessage::Sync) {
            return Ok(());
        }
        match message {
            FrontendMessage::Query { sql } => {
                let response = config.response_for(&sql);
                if matches!(response, MockResponse::Rows { .. }) {
                    response.row_description().encode(out)?;
                }
                self.complete(&sql, response, 0, 0, out)?;
                self.failed = false;
                self.ready(out)?;
            }
            FrontendMessage::Parse {
                statement,
                sql,
                parameter_types,
            } => {
                self.statements.insert(
                    statement,
                    Statement {
                        sql,
                        parameter_types,
                    },
                );
                BackendMessage::ParseComplete.encode(out)?;
            }
            FrontendMessage::Bind {
                portal, statement, ..
            } => match self.statements.get(&statement) {
                Some(s) => {
                    let sql = s.sql.clone();
                    self.portals.insert(portal, Portal { sql, position: 0 });
                    BackendMessage::BindComplete.encode(out)?;
                }
                None => self.fail(
                    "26000",
                    &format!("prepared statement \"{statement}\" does not exist"),
                    out,
                )?,
            },
            FrontendMessage::Describe { target, name } => {
                let described = match target {
                    ServerObjectType::Statement => match self.statements.get(&name) {
                        Some(s) => {
                            BackendMessage::ParameterDescription {
                                types: s.parameter_types.clone(),
                            }
                            .encode(out)?;
                            Some(s.sql.clone())
                        }
                        None => None,
                    },
                    ServerObjectType::Portal => self.portals.get(&name).map(|p| p.sql.clone()),
                };
                match described {
                    Some(sql) => config.response_for(&sql).row_description().encode(out)?,
                    None => self.fail("34000", &format!("\"{name}\" does not exist"), out)?,
                }
            }
            FrontendMessage::Execute { portal, max_rows } => {
                let Some(state) = self.portals.get(&portal) else {
                    return self.fail("34000", &format!("portal \"{portal}\" does not exist"), out);
                };
                let (sql, position) = (state.sql.clone(), state.position);
                let sent = self.complete(&sql, config.response_for(&sql), position, max_rows, out)?;
                if let Some(state) = self.portals.get_mut(&portal) {
                    state.position += sent;
                }
            }
            FrontendMessage::Close { target, name } => {
                match target {
                    ServerObjectType::Statement => {
                        self.statements.remove(&name);
                    }
                    ServerObjectType::Portal => {
                        self.portals.remove(&name);
                    }
                }
                BackendMessage::CloseComplete.encode(out)?;
            }
            FrontendMessage::FunctionCall { function, .. } => {
                match config.functions.get(&function.0) {
                    Some(value) => BackendMessage::FunctionCallResponse {
                        value: value.clone(),
                    }
                    .encode(out)?,
                    None => self.fail(
                        "42883",
                        &format!("function with OID {} does not exist", function.0),
                        out,
                    )?,
                }
                self.failed = false;
                self.ready(out)?;
            }
            FrontendMessage::Sync => {
                self.failed = false;
                self.portals.remove("");
                self.ready(out)?;
            }
            FrontendMessage::Flush | FrontendMessage::Terminate => {}
        }
        Ok(())
    }

    /// Send the outcome of running `sql`, starting at row `position` and
    /// sending at most `max_rows` rows (zero for all). Returns the rows sent.
    fn complete(
        &mut self,
        sql: &str,
        response: &MockResponse,
        position: usize,
        max_rows: u32,
        out: &mut BytesMut,
    ) -> Result<usize> {
        match response {
            MockResponse::Rows { rows, .. } => {
                let remaining = rows.len().saturating_sub(position);
                let limit = if max_rows == 0 {
                    remaining
                } else {
                    remaining.min(max_rows as usize)
                };
                for row in rows.iter().skip(position).take(limit) {
                    BackendMessage::DataRow {
                        values: row
                            .iter()
                            .map(|v| v.as_ref().map(|s| Bytes::copy_from_slice(s.as_bytes())))
                            .collect(),
                    }
                    .encode(out)?;
                }
                if limit < remaining {
                    BackendMessage::PortalSuspended.encode(out)?;
                } else {
                    BackendMessage::CommandComplete {
                        tag: format!("SELECT {}", position + limit),
                    }
                    .encode(out)?;
                }
                Ok(limit)
            }
            MockResponse::Command(tag) => {
                self.track_transaction(sql);
                BackendMessage::CommandComplete { tag: tag.clone() }.encode(out)?;
                Ok(0)
            }
            MockResponse::Error { code, message } => {
                self.fail(code, message, out)?;
                Ok(0)
            }
            MockResponse::Empty => {
                BackendMessage::EmptyQueryResponse.encode(out)?;
                Ok(0)
            }
        }
    }

    fn track_transaction(&mut self, sql: &str) {
        let verb = sql
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_ascii_uppercase();
        match verb.as_str() {
            "BEGIN" | "START" => self.status = TransactionStatus::Active,
            "COMMIT" | "ROLLBACK" | "END" => self.status = TransactionStatus::Idle,
            _ => {}
        }
    }

    fn fail(&mut self, code: &str, message: &str, out: &mut BytesMut) -> Result<()> {
        BackendMessage::ErrorResponse(ServerNotice::new("ERROR", code, message)).encode(out)?;
        if self.status == TransactionStatus::Active {
            self.status = TransactionStatus::Failed;
        }
        self.failed = true;
        Ok(())
    }

    fn ready(&self, out: &mut BytesMut) -> Result<()> {
        BackendMessage::ReadyForQuery {
            status: self.status,
        }
        .encode(out)?;
        Ok(())
    }
}
