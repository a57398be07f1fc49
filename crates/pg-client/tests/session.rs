//! Session tests against the mock backend.
//!
//! Every test uses its own registry so pool reference counts are isolated.

#![allow(clippy::unwrap_used, clippy::panic)]

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll, Waker};
use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use parking_lot::Mutex;
use pg_client::{Config, Error, RequestExecutor, ServerConnection, SessionState, connect_tcp};
use pg_codec::{
    Channel, MAX_PENDING_NOTIFICATIONS, Parameters, RequestError, ResultBatch, handler,
    response_channel,
};
use pg_io::{EventLoopPoolFactory, PoolKey, RegistryError, RegistryConfig, SharedRegistry};
use pg_protocol::{BackendMessage, FrontendMessage, Oid, ServerObjectType, TransactionStatus};
use pg_testing::{BackendEvent, MockBackend, MockColumn, MockResponse, TraceBuffer};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

const WAIT: Duration = Duration::from_secs(5);

fn registry() -> SharedRegistry {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
    SharedRegistry::new(RegistryConfig::default())
}

fn config() -> Config {
    Config::new().max_io_threads(2)
}

async fn backend() -> MockBackend {
    MockBackend::builder()
        .with_response("SELECT 1", MockResponse::scalar_int(1))
        .with_response(
            "SELECT n FROM series",
            MockResponse::rows(
                vec![MockColumn::int4("n")],
                (1..=5).map(|n| vec![Some(n.to_string())]).collect(),
            ),
        )
        .with_response("BEGIN", MockResponse::command("BEGIN"))
        .with_function_result(Oid(1598), Some(Bytes::from_static(b"0.42")))
        .build()
        .await
        .unwrap()
}

async fn connect(backend: &MockBackend, registry: &SharedRegistry) -> ServerConnection {
    connect_tcp(config(), registry, backend.addr()).await.unwrap()
}

/// In-memory transport. Once something has been written, reads serve
/// `inbound`; otherwise they never complete.
#[derive(Default)]
struct ScriptedTransport {
    inbound: BytesMut,
    write_error: Option<io::ErrorKind>,
    stall_shutdown: bool,
    writes: Arc<AtomicUsize>,
    reader: Option<Waker>,
}

impl AsyncRead for ScriptedTransport {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.inbound.is_empty() || self.writes.load(Ordering::SeqCst) == 0 {
            self.reader = Some(cx.waker().clone());
            return Poll::Pending;
        }
        let n = self.inbound.len().min(buf.remaining());
        buf.put_slice(&self.inbound[..n]);
        self.inbound.advance(n);
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for ScriptedTransport {
    fn poll_write(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if let Some(reader) = self.reader.take() {
            reader.wake();
        }
        match self.write_error {
            Some(kind) => Poll::Ready(Err(io::Error::from(kind))),
            None => Poll::Ready(Ok(buf.len())),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        if self.stall_shutdown {
            Poll::Pending
        } else {
            Poll::Ready(Ok(()))
        }
    }
}

fn open_scripted(registry: &SharedRegistry, transport: ScriptedTransport) -> ServerConnection {
    let shared_ref = registry.acquire(PoolKey::EVENT_LOOP, 1);
    let pool = shared_ref.pool().unwrap();
    let channel = Channel::open(transport, "127.0.0.1:5432".parse().unwrap(), &pool.next());
    ServerConnection::new(config(), channel, shared_ref)
}

fn queries(messages: &[FrontendMessage]) -> Vec<String> {
    messages
        .iter()
        .filter_map(|m| match m {
            FrontendMessage::Query { sql } => Some(sql.clone()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_simple_query_round_trip() {
    let backend = backend().await;
    let registry = registry();
    let session = connect(&backend, &registry).await;
    assert!(session.is_connected());
    assert_eq!(session.remote_address(), backend.addr());
    assert_eq!(session.state(), SessionState::Open);

    let (h, rx) = response_channel();
    session.query("SELECT 1", h);
    let batches = rx.await.unwrap().unwrap();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].rows, vec![vec![Some(Bytes::from_static(b"1"))]]);
    assert_eq!(batches[0].command, "SELECT 1");

    tokio_test::assert_ok!(session.shutdown().await);
}

#[tokio::test]
async fn test_requests_written_in_submission_order() {
    let backend = backend().await;
    let registry = registry();
    let session = connect(&backend, &registry).await;

    let observed = Arc::new(Mutex::new(Vec::new()));
    std::thread::scope(|scope| {
        for worker in 0..4 {
            let session = &session;
            let observed = Arc::clone(&observed);
            scope.spawn(move || {
                for i in 0..25 {
                    let sql = format!("SELECT {worker}, {i}");
                    let mut order = observed.lock();
                    session.query(&sql, handler(|_| {}));
                    order.push(sql);
                }
            });
        }
    });

    let received = backend.wait_for_messages(100, WAIT).await;
    assert_eq!(queries(&received), *observed.lock());
    session.kill().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_writes_terminate_before_close() {
    let backend = backend().await;
    let registry = registry();
    let session = connect(&backend, &registry).await;

    session.shutdown().await.unwrap();
    assert!(!session.is_connected());
    assert_eq!(session.state(), SessionState::Closed);
    assert!(session.shared_ref().is_released());
    assert_eq!(session.shared_ref().get().ref_count(), 0);

    assert!(
        backend
            .wait_until(WAIT, |events| events
                .iter()
                .any(|e| matches!(e, BackendEvent::Disconnected { .. })))
            .await
    );
    let events = backend.events();
    let terminate = events
        .iter()
        .position(|e| {
            matches!(
                e,
                BackendEvent::Received {
                    message: FrontendMessage::Terminate,
                    ..
                }
            )
        })
        .unwrap();
    let disconnect = events
        .iter()
        .position(|e| matches!(e, BackendEvent::Disconnected { .. }))
        .unwrap();
    assert!(terminate < disconnect);
}

#[tokio::test]
async fn test_shutdown_of_inactive_session_writes_nothing() {
    let backend = backend().await;
    let registry = registry();
    let session = connect(&backend, &registry).await;

    session.kill().await.unwrap();
    assert_eq!(session.state(), SessionState::Closed);
    session.shutdown().await.unwrap();

    assert!(
        backend
            .wait_until(WAIT, |events| events
                .iter()
                .any(|e| matches!(e, BackendEvent::Disconnected { .. })))
            .await
    );
    assert!(!backend.received().contains(&FrontendMessage::Terminate));
}

#[tokio::test]
async fn test_shutdown_closes_when_terminate_write_fails() {
    let registry = registry();
    let writes = Arc::new(AtomicUsize::new(0));
    let session = open_scripted(
        &registry,
        ScriptedTransport {
            write_error: Some(io::ErrorKind::BrokenPipe),
            writes: Arc::clone(&writes),
            ..Default::default()
        },
    );

    tokio::time::timeout(WAIT, session.shutdown())
        .await
        .unwrap()
        .unwrap();
    assert!(writes.load(Ordering::SeqCst) > 0);
    assert!(session.shared_ref().is_released());
    assert_eq!(session.state(), SessionState::Closed);
    assert!(registry.wait_for_shutdown());
}

#[tokio::test]
async fn test_shutdown_of_closing_channel_marks_session_closing() {
    let registry = registry();
    let session = open_scripted(
        &registry,
        ScriptedTransport {
            stall_shutdown: true,
            ..Default::default()
        },
    );

    let closing = session.channel().close();
    assert!(!session.channel().is_active());
    let shutdown = session.shutdown();
    assert_eq!(session.state(), SessionState::Closing);
    assert!(session.shared_ref().is_released());

    shutdown.await.unwrap();
    tokio::time::timeout(WAIT, closing).await.unwrap().unwrap();
    assert_eq!(session.state(), SessionState::Closed);
}

#[tokio::test]
async fn test_notifications_are_bounded_per_session() {
    let registry = registry();
    let mut inbound = BytesMut::new();
    for n in 0..MAX_PENDING_NOTIFICATIONS + 5 {
        BackendMessage::NotificationResponse {
            process_id: 42,
            channel: "jobs".into(),
            payload: n.to_string(),
        }
        .encode(&mut inbound)
        .unwrap();
    }
    BackendMessage::ReadyForQuery {
        status: TransactionStatus::Idle,
    }
    .encode(&mut inbound)
    .unwrap();
    let session = open_scripted(
        &registry,
        ScriptedTransport {
            inbound,
            ..Default::default()
        },
    );

    let (h, rx) = response_channel::<Vec<ResultBatch>>();
    session.query("LISTEN jobs", h);
    tokio::time::timeout(WAIT, rx).await.unwrap().unwrap().unwrap();

    let notifications = session.take_notifications();
    assert_eq!(notifications.len(), MAX_PENDING_NOTIFICATIONS);
    assert_eq!(notifications[0].payload, "5");
    assert!(session.take_notifications().is_empty());
    session.kill().await.unwrap();
}

#[tokio::test]
async fn test_kill_releases_reference_once() {
    let backend = backend().await;
    let registry = registry();
    let first = connect(&backend, &registry).await;
    let second = connect(&backend, &registry).await;
    let entry = first.shared_ref().get();
    assert_eq!(entry.ref_count(), 2);

    first.kill().await.unwrap();
    first.kill().await.unwrap();
    assert_eq!(entry.ref_count(), 1);
    assert!(entry.is_materialized());
    assert_eq!(entry.teardown_count(), 0);

    second.shutdown().await.unwrap();
    assert_eq!(entry.ref_count(), 0);
    assert!(!entry.is_materialized());
    assert_eq!(entry.teardown_count(), 1);
    assert!(registry.wait_for_shutdown());
}

#[tokio::test]
async fn test_sessions_share_pool_per_key() {
    let backend = backend().await;
    let other = PoolKey::new("event-loop-secondary");
    let registry = SharedRegistry::builder()
        .register(PoolKey::EVENT_LOOP, EventLoopPoolFactory)
        .register(other.clone(), EventLoopPoolFactory)
        .build();

    let first = connect(&backend, &registry).await;
    let second = connect(&backend, &registry).await;
    let third = connect_tcp(config().pool_kind(other), &registry, backend.addr())
        .await
        .unwrap();

    let first_pool = first.shared_ref().pool().unwrap();
    assert!(first_pool.ptr_eq(&second.shared_ref().pool().unwrap()));
    assert!(!first_pool.ptr_eq(&third.shared_ref().pool().unwrap()));
    assert_eq!(third.shared_ref().get().ref_count(), 1);

    for session in [&first, &second, &third] {
        session.shutdown().await.unwrap();
    }
    assert!(registry.wait_for_shutdown());
}

#[tokio::test]
async fn test_unsupported_pool_kind_fails_at_first_use() {
    let backend = backend().await;
    let registry = registry();
    let unknown = PoolKey::new("nio");

    let reference = registry.acquire(unknown.clone(), 2);
    assert_eq!(reference.get().ref_count(), 1);
    reference.release();

    let err = connect_tcp(config().pool_kind(unknown.clone()), &registry, backend.addr())
        .await
        .unwrap_err();
    assert!(err.is_configuration());
    assert!(matches!(
        err,
        Error::Registry(RegistryError::UnsupportedPoolKind(ref key)) if *key == unknown
    ));
    assert_eq!(backend.connection_count(), 0);
}

#[tokio::test]
async fn test_zero_threads_is_configuration_error() {
    let backend = backend().await;
    let registry = registry();
    let err = connect_tcp(config().max_io_threads(0), &registry, backend.addr())
        .await
        .unwrap_err();
    assert!(err.is_configuration());
}

#[tokio::test]
async fn test_sql_trace_output() {
    let backend = backend().await;
    let registry = registry();
    let session = connect(&backend, &registry).await;
    let trace = TraceBuffer::new();
    session.set_sql_trace(Some(trace.sink()));

    let (prepared, prepared_rx) = response_channel();
    session.prepare("S1", "SELECT 1", &[], prepared);
    let (executed, executed_rx) = response_channel();
    session.execute("", "S1", Parameters::default(), 0, executed);
    session.lazy_execute("S1");
    let (called, called_rx) = response_channel();
    session.call(Oid(1598), vec![], vec![], called);

    prepared_rx.await.unwrap().unwrap();
    let batch = executed_rx.await.unwrap().unwrap();
    assert_eq!(batch.rows.len(), 1);
    assert_eq!(called_rx.await.unwrap().unwrap(), Some(Bytes::from_static(b"0.42")));

    assert_eq!(
        trace.lines(),
        ["P: S1 = SELECT 1", "Q (S1): SELECT 1", "Q: S1", "Q: CALL: 1598"]
    );
    session.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_protocol_trace_output() {
    let backend = backend().await;
    let registry = registry();
    let session = connect(&backend, &registry).await;
    let trace = TraceBuffer::new();
    session.set_protocol_trace(Some(trace.sink()));

    let (h, rx) = response_channel();
    session.query("SELECT 1", h);
    rx.await.unwrap().unwrap();

    assert_eq!(
        trace.lines(),
        [
            ">> Query",
            "<< RowDescription",
            "<< DataRow",
            "<< CommandComplete",
            "<< ReadyForQuery"
        ]
    );
    session.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_portal_resume_and_finish() {
    let backend = backend().await;
    let registry = registry();
    let session = connect(&backend, &registry).await;

    let (begun, begun_rx) = response_channel::<Vec<ResultBatch>>();
    session.query("BEGIN", begun);
    begun_rx.await.unwrap().unwrap();
    assert_eq!(session.transaction_status().unwrap(), TransactionStatus::Active);

    let (first, first_rx) = response_channel();
    session.query_extended("SELECT n FROM series", "P1", Parameters::default(), 2, first);
    let batch = first_rx.await.unwrap().unwrap();
    assert!(batch.suspended);
    assert_eq!(batch.rows.len(), 2);
    assert_eq!(batch.fields[0].name, "n");

    let (rest, rest_rx) = response_channel();
    session.resume("P1", 0, rest);
    let batch = rest_rx.await.unwrap().unwrap();
    assert!(!batch.suspended);
    assert_eq!(batch.rows.len(), 3);
    assert_eq!(batch.rows_affected, Some(5));

    let (finished, finished_rx) = response_channel();
    session.finish("P1", finished);
    finished_rx.await.unwrap().unwrap();

    session.close(ServerObjectType::Statement, "");
    let received = backend.wait_for_messages(1, WAIT).await;
    assert!(received.contains(&FrontendMessage::Close {
        target: ServerObjectType::Portal,
        name: "P1".into()
    }));
    session.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_server_error_reaches_handler() {
    let backend = MockBackend::builder()
        .with_default_response(MockResponse::error("42P01", "relation \"t\" does not exist"))
        .build()
        .await
        .unwrap();
    let registry = registry();
    let session = connect(&backend, &registry).await;

    let (h, rx) = response_channel();
    session.query("SELECT * FROM t", h);
    let err = rx.await.unwrap().unwrap_err();
    assert_eq!(err.sql_state(), Some("42P01"));
    assert!(session.is_connected());
    session.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_closed_session_rejects_requests() {
    let backend = backend().await;
    let registry = registry();
    let session = connect(&backend, &registry).await;
    session.kill().await.unwrap();

    assert!(matches!(session.transaction_status(), Err(Error::ChannelClosed)));
    let (h, rx) = response_channel();
    session.query("SELECT 1", h);
    assert!(matches!(rx.await.unwrap(), Err(RequestError::ChannelClosed)));
}

#[tokio::test]
async fn test_backend_disconnect_closes_session() {
    let backend = backend().await;
    let registry = registry();
    let session = connect(&backend, &registry).await;

    backend.stop();
    tokio::time::timeout(WAIT, session.channel().close_future())
        .await
        .unwrap()
        .unwrap();
    assert!(!session.is_connected());
    assert_eq!(session.state(), SessionState::Closed);

    session.shutdown().await.unwrap();
    assert!(session.shared_ref().is_released());
}

#[tokio::test]
async fn test_connect_refused() {
    let registry = registry();
    let addr = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };
    let err = connect_tcp(config(), &registry, addr).await.unwrap_err();
    assert!(matches!(err, Error::Io(_)));
    assert!(err.is_transient());
}
