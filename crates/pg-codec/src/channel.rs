//! A network channel bound to one event loop.
//!
//! [`Channel::open`] splits a transport and spawns three tasks on the event
//! loop: a writer draining the outbound queue in order, a reader feeding
//! backend messages to the [`DispatchHandle`], and a supervisor that settles
//! the close future once both have stopped. All channel I/O, including the
//! completion handlers of requests, therefore runs on that loop's thread.

use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::BytesMut;
use futures_util::{SinkExt, StreamExt};
use pg_io::EventLoop;
use pg_protocol::frontend;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

use crate::dispatch::DispatchHandle;
use crate::error::{ChannelError, RequestError};
use crate::framed::{MessageReader, MessageWriter};
use crate::request::ServerRequest;

/// How long the writer waits for the transport to flush and shut down.
const CLOSE_LINGER: Duration = Duration::from_millis(500);

/// Default capacity of buffers handed out by [`ByteAllocator`].
pub const DEFAULT_BUFFER_CAPACITY: usize = 256;

type CloseState = Option<Result<(), ChannelError>>;

/// Something the channel can write.
#[derive(Debug)]
pub enum Outbound {
    /// A request; its handler is registered with dispatch when written.
    Request(ServerRequest),
    /// The Terminate message.
    Terminate,
}

impl From<ServerRequest> for Outbound {
    fn from(request: ServerRequest) -> Self {
        Self::Request(request)
    }
}

struct Envelope {
    message: Outbound,
    done: Option<oneshot::Sender<Result<(), ChannelError>>>,
}

impl Envelope {
    fn reject(self) {
        if let Outbound::Request(request) = self.message {
            request.fail(RequestError::ChannelClosed);
        }
        if let Some(done) = self.done {
            let _ = done.send(Err(ChannelError::Closed));
        }
    }
}

/// Hands out write buffers.
#[derive(Debug, Clone, Copy)]
pub struct ByteAllocator {
    capacity: usize,
}

impl ByteAllocator {
    /// An allocator producing buffers of `capacity` bytes.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self { capacity }
    }

    /// A fresh, empty buffer.
    #[must_use]
    pub fn buffer(&self) -> BytesMut {
        BytesMut::with_capacity(self.capacity)
    }
}

impl Default for ByteAllocator {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY)
    }
}

/// Run-time channel options.
#[derive(Debug)]
pub struct ChannelConfig {
    auto_read: watch::Sender<bool>,
}

impl ChannelConfig {
    /// Whether inbound data is read as soon as it arrives.
    #[must_use]
    pub fn auto_read(&self) -> bool {
        *self.auto_read.borrow()
    }

    /// Pause or resume reading. While paused, inbound data stays in the
    /// transport and no handler runs.
    pub fn set_auto_read(&self, enabled: bool) {
        self.auto_read.send_if_modified(|current| {
            let changed = *current != enabled;
            *current = enabled;
            changed
        });
    }
}

struct ChannelShared {
    remote: SocketAddr,
    event_loop: EventLoop,
    allocator: ByteAllocator,
    config: ChannelConfig,
    dispatch: DispatchHandle,
    closed: CancellationToken,
}

/// Future for a channel write or close.
#[must_use = "futures do nothing unless polled"]
pub struct ChannelFuture {
    inner: Pin<Box<dyn Future<Output = Result<(), ChannelError>> + Send>>,
}

impl ChannelFuture {
    /// Wrap a future.
    pub fn new<F>(future: F) -> Self
    where
        F: Future<Output = Result<(), ChannelError>> + Send + 'static,
    {
        Self {
            inner: Box::pin(future),
        }
    }

    /// An already settled future.
    pub fn ready(result: Result<(), ChannelError>) -> Self {
        Self::new(std::future::ready(result))
    }

    fn from_receiver(rx: oneshot::Receiver<Result<(), ChannelError>>) -> Self {
        Self::new(async move { rx.await.unwrap_or(Err(ChannelError::Closed)) })
    }
}

impl Future for ChannelFuture {
    type Output = Result<(), ChannelError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.inner.as_mut().poll(cx)
    }
}

impl fmt::Debug for ChannelFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelFuture").finish_non_exhaustive()
    }
}

/// An open connection to one backend.
#[derive(Clone)]
pub struct Channel {
    shared: Arc<ChannelShared>,
    outbound: mpsc::UnboundedSender<Envelope>,
    close_state: watch::Receiver<CloseState>,
}

impl Channel {
    /// Bind `transport` to `event_loop` and start reading and writing.
    pub fn open<T>(transport: T, remote: SocketAddr, event_loop: &EventLoop) -> Self
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(transport);
        let (outbound, queue) = mpsc::unbounded_channel();
        let (close_tx, close_state) = watch::channel(None);
        let (auto_read, auto_read_rx) = watch::channel(true);

        let shared = Arc::new(ChannelShared {
            remote,
            event_loop: event_loop.clone(),
            allocator: ByteAllocator::default(),
            config: ChannelConfig { auto_read },
            dispatch: DispatchHandle::new(),
            closed: CancellationToken::new(),
        });

        let writer = event_loop.spawn(write_loop(
            MessageWriter::new(write_half),
            queue,
            Arc::clone(&shared),
        ));
        let reader = event_loop.spawn(read_loop(
            MessageReader::new(read_half),
            auto_read_rx,
            Arc::clone(&shared),
        ));
        let supervised = Arc::clone(&shared);
        event_loop.spawn(async move {
            let _ = writer.await;
            let _ = reader.await;
            for completion in supervised.dispatch.channel_closed() {
                completion.run();
            }
            tracing::debug!(remote = %supervised.remote, "channel closed");
            close_tx.send_replace(Some(Ok(())));
        });

        tracing::debug!(remote = %remote, event_loop = event_loop.name(), "channel open");
        Self {
            shared,
            outbound,
            close_state,
        }
    }

    /// Queue `message` for writing; the future settles once it is flushed.
    pub fn write(&self, message: impl Into<Outbound>) -> ChannelFuture {
        let (done, rx) = oneshot::channel();
        self.enqueue(Envelope {
            message: message.into(),
            done: Some(done),
        });
        ChannelFuture::from_receiver(rx)
    }

    /// Queue `message` for writing without tracking the write.
    pub fn write_void(&self, message: impl Into<Outbound>) {
        self.enqueue(Envelope {
            message: message.into(),
            done: None,
        });
    }

    fn enqueue(&self, envelope: Envelope) {
        if !self.is_active() {
            return envelope.reject();
        }
        if let Err(mpsc::error::SendError(envelope)) = self.outbound.send(envelope) {
            envelope.reject();
        }
    }

    /// Close the channel. Queued writes fail and pending requests complete
    /// with [`RequestError::ChannelClosed`].
    pub fn close(&self) -> ChannelFuture {
        self.shared.closed.cancel();
        self.close_future()
    }

    /// Future settling when the channel has fully closed.
    pub fn close_future(&self) -> ChannelFuture {
        let mut state = self.close_state.clone();
        ChannelFuture::new(async move {
            match state.wait_for(Option::is_some).await {
                Ok(result) => result.clone().unwrap_or(Ok(())),
                // The event loop went away with the channel.
                Err(_) => Ok(()),
            }
        })
    }

    /// Whether the channel is open.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.shared.closed.is_cancelled()
    }

    /// Whether the channel has fully closed and every pending request has
    /// completed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.close_state.borrow().is_some() || self.close_state.has_changed().is_err()
    }

    /// Buffer allocator for this channel.
    #[must_use]
    pub fn allocator(&self) -> ByteAllocator {
        self.shared.allocator
    }

    /// Address of the backend.
    #[must_use]
    pub fn remote_address(&self) -> SocketAddr {
        self.shared.remote
    }

    /// Event loop running this channel's I/O.
    #[must_use]
    pub fn event_loop(&self) -> &EventLoop {
        &self.shared.event_loop
    }

    /// Run-time options.
    #[must_use]
    pub fn config(&self) -> &ChannelConfig {
        &self.shared.config
    }

    /// Response state of this channel.
    #[must_use]
    pub fn dispatch(&self) -> &DispatchHandle {
        &self.shared.dispatch
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("remote", &self.shared.remote)
            .field("event_loop", &self.shared.event_loop.name())
            .field("active", &self.is_active())
            .finish()
    }
}

async fn write_loop<W>(
    mut writer: MessageWriter<W>,
    mut queue: mpsc::UnboundedReceiver<Envelope>,
    shared: Arc<ChannelShared>,
) where
    W: AsyncWrite + Unpin,
{
    let _close_on_exit = shared.closed.clone().drop_guard();
    loop {
        let envelope = tokio::select! {
            biased;
            () = shared.closed.cancelled() => break,
            next = queue.recv() => match next {
                Some(envelope) => envelope,
                None => break,
            },
        };

        let mut buf = shared.allocator.buffer();
        match envelope.message {
            Outbound::Request(request) => {
                if let Err(e) = request.encode(&mut buf) {
                    tracing::warn!(
                        remote = %shared.remote,
                        request = request.name(),
                        error = %e,
                        "request rejected before write"
                    );
                    request.fail(RequestError::Encode(e.clone()));
                    if let Some(done) = envelope.done {
                        let _ = done.send(Err(ChannelError::Protocol(e)));
                    }
                    continue;
                }
                shared.dispatch.register(request);
            }
            Outbound::Terminate => {
                frontend::terminate(&mut buf);
                shared.dispatch.trace_outbound("Terminate");
            }
        }

        let result = tokio::select! {
            biased;
            () = shared.closed.cancelled() => Err(ChannelError::Closed),
            sent = writer.send(buf.freeze()) => sent.map_err(ChannelError::from),
        };
        let failed = result.is_err();
        if let Err(e) = &result {
            tracing::warn!(remote = %shared.remote, error = %e, "channel write failed");
        }
        if let Some(done) = envelope.done {
            let _ = done.send(result);
        }
        if failed {
            shared.closed.cancel();
            break;
        }
    }

    queue.close();
    while let Ok(envelope) = queue.try_recv() {
        envelope.reject();
    }
    if tokio::time::timeout(CLOSE_LINGER, writer.close()).await.is_err() {
        tracing::debug!(remote = %shared.remote, "transport shutdown timed out");
    }
}

async fn read_loop<R>(
    mut reader: MessageReader<R>,
    mut auto_read: watch::Receiver<bool>,
    shared: Arc<ChannelShared>,
) where
    R: AsyncRead + Unpin,
{
    let _close_on_exit = shared.closed.clone().drop_guard();
    loop {
        if !*auto_read.borrow_and_update() {
            tokio::select! {
                biased;
                () = shared.closed.cancelled() => break,
                changed = auto_read.changed() => if changed.is_err() { break },
            }
            continue;
        }

        tokio::select! {
            biased;
            () = shared.closed.cancelled() => break,
            changed = auto_read.changed() => if changed.is_err() { break },
            next = reader.next() => match next {
                Some(Ok(message)) => {
                    if let Some(completion) = shared.dispatch.handle(message) {
                        completion.run();
                    }
                }
                Some(Err(e)) => {
                    tracing::warn!(remote = %shared.remote, error = %e, "channel read failed");
                    break;
                }
                None => {
                    tracing::debug!(remote = %shared.remote, "backend closed the connection");
                    break;
                }
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::codec::FrontendCodec;
    use crate::request::response_channel;
    use pg_io::{ActivityTracker, IoPool, ThreadFactory};
    use pg_protocol::{BackendMessage, FrontendMessage, ProtocolError, TransactionStatus};
    use tokio::io::DuplexStream;
    use tokio_util::codec::Framed;

    fn pool() -> IoPool {
        IoPool::new(1, &ThreadFactory::new("channel-test", ActivityTracker::new())).unwrap()
    }

    fn addr() -> SocketAddr {
        "127.0.0.1:5432".parse().unwrap()
    }

    /// The backend end of an in-memory connection.
    fn backend(stream: DuplexStream) -> Framed<DuplexStream, FrontendCodec> {
        Framed::new(stream, FrontendCodec::new())
    }

    #[tokio::test]
    async fn test_request_round_trip() {
        let pool = pool();
        let (client, server) = tokio::io::duplex(4096);
        let channel = Channel::open(client, addr(), &pool.next());
        let mut server = backend(server);

        let (handler, rx) = response_channel();
        channel
            .write(ServerRequest::Query {
                sql: "SELECT 1".into(),
                handler,
            })
            .await
            .unwrap();
        let received = server.next().await.unwrap().unwrap();
        assert_eq!(
            received,
            FrontendMessage::Query {
                sql: "SELECT 1".into()
            }
        );

        let mut reply = BytesMut::new();
        BackendMessage::CommandComplete {
            tag: "SELECT 0".into(),
        }
        .encode(&mut reply)
        .unwrap();
        BackendMessage::ReadyForQuery {
            status: TransactionStatus::Idle,
        }
        .encode(&mut reply)
        .unwrap();
        server.send(reply.freeze()).await.unwrap();

        let batches = rx.await.unwrap().unwrap();
        assert_eq!(batches[0].command, "SELECT 0");

        channel.close().await.unwrap();
        assert!(!channel.is_active());
        assert!(channel.is_closed());
        pool.shutdown_gracefully(Duration::ZERO, Duration::ZERO);
    }

    #[tokio::test]
    async fn test_close_fails_pending_and_rejects_writes() {
        let pool = pool();
        let (client, _server) = tokio::io::duplex(4096);
        let channel = Channel::open(client, addr(), &pool.next());

        let (handler, rx) = response_channel();
        channel
            .write(ServerRequest::Query {
                sql: "SELECT pg_sleep(10)".into(),
                handler,
            })
            .await
            .unwrap();
        channel.close().await.unwrap();
        assert!(matches!(rx.await.unwrap(), Err(RequestError::ChannelClosed)));

        let result = channel.write(Outbound::Terminate).await;
        assert!(matches!(result, Err(ChannelError::Closed)));
        pool.shutdown_gracefully(Duration::ZERO, Duration::ZERO);
    }

    #[tokio::test]
    async fn test_unencodable_request_fails_without_closing() {
        let pool = pool();
        let (client, server) = tokio::io::duplex(4096);
        let channel = Channel::open(client, addr(), &pool.next());
        let mut server = backend(server);

        let (handler, rx) = response_channel();
        let result = channel
            .write(ServerRequest::Query {
                sql: "SELECT 1\0; SELECT 2".into(),
                handler,
            })
            .await;
        assert!(matches!(
            result,
            Err(ChannelError::Protocol(ProtocolError::EmbeddedNul))
        ));
        assert!(matches!(
            rx.await.unwrap(),
            Err(RequestError::Encode(ProtocolError::EmbeddedNul))
        ));
        assert!(channel.is_active());
        assert_eq!(channel.dispatch().pending_requests(), 0);

        let (handler, _rx) = response_channel();
        channel
            .write(ServerRequest::Query {
                sql: "SELECT 2".into(),
                handler,
            })
            .await
            .unwrap();
        assert_eq!(
            server.next().await.unwrap().unwrap(),
            FrontendMessage::Query {
                sql: "SELECT 2".into()
            }
        );

        channel.close().await.unwrap();
        pool.shutdown_gracefully(Duration::ZERO, Duration::ZERO);
    }

    #[tokio::test]
    async fn test_peer_disconnect_closes_channel() {
        let pool = pool();
        let (client, server) = tokio::io::duplex(4096);
        let channel = Channel::open(client, addr(), &pool.next());
        drop(server);
        channel.close_future().await.unwrap();
        assert!(!channel.is_active());
        pool.shutdown_gracefully(Duration::ZERO, Duration::ZERO);
    }

    #[tokio::test]
    async fn test_auto_read_toggle() {
        let pool = pool();
        let (client, _server) = tokio::io::duplex(4096);
        let channel = Channel::open(client, addr(), &pool.next());
        assert!(channel.config().auto_read());
        channel.config().set_auto_read(false);
        assert!(!channel.config().auto_read());
        channel.close().await.unwrap();
        pool.shutdown_gracefully(Duration::ZERO, Duration::ZERO);
    }
}
