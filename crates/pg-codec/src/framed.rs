//! Framed message streams over the split halves of a transport.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_core::Stream;
use futures_util::Sink;
use pg_protocol::BackendMessage;
use pin_project_lite::pin_project;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::codec::{BackendCodec, FrontendCodec};
use crate::error::CodecError;

pin_project! {
    /// A read-only stream of backend messages.
    pub struct MessageReader<T> {
        #[pin]
        inner: FramedRead<T, BackendCodec>,
    }
}

impl<T> MessageReader<T>
where
    T: AsyncRead,
{
    /// Create a new message reader.
    pub fn new(transport: T) -> Self {
        Self::with_codec(transport, BackendCodec::new())
    }

    /// Create a new message reader with a custom codec.
    pub fn with_codec(transport: T, codec: BackendCodec) -> Self {
        Self {
            inner: FramedRead::new(transport, codec),
        }
    }

    /// Get a reference to the underlying transport.
    pub fn get_ref(&self) -> &T {
        self.inner.get_ref()
    }
}

impl<T> Stream for MessageReader<T>
where
    T: AsyncRead,
{
    type Item = Result<BackendMessage, CodecError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.project().inner.poll_next(cx)
    }
}

impl<T> std::fmt::Debug for MessageReader<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageReader")
            .field("buffered", &self.inner.read_buffer().len())
            .finish()
    }
}

pin_project! {
    /// A write-only sink of encoded frontend messages.
    pub struct MessageWriter<T> {
        #[pin]
        inner: FramedWrite<T, FrontendCodec>,
    }
}

impl<T> MessageWriter<T>
where
    T: AsyncWrite,
{
    /// Create a new message writer.
    pub fn new(transport: T) -> Self {
        Self {
            inner: FramedWrite::new(transport, FrontendCodec::new()),
        }
    }

    /// Get a reference to the underlying transport.
    pub fn get_ref(&self) -> &T {
        self.inner.get_ref()
    }
}

impl<T> Sink<Bytes> for MessageWriter<T>
where
    T: AsyncWrite,
{
    type Error = CodecError;

    fn poll_ready(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.project().inner.poll_ready(cx)
    }

    fn start_send(self: Pin<&mut Self>, item: Bytes) -> Result<(), Self::Error> {
        self.project().inner.start_send(item)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.project().inner.poll_flush(cx)
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.project().inner.poll_close(cx)
    }
}

impl<T> std::fmt::Debug for MessageWriter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageWriter")
            .field("buffered", &self.inner.write_buffer().len())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use futures_util::{SinkExt, StreamExt};
    use pg_protocol::{TransactionStatus, frontend};
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_reader_yields_messages() {
        let mut wire = BytesMut::new();
        BackendMessage::ReadyForQuery {
            status: TransactionStatus::Idle,
        }
        .encode(&mut wire)
        .unwrap();
        let mut reader = MessageReader::new(&wire[..]);

        let message = reader.next().await.unwrap().unwrap();
        assert_eq!(message.name(), "ReadyForQuery");
        assert!(reader.next().await.is_none());
    }

    #[tokio::test]
    async fn test_writer_writes_bytes_verbatim() {
        let (client, mut server) = tokio::io::duplex(64);
        let mut writer = MessageWriter::new(client);
        let mut buf = BytesMut::new();
        frontend::terminate(&mut buf);
        writer.send(buf.freeze()).await.unwrap();
        writer.close().await.unwrap();

        let mut received = Vec::new();
        server.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, [b'X', 0, 0, 0, 4]);
    }
}
