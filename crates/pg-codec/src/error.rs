//! Codec, channel and request error types.

use std::io;
use std::sync::Arc;

use pg_protocol::{ProtocolError, ServerNotice};
use thiserror::Error;

/// Errors raised by the framing codecs.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CodecError {
    /// Transport I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A frame could not be decoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Errors reported through a channel's write and close futures.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum ChannelError {
    /// The channel is closed or closed before the operation completed.
    #[error("channel closed")]
    Closed,

    /// Transport I/O failed.
    #[error("I/O error: {0}")]
    Io(Arc<io::Error>),

    /// Outbound data could not be framed.
    #[error("protocol error: {0}")]
    Protocol(ProtocolError),
}

impl From<CodecError> for ChannelError {
    fn from(e: CodecError) -> Self {
        match e {
            CodecError::Io(e) => Self::Io(Arc::new(e)),
            CodecError::Protocol(e) => Self::Protocol(e),
        }
    }
}

impl From<io::Error> for ChannelError {
    fn from(e: io::Error) -> Self {
        Self::Io(Arc::new(e))
    }
}

/// Errors delivered to a request's completion handler.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum RequestError {
    /// The backend answered with an ErrorResponse.
    #[error("server error: {0}")]
    Server(ServerNotice),

    /// The channel closed before the request completed.
    #[error("channel closed before the request completed")]
    ChannelClosed,

    /// The request could not be written to the wire; nothing was sent.
    #[error("request could not be encoded: {0}")]
    Encode(ProtocolError),
}

impl RequestError {
    /// The SQLSTATE code of a server error.
    #[must_use]
    pub fn sql_state(&self) -> Option<&str> {
        match self {
            Self::Server(notice) => Some(notice.code()),
            Self::ChannelClosed | Self::Encode(_) => None,
        }
    }
}
