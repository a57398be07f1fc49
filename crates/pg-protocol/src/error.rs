//! Protocol error types.

use thiserror::Error;

/// Errors raised while encoding or decoding protocol messages.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ProtocolError {
    /// Message body ended before a field could be read.
    #[error("incomplete message: expected {expected} bytes, got {actual}")]
    IncompleteMessage {
        /// Bytes needed.
        expected: usize,
        /// Bytes available.
        actual: usize,
    },

    /// Unknown message tag.
    #[error("invalid message type: {0:#04x}")]
    InvalidMessageType(u8),

    /// A length field was negative or smaller than its own header.
    #[error("invalid message length: {0}")]
    InvalidLength(i32),

    /// Message exceeds the configured maximum size.
    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge {
        /// Announced message size.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// A C string was not NUL terminated.
    #[error("missing string terminator")]
    MissingTerminator,

    /// A string field was not valid UTF-8.
    #[error("invalid UTF-8 in string field")]
    InvalidUtf8,

    /// Unknown field format code.
    #[error("invalid field format code: {0}")]
    InvalidFormat(i16),

    /// Unknown transaction status indicator.
    #[error("invalid transaction status: {0:#04x}")]
    InvalidTransactionStatus(u8),

    /// Unknown server object type for Close/Describe.
    #[error("invalid server object type: {0:#04x}")]
    InvalidObjectType(u8),

    /// A string field to be sent contains a NUL byte.
    #[error("string field contains a NUL byte")]
    EmbeddedNul,

    /// A list to be sent holds more elements than a 16-bit count allows.
    #[error("{0} values exceed the protocol limit of 65535")]
    TooManyValues(usize),

    /// A value to be sent is longer than a 32-bit length allows.
    #[error("value of {0} bytes exceeds the protocol limit")]
    ValueTooLarge(usize),

    /// Message decoded, but left unread bytes behind.
    #[error("{remaining} trailing bytes after {message} message")]
    TrailingBytes {
        /// Message name.
        message: &'static str,
        /// Number of unread bytes.
        remaining: usize,
    },
}
