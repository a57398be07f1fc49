//! Client error types.

use pg_codec::{ChannelError, RequestError};
use pg_io::RegistryError;
use pg_types::TypeError;
use thiserror::Error;

/// Errors that can occur during session operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The session's channel is closed.
    #[error("channel closed")]
    ChannelClosed,

    /// Connecting to the backend failed.
    #[error("connection failed: {0}")]
    Connection(String),

    /// Connection timeout occurred.
    #[error("connection timed out")]
    ConnectionTimeout,

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// The I/O pool could not be obtained.
    #[error("I/O pool error: {0}")]
    Registry(#[from] RegistryError),

    /// A channel write or close failed.
    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),

    /// A request failed.
    #[error("request failed: {0}")]
    Request(#[from] RequestError),

    /// A parameter could not be encoded.
    #[error("type error: {0}")]
    Type(#[from] TypeError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Check if this error is transient and may succeed on retry.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ConnectionTimeout | Self::Connection(_) | Self::Io(_)
        )
    }

    /// Check if this error stems from configuration rather than I/O.
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        match self {
            Self::Config(_) => true,
            Self::Registry(e) => e.is_configuration(),
            _ => false,
        }
    }

    /// The SQLSTATE code, if the server rejected a request.
    #[must_use]
    pub fn sql_state(&self) -> Option<&str> {
        match self {
            Self::Request(e) => e.sql_state(),
            _ => None,
        }
    }
}

/// Result type for session operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use pg_io::PoolKey;

    #[test]
    fn test_configuration_errors() {
        assert!(Error::Config("bad".into()).is_configuration());
        assert!(Error::from(RegistryError::UnsupportedPoolKind(PoolKey::named("nio"))).is_configuration());
        assert!(!Error::ChannelClosed.is_configuration());
    }

    #[test]
    fn test_transient_errors() {
        assert!(Error::ConnectionTimeout.is_transient());
        assert!(!Error::ChannelClosed.is_transient());
    }
}
