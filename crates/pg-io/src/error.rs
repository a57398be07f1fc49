//! Registry error types.

use thiserror::Error;

use crate::registry::PoolKey;

/// Errors raised when materializing a shared I/O pool.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RegistryError {
    /// No factory is registered for the requested pool kind.
    #[error("unsupported I/O pool kind: {0}")]
    UnsupportedPoolKind(PoolKey),

    /// The factory rejected the entry's configuration.
    #[error("I/O pool configuration error: {0}")]
    Configuration(String),

    /// The entry has no outstanding references.
    #[error("I/O pool {0} has no outstanding references")]
    NotAcquired(PoolKey),

    /// The reference was already released.
    #[error("shared pool reference already released")]
    Released,

    /// Worker thread or runtime creation failed.
    #[error("failed to start I/O worker: {0}")]
    Spawn(#[from] std::io::Error),
}

impl RegistryError {
    /// Whether this is a configuration problem that retrying cannot fix.
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::UnsupportedPoolKind(_) | Self::Configuration(_))
    }
}
