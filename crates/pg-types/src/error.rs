//! Type conversion error types.

use thiserror::Error;

/// Errors that can occur while encoding a value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum TypeError {
    /// Value is null where a non-null value must be encoded.
    #[error("unexpected null value")]
    UnexpectedNull,

    /// The value cannot be represented by the target type's codec.
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        /// Target type name.
        expected: &'static str,
        /// Value kind supplied.
        actual: &'static str,
    },

    /// Value is out of range for the target type.
    #[error("value out of range for {target_type}")]
    OutOfRange {
        /// Target type name.
        target_type: &'static str,
    },

    /// Text contains characters the client encoding cannot represent.
    #[error("text is not representable in client encoding {encoding}")]
    Unmappable {
        /// Client encoding name.
        encoding: &'static str,
    },

    /// No codec is registered for the type.
    #[error("no codec for type oid {0}")]
    UnsupportedType(u32),
}
