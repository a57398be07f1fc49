//! Small wire-level value types shared across messages.

use std::fmt;

use crate::error::ProtocolError;

/// Object identifier of a server-side type or function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Oid(pub u32);

impl Oid {
    /// The "unspecified" type; lets the server infer a parameter type.
    pub const UNSPECIFIED: Oid = Oid(0);
    /// `bool`
    pub const BOOL: Oid = Oid(16);
    /// `bytea`
    pub const BYTEA: Oid = Oid(17);
    /// `int8`
    pub const INT8: Oid = Oid(20);
    /// `int2`
    pub const INT2: Oid = Oid(21);
    /// `int4`
    pub const INT4: Oid = Oid(23);
    /// `text`
    pub const TEXT: Oid = Oid(25);
    /// `float4`
    pub const FLOAT4: Oid = Oid(700);
    /// `float8`
    pub const FLOAT8: Oid = Oid(701);
    /// `varchar`
    pub const VARCHAR: Oid = Oid(1043);
    /// `uuid`
    pub const UUID: Oid = Oid(2950);
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Wire format of a parameter or result column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(i16)]
pub enum FieldFormat {
    /// Textual representation.
    #[default]
    Text = 0,
    /// Type-specific binary representation.
    Binary = 1,
}

impl FieldFormat {
    /// Parse a format code.
    pub fn from_code(code: i16) -> Result<Self, ProtocolError> {
        match code {
            0 => Ok(Self::Text),
            1 => Ok(Self::Binary),
            other => Err(ProtocolError::InvalidFormat(other)),
        }
    }

    /// The wire code for this format.
    #[must_use]
    pub const fn code(self) -> i16 {
        self as i16
    }
}

/// Kind of named server object addressed by Close and Describe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ServerObjectType {
    /// A prepared statement.
    Statement = b'S',
    /// A portal (bound statement / cursor).
    Portal = b'P',
}

impl ServerObjectType {
    /// Parse an object type byte.
    pub fn from_u8(value: u8) -> Result<Self, ProtocolError> {
        match value {
            b'S' => Ok(Self::Statement),
            b'P' => Ok(Self::Portal),
            other => Err(ProtocolError::InvalidObjectType(other)),
        }
    }
}

/// Backend transaction status reported with every ReadyForQuery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum TransactionStatus {
    /// Not in a transaction block.
    #[default]
    Idle = b'I',
    /// In a transaction block.
    Active = b'T',
    /// In a failed transaction block; queries are rejected until it ends.
    Failed = b'E',
}

impl TransactionStatus {
    /// Parse a status indicator byte.
    pub fn from_u8(value: u8) -> Result<Self, ProtocolError> {
        match value {
            b'I' => Ok(Self::Idle),
            b'T' => Ok(Self::Active),
            b'E' => Ok(Self::Failed),
            other => Err(ProtocolError::InvalidTransactionStatus(other)),
        }
    }

    /// Whether a transaction block is open (healthy or failed).
    #[must_use]
    pub fn in_transaction(self) -> bool {
        !matches!(self, Self::Idle)
    }
}
