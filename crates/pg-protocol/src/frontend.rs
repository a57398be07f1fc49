//! Frontend (client to server) messages.
//!
//! The free functions append one complete message to a buffer and are what
//! the client side uses. [`FrontendMessage`] is the decoded form, used by
//! servers and test backends to inspect what a client sent.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::codec::{
    ensure, expect_consumed, read_count, read_cstring, read_nullable_bytes, write_count,
    write_cstring, write_message, write_nullable_bytes,
};
use crate::error::ProtocolError;
use crate::types::{FieldFormat, Oid, ServerObjectType};

/// Message tags sent by the frontend.
pub mod tag {
    /// Bind
    pub const BIND: u8 = b'B';
    /// Close
    pub const CLOSE: u8 = b'C';
    /// Describe
    pub const DESCRIBE: u8 = b'D';
    /// Execute
    pub const EXECUTE: u8 = b'E';
    /// FunctionCall
    pub const FUNCTION_CALL: u8 = b'F';
    /// Flush
    pub const FLUSH: u8 = b'H';
    /// Parse
    pub const PARSE: u8 = b'P';
    /// Query
    pub const QUERY: u8 = b'Q';
    /// Sync
    pub const SYNC: u8 = b'S';
    /// Terminate
    pub const TERMINATE: u8 = b'X';
}

/// Simple query.
pub fn query(dst: &mut BytesMut, sql: &str) -> Result<(), ProtocolError> {
    write_message(dst, tag::QUERY, |buf| write_cstring(buf, sql))
}

/// Parse a statement, optionally pinning parameter types.
pub fn parse(
    dst: &mut BytesMut,
    statement: &str,
    sql: &str,
    parameter_types: &[Oid],
) -> Result<(), ProtocolError> {
    write_message(dst, tag::PARSE, |buf| {
        write_cstring(buf, statement)?;
        write_cstring(buf, sql)?;
        write_count(buf, parameter_types.len())?;
        for oid in parameter_types {
            buf.put_u32(oid.0);
        }
        Ok(())
    })
}

/// Bind parameters to a statement, creating a portal.
///
/// At most 65535 parameters can be bound.
pub fn bind(
    dst: &mut BytesMut,
    portal: &str,
    statement: &str,
    parameter_formats: &[FieldFormat],
    parameters: &[Option<Bytes>],
    result_formats: &[FieldFormat],
) -> Result<(), ProtocolError> {
    write_message(dst, tag::BIND, |buf| {
        write_cstring(buf, portal)?;
        write_cstring(buf, statement)?;
        write_formats(buf, parameter_formats)?;
        write_values(buf, parameters)?;
        write_formats(buf, result_formats)
    })
}

/// Ask for a description of a statement or portal.
pub fn describe(
    dst: &mut BytesMut,
    target: ServerObjectType,
    name: &str,
) -> Result<(), ProtocolError> {
    write_message(dst, tag::DESCRIBE, |buf| {
        buf.put_u8(target as u8);
        write_cstring(buf, name)
    })
}

/// Execute a portal. A `max_rows` of zero means "no limit"; limits above
/// `i32::MAX` are sent as `i32::MAX`.
pub fn execute(dst: &mut BytesMut, portal: &str, max_rows: u32) -> Result<(), ProtocolError> {
    write_message(dst, tag::EXECUTE, |buf| {
        write_cstring(buf, portal)?;
        buf.put_i32(i32::try_from(max_rows).unwrap_or(i32::MAX));
        Ok(())
    })
}

/// Close a statement or portal.
pub fn close(dst: &mut BytesMut, target: ServerObjectType, name: &str) -> Result<(), ProtocolError> {
    write_message(dst, tag::CLOSE, |buf| {
        buf.put_u8(target as u8);
        write_cstring(buf, name)
    })
}

/// Call a server function by oid. Results are always requested in binary.
pub fn function_call(
    dst: &mut BytesMut,
    function: Oid,
    argument_formats: &[FieldFormat],
    arguments: &[Option<Bytes>],
) -> Result<(), ProtocolError> {
    write_message(dst, tag::FUNCTION_CALL, |buf| {
        buf.put_u32(function.0);
        write_formats(buf, argument_formats)?;
        write_values(buf, arguments)?;
        buf.put_i16(FieldFormat::Binary.code());
        Ok(())
    })
}

/// End an extended-query cycle.
pub fn sync(dst: &mut BytesMut) {
    write_empty(dst, tag::SYNC);
}

/// Ask the backend to deliver pending output without ending the cycle.
pub fn flush(dst: &mut BytesMut) {
    write_empty(dst, tag::FLUSH);
}

/// Voluntary end of session.
pub fn terminate(dst: &mut BytesMut) {
    write_empty(dst, tag::TERMINATE);
}

fn write_empty(dst: &mut BytesMut, tag: u8) {
    dst.put_u8(tag);
    dst.put_i32(4);
}

fn write_formats(buf: &mut BytesMut, formats: &[FieldFormat]) -> Result<(), ProtocolError> {
    write_count(buf, formats.len())?;
    for format in formats {
        buf.put_i16(format.code());
    }
    Ok(())
}

fn write_values(buf: &mut BytesMut, values: &[Option<Bytes>]) -> Result<(), ProtocolError> {
    write_count(buf, values.len())?;
    for value in values {
        write_nullable_bytes(buf, value.as_deref())?;
    }
    Ok(())
}

fn read_formats(src: &mut Bytes) -> Result<Vec<FieldFormat>, ProtocolError> {
    let count = read_count(src)?;
    ensure(src, count * 2)?;
    (0..count).map(|_| FieldFormat::from_code(src.get_i16())).collect()
}

fn read_values(src: &mut Bytes) -> Result<Vec<Option<Bytes>>, ProtocolError> {
    let count = read_count(src)?;
    (0..count).map(|_| read_nullable_bytes(src)).collect()
}

/// A decoded frontend message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrontendMessage {
    /// Simple query.
    Query {
        /// SQL text.
        sql: String,
    },
    /// Parse.
    Parse {
        /// Statement name; empty for the unnamed statement.
        statement: String,
        /// SQL text.
        sql: String,
        /// Pinned parameter types.
        parameter_types: Vec<Oid>,
    },
    /// Bind.
    Bind {
        /// Portal name; empty for the unnamed portal.
        portal: String,
        /// Source statement name.
        statement: String,
        /// Parameter format codes.
        parameter_formats: Vec<FieldFormat>,
        /// Parameter values (`None` is NULL).
        parameters: Vec<Option<Bytes>>,
        /// Result column format codes.
        result_formats: Vec<FieldFormat>,
    },
    /// Describe.
    Describe {
        /// Statement or portal.
        target: ServerObjectType,
        /// Object name.
        name: String,
    },
    /// Execute.
    Execute {
        /// Portal name.
        portal: String,
        /// Row limit, zero for none.
        max_rows: u32,
    },
    /// Close.
    Close {
        /// Statement or portal.
        target: ServerObjectType,
        /// Object name.
        name: String,
    },
    /// FunctionCall.
    FunctionCall {
        /// Function oid.
        function: Oid,
        /// Argument format codes.
        argument_formats: Vec<FieldFormat>,
        /// Argument values.
        arguments: Vec<Option<Bytes>>,
        /// Requested result format.
        result_format: FieldFormat,
    },
    /// Sync.
    Sync,
    /// Flush.
    Flush,
    /// Terminate.
    Terminate,
}

impl FrontendMessage {
    /// Decode a message body given its tag. `body` excludes tag and length.
    pub fn decode(tag: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        let src = &mut body;
        let message = match tag {
            tag::QUERY => Self::Query {
                sql: read_cstring(src)?,
            },
            tag::PARSE => {
                let statement = read_cstring(src)?;
                let sql = read_cstring(src)?;
                let count = read_count(src)?;
                ensure(src, count * 4)?;
                let parameter_types = (0..count).map(|_| Oid(src.get_u32())).collect();
                Self::Parse {
                    statement,
                    sql,
                    parameter_types,
                }
            }
            tag::BIND => Self::Bind {
                portal: read_cstring(src)?,
                statement: read_cstring(src)?,
                parameter_formats: read_formats(src)?,
                parameters: read_values(src)?,
                result_formats: read_formats(src)?,
            },
            tag::DESCRIBE | tag::CLOSE => {
                ensure(src, 1)?;
                let target = ServerObjectType::from_u8(src.get_u8())?;
                let name = read_cstring(src)?;
                if tag == tag::DESCRIBE {
                    Self::Describe { target, name }
                } else {
                    Self::Close { target, name }
                }
            }
            tag::EXECUTE => {
                let portal = read_cstring(src)?;
                ensure(src, 4)?;
                Self::Execute {
                    portal,
                    max_rows: src.get_i32().max(0) as u32,
                }
            }
            tag::FUNCTION_CALL => {
                ensure(src, 4)?;
                let function = Oid(src.get_u32());
                let argument_formats = read_formats(src)?;
                let arguments = read_values(src)?;
                ensure(src, 2)?;
                let result_format = FieldFormat::from_code(src.get_i16())?;
                Self::FunctionCall {
                    function,
                    argument_formats,
                    arguments,
                    result_format,
                }
            }
            tag::SYNC => Self::Sync,
            tag::FLUSH => Self::Flush,
            tag::TERMINATE => Self::Terminate,
            other => return Err(ProtocolError::InvalidMessageType(other)),
        };
        expect_consumed(src, message.name())?;
        Ok(message)
    }

    /// Protocol name of this message, as used in traces.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Query { .. } => "Query",
            Self::Parse { .. } => "Parse",
            Self::Bind { .. } => "Bind",
            Self::Describe { .. } => "Describe",
            Self::Execute { .. } => "Execute",
            Self::Close { .. } => "Close",
            Self::FunctionCall { .. } => "FunctionCall",
            Self::Sync => "Sync",
            Self::Flush => "Flush",
            Self::Terminate => "Terminate",
        }
    }
}
