//! Backend (server to client) messages.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::codec::{
    ensure, expect_consumed, read_count, read_cstring, read_nullable_bytes, write_count,
    write_cstring, write_message, write_nullable_bytes,
};
use crate::error::ProtocolError;
use crate::types::{FieldFormat, Oid, TransactionStatus};

/// Message tags sent by the backend.
pub mod tag {
    /// ParseComplete
    pub const PARSE_COMPLETE: u8 = b'1';
    /// BindComplete
    pub const BIND_COMPLETE: u8 = b'2';
    /// CloseComplete
    pub const CLOSE_COMPLETE: u8 = b'3';
    /// NotificationResponse
    pub const NOTIFICATION_RESPONSE: u8 = b'A';
    /// CommandComplete
    pub const COMMAND_COMPLETE: u8 = b'C';
    /// DataRow
    pub const DATA_ROW: u8 = b'D';
    /// ErrorResponse
    pub const ERROR_RESPONSE: u8 = b'E';
    /// EmptyQueryResponse
    pub const EMPTY_QUERY_RESPONSE: u8 = b'I';
    /// BackendKeyData
    pub const BACKEND_KEY_DATA: u8 = b'K';
    /// NoticeResponse
    pub const NOTICE_RESPONSE: u8 = b'N';
    /// ParameterStatus
    pub const PARAMETER_STATUS: u8 = b'S';
    /// RowDescription
    pub const ROW_DESCRIPTION: u8 = b'T';
    /// FunctionCallResponse
    pub const FUNCTION_CALL_RESPONSE: u8 = b'V';
    /// ReadyForQuery
    pub const READY_FOR_QUERY: u8 = b'Z';
    /// NoData
    pub const NO_DATA: u8 = b'n';
    /// PortalSuspended
    pub const PORTAL_SUSPENDED: u8 = b's';
    /// ParameterDescription
    pub const PARAMETER_DESCRIPTION: u8 = b't';
}

/// Description of one result column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescription {
    /// Column name.
    pub name: String,
    /// Source table oid, or zero.
    pub table_oid: Oid,
    /// Source column attribute number, or zero.
    pub column_attribute: i16,
    /// Column data type.
    pub type_oid: Oid,
    /// Type size (negative for variable width).
    pub type_size: i16,
    /// Type modifier.
    pub type_modifier: i32,
    /// Format the column values will arrive in.
    pub format: FieldFormat,
}

impl FieldDescription {
    /// A text-format column of the given type with no table origin.
    #[must_use]
    pub fn new(name: impl Into<String>, type_oid: Oid) -> Self {
        Self {
            name: name.into(),
            table_oid: Oid(0),
            column_attribute: 0,
            type_oid,
            type_size: -1,
            type_modifier: -1,
            format: FieldFormat::Text,
        }
    }
}

/// Fields of an ErrorResponse or NoticeResponse.
///
/// Each field is a one-byte code (`S` severity, `C` SQLSTATE, `M` message,
/// `D` detail, `H` hint, ...) and a string value.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ServerNotice {
    /// Raw fields in the order received.
    pub fields: Vec<(u8, String)>,
}

impl ServerNotice {
    /// Build a notice from severity, SQLSTATE code and message.
    #[must_use]
    pub fn new(severity: &str, code: &str, message: &str) -> Self {
        Self {
            fields: vec![
                (b'S', severity.to_string()),
                (b'C', code.to_string()),
                (b'M', message.to_string()),
            ],
        }
    }

    /// Look up a field by its code.
    #[must_use]
    pub fn field(&self, code: u8) -> Option<&str> {
        self.fields
            .iter()
            .find(|(c, _)| *c == code)
            .map(|(_, v)| v.as_str())
    }

    /// Severity (`ERROR`, `FATAL`, `NOTICE`, ...).
    #[must_use]
    pub fn severity(&self) -> &str {
        self.field(b'S').unwrap_or_default()
    }

    /// SQLSTATE code.
    #[must_use]
    pub fn code(&self) -> &str {
        self.field(b'C').unwrap_or_default()
    }

    /// Primary message.
    #[must_use]
    pub fn message(&self) -> &str {
        self.field(b'M').unwrap_or_default()
    }

    fn decode(src: &mut Bytes) -> Result<Self, ProtocolError> {
        let mut fields = Vec::new();
        loop {
            ensure(src, 1)?;
            let code = src.get_u8();
            if code == 0 {
                break;
            }
            fields.push((code, read_cstring(src)?));
        }
        Ok(Self { fields })
    }

    fn encode(&self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        for (code, value) in &self.fields {
            buf.put_u8(*code);
            write_cstring(buf, value)?;
        }
        buf.put_u8(0);
        Ok(())
    }
}

impl std::fmt::Display for ServerNotice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {} ({})", self.severity(), self.message(), self.code())
    }
}

/// A decoded backend message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendMessage {
    /// Parse finished.
    ParseComplete,
    /// Bind finished.
    BindComplete,
    /// Close finished.
    CloseComplete,
    /// Asynchronous LISTEN/NOTIFY delivery.
    NotificationResponse {
        /// Notifying backend process id.
        process_id: i32,
        /// Channel name.
        channel: String,
        /// Payload.
        payload: String,
    },
    /// A command finished; carries the command tag (e.g. `SELECT 3`).
    CommandComplete {
        /// Command tag.
        tag: String,
    },
    /// One result row.
    DataRow {
        /// Column values (`None` is NULL).
        values: Vec<Option<Bytes>>,
    },
    /// Request failed.
    ErrorResponse(ServerNotice),
    /// Empty query string was executed.
    EmptyQueryResponse,
    /// Cancellation key for this session.
    BackendKeyData {
        /// Backend process id.
        process_id: i32,
        /// Secret key.
        secret_key: i32,
    },
    /// Non-fatal notice.
    NoticeResponse(ServerNotice),
    /// Run-time parameter report.
    ParameterStatus {
        /// Parameter name.
        name: String,
        /// Parameter value.
        value: String,
    },
    /// Result column layout.
    RowDescription {
        /// One entry per column.
        fields: Vec<FieldDescription>,
    },
    /// Function call result.
    FunctionCallResponse {
        /// Result value (`None` is NULL).
        value: Option<Bytes>,
    },
    /// Backend is ready for a new query cycle.
    ReadyForQuery {
        /// Current transaction status.
        status: TransactionStatus,
    },
    /// Statement or portal returns no rows.
    NoData,
    /// Execute reached its row limit; the portal can be resumed.
    PortalSuspended,
    /// Parameter types of a described statement.
    ParameterDescription {
        /// One oid per parameter.
        types: Vec<Oid>,
    },
}

impl BackendMessage {
    /// Decode a message body given its tag. `body` excludes tag and length.
    pub fn decode(tag: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        let src = &mut body;
        let message = match tag {
            tag::PARSE_COMPLETE => Self::ParseComplete,
            tag::BIND_COMPLETE => Self::BindComplete,
            tag::CLOSE_COMPLETE => Self::CloseComplete,
            tag::NO_DATA => Self::NoData,
            tag::PORTAL_SUSPENDED => Self::PortalSuspended,
            tag::EMPTY_QUERY_RESPONSE => Self::EmptyQueryResponse,
            tag::NOTIFICATION_RESPONSE => {
                ensure(src, 4)?;
                Self::NotificationResponse {
                    process_id: src.get_i32(),
                    channel: read_cstring(src)?,
                    payload: read_cstring(src)?,
                }
            }
            tag::COMMAND_COMPLETE => Self::CommandComplete {
                tag: read_cstring(src)?,
            },
            tag::DATA_ROW => {
                let count = read_count(src)?;
                let values = (0..count)
                    .map(|_| read_nullable_bytes(src))
                    .collect::<Result<_, _>>()?;
                Self::DataRow { values }
            }
            tag::ERROR_RESPONSE => Self::ErrorResponse(ServerNotice::decode(src)?),
            tag::NOTICE_RESPONSE => Self::NoticeResponse(ServerNotice::decode(src)?),
            tag::BACKEND_KEY_DATA => {
                ensure(src, 8)?;
                Self::BackendKeyData {
                    process_id: src.get_i32(),
                    secret_key: src.get_i32(),
                }
            }
            tag::PARAMETER_STATUS => Self::ParameterStatus {
                name: read_cstring(src)?,
                value: read_cstring(src)?,
            },
            tag::ROW_DESCRIPTION => {
                let count = read_count(src)?;
                let mut fields = Vec::with_capacity(count);
                for _ in 0..count {
                    let name = read_cstring(src)?;
                    ensure(src, 18)?;
                    fields.push(FieldDescription {
                        name,
                        table_oid: Oid(src.get_u32()),
                        column_attribute: src.get_i16(),
                        type_oid: Oid(src.get_u32()),
                        type_size: src.get_i16(),
                        type_modifier: src.get_i32(),
                        format: FieldFormat::from_code(src.get_i16())?,
                    });
                }
                Self::RowDescription { fields }
            }
            tag::FUNCTION_CALL_RESPONSE => Self::FunctionCallResponse {
                value: read_nullable_bytes(src)?,
            },
            tag::READY_FOR_QUERY => {
                ensure(src, 1)?;
                Self::ReadyForQuery {
                    status: TransactionStatus::from_u8(src.get_u8())?,
                }
            }
            tag::PARAMETER_DESCRIPTION => {
                let count = read_count(src)?;
                ensure(src, count * 4)?;
                Self::ParameterDescription {
                    types: (0..count).map(|_| Oid(src.get_u32())).collect(),
                }
            }
            other => return Err(ProtocolError::InvalidMessageType(other)),
        };
        expect_consumed(src, message.name())?;
        Ok(message)
    }

    /// Append the wire form of this message to `dst`.
    ///
    /// Fails, leaving `dst` unchanged, if a string holds a NUL or a list or
    /// value is too long for its length field.
    pub fn encode(&self, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        match self {
            Self::ParseComplete => write_message(dst, tag::PARSE_COMPLETE, |_| Ok(())),
            Self::BindComplete => write_message(dst, tag::BIND_COMPLETE, |_| Ok(())),
            Self::CloseComplete => write_message(dst, tag::CLOSE_COMPLETE, |_| Ok(())),
            Self::NoData => write_message(dst, tag::NO_DATA, |_| Ok(())),
            Self::PortalSuspended => write_message(dst, tag::PORTAL_SUSPENDED, |_| Ok(())),
            Self::EmptyQueryResponse => write_message(dst, tag::EMPTY_QUERY_RESPONSE, |_| Ok(())),
            Self::NotificationResponse {
                process_id,
                channel,
                payload,
            } => write_message(dst, tag::NOTIFICATION_RESPONSE, |buf| {
                buf.put_i32(*process_id);
                write_cstring(buf, channel)?;
                write_cstring(buf, payload)
            }),
            Self::CommandComplete { tag: command } => {
                write_message(dst, tag::COMMAND_COMPLETE, |buf| write_cstring(buf, command))
            }
            Self::DataRow { values } => write_message(dst, tag::DATA_ROW, |buf| {
                write_count(buf, values.len())?;
                for value in values {
                    write_nullable_bytes(buf, value.as_deref())?;
                }
                Ok(())
            }),
            Self::ErrorResponse(notice) => {
                write_message(dst, tag::ERROR_RESPONSE, |buf| notice.encode(buf))
            }
            Self::NoticeResponse(notice) => {
                write_message(dst, tag::NOTICE_RESPONSE, |buf| notice.encode(buf))
            }
            Self::BackendKeyData {
                process_id,
                secret_key,
            } => write_message(dst, tag::BACKEND_KEY_DATA, |buf| {
                buf.put_i32(*process_id);
                buf.put_i32(*secret_key);
                Ok(())
            }),
            Self::ParameterStatus { name, value } => {
                write_message(dst, tag::PARAMETER_STATUS, |buf| {
                    write_cstring(buf, name)?;
                    write_cstring(buf, value)
                })
            }
            Self::RowDescription { fields } => write_message(dst, tag::ROW_DESCRIPTION, |buf| {
                write_count(buf, fields.len())?;
                for field in fields {
                    write_cstring(buf, &field.name)?;
                    buf.put_u32(field.table_oid.0);
                    buf.put_i16(field.column_attribute);
                    buf.put_u32(field.type_oid.0);
                    buf.put_i16(field.type_size);
                    buf.put_i32(field.type_modifier);
                    buf.put_i16(field.format.code());
                }
                Ok(())
            }),
            Self::FunctionCallResponse { value } => {
                write_message(dst, tag::FUNCTION_CALL_RESPONSE, |buf| {
                    write_nullable_bytes(buf, value.as_deref())
                })
            }
            Self::ReadyForQuery { status } => write_message(dst, tag::READY_FOR_QUERY, |buf| {
                buf.put_u8(*status as u8);
                Ok(())
            }),
            Self::ParameterDescription { types } => {
                write_message(dst, tag::PARAMETER_DESCRIPTION, |buf| {
                    write_count(buf, types.len())?;
                    for oid in types {
                        buf.put_u32(oid.0);
                    }
                    Ok(())
                })
            }
        }
    }

    /// Protocol name of this message, as used in traces.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::ParseComplete => "ParseComplete",
            Self::BindComplete => "BindComplete",
            Self::CloseComplete => "CloseComplete",
            Self::NotificationResponse { .. } => "NotificationResponse",
            Self::CommandComplete { .. } => "CommandComplete",
            Self::DataRow { .. } => "DataRow",
            Self::ErrorResponse(_) => "ErrorResponse",
            Self::EmptyQueryResponse => "EmptyQueryResponse",
            Self::BackendKeyData { .. } => "BackendKeyData",
            Self::NoticeResponse(_) => "NoticeResponse",
            Self::ParameterStatus { .. } => "ParameterStatus",
            Self::RowDescription { .. } => "RowDescription",
            Self::FunctionCallResponse { .. } => "FunctionCallResponse",
            Self::ReadyForQuery { .. } => "ReadyForQuery",
            Self::NoData => "NoData",
            Self::PortalSuspended => "PortalSuspended",
            Self::ParameterDescription { .. } => "ParameterDescription",
        }
    }
}

/// Parse the affected-row count out of a command tag (`INSERT 0 5`, `UPDATE 3`, `SELECT 2`).
#[must_use]
pub fn rows_affected(command_tag: &str) -> Option<u64> {
    command_tag.rsplit(' ').next()?.parse().ok()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn roundtrip(message: &BackendMessage) -> BackendMessage {
        let mut buf = BytesMut::new();
        message.encode(&mut buf).unwrap();
        let tag = buf[0];
        let len = i32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]) as usize;
        assert_eq!(len + 1, buf.len());
        let mut body = buf.freeze();
        body.advance(5);
        BackendMessage::decode(tag, body).unwrap()
    }

    #[test]
    fn test_row_description() {
        let msg = BackendMessage::RowDescription {
            fields: vec![
                FieldDescription::new("id", Oid::INT4),
                FieldDescription::new("name", Oid::TEXT),
            ],
        };
        assert_eq!(roundtrip(&msg), msg);
    }

    #[test]
    fn test_error_response_fields() {
        let msg = BackendMessage::ErrorResponse(ServerNotice::new(
            "ERROR",
            "42P01",
            "relation \"missing\" does not exist",
        ));
        match roundtrip(&msg) {
            BackendMessage::ErrorResponse(notice) => {
                assert_eq!(notice.code(), "42P01");
                assert_eq!(notice.severity(), "ERROR");
            }
            other => unreachable!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_ready_for_query_rejects_unknown_status() {
        let err = BackendMessage::decode(tag::READY_FOR_QUERY, Bytes::from_static(b"?"));
        assert_eq!(err, Err(ProtocolError::InvalidTransactionStatus(b'?')));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let err = BackendMessage::decode(tag::PARSE_COMPLETE, Bytes::from_static(b"x"));
        assert!(matches!(err, Err(ProtocolError::TrailingBytes { .. })));
    }

    #[test]
    fn test_rows_affected() {
        assert_eq!(rows_affected("INSERT 0 5"), Some(5));
        assert_eq!(rows_affected("SELECT 2"), Some(2));
        assert_eq!(rows_affected("BEGIN"), None);
    }

    proptest! {
        #[test]
        fn data_row_roundtrip(values in proptest::collection::vec(
            proptest::option::of(proptest::collection::vec(any::<u8>(), 0..64)), 0..16)
        ) {
            let msg = BackendMessage::DataRow {
                values: values.into_iter().map(|v| v.map(Bytes::from)).collect(),
            };
            prop_assert_eq!(roundtrip(&msg), msg);
        }
    }
}
