//! Binary encoding of parameter values.
//!
//! Each codec implements [`Encoder::encode`]. [`Encoder::length`] has a
//! default implementation that runs `encode` against a [`NullBuf`], so the
//! reported length cannot drift from what `encode` actually writes. The
//! only obligation on an implementor is that `encode` is a pure function of
//! `(type, value, context)`: it must not behave differently depending on
//! which sink receives the bytes.

use bytes::{Bytes, BytesMut};

use crate::context::EncodeContext;
use crate::error::TypeError;
use crate::sink::{ByteSink, NullBuf};
use crate::ty::Type;
use crate::value::SqlValue;

/// A codec that serializes values of one or more types in binary format.
pub trait Encoder: Send + Sync {
    /// Write the binary form of `value` for `ty` into `buf`.
    fn encode(
        &self,
        ty: &Type,
        buf: &mut dyn ByteSink,
        value: &SqlValue,
        ctx: &EncodeContext,
    ) -> Result<(), TypeError>;

    /// Exact number of bytes [`encode`](Self::encode) will write for `value`.
    ///
    /// Fails with whatever error `encode` would raise.
    fn length(&self, ty: &Type, value: &SqlValue, ctx: &EncodeContext) -> Result<usize, TypeError> {
        let mut probe = NullBuf::new();
        self.encode(ty, &mut probe, value, ctx)?;
        Ok(probe.written())
    }
}

/// Encode into a buffer sized exactly from [`Encoder::length`].
pub fn encode_to_bytes(
    encoder: &dyn Encoder,
    ty: &Type,
    value: &SqlValue,
    ctx: &EncodeContext,
) -> Result<Bytes, TypeError> {
    let len = encoder.length(ty, value, ctx)?;
    let mut buf = BytesMut::with_capacity(len);
    encoder.encode(ty, &mut buf, value, ctx)?;
    debug_assert_eq!(buf.len(), len, "{ty} codec length disagrees with encode");
    Ok(buf.freeze())
}

/// Encode a bind parameter; NULL becomes `None` (sent as length -1).
pub fn encode_parameter(
    ty: &Type,
    value: &SqlValue,
    ctx: &EncodeContext,
) -> Result<Option<Bytes>, TypeError> {
    if value.is_null() {
        return Ok(None);
    }
    let encoder = codec_for(ty).ok_or(TypeError::UnsupportedType(ty.oid().0))?;
    encode_to_bytes(encoder, ty, value, ctx).map(Some)
}

/// The built-in binary codec for a type, if there is one.
#[must_use]
pub fn codec_for(ty: &Type) -> Option<&'static dyn Encoder> {
    let codec: &'static dyn Encoder = match *ty {
        Type::BOOL => &BoolCodec,
        Type::INT2 | Type::INT4 | Type::INT8 => &IntCodec,
        Type::FLOAT4 | Type::FLOAT8 => &FloatCodec,
        Type::TEXT | Type::VARCHAR => &TextCodec,
        Type::BYTEA => &ByteaCodec,
        Type::UUID => &UuidCodec,
        _ => return None,
    };
    Some(codec)
}

fn mismatch(ty: &Type, value: &SqlValue) -> TypeError {
    match value {
        SqlValue::Null => TypeError::UnexpectedNull,
        other => TypeError::TypeMismatch {
            expected: ty.name(),
            actual: other.kind(),
        },
    }
}

/// `bool`: one byte, 0 or 1.
#[derive(Debug, Clone, Copy, Default)]
pub struct BoolCodec;

impl Encoder for BoolCodec {
    fn encode(
        &self,
        ty: &Type,
        buf: &mut dyn ByteSink,
        value: &SqlValue,
        _ctx: &EncodeContext,
    ) -> Result<(), TypeError> {
        match value {
            SqlValue::Bool(v) => {
                buf.put_u8(u8::from(*v));
                Ok(())
            }
            other => Err(mismatch(ty, other)),
        }
    }
}

/// `int2`, `int4` and `int8`. Accepts any integer value that fits the target width.
#[derive(Debug, Clone, Copy, Default)]
pub struct IntCodec;

impl Encoder for IntCodec {
    fn encode(
        &self,
        ty: &Type,
        buf: &mut dyn ByteSink,
        value: &SqlValue,
        _ctx: &EncodeContext,
    ) -> Result<(), TypeError> {
        let v = value.as_i64().ok_or_else(|| mismatch(ty, value))?;
        let out_of_range = || TypeError::OutOfRange {
            target_type: ty.name(),
        };
        match *ty {
            Type::INT2 => buf.put_i16(i16::try_from(v).map_err(|_| out_of_range())?),
            Type::INT4 => buf.put_i32(i32::try_from(v).map_err(|_| out_of_range())?),
            Type::INT8 => buf.put_i64(v),
            _ => return Err(mismatch(ty, value)),
        }
        Ok(())
    }
}

/// `float4` and `float8`.
///
/// A `float8` value is only narrowed to `float4` when that is lossless.
#[derive(Debug, Clone, Copy, Default)]
pub struct FloatCodec;

impl Encoder for FloatCodec {
    fn encode(
        &self,
        ty: &Type,
        buf: &mut dyn ByteSink,
        value: &SqlValue,
        _ctx: &EncodeContext,
    ) -> Result<(), TypeError> {
        match (*ty, value) {
            (Type::FLOAT8, _) => {
                let v = value.as_f64().ok_or_else(|| mismatch(ty, value))?;
                buf.put_f64(v);
            }
            (Type::FLOAT4, SqlValue::Float4(v)) => buf.put_f32(*v),
            (Type::FLOAT4, SqlValue::Float8(v)) => {
                let narrowed = *v as f32;
                if f64::from(narrowed) != *v && !v.is_nan() {
                    return Err(TypeError::OutOfRange {
                        target_type: ty.name(),
                    });
                }
                buf.put_f32(narrowed);
            }
            _ => return Err(mismatch(ty, value)),
        }
        Ok(())
    }
}

/// `text` and `varchar`, transcoded to the client encoding.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextCodec;

impl Encoder for TextCodec {
    fn encode(
        &self,
        ty: &Type,
        buf: &mut dyn ByteSink,
        value: &SqlValue,
        ctx: &EncodeContext,
    ) -> Result<(), TypeError> {
        let SqlValue::Text(s) = value else {
            return Err(mismatch(ty, value));
        };
        let encoding = ctx.encoding();
        let (bytes, _, had_errors) = encoding.encode(s);
        if had_errors {
            return Err(TypeError::Unmappable {
                encoding: encoding.name(),
            });
        }
        buf.put_slice(&bytes);
        Ok(())
    }
}

/// `bytea`: the raw bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ByteaCodec;

impl Encoder for ByteaCodec {
    fn encode(
        &self,
        ty: &Type,
        buf: &mut dyn ByteSink,
        value: &SqlValue,
        _ctx: &EncodeContext,
    ) -> Result<(), TypeError> {
        match value {
            SqlValue::Bytea(b) => {
                buf.put_slice(b);
                Ok(())
            }
            other => Err(mismatch(ty, other)),
        }
    }
}

/// `uuid`: 16 bytes in RFC 4122 order.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidCodec;

impl Encoder for UuidCodec {
    fn encode(
        &self,
        ty: &Type,
        buf: &mut dyn ByteSink,
        value: &SqlValue,
        _ctx: &EncodeContext,
    ) -> Result<(), TypeError> {
        match value {
            SqlValue::Uuid(u) => {
                buf.put_slice(u.as_bytes());
                Ok(())
            }
            other => Err(mismatch(ty, other)),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use uuid::Uuid;

    fn encoded(ty: Type, value: SqlValue, ctx: &EncodeContext) -> Vec<u8> {
        let mut buf = BytesMut::new();
        codec_for(&ty).unwrap().encode(&ty, &mut buf, &value, ctx).unwrap();
        buf.to_vec()
    }

    /// Length reported by the probe must equal the bytes a real encode writes.
    fn assert_agrees(ty: Type, value: SqlValue, ctx: &EncodeContext) {
        let codec = codec_for(&ty).unwrap();
        let probe = codec.length(&ty, &value, ctx);
        let mut buf = BytesMut::new();
        let real = codec.encode(&ty, &mut buf, &value, ctx);
        match (probe, real) {
            (Ok(len), Ok(())) => assert_eq!(len, buf.len(), "{ty} {value:?}"),
            (Err(a), Err(b)) => assert_eq!(a, b),
            (p, r) => panic!("probe {p:?} and encode {r:?} disagree for {ty}"),
        }
    }

    #[test]
    fn test_int_widths() {
        let ctx = EncodeContext::default();
        assert_eq!(encoded(Type::INT2, SqlValue::Int8(5), &ctx), vec![0, 5]);
        assert_eq!(encoded(Type::INT4, SqlValue::Int2(-1), &ctx), vec![0xFF; 4]);
        assert_eq!(
            IntCodec.length(&Type::INT2, &SqlValue::Int4(70_000), &ctx),
            Err(TypeError::OutOfRange { target_type: "int2" })
        );
    }

    #[test]
    fn test_length_propagates_mismatch() {
        let err = BoolCodec.length(&Type::BOOL, &SqlValue::Int4(1), &EncodeContext::default());
        assert_eq!(
            err,
            Err(TypeError::TypeMismatch {
                expected: "bool",
                actual: "int4"
            })
        );
    }

    #[test]
    fn test_text_length_depends_on_encoding() {
        let value = SqlValue::Text("café".into());
        let utf8 = EncodeContext::default();
        let latin1 = EncodeContext::new(encoding_rs::WINDOWS_1252);
        assert_eq!(TextCodec.length(&Type::TEXT, &value, &utf8).unwrap(), 5);
        assert_eq!(TextCodec.length(&Type::TEXT, &value, &latin1).unwrap(), 4);
    }

    #[test]
    fn test_unmappable_text() {
        let ctx = EncodeContext::new(encoding_rs::WINDOWS_1252);
        let err = TextCodec.length(&Type::TEXT, &SqlValue::Text("日本".into()), &ctx);
        assert_eq!(err, Err(TypeError::Unmappable { encoding: "windows-1252" }));
    }

    #[test]
    fn test_float4_narrowing() {
        let ctx = EncodeContext::default();
        assert_eq!(FloatCodec.length(&Type::FLOAT4, &SqlValue::Float8(0.5), &ctx), Ok(4));
        assert!(FloatCodec.length(&Type::FLOAT4, &SqlValue::Float8(0.1), &ctx).is_err());
    }

    #[test]
    fn test_encode_parameter_null() {
        let ctx = EncodeContext::default();
        assert_eq!(encode_parameter(&Type::INT4, &SqlValue::Null, &ctx).unwrap(), None);
        let uuid = Uuid::from_u128(1);
        let bytes = encode_parameter(&Type::UUID, &SqlValue::Uuid(uuid), &ctx)
            .unwrap()
            .unwrap();
        assert_eq!(bytes.len(), 16);
    }

    #[test]
    fn test_unknown_type_has_no_codec() {
        let ty = Type::new(pg_protocol::Oid(1186), "interval");
        assert!(codec_for(&ty).is_none());
        assert_eq!(
            encode_parameter(&ty, &SqlValue::Int4(1), &EncodeContext::default()),
            Err(TypeError::UnsupportedType(1186))
        );
    }

    fn contexts() -> impl Strategy<Value = EncodeContext> {
        prop_oneof![
            Just(EncodeContext::default()),
            Just(EncodeContext::new(encoding_rs::WINDOWS_1252)),
            Just(EncodeContext::new(encoding_rs::SHIFT_JIS)),
        ]
    }

    proptest! {
        #[test]
        fn length_matches_encode_for_integers(v in any::<i64>(), ctx in contexts()) {
            for ty in [Type::INT2, Type::INT4, Type::INT8] {
                assert_agrees(ty, SqlValue::Int8(v), &ctx);
            }
        }

        #[test]
        fn length_matches_encode_for_floats(v in any::<f64>(), ctx in contexts()) {
            assert_agrees(Type::FLOAT8, SqlValue::Float8(v), &ctx);
            assert_agrees(Type::FLOAT4, SqlValue::Float8(v), &ctx);
        }

        #[test]
        fn length_matches_encode_for_text(s in any::<String>(), ctx in contexts()) {
            assert_agrees(Type::TEXT, SqlValue::Text(s.clone()), &ctx);
            assert_agrees(Type::VARCHAR, SqlValue::Text(s), &ctx);
        }

        #[test]
        fn length_matches_encode_for_bytea(b in proptest::collection::vec(any::<u8>(), 0..512)) {
            assert_agrees(Type::BYTEA, SqlValue::Bytea(b.into()), &EncodeContext::default());
        }

        #[test]
        fn length_matches_encode_for_fixed_width(flag in any::<bool>(), id in any::<u128>()) {
            let ctx = EncodeContext::default();
            assert_agrees(Type::BOOL, SqlValue::Bool(flag), &ctx);
            assert_agrees(Type::UUID, SqlValue::Uuid(Uuid::from_u128(id)), &ctx);
            assert_agrees(Type::BOOL, SqlValue::Null, &ctx);
        }
    }
}
