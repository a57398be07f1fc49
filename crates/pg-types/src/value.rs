//! SQL value representation.

use bytes::Bytes;
use uuid::Uuid;

/// A parameter value handed to a codec.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// NULL value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// 16-bit signed integer.
    Int2(i16),
    /// 32-bit signed integer.
    Int4(i32),
    /// 64-bit signed integer.
    Int8(i64),
    /// 32-bit floating point.
    Float4(f32),
    /// 64-bit floating point.
    Float8(f64),
    /// Character data.
    Text(String),
    /// Raw binary data.
    Bytea(Bytes),
    /// UUID value.
    Uuid(Uuid),
}

impl SqlValue {
    /// Check if the value is NULL.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Short name of the value's kind, used in error messages.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int2(_) => "int2",
            Self::Int4(_) => "int4",
            Self::Int8(_) => "int8",
            Self::Float4(_) => "float4",
            Self::Float8(_) => "float8",
            Self::Text(_) => "text",
            Self::Bytea(_) => "bytea",
            Self::Uuid(_) => "uuid",
        }
    }

    /// Widen any integer variant to `i64`.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int2(v) => Some(i64::from(*v)),
            Self::Int4(v) => Some(i64::from(*v)),
            Self::Int8(v) => Some(*v),
            _ => None,
        }
    }

    /// Widen any floating point variant to `f64`.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float4(v) => Some(f64::from(*v)),
            Self::Float8(v) => Some(*v),
            _ => None,
        }
    }
}

macro_rules! impl_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for SqlValue {
                fn from(v: $ty) -> Self {
                    Self::$variant(v.into())
                }
            }
        )*
    };
}

impl_from! {
    bool => Bool,
    i16 => Int2,
    i32 => Int4,
    i64 => Int8,
    f32 => Float4,
    f64 => Float8,
    String => Text,
    &str => Text,
    Bytes => Bytea,
    Vec<u8> => Bytea,
    Uuid => Uuid,
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_option_none_is_null() {
        let v: SqlValue = Option::<i32>::None.into();
        assert!(v.is_null());
        assert_eq!(SqlValue::from(Some(7i32)), SqlValue::Int4(7));
    }

    #[test]
    fn test_integer_widening() {
        assert_eq!(SqlValue::Int2(-3).as_i64(), Some(-3));
        assert_eq!(SqlValue::Text("1".into()).as_i64(), None);
    }
}
