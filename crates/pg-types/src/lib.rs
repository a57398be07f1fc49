//! # pg-types
//!
//! Binary parameter codecs for PostgreSQL and the sized-encode probe.
//!
//! A codec implements [`Encoder::encode`] against a [`ByteSink`]. The exact
//! encoded size is obtained from [`Encoder::length`], which reruns the same
//! encoder against a counting [`NullBuf`] instead of keeping a separate size
//! formula per type.
//!
//! ## Type Mappings
//!
//! | PostgreSQL Type | [`SqlValue`] variant |
//! |-----------------|----------------------|
//! | `bool` | `Bool` |
//! | `int2` / `int4` / `int8` | `Int2` / `Int4` / `Int8` |
//! | `float4` / `float8` | `Float4` / `Float8` |
//! | `text` / `varchar` | `Text` |
//! | `bytea` | `Bytea` |
//! | `uuid` | `Uuid` |
//!
//! ## Example
//!
//! ```
//! use pg_types::{EncodeContext, Encoder, SqlValue, TextCodec, Type};
//!
//! let ctx = EncodeContext::default();
//! let len = TextCodec.length(&Type::TEXT, &SqlValue::from("héllo"), &ctx).unwrap();
//! assert_eq!(len, 6);
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod context;
pub mod encode;
pub mod error;
pub mod sink;
pub mod ty;
pub mod value;

pub use context::EncodeContext;
pub use encode::{
    BoolCodec, ByteaCodec, Encoder, FloatCodec, IntCodec, TextCodec, UuidCodec, codec_for,
    encode_parameter, encode_to_bytes,
};
pub use error::TypeError;
pub use sink::{ByteSink, NullBuf};
pub use ty::Type;
pub use value::SqlValue;
