//! Binding typed values as request parameters.

use pg_codec::Parameters;
use pg_protocol::{FieldFormat, Oid};
use pg_types::{EncodeContext, SqlValue, Type, encode_parameter};

use crate::error::Result;

/// Encode `values` as binary parameters.
///
/// Each value is sized through its codec's length probe before it is
/// encoded, so every parameter buffer is allocated exactly once.
pub fn bind_parameters(values: &[(Type, SqlValue)], ctx: &EncodeContext) -> Result<Parameters> {
    let mut parameters = Parameters::default();
    for (ty, value) in values {
        parameters.values.push(encode_parameter(ty, value, ctx)?);
    }
    if !values.is_empty() {
        parameters.formats.push(FieldFormat::Binary);
    }
    Ok(parameters)
}

/// Parameter type oids to pin when preparing.
#[must_use]
pub fn parameter_types(values: &[(Type, SqlValue)]) -> Vec<Oid> {
    values.iter().map(|(ty, _)| ty.oid()).collect()
}
