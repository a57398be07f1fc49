//! Type descriptors addressed by codecs.

use std::fmt;

use pg_protocol::Oid;

/// A server data type as seen by a codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Type {
    oid: Oid,
    name: &'static str,
}

impl Type {
    /// `bool`
    pub const BOOL: Type = Type::new(Oid::BOOL, "bool");
    /// `bytea`
    pub const BYTEA: Type = Type::new(Oid::BYTEA, "bytea");
    /// `int8`
    pub const INT8: Type = Type::new(Oid::INT8, "int8");
    /// `int2`
    pub const INT2: Type = Type::new(Oid::INT2, "int2");
    /// `int4`
    pub const INT4: Type = Type::new(Oid::INT4, "int4");
    /// `text`
    pub const TEXT: Type = Type::new(Oid::TEXT, "text");
    /// `float4`
    pub const FLOAT4: Type = Type::new(Oid::FLOAT4, "float4");
    /// `float8`
    pub const FLOAT8: Type = Type::new(Oid::FLOAT8, "float8");
    /// `varchar`
    pub const VARCHAR: Type = Type::new(Oid::VARCHAR, "varchar");
    /// `uuid`
    pub const UUID: Type = Type::new(Oid::UUID, "uuid");

    const BUILTIN: [Type; 10] = [
        Self::BOOL,
        Self::BYTEA,
        Self::INT8,
        Self::INT2,
        Self::INT4,
        Self::TEXT,
        Self::FLOAT4,
        Self::FLOAT8,
        Self::VARCHAR,
        Self::UUID,
    ];

    /// Describe a type by oid and name.
    #[must_use]
    pub const fn new(oid: Oid, name: &'static str) -> Self {
        Self { oid, name }
    }

    /// Look up a built-in type by oid.
    #[must_use]
    pub fn from_oid(oid: Oid) -> Option<Self> {
        Self::BUILTIN.into_iter().find(|t| t.oid == oid)
    }

    /// Type oid.
    #[must_use]
    pub const fn oid(&self) -> Oid {
        self.oid
    }

    /// Type name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}
