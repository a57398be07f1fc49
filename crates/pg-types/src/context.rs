//! Per-session encoding context.

use encoding_rs::{Encoding, UTF_8};

/// Session state that can influence how a value is encoded.
///
/// Codecs must treat the context as read-only input: encoding the same value
/// with the same context always yields the same bytes.
#[derive(Debug, Clone, Copy)]
pub struct EncodeContext {
    encoding: &'static Encoding,
}

impl EncodeContext {
    /// Context using the given client encoding.
    #[must_use]
    pub fn new(encoding: &'static Encoding) -> Self {
        Self { encoding }
    }

    /// Context for a server-reported `client_encoding` label, if recognized.
    ///
    /// PostgreSQL's `UTF8` and `SQL_ASCII` labels both map to UTF-8.
    #[must_use]
    pub fn for_label(label: &str) -> Option<Self> {
        let encoding = match label.to_ascii_uppercase().as_str() {
            "UTF8" | "UNICODE" | "SQL_ASCII" => UTF_8,
            "LATIN1" => encoding_rs::WINDOWS_1252,
            "WIN1251" => encoding_rs::WINDOWS_1251,
            "EUC_JP" => encoding_rs::EUC_JP,
            "SJIS" => encoding_rs::SHIFT_JIS,
            "GBK" => encoding_rs::GBK,
            other => Encoding::for_label(other.as_bytes())?,
        };
        Some(Self::new(encoding))
    }

    /// The client encoding.
    #[must_use]
    pub fn encoding(&self) -> &'static Encoding {
        self.encoding
    }
}

impl Default for EncodeContext {
    fn default() -> Self {
        Self::new(UTF_8)
    }
}
