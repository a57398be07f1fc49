//! Byte sinks that codecs write into.
//!
//! Every codec writes through [`ByteSink`], never into a concrete buffer type.
//! That lets the same encoder run against a real [`BytesMut`] or against a
//! [`NullBuf`], which discards the bytes and only counts them. Running an
//! encoder once against a `NullBuf` therefore yields the exact length a real
//! encode will produce, without a separate size formula per type.

use bytes::{BufMut, BytesMut};

/// Write contract shared by real and counting sinks.
///
/// Multi-byte integers and floats are written in network byte order.
pub trait ByteSink {
    /// Append raw bytes.
    fn put_slice(&mut self, src: &[u8]);

    /// Append one byte.
    fn put_u8(&mut self, v: u8) {
        self.put_slice(&[v]);
    }

    /// Append a big-endian `i16`.
    fn put_i16(&mut self, v: i16) {
        self.put_slice(&v.to_be_bytes());
    }

    /// Append a big-endian `i32`.
    fn put_i32(&mut self, v: i32) {
        self.put_slice(&v.to_be_bytes());
    }

    /// Append a big-endian `i64`.
    fn put_i64(&mut self, v: i64) {
        self.put_slice(&v.to_be_bytes());
    }

    /// Append a big-endian IEEE-754 `f32`.
    fn put_f32(&mut self, v: f32) {
        self.put_slice(&v.to_be_bytes());
    }

    /// Append a big-endian IEEE-754 `f64`.
    fn put_f64(&mut self, v: f64) {
        self.put_slice(&v.to_be_bytes());
    }
}

impl ByteSink for BytesMut {
    fn put_slice(&mut self, src: &[u8]) {
        BufMut::put_slice(self, src);
    }
}

impl ByteSink for Vec<u8> {
    fn put_slice(&mut self, src: &[u8]) {
        self.extend_from_slice(src);
    }
}

/// A sink that discards everything written and counts the bytes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct NullBuf {
    written: usize,
}

impl NullBuf {
    /// A fresh counter at zero.
    #[must_use]
    pub const fn new() -> Self {
        Self { written: 0 }
    }

    /// Bytes written so far.
    #[must_use]
    pub const fn written(&self) -> usize {
        self.written
    }
}

impl ByteSink for NullBuf {
    fn put_slice(&mut self, src: &[u8]) {
        self.written += src.len();
    }

    fn put_u8(&mut self, _: u8) {
        self.written += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_buf_counts() {
        let mut sink = NullBuf::new();
        sink.put_u8(1);
        sink.put_i32(7);
        sink.put_f64(1.5);
        sink.put_slice(b"abc");
        assert_eq!(sink.written(), 1 + 4 + 8 + 3);
    }

    #[test]
    fn test_bytes_mut_sink_is_big_endian() {
        let mut buf = BytesMut::new();
        ByteSink::put_i16(&mut buf, 0x0102);
        assert_eq!(&buf[..], &[1, 2]);
    }
}
