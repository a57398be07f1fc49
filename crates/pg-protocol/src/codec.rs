//! Low-level encoding and decoding helpers shared by the frontend and
//! backend message modules.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;

/// Largest element count a message can carry; counts travel as 16 bits.
pub const MAX_COUNT: usize = u16::MAX as usize;

/// Write a NUL-terminated string. Fails if `s` itself contains a NUL.
pub fn write_cstring(dst: &mut impl BufMut, s: &str) -> Result<(), ProtocolError> {
    if s.as_bytes().contains(&0) {
        return Err(ProtocolError::EmbeddedNul);
    }
    dst.put_slice(s.as_bytes());
    dst.put_u8(0);
    Ok(())
}

/// Write the element count that precedes a list of formats, values or oids.
pub fn write_count(dst: &mut impl BufMut, count: usize) -> Result<(), ProtocolError> {
    let count = u16::try_from(count).map_err(|_| ProtocolError::TooManyValues(count))?;
    dst.put_u16(count);
    Ok(())
}

/// Read an element count written by [`write_count`].
pub fn read_count(src: &mut Bytes) -> Result<usize, ProtocolError> {
    ensure(src, 2)?;
    Ok(usize::from(src.get_u16()))
}

/// Read a NUL-terminated UTF-8 string, consuming the terminator.
pub fn read_cstring(src: &mut Bytes) -> Result<String, ProtocolError> {
    let end = src
        .iter()
        .position(|&b| b == 0)
        .ok_or(ProtocolError::MissingTerminator)?;
    let raw = src.split_to(end);
    src.advance(1);
    String::from_utf8(raw.to_vec()).map_err(|_| ProtocolError::InvalidUtf8)
}

/// Ensure `src` holds at least `n` more bytes.
pub fn ensure(src: &Bytes, n: usize) -> Result<(), ProtocolError> {
    if src.remaining() < n {
        return Err(ProtocolError::IncompleteMessage {
            expected: n,
            actual: src.remaining(),
        });
    }
    Ok(())
}

/// Write a length-prefixed value; `None` is written as length -1 (SQL NULL).
pub fn write_nullable_bytes(
    dst: &mut impl BufMut,
    value: Option<&[u8]>,
) -> Result<(), ProtocolError> {
    match value {
        Some(bytes) => {
            let len =
                i32::try_from(bytes.len()).map_err(|_| ProtocolError::ValueTooLarge(bytes.len()))?;
            dst.put_i32(len);
            dst.put_slice(bytes);
        }
        None => dst.put_i32(-1),
    }
    Ok(())
}

/// Read a length-prefixed value where a negative length means SQL NULL.
pub fn read_nullable_bytes(src: &mut Bytes) -> Result<Option<Bytes>, ProtocolError> {
    ensure(src, 4)?;
    let len = src.get_i32();
    if len < 0 {
        return Ok(None);
    }
    let len = len as usize;
    ensure(src, len)?;
    Ok(Some(src.split_to(len)))
}

/// Write a complete tagged message, filling in the length once `body` has run.
///
/// The length field counts itself but not the tag byte. If `body` fails or
/// the message outgrows the length field, `dst` is left as it was.
pub fn write_message(
    dst: &mut BytesMut,
    tag: u8,
    body: impl FnOnce(&mut BytesMut) -> Result<(), ProtocolError>,
) -> Result<(), ProtocolError> {
    let start = dst.len();
    dst.put_u8(tag);
    dst.put_i32(0);
    let written = body(dst).and_then(|()| {
        let size = dst.len() - start - 1;
        i32::try_from(size).map_err(|_| ProtocolError::MessageTooLarge {
            size,
            max: i32::MAX as usize,
        })
    });
    match written {
        Ok(len) => {
            dst[start + 1..start + 5].copy_from_slice(&len.to_be_bytes());
            Ok(())
        }
        Err(e) => {
            dst.truncate(start);
            Err(e)
        }
    }
}

/// Fail if a decoded message left bytes unread.
pub fn expect_consumed(src: &Bytes, message: &'static str) -> Result<(), ProtocolError> {
    if src.has_remaining() {
        return Err(ProtocolError::TrailingBytes {
            message,
            remaining: src.remaining(),
        });
    }
    Ok(())
}
