//! Message codecs for tokio-util framing.
//!
//! Every message after startup is a tag byte followed by a big-endian
//! length that counts itself but not the tag.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use pg_protocol::{
    BackendMessage, DEFAULT_MAX_MESSAGE_SIZE, FrontendMessage, MESSAGE_HEADER_SIZE, ProtocolError,
};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::CodecError;

/// Split one complete frame off `src`, returning its tag and body.
fn split_frame(src: &mut BytesMut, max_size: usize) -> Result<Option<(u8, Bytes)>, CodecError> {
    if src.len() < MESSAGE_HEADER_SIZE {
        return Ok(None);
    }

    let tag = src[0];
    let length = i32::from_be_bytes([src[1], src[2], src[3], src[4]]);
    if length < 4 {
        return Err(ProtocolError::InvalidLength(length).into());
    }
    let body_len = length as usize - 4;
    if body_len > max_size {
        return Err(ProtocolError::MessageTooLarge {
            size: body_len,
            max: max_size,
        }
        .into());
    }

    let total = MESSAGE_HEADER_SIZE + body_len;
    if src.len() < total {
        src.reserve(total - src.len());
        return Ok(None);
    }

    let mut frame = src.split_to(total).freeze();
    frame.advance(MESSAGE_HEADER_SIZE);
    Ok(Some((tag, frame)))
}

/// Decodes backend messages; encodes them too, for test backends.
#[derive(Debug, Clone)]
pub struct BackendCodec {
    max_message_size: usize,
}

impl BackendCodec {
    /// A codec accepting messages up to [`DEFAULT_MAX_MESSAGE_SIZE`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }

    /// Limit accepted message bodies to `size` bytes.
    #[must_use]
    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }
}

impl Default for BackendCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for BackendCodec {
    type Item = BackendMessage;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some((tag, body)) = split_frame(src, self.max_message_size)? else {
            return Ok(None);
        };
        let message = BackendMessage::decode(tag, body)?;
        tracing::trace!(message = message.name(), "decoded backend message");
        Ok(Some(message))
    }
}

impl Encoder<BackendMessage> for BackendCodec {
    type Error = CodecError;

    fn encode(&mut self, item: BackendMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        item.encode(dst)?;
        Ok(())
    }
}

/// Decodes frontend messages; writes pre-encoded frontend bytes.
#[derive(Debug, Clone)]
pub struct FrontendCodec {
    max_message_size: usize,
}

impl FrontendCodec {
    /// A codec accepting messages up to [`DEFAULT_MAX_MESSAGE_SIZE`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

impl Default for FrontendCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrontendCodec {
    type Item = FrontendMessage;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some((tag, body)) = split_frame(src, self.max_message_size)? else {
            return Ok(None);
        };
        Ok(Some(FrontendMessage::decode(tag, body)?))
    }
}

impl Encoder<Bytes> for FrontendCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(item.len());
        dst.put_slice(&item);
        tracing::trace!(length = item.len(), "encoded frontend messages");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pg_protocol::{TransactionStatus, frontend};
    use proptest::prelude::*;

    #[test]
    fn test_partial_frame_waits() {
        let mut codec = BackendCodec::new();
        let mut buf = BytesMut::new();
        BackendMessage::CommandComplete {
            tag: "SELECT 1".into(),
        }
        .encode(&mut buf)
        .unwrap();
        let mut partial = buf.split_to(buf.len() - 2);

        assert!(codec.decode(&mut partial).unwrap().is_none());
        partial.unsplit(buf);
        let message = codec.decode(&mut partial).unwrap().unwrap();
        assert_eq!(message.name(), "CommandComplete");
        assert!(partial.is_empty());
    }

    #[test]
    fn test_invalid_length() {
        let mut codec = BackendCodec::new();
        let mut buf = BytesMut::from(&[b'Z', 0, 0, 0, 3][..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(CodecError::Protocol(ProtocolError::InvalidLength(3)))
        ));
    }

    #[test]
    fn test_message_too_large() {
        let mut codec = BackendCodec::new().with_max_message_size(8);
        let mut buf = BytesMut::from(&[b'D', 0, 0, 1, 0][..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(CodecError::Protocol(ProtocolError::MessageTooLarge { .. }))
        ));
    }

    #[test]
    fn test_frontend_decode_sequence() {
        let mut codec = FrontendCodec::new();
        let mut buf = BytesMut::new();
        frontend::query(&mut buf, "SELECT 1").unwrap();
        frontend::sync(&mut buf);

        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(FrontendMessage::Query {
                sql: "SELECT 1".into()
            })
        );
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(FrontendMessage::Sync));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }

    proptest! {
        #[test]
        fn backend_frames_survive_arbitrary_splits(split in 0usize..64) {
            let messages = vec![
                BackendMessage::ParseComplete,
                BackendMessage::CommandComplete { tag: "INSERT 0 1".into() },
                BackendMessage::ReadyForQuery { status: TransactionStatus::Active },
            ];
            let mut wire = BytesMut::new();
            for m in &messages {
                m.encode(&mut wire).unwrap();
            }
            let split = split.min(wire.len());
            let tail = wire.split_off(split);

            let mut codec = BackendCodec::new();
            let mut decoded = Vec::new();
            while let Some(m) = codec.decode(&mut wire).unwrap() {
                decoded.push(m);
            }
            wire.unsplit(tail);
            while let Some(m) = codec.decode(&mut wire).unwrap() {
                decoded.push(m);
            }
            prop_assert_eq!(decoded, messages);
        }
    }
}
