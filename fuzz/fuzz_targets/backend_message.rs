#![no_main]

use arbitrary::Arbitrary;
use bytes::{Bytes, BytesMut};
use libfuzzer_sys::fuzz_target;
use pg_protocol::BackendMessage;

#[derive(Debug, Arbitrary)]
struct Input {
    tag: u8,
    body: Vec<u8>,
}

fuzz_target!(|input: Input| {
    let Ok(message) = BackendMessage::decode(input.tag, Bytes::from(input.body)) else {
        return;
    };
    // Anything that decodes must re-encode to a frame with the same tag.
    let mut buf = BytesMut::new();
    message.encode(&mut buf).unwrap();
    assert_eq!(buf[0], input.tag);
});
