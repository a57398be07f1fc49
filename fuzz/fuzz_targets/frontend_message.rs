#![no_main]

use arbitrary::Arbitrary;
use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use pg_protocol::FrontendMessage;

#[derive(Debug, Arbitrary)]
struct Input {
    tag: u8,
    body: Vec<u8>,
}

fuzz_target!(|input: Input| {
    if let Ok(message) = FrontendMessage::decode(input.tag, Bytes::from(input.body)) {
        let _ = message.name();
    }
});
