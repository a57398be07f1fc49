#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use pg_codec::BackendCodec;
use tokio_util::codec::Decoder;

fuzz_target!(|data: &[u8]| {
    let mut codec = BackendCodec::new().with_max_message_size(64 * 1024);
    let mut buf = BytesMut::from(data);
    while let Ok(Some(_)) = codec.decode(&mut buf) {}
});
