#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use p2p_protocol::core::codec::LengthPrefixedCodec;
use p2p_protocol::core::varint::decode_varint;
use tokio_util::codec::Decoder;

fuzz_target!(|data: &[u8]| {
    let _ = decode_varint(data);

    // Feed the codec until it stops producing frames or errors out
    let mut codec = LengthPrefixedCodec::new(4096);
    let mut buf = BytesMut::from(data);
    while let Ok(Some(_)) = codec.decode(&mut buf) {}
    let _ = codec.decode_eof(&mut buf);
});
