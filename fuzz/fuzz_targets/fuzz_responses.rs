#![no_main]

use libfuzzer_sys::fuzz_target;
use p2p_protocol::core::peer::{Multiaddr, PeerInfo};
use p2p_protocol::core::protobuf::ProtoReader;
use p2p_protocol::protocol::message::{check_response, DhtResponse, PubsubMessage, StreamInfo};

fuzz_target!(|data: &[u8]| {
    if let Ok(reader) = check_response(data) {
        let _ = reader.get_repeated_submessages(6).map(|peers| {
            peers.iter().map(PeerInfo::from_proto).count()
        });
    }

    let reader = ProtoReader::new(data);
    let _ = DhtResponse::from_proto(&reader);
    let _ = PubsubMessage::from_proto(&reader);
    if let Ok(info) = StreamInfo::from_proto(&reader) {
        let _ = info.addr.to_string();
    }
    let _ = Multiaddr::from_bytes(data).protocols();
});
