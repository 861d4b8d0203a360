//! Property-based tests using proptest
//!
//! Framing and protobuf invariants across randomly generated inputs.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use bytes::BytesMut;
use p2p_protocol::config::MAX_MESSAGE_SIZE;
use p2p_protocol::core::codec::LengthPrefixedCodec;
use p2p_protocol::core::protobuf::{ProtoBuffer, ProtoReader};
use p2p_protocol::core::varint::{decode_varint, encode_lp, encode_varint, varint_len, MAX_VARINT_LEN};
use p2p_protocol::protocol::message::{check_response, PubsubMessage};
use p2p_protocol::{PeerId, ProtocolError};
use proptest::prelude::*;
use tokio_util::codec::Decoder;

// Property: varints decode to their value and use exactly the predicted length
proptest! {
    #[test]
    fn prop_varint_length_is_minimal(value in any::<u64>()) {
        let encoded = encode_varint(value);
        prop_assert_eq!(encoded.len(), varint_len(value));
        prop_assert!(encoded.len() <= MAX_VARINT_LEN);
        prop_assert_eq!(decode_varint(&encoded).unwrap(), (value, encoded.len()));
    }
}

// Property: only the final byte of a varint has the continuation bit clear
proptest! {
    #[test]
    fn prop_varint_continuation_bits(value in any::<u64>()) {
        let encoded = encode_varint(value);
        let (last, rest) = encoded.split_last().unwrap();
        prop_assert_eq!(last & 0x80, 0);
        prop_assert!(rest.iter().all(|b| b & 0x80 != 0));
    }
}

// Property: a truncated varint is reported as malformed, never misread
proptest! {
    #[test]
    fn prop_truncated_varint_is_malformed(value in (1u64 << 7)..) {
        let encoded = encode_varint(value);
        let cut = &encoded[..encoded.len() - 1];
        prop_assert!(matches!(decode_varint(cut), Err(ProtocolError::Malformed(_))));
    }
}

// Property: arbitrary bytes never panic the varint decoder
proptest! {
    #[test]
    fn prop_varint_decoder_never_panics(data in prop::collection::vec(any::<u8>(), 0..16)) {
        let _ = decode_varint(&data);
    }
}

// Property: frames split at any point decode to the same sequence
proptest! {
    #[test]
    fn prop_codec_reassembles_split_frames(
        frames in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..600), 1..8),
        split in any::<prop::sample::Index>(),
    ) {
        let wire: Vec<u8> = frames.iter().flat_map(|f| encode_lp(f)).collect();
        let at = split.index(wire.len() + 1);

        let mut codec = LengthPrefixedCodec::new(MAX_MESSAGE_SIZE);
        let mut buf = BytesMut::new();
        let mut decoded = Vec::new();
        for chunk in [&wire[..at], &wire[at..]] {
            buf.extend_from_slice(chunk);
            while let Some(frame) = codec.decode(&mut buf).unwrap() {
                decoded.push(frame.to_vec());
            }
        }
        prop_assert!(buf.is_empty());
        prop_assert_eq!(decoded, frames);
    }
}

// Property: declared lengths above the limit are refused before the payload arrives
proptest! {
    #[test]
    fn prop_codec_rejects_oversized_header(len in (1025u64..1 << 40)) {
        let mut codec = LengthPrefixedCodec::new(1024);
        let mut buf = BytesMut::from(&encode_varint(len)[..]);
        prop_assert!(codec.decode(&mut buf).is_err());
    }
}

// Property: the protobuf reader never panics on arbitrary input
proptest! {
    #[test]
    fn prop_proto_reader_never_panics(data in prop::collection::vec(any::<u8>(), 0..256)) {
        let reader = ProtoReader::new(&data);
        let _ = reader.validate();
        let _ = reader.get_varint(1);
        let _ = reader.get_repeated_bytes(2);
        let _ = check_response(&data);
    }
}

// Property: repeated fields come back in write order, interleaving notwithstanding
proptest! {
    #[test]
    fn prop_repeated_fields_keep_order(
        values in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..32), 0..16),
        marker in any::<u64>(),
    ) {
        let mut pb = ProtoBuffer::new();
        for value in &values {
            pb.write_bytes(2, value).write_varint(1, marker);
        }
        let encoded = pb.finish();
        let reader = ProtoReader::new(&encoded);
        let read: Vec<Vec<u8>> = reader
            .get_repeated_bytes(2)
            .unwrap()
            .into_iter()
            .map(<[u8]>::to_vec)
            .collect();
        prop_assert_eq!(read, values);
    }
}

// Property: pubsub messages survive the wire unchanged
proptest! {
    #[test]
    fn prop_pubsub_message_fields(
        from in prop::collection::vec(any::<u8>(), 1..40),
        data in prop::collection::vec(any::<u8>(), 0..512),
        topics in prop::collection::vec("[a-z/]{1,12}", 0..4),
    ) {
        let message = PubsubMessage {
            from: Some(PeerId::from_bytes(from)),
            data,
            seqno: vec![1, 2, 3],
            topics,
            signature: None,
            key: None,
        };
        let encoded = message.to_proto().finish();
        let parsed = PubsubMessage::from_proto(&ProtoReader::new(&encoded)).unwrap();
        prop_assert_eq!(parsed, message);
    }
}
