//! Tokio codec for varint length-prefixed frames.
//!
//! Used with [`tokio_util::codec::Framed`] for streams that carry nothing but
//! frames until they close (DHT iteration, pubsub subscriptions). Streams that
//! are handed off after a frame use the byte-at-a-time helpers in
//! [`crate::core::varint`] instead.

use crate::config::MAX_MESSAGE_SIZE;
use crate::core::varint::{encode_varint_into, varint_len, VarintDecoder};
use crate::error::{ProtocolError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Length-prefixed frame codec with an upper bound on declared lengths
#[derive(Debug, Clone, Copy)]
pub struct LengthPrefixedCodec {
    max_size: usize,
}

impl Default for LengthPrefixedCodec {
    fn default() -> Self {
        Self::new(MAX_MESSAGE_SIZE)
    }
}

impl LengthPrefixedCodec {
    pub fn new(max_size: usize) -> Self {
        Self { max_size }
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }
}

impl Decoder for LengthPrefixedCodec {
    type Item = Bytes;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        // Peek the header without consuming; a partial frame leaves `src` untouched.
        let mut decoder = VarintDecoder::default();
        let mut declared = None;
        for &byte in src.iter() {
            if let Some(value) = decoder.push(byte)? {
                declared = Some(value);
                break;
            }
        }
        let Some(declared) = declared else {
            return Ok(None);
        };

        let len = usize::try_from(declared).map_err(|_| ProtocolError::OversizedPacket(usize::MAX))?;
        if len > self.max_size {
            return Err(ProtocolError::OversizedPacket(len));
        }

        let header = decoder.consumed();
        if src.len() < header + len {
            src.reserve(header + len - src.len());
            return Ok(None);
        }

        src.advance(header);
        Ok(Some(src.split_to(len).freeze()))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Bytes>> {
        match self.decode(buf)? {
            Some(frame) => Ok(Some(frame)),
            None if buf.is_empty() => Ok(None),
            None => Err(ProtocolError::Incomplete(
                crate::error::constants::ERR_FRAME_TRUNCATED,
            )),
        }
    }
}

impl Encoder<Bytes> for LengthPrefixedCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<()> {
        Encoder::<&[u8]>::encode(self, item.as_ref(), dst)
    }
}

impl Encoder<Vec<u8>> for LengthPrefixedCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Vec<u8>, dst: &mut BytesMut) -> Result<()> {
        Encoder::<&[u8]>::encode(self, item.as_slice(), dst)
    }
}

impl<'a> Encoder<&'a [u8]> for LengthPrefixedCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: &'a [u8], dst: &mut BytesMut) -> Result<()> {
        if item.len() > self.max_size {
            return Err(ProtocolError::OversizedPacket(item.len()));
        }
        let mut header = Vec::with_capacity(varint_len(item.len() as u64));
        encode_varint_into(item.len() as u64, &mut header);
        dst.reserve(header.len() + item.len());
        dst.put_slice(&header);
        dst.put_slice(item);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_header_preserves_buffer() {
        let mut codec = LengthPrefixedCodec::default();
        let mut buf = BytesMut::from(&[0x80u8][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 1);
    }

    #[test]
    fn test_partial_payload_preserves_buffer() {
        let mut codec = LengthPrefixedCodec::default();
        let mut buf = BytesMut::from(&[0x03u8, b'a', b'b'][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 3);
        buf.put_u8(b'c');
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), Bytes::from_static(b"abc"));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_back_to_back_frames_with_long_header() {
        let mut codec = LengthPrefixedCodec::default();
        let mut buf = BytesMut::new();
        codec.encode(vec![7u8; 200], &mut buf).unwrap();
        codec.encode(&b"next"[..], &mut buf).unwrap();
        assert_eq!(&buf[..2], &[0xC8, 0x01]);

        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), Bytes::from(vec![7u8; 200]));
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), Bytes::from_static(b"next"));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_oversized_rejected_from_header() {
        let mut codec = LengthPrefixedCodec::new(16);
        let mut buf = BytesMut::from(&[0x20u8][..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(ProtocolError::OversizedPacket(32))
        ));
    }

    #[test]
    fn test_encode_rejects_oversized() {
        let mut codec = LengthPrefixedCodec::new(4);
        let mut buf = BytesMut::new();
        assert!(codec.encode(&b"hello"[..], &mut buf).is_err());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_eof_inside_frame() {
        let mut codec = LengthPrefixedCodec::default();
        let mut buf = BytesMut::from(&[0x05u8, b'a'][..]);
        assert!(matches!(
            codec.decode_eof(&mut buf),
            Err(ProtocolError::Incomplete(_))
        ));
    }
}
