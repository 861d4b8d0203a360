//! Unsigned LEB128 varints and length-prefixed blocks.
//!
//! Every message exchanged by this crate is framed as `varint(len) || payload`.
//! The async helpers read one byte at a time while decoding the length, so a
//! stream can be handed to another owner right after a frame without losing
//! buffered bytes.

use crate::error::{constants, ProtocolError, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

/// Longest possible encoding of a `u64`
pub const MAX_VARINT_LEN: usize = 10;

/// Encode `value` into `buf` using the minimal number of bytes
#[inline]
pub fn encode_varint_into(mut value: u64, buf: &mut Vec<u8>) -> usize {
    let start = buf.len();
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            buf.push(byte);
            break;
        }
        buf.push(byte | 0x80);
    }
    buf.len() - start
}

/// Encode `value` as a freshly allocated varint
pub fn encode_varint(value: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(MAX_VARINT_LEN);
    encode_varint_into(value, &mut buf);
    buf
}

/// Number of bytes `value` occupies once encoded
#[inline]
pub fn varint_len(value: u64) -> usize {
    let bits = 64 - (value | 1).leading_zeros() as usize;
    bits.div_ceil(7)
}

/// Incremental varint decoder shared by the slice, stream and codec paths
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct VarintDecoder {
    value: u64,
    consumed: usize,
}

impl VarintDecoder {
    /// Feed one byte. Returns the finished value when the continuation bit is clear.
    #[inline]
    pub(crate) fn push(&mut self, byte: u8) -> Result<Option<u64>> {
        if self.consumed == MAX_VARINT_LEN {
            return Err(ProtocolError::Malformed(constants::ERR_VARINT_OVERFLOW));
        }
        let shift = 7 * self.consumed as u32;
        let bits = u64::from(byte & 0x7F);
        // The tenth byte may only contribute the top bit of a u64.
        if self.consumed == MAX_VARINT_LEN - 1 && bits > 1 {
            return Err(ProtocolError::Malformed(constants::ERR_VARINT_OVERFLOW));
        }
        self.value |= bits << shift;
        self.consumed += 1;
        if byte & 0x80 == 0 {
            Ok(Some(self.value))
        } else {
            Ok(None)
        }
    }

    pub(crate) fn consumed(&self) -> usize {
        self.consumed
    }
}

/// Decode one varint from the front of `data`.
///
/// Returns the value and the number of bytes consumed.
///
/// # Errors
/// `Malformed` if `data` ends mid-sequence or the value overflows 64 bits.
pub fn decode_varint(data: &[u8]) -> Result<(u64, usize)> {
    let mut decoder = VarintDecoder::default();
    for &byte in data {
        if let Some(value) = decoder.push(byte)? {
            return Ok((value, decoder.consumed()));
        }
    }
    Err(ProtocolError::Malformed(constants::ERR_VARINT_TRUNCATED))
}

/// Read one varint from `stream`, one byte at a time.
///
/// A stream that ends before the first byte yields `ConnectionClosed`; one that
/// ends after it yields `Malformed`.
pub async fn read_varint<R>(stream: &mut R) -> Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut decoder = VarintDecoder::default();
    let mut byte = [0u8; 1];
    loop {
        let n = stream.read(&mut byte).await?;
        if n == 0 {
            return if decoder.consumed() == 0 {
                Err(ProtocolError::ConnectionClosed)
            } else {
                Err(ProtocolError::Malformed(constants::ERR_VARINT_TRUNCATED))
            };
        }
        if let Some(value) = decoder.push(byte[0])? {
            return Ok(value);
        }
    }
}

/// Prefix `data` with its varint length
pub fn encode_lp(data: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(varint_len(data.len() as u64) + data.len());
    encode_varint_into(data.len() as u64, &mut buf);
    buf.extend_from_slice(data);
    buf
}

/// Write `data` as a single length-prefixed frame
pub async fn write_lp<W>(stream: &mut W, data: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let frame = encode_lp(data);
    stream.write_all(&frame).await?;
    stream.flush().await?;
    trace!(bytes = data.len(), "wrote length-prefixed frame");
    Ok(())
}

/// Read one length-prefixed frame of at most `max_size` bytes.
///
/// The declared length is checked before the payload buffer is allocated.
pub async fn read_lp<R>(stream: &mut R, max_size: usize) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let declared = read_varint(stream).await?;
    let len = usize::try_from(declared).map_err(|_| ProtocolError::OversizedPacket(usize::MAX))?;
    if len > max_size {
        return Err(ProtocolError::OversizedPacket(len));
    }

    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            ProtocolError::Incomplete(constants::ERR_FRAME_TRUNCATED)
        } else {
            ProtocolError::Io(e)
        }
    })?;
    trace!(bytes = len, "read length-prefixed frame");
    Ok(payload)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_varint_boundaries() {
        assert_eq!(encode_varint(0), vec![0x00]);
        assert_eq!(encode_varint(1), vec![0x01]);
        assert_eq!(encode_varint(127), vec![0x7F]);
        assert_eq!(encode_varint(128), vec![0x80, 0x01]);
        assert_eq!(encode_varint(300), vec![0xAC, 0x02]);
        assert_eq!(encode_varint(u64::MAX).len(), MAX_VARINT_LEN);
    }

    #[test]
    fn test_varint_len_matches_encoding() {
        for value in [0u64, 1, 127, 128, 16_383, 16_384, u32::MAX as u64, u64::MAX] {
            assert_eq!(varint_len(value), encode_varint(value).len());
        }
    }

    #[test]
    fn test_decode_reports_consumed() {
        let mut data = encode_varint(300);
        data.extend_from_slice(&[0xFF, 0xFF]);
        assert_eq!(decode_varint(&data).unwrap(), (300, 2));
    }

    #[test]
    fn test_decode_truncated() {
        assert!(matches!(
            decode_varint(&[0x80]),
            Err(ProtocolError::Malformed(constants::ERR_VARINT_TRUNCATED))
        ));
        assert!(matches!(
            decode_varint(&[0x80, 0x80]),
            Err(ProtocolError::Malformed(_))
        ));
        assert!(matches!(decode_varint(&[]), Err(ProtocolError::Malformed(_))));
    }

    #[test]
    fn test_decode_overlong() {
        let data = [0xFFu8; 11];
        assert!(matches!(
            decode_varint(&data),
            Err(ProtocolError::Malformed(_))
        ));

        // Ten bytes whose last byte carries more than one bit
        let mut data = vec![0xFFu8; 9];
        data.push(0x02);
        assert!(matches!(
            decode_varint(&data),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn test_lp_stream_roundtrip() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        write_lp(&mut a, b"hello").await.unwrap();
        write_lp(&mut a, b"").await.unwrap();
        assert_eq!(read_lp(&mut b, 64).await.unwrap(), b"hello");
        assert_eq!(read_lp(&mut b, 64).await.unwrap(), b"");
    }

    #[tokio::test]
    async fn test_lp_rejects_oversized_before_reading() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        a.write_all(&encode_varint(1_000_000)).await.unwrap();
        let result = read_lp(&mut b, 65_536).await;
        assert!(matches!(result, Err(ProtocolError::OversizedPacket(1_000_000))));
    }

    #[tokio::test]
    async fn test_lp_closed_vs_incomplete() {
        let (a, mut b) = tokio::io::duplex(64);
        drop(a);
        assert!(matches!(
            read_lp(&mut b, 64).await,
            Err(ProtocolError::ConnectionClosed)
        ));

        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&[5, b'a', b'b']).await.unwrap();
        drop(a);
        assert!(matches!(
            read_lp(&mut b, 64).await,
            Err(ProtocolError::Incomplete(_))
        ));
    }

    #[tokio::test]
    async fn test_eof_inside_length_is_malformed() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&[0x80, 0x80]).await.unwrap();
        drop(a);
        assert!(matches!(
            read_varint(&mut b).await,
            Err(ProtocolError::Malformed(constants::ERR_VARINT_TRUNCATED))
        ));
    }
}
