//! Minimal DER reader and writer for RSA key structures.
//!
//! Only the tags needed for PKCS#1 private keys and X.509
//! SubjectPublicKeyInfo are supported. Reader positions are absolute offsets
//! into the buffer being parsed so callers can keep ranges instead of copies.

use crate::error::{ProtocolError, Result};
use std::ops::Range;

pub const TAG_INTEGER: u8 = 0x02;
pub const TAG_BIT_STRING: u8 = 0x03;
pub const TAG_NULL: u8 = 0x05;
pub const TAG_OID: u8 = 0x06;
pub const TAG_SEQUENCE: u8 = 0x30;

/// 1.2.840.113549.1.1.1 (rsaEncryption)
pub const RSA_ENCRYPTION_OID: [u8; 9] = [0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x01, 0x01];

/// Length octets, short form below 128
pub fn write_length(len: usize, out: &mut Vec<u8>) {
    if len < 0x80 {
        out.push(len as u8);
        return;
    }
    let bytes = len.to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count();
    out.push(0x80 | (bytes.len() - skip) as u8);
    out.extend_from_slice(&bytes[skip..]);
}

pub fn write_tlv(tag: u8, content: &[u8], out: &mut Vec<u8>) {
    out.push(tag);
    write_length(content.len(), out);
    out.extend_from_slice(content);
}

/// Unsigned big-endian INTEGER; leading zeros are dropped and a `0x00` is
/// prepended when the high bit would otherwise read as a sign.
pub fn write_unsigned(value: &[u8], out: &mut Vec<u8>) {
    let value = trim_leading_zeros(value);
    out.push(TAG_INTEGER);
    if value.is_empty() {
        out.extend_from_slice(&[0x01, 0x00]);
    } else if value[0] & 0x80 != 0 {
        write_length(value.len() + 1, out);
        out.push(0x00);
        out.extend_from_slice(value);
    } else {
        write_length(value.len(), out);
        out.extend_from_slice(value);
    }
}

pub fn trim_leading_zeros(value: &[u8]) -> &[u8] {
    let start = value.iter().take_while(|b| **b == 0).count();
    &value[start..]
}

/// Cursor over one DER region of a larger buffer
#[derive(Debug, Clone)]
pub struct DerReader<'a> {
    buf: &'a [u8],
    pos: usize,
    end: usize,
    err: &'static str,
}

impl<'a> DerReader<'a> {
    /// Reader over all of `buf`; every failure reports `err`
    pub fn new(buf: &'a [u8], err: &'static str) -> Self {
        Self {
            buf,
            pos: 0,
            end: buf.len(),
            err,
        }
    }

    /// Reader over `range` of `buf`, which must lie inside it
    pub fn with_range(buf: &'a [u8], range: Range<usize>, err: &'static str) -> Result<Self> {
        if range.start > range.end || range.end > buf.len() {
            return Err(ProtocolError::Incorrect(err));
        }
        Ok(Self {
            buf,
            pos: range.start,
            end: range.end,
            err,
        })
    }

    fn fail<T>(&self) -> Result<T> {
        Err(ProtocolError::Incorrect(self.err))
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.end
    }

    /// Fail unless the region has been consumed exactly
    pub fn finish(&self) -> Result<()> {
        if self.pos == self.end {
            Ok(())
        } else {
            self.fail()
        }
    }

    fn byte(&mut self) -> Result<u8> {
        if self.pos >= self.end {
            return self.fail();
        }
        let b = self.buf[self.pos];
        self.pos += 1;
        Ok(b)
    }

    fn length(&mut self) -> Result<usize> {
        let first = self.byte()?;
        if first < 0x80 {
            return Ok(usize::from(first));
        }
        let count = usize::from(first & 0x7f);
        // Indefinite lengths are not DER; more than four octets is nonsense here.
        if count == 0 || count > 4 {
            return self.fail();
        }
        let mut len = 0usize;
        for _ in 0..count {
            len = (len << 8) | usize::from(self.byte()?);
        }
        if len < 0x80 {
            return self.fail();
        }
        Ok(len)
    }

    /// Read one element with `tag`, returning the absolute content range
    pub fn read(&mut self, tag: u8) -> Result<Range<usize>> {
        if self.byte()? != tag {
            return self.fail();
        }
        let len = self.length()?;
        let start = self.pos;
        let end = match start.checked_add(len) {
            Some(end) if end <= self.end => end,
            _ => return self.fail(),
        };
        self.pos = end;
        Ok(start..end)
    }

    /// Enter a constructed element with `tag`
    pub fn enter(&mut self, tag: u8) -> Result<DerReader<'a>> {
        let range = self.read(tag)?;
        Ok(DerReader {
            buf: self.buf,
            pos: range.start,
            end: range.end,
            err: self.err,
        })
    }

    /// Non-negative INTEGER with leading zero octets excluded from the range
    pub fn read_unsigned(&mut self) -> Result<Range<usize>> {
        let range = self.read(TAG_INTEGER)?;
        if range.is_empty() || self.buf[range.start] & 0x80 != 0 {
            return self.fail();
        }
        let zeros = trim_leading_zeros(&self.buf[range.clone()]).len();
        Ok(range.end - zeros..range.end)
    }

    /// Content of a BIT STRING with no unused bits, without the count octet
    pub fn read_bit_string(&mut self) -> Result<Range<usize>> {
        let range = self.read(TAG_BIT_STRING)?;
        if range.is_empty() || self.buf[range.start] != 0 {
            return self.fail();
        }
        Ok(range.start + 1..range.end)
    }

    pub fn read_null(&mut self) -> Result<()> {
        if self.read(TAG_NULL)?.is_empty() {
            Ok(())
        } else {
            self.fail()
        }
    }

    /// Read an OBJECT IDENTIFIER and require it to equal `expected`
    pub fn expect_oid(&mut self, expected: &[u8]) -> Result<()> {
        let range = self.read(TAG_OID)?;
        if &self.buf[range] == expected {
            Ok(())
        } else {
            self.fail()
        }
    }
}
