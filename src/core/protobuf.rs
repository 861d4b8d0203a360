//! Minimal protocol-buffers wire format.
//!
//! Only what the daemon and pubsub messages need: varint fields and
//! length-delimited fields (bytes, strings, nested messages). Fixed-width
//! fields written by other encoders are skipped when scanning.
//!
//! Lookups return `Ok(None)` when a field is absent and `Err(Malformed)` when
//! the buffer itself is broken, so callers can tell "optional and missing"
//! apart from "corrupt".

use crate::core::varint::{decode_varint, encode_varint_into};
use crate::error::{constants, ProtocolError, Result};

/// Protobuf wire types understood by the reader
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireType {
    Varint = 0,
    Fixed64 = 1,
    LengthDelimited = 2,
    Fixed32 = 5,
}

impl WireType {
    fn from_u64(value: u64) -> Result<Self> {
        match value {
            0 => Ok(WireType::Varint),
            1 => Ok(WireType::Fixed64),
            2 => Ok(WireType::LengthDelimited),
            5 => Ok(WireType::Fixed32),
            _ => Err(ProtocolError::Malformed(constants::ERR_PB_WIRE_TYPE)),
        }
    }
}

/// Field writer. Fields may be written in any order.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ProtoBuffer {
    buffer: Vec<u8>,
}

impl ProtoBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    fn write_key(&mut self, field: u32, wire: WireType) {
        encode_varint_into((u64::from(field) << 3) | wire as u64, &mut self.buffer);
    }

    pub fn write_varint(&mut self, field: u32, value: u64) -> &mut Self {
        self.write_key(field, WireType::Varint);
        encode_varint_into(value, &mut self.buffer);
        self
    }

    /// Signed values are written two's complement, as `int64` is on the wire.
    pub fn write_int64(&mut self, field: u32, value: i64) -> &mut Self {
        self.write_varint(field, value as u64)
    }

    pub fn write_bytes(&mut self, field: u32, value: &[u8]) -> &mut Self {
        self.write_key(field, WireType::LengthDelimited);
        encode_varint_into(value.len() as u64, &mut self.buffer);
        self.buffer.extend_from_slice(value);
        self
    }

    pub fn write_string(&mut self, field: u32, value: &str) -> &mut Self {
        self.write_bytes(field, value.as_bytes())
    }

    pub fn write_message(&mut self, field: u32, message: &ProtoBuffer) -> &mut Self {
        self.write_bytes(field, &message.buffer)
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub fn finish(self) -> Vec<u8> {
        self.buffer
    }
}

/// A single decoded field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldValue<'a> {
    Varint(u64),
    Bytes(&'a [u8]),
    Fixed(&'a [u8]),
}

/// Decoded field with its number and the offset just past it
#[derive(Debug, Clone, Copy)]
pub struct Field<'a> {
    pub number: u32,
    pub value: FieldValue<'a>,
    pub end: usize,
}

/// Read-only view over an encoded message
#[derive(Debug, Clone, Copy)]
pub struct ProtoReader<'a> {
    data: &'a [u8],
}

impl<'a> ProtoReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.data
    }

    /// Decode the field that starts at `offset`
    pub fn field_at(&self, offset: usize) -> Result<Field<'a>> {
        let rest = &self.data[offset..];
        let (key, key_len) = decode_varint(rest).map_err(to_malformed)?;
        let number = u32::try_from(key >> 3)
            .map_err(|_| ProtocolError::Malformed(constants::ERR_PB_FIELD_ZERO))?;
        if number == 0 {
            return Err(ProtocolError::Malformed(constants::ERR_PB_FIELD_ZERO));
        }
        let mut pos = offset + key_len;
        let value = match WireType::from_u64(key & 0x07)? {
            WireType::Varint => {
                let (value, len) = decode_varint(&self.data[pos..]).map_err(to_malformed)?;
                pos += len;
                FieldValue::Varint(value)
            }
            WireType::LengthDelimited => {
                let (len, header) = decode_varint(&self.data[pos..]).map_err(to_malformed)?;
                pos += header;
                let end = usize::try_from(len)
                    .ok()
                    .and_then(|len| pos.checked_add(len))
                    .filter(|end| *end <= self.data.len())
                    .ok_or(ProtocolError::Malformed(constants::ERR_PB_LENGTH))?;
                let bytes = &self.data[pos..end];
                pos = end;
                FieldValue::Bytes(bytes)
            }
            WireType::Fixed64 => {
                let bytes = self.take_fixed(pos, 8)?;
                pos += 8;
                FieldValue::Fixed(bytes)
            }
            WireType::Fixed32 => {
                let bytes = self.take_fixed(pos, 4)?;
                pos += 4;
                FieldValue::Fixed(bytes)
            }
        };
        Ok(Field {
            number,
            value,
            end: pos,
        })
    }

    fn take_fixed(&self, pos: usize, width: usize) -> Result<&'a [u8]> {
        self.data
            .get(pos..pos + width)
            .ok_or(ProtocolError::Malformed(constants::ERR_PB_LENGTH))
    }

    /// Find the next occurrence of `field` at or after `cursor`.
    ///
    /// Returns the value and the cursor to pass for the following occurrence.
    pub fn next_field(&self, field: u32, mut cursor: usize) -> Result<Option<(FieldValue<'a>, usize)>> {
        while cursor < self.data.len() {
            let decoded = self.field_at(cursor)?;
            cursor = decoded.end;
            if decoded.number == field {
                return Ok(Some((decoded.value, cursor)));
            }
        }
        Ok(None)
    }

    /// Check every field in the buffer decodes
    pub fn validate(&self) -> Result<()> {
        let mut cursor = 0;
        while cursor < self.data.len() {
            cursor = self.field_at(cursor)?.end;
        }
        Ok(())
    }

    pub fn get_varint(&self, field: u32) -> Result<Option<u64>> {
        match self.next_field(field, 0)? {
            Some((FieldValue::Varint(value), _)) => Ok(Some(value)),
            Some(_) => Err(ProtocolError::Malformed(constants::ERR_PB_FIELD_TYPE)),
            None => Ok(None),
        }
    }

    pub fn get_int64(&self, field: u32) -> Result<Option<i64>> {
        Ok(self.get_varint(field)?.map(|value| value as i64))
    }

    /// Next length-delimited occurrence of `field` after `cursor`
    pub fn next_bytes(&self, field: u32, cursor: usize) -> Result<Option<(&'a [u8], usize)>> {
        match self.next_field(field, cursor)? {
            Some((FieldValue::Bytes(bytes), next)) => Ok(Some((bytes, next))),
            Some(_) => Err(ProtocolError::Malformed(constants::ERR_PB_FIELD_TYPE)),
            None => Ok(None),
        }
    }

    pub fn get_bytes(&self, field: u32) -> Result<Option<&'a [u8]>> {
        Ok(self.next_bytes(field, 0)?.map(|(bytes, _)| bytes))
    }

    pub fn get_string(&self, field: u32) -> Result<Option<String>> {
        self.get_bytes(field)?
            .map(|bytes| {
                String::from_utf8(bytes.to_vec())
                    .map_err(|_| ProtocolError::Malformed(constants::ERR_INVALID_UTF8))
            })
            .transpose()
    }

    pub fn get_repeated_bytes(&self, field: u32) -> Result<Vec<&'a [u8]>> {
        let mut values = Vec::new();
        let mut cursor = 0;
        while let Some((bytes, next)) = self.next_bytes(field, cursor)? {
            values.push(bytes);
            cursor = next;
        }
        Ok(values)
    }

    pub fn get_repeated_strings(&self, field: u32) -> Result<Vec<String>> {
        self.get_repeated_bytes(field)?
            .into_iter()
            .map(|bytes| {
                String::from_utf8(bytes.to_vec())
                    .map_err(|_| ProtocolError::Malformed(constants::ERR_INVALID_UTF8))
            })
            .collect()
    }

    /// Bounded reader over the first nested message stored in `field`
    pub fn enter_submessage(&self, field: u32) -> Result<Option<ProtoReader<'a>>> {
        Ok(self.get_bytes(field)?.map(ProtoReader::new))
    }

    /// Bounded readers over every nested message stored in `field`
    pub fn get_repeated_submessages(&self, field: u32) -> Result<Vec<ProtoReader<'a>>> {
        Ok(self
            .get_repeated_bytes(field)?
            .into_iter()
            .map(ProtoReader::new)
            .collect())
    }
}

// Inside a message a truncated varint is a broken buffer, not a closed stream.
fn to_malformed(err: ProtocolError) -> ProtocolError {
    match err {
        ProtocolError::Incomplete(_) => ProtocolError::Malformed(constants::ERR_PB_LENGTH),
        other => other,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_known_encoding() {
        // field 1 = 150 from the protobuf documentation
        let mut pb = ProtoBuffer::new();
        pb.write_varint(1, 150);
        assert_eq!(pb.as_bytes(), &[0x08, 0x96, 0x01]);

        let mut pb = ProtoBuffer::new();
        pb.write_string(2, "testing");
        assert_eq!(
            pb.as_bytes(),
            &[0x12, 0x07, b't', b'e', b's', b't', b'i', b'n', b'g']
        );
    }

    #[test]
    fn test_lookup_any_order() {
        let mut pb = ProtoBuffer::new();
        pb.write_bytes(3, b"c").write_varint(1, 7).write_string(2, "b");
        let bytes = pb.finish();
        let reader = ProtoReader::new(&bytes);
        assert_eq!(reader.get_varint(1).unwrap(), Some(7));
        assert_eq!(reader.get_string(2).unwrap().as_deref(), Some("b"));
        assert_eq!(reader.get_bytes(3).unwrap(), Some(&b"c"[..]));
        assert_eq!(reader.get_bytes(4).unwrap(), None);
    }

    #[test]
    fn test_repeated_and_cursor() {
        let mut pb = ProtoBuffer::new();
        pb.write_bytes(2, b"one").write_varint(1, 0).write_bytes(2, b"two");
        let bytes = pb.finish();
        let reader = ProtoReader::new(&bytes);
        assert_eq!(
            reader.get_repeated_bytes(2).unwrap(),
            vec![&b"one"[..], &b"two"[..]]
        );

        let (first, cursor) = reader.next_bytes(2, 0).unwrap().unwrap();
        assert_eq!(first, b"one");
        let (second, cursor) = reader.next_bytes(2, cursor).unwrap().unwrap();
        assert_eq!(second, b"two");
        assert!(reader.next_bytes(2, cursor).unwrap().is_none());
    }

    #[test]
    fn test_submessage_is_bounded() {
        let mut inner = ProtoBuffer::new();
        inner.write_varint(1, 42);
        let mut outer = ProtoBuffer::new();
        outer.write_message(5, &inner).write_varint(1, 9);
        let bytes = outer.finish();

        let reader = ProtoReader::new(&bytes);
        let sub = reader.enter_submessage(5).unwrap().unwrap();
        assert_eq!(sub.get_varint(1).unwrap(), Some(42));
        // The parent still sees its own field 1
        assert_eq!(reader.get_varint(1).unwrap(), Some(9));
    }

    #[test]
    fn test_truncated_length_is_malformed() {
        let bytes = [0x12, 0x05, b'a'];
        let reader = ProtoReader::new(&bytes);
        assert!(matches!(
            reader.get_bytes(2),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn test_unknown_wire_type_is_malformed() {
        let bytes = [0x0B, 0x00];
        assert!(ProtoReader::new(&bytes).validate().is_err());
    }

    #[test]
    fn test_fixed_fields_skipped() {
        let mut bytes = vec![0x09];
        bytes.extend_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        bytes.extend_from_slice(&[0x10, 0x03]);
        let reader = ProtoReader::new(&bytes);
        assert_eq!(reader.get_varint(2).unwrap(), Some(3));
    }

    #[test]
    fn test_negative_int64() {
        let mut pb = ProtoBuffer::new();
        pb.write_int64(4, -5);
        let bytes = pb.finish();
        assert_eq!(ProtoReader::new(&bytes).get_int64(4).unwrap(), Some(-5));
    }
}
