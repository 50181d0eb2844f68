//! # Message Codec
//!
//! Reads and writes the RPC message format.
//!
//! ## Wire Format
//! ```text
//! [Version(1)] [ModuleId(4)] [NameLen(4)] [Name(N)] [Mask(4)] [Payload...]
//! ```
//!
//! Every multi-byte value is **little-endian**. Lengths are signed 32-bit counts.
//! The payload is the call's arguments in declaration order, with no type tags;
//! the reader has to know the expected [`WireType`] sequence.
//!
//! | Type         | Encoding                                  |
//! |--------------|-------------------------------------------|
//! | integers     | fixed width, little-endian                |
//! | `f32`        | IEEE-754 bits, little-endian              |
//! | `bool`       | one byte, `1` / `0`                       |
//! | `string`     | i32 byte count, UTF-8 bytes, no terminator|
//! | `byte[]`     | i32 byte count, raw bytes                 |
//! | `bool[]`     | i32 element count, one byte per element   |
//! | `Vector3`    | x, y, z as f32                            |
//! | `Quaternion` | x, y, z, w as f32                         |
//! | `PeerId`     | u64                                       |
//!
//! Every read is bounds-checked. Running out of bytes or meeting a negative or
//! oversized length prefix yields a [`DecodeError`] naming the expected type.

use crate::config::PROTOCOL_VERSION;
use crate::core::types::{PeerId, Quaternion, Value, Vector3, WireType};
use crate::error::{DecodeError, EncodeError};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Size of the header without the method name bytes.
pub const HEADER_FIXED_LEN: usize = 1 + 4 + 4 + 4;

/// The routing header carried by every message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHeader {
    pub version: u8,
    pub module_id: u32,
    pub method: String,
    pub mask: i32,
}

impl MessageHeader {
    /// Header for the current protocol version
    pub fn new(module_id: u32, method: impl Into<String>, mask: i32) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            module_id,
            method: method.into(),
            mask,
        }
    }

    /// `"<module>: <method>"`, used in log lines
    pub fn destination(&self) -> String {
        format!("{}: {}", self.module_id, self.method)
    }

    pub fn encoded_len(&self) -> usize {
        HEADER_FIXED_LEN + self.method.len()
    }
}

/// Write a message header into a fresh buffer.
pub fn encode_header(
    version: u8,
    module_id: u32,
    method: &str,
    mask: i32,
) -> Result<BytesMut, EncodeError> {
    let mut buf = BytesMut::with_capacity(HEADER_FIXED_LEN + method.len());
    buf.put_u8(version);
    buf.put_u32_le(module_id);
    put_len(&mut buf, method.len(), "string")?;
    buf.put_slice(method.as_bytes());
    buf.put_i32_le(mask);
    Ok(buf)
}

/// Read a message header. Returns the header and the offset of the first
/// payload byte.
pub fn decode_header(data: &[u8]) -> Result<(MessageHeader, usize), DecodeError> {
    let mut reader = MessageReader::new(data);
    let version = reader.read_u8()?;
    let module_id = reader.read_u32()?;
    let method = reader.read_string()?;
    let mask = reader.read_i32()?;

    let header = MessageHeader {
        version,
        module_id,
        method,
        mask,
    };
    Ok((header, reader.position()))
}

fn put_len(buf: &mut BytesMut, len: usize, expected: &'static str) -> Result<(), EncodeError> {
    let len = i32::try_from(len).map_err(|_| EncodeError::LengthOverflow {
        expected,
        length: len,
    })?;
    buf.put_i32_le(len);
    Ok(())
}

/// Builds an outgoing message: header first, then payload values.
#[derive(Debug)]
pub struct MessageWriter {
    buf: BytesMut,
}

impl MessageWriter {
    /// Start a message with the given header already written
    pub fn new(header: &MessageHeader) -> Result<Self, EncodeError> {
        let buf = encode_header(header.version, header.module_id, &header.method, header.mask)?;
        Ok(Self { buf })
    }

    pub fn write_u8(&mut self, value: u8) -> &mut Self {
        self.buf.put_u8(value);
        self
    }

    pub fn write_i8(&mut self, value: i8) -> &mut Self {
        self.buf.put_i8(value);
        self
    }

    pub fn write_u16(&mut self, value: u16) -> &mut Self {
        self.buf.put_u16_le(value);
        self
    }

    pub fn write_i16(&mut self, value: i16) -> &mut Self {
        self.buf.put_i16_le(value);
        self
    }

    pub fn write_u32(&mut self, value: u32) -> &mut Self {
        self.buf.put_u32_le(value);
        self
    }

    pub fn write_i32(&mut self, value: i32) -> &mut Self {
        self.buf.put_i32_le(value);
        self
    }

    pub fn write_u64(&mut self, value: u64) -> &mut Self {
        self.buf.put_u64_le(value);
        self
    }

    pub fn write_i64(&mut self, value: i64) -> &mut Self {
        self.buf.put_i64_le(value);
        self
    }

    pub fn write_f32(&mut self, value: f32) -> &mut Self {
        self.buf.put_f32_le(value);
        self
    }

    pub fn write_bool(&mut self, value: bool) -> &mut Self {
        self.buf.put_u8(u8::from(value));
        self
    }

    pub fn write_string(&mut self, value: &str) -> Result<&mut Self, EncodeError> {
        put_len(&mut self.buf, value.len(), "string")?;
        self.buf.put_slice(value.as_bytes());
        Ok(self)
    }

    pub fn write_bytes(&mut self, value: &[u8]) -> Result<&mut Self, EncodeError> {
        put_len(&mut self.buf, value.len(), "byte[]")?;
        self.buf.put_slice(value);
        Ok(self)
    }

    pub fn write_bools(&mut self, value: &[bool]) -> Result<&mut Self, EncodeError> {
        put_len(&mut self.buf, value.len(), "bool[]")?;
        self.buf.reserve(value.len());
        for &b in value {
            self.buf.put_u8(u8::from(b));
        }
        Ok(self)
    }

    pub fn write_vector3(&mut self, value: Vector3) -> &mut Self {
        self.write_f32(value.x).write_f32(value.y).write_f32(value.z)
    }

    pub fn write_quaternion(&mut self, value: Quaternion) -> &mut Self {
        self.write_f32(value.x)
            .write_f32(value.y)
            .write_f32(value.z)
            .write_f32(value.w)
    }

    pub fn write_peer_id(&mut self, value: PeerId) -> &mut Self {
        self.write_u64(value.raw())
    }

    /// Write `value` as type `ty`. The value must hold exactly that type.
    pub fn write_value(&mut self, ty: WireType, value: &Value) -> Result<(), EncodeError> {
        match (ty, value) {
            (WireType::U8, Value::U8(v)) => {
                self.write_u8(*v);
            }
            (WireType::I8, Value::I8(v)) => {
                self.write_i8(*v);
            }
            (WireType::U16, Value::U16(v)) => {
                self.write_u16(*v);
            }
            (WireType::I16, Value::I16(v)) => {
                self.write_i16(*v);
            }
            (WireType::U32, Value::U32(v)) => {
                self.write_u32(*v);
            }
            (WireType::I32, Value::I32(v)) => {
                self.write_i32(*v);
            }
            (WireType::U64, Value::U64(v)) => {
                self.write_u64(*v);
            }
            (WireType::I64, Value::I64(v)) => {
                self.write_i64(*v);
            }
            (WireType::F32, Value::F32(v)) => {
                self.write_f32(*v);
            }
            (WireType::Bool, Value::Bool(v)) => {
                self.write_bool(*v);
            }
            (WireType::String, Value::String(v)) => {
                self.write_string(v)?;
            }
            (WireType::Bytes, Value::Bytes(v)) => {
                self.write_bytes(v)?;
            }
            (WireType::Bools, Value::Bools(v)) => {
                self.write_bools(v)?;
            }
            (WireType::Vector3, Value::Vector3(v)) => {
                self.write_vector3(*v);
            }
            (WireType::Quaternion, Value::Quaternion(v)) => {
                self.write_quaternion(*v);
            }
            (WireType::PeerId, Value::PeerId(v)) => {
                self.write_peer_id(*v);
            }
            (expected, other) => {
                return Err(EncodeError::TypeMismatch {
                    expected,
                    actual: other.wire_type(),
                })
            }
        }
        Ok(())
    }

    /// Bytes written so far, header included
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Freeze the buffer for sending
    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }
}

/// Bounds-checked cursor over a received buffer.
#[derive(Debug, Clone)]
pub struct MessageReader<'a> {
    data: &'a [u8],
    cursor: &'a [u8],
}

impl<'a> MessageReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, cursor: data }
    }

    /// Reader starting at `offset`. An offset past the end leaves nothing to read.
    pub fn at(data: &'a [u8], offset: usize) -> Self {
        let start = offset.min(data.len());
        Self {
            data,
            cursor: &data[start..],
        }
    }

    pub fn position(&self) -> usize {
        self.data.len() - self.cursor.len()
    }

    pub fn remaining(&self) -> usize {
        self.cursor.remaining()
    }

    fn ensure(&self, needed: usize, expected: &'static str) -> Result<(), DecodeError> {
        let remaining = self.cursor.remaining();
        if remaining < needed {
            return Err(DecodeError::Exhausted {
                expected,
                needed,
                remaining,
            });
        }
        Ok(())
    }

    fn read_len(&mut self, expected: &'static str) -> Result<usize, DecodeError> {
        self.ensure(4, expected)?;
        let length = self.cursor.get_i32_le();
        let remaining = self.cursor.remaining();
        match usize::try_from(length) {
            Ok(len) if len <= remaining => Ok(len),
            _ => Err(DecodeError::InvalidLength {
                expected,
                length,
                remaining,
            }),
        }
    }

    fn take(&mut self, len: usize) -> &'a [u8] {
        let (head, tail) = self.cursor.split_at(len);
        self.cursor = tail;
        head
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        self.ensure(1, "byte")?;
        Ok(self.cursor.get_u8())
    }

    pub fn read_i8(&mut self) -> Result<i8, DecodeError> {
        self.ensure(1, "sbyte")?;
        Ok(self.cursor.get_i8())
    }

    pub fn read_u16(&mut self) -> Result<u16, DecodeError> {
        self.ensure(2, "ushort")?;
        Ok(self.cursor.get_u16_le())
    }

    pub fn read_i16(&mut self) -> Result<i16, DecodeError> {
        self.ensure(2, "short")?;
        Ok(self.cursor.get_i16_le())
    }

    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        self.ensure(4, "uint")?;
        Ok(self.cursor.get_u32_le())
    }

    pub fn read_i32(&mut self) -> Result<i32, DecodeError> {
        self.ensure(4, "int")?;
        Ok(self.cursor.get_i32_le())
    }

    pub fn read_u64(&mut self) -> Result<u64, DecodeError> {
        self.ensure(8, "ulong")?;
        Ok(self.cursor.get_u64_le())
    }

    pub fn read_i64(&mut self) -> Result<i64, DecodeError> {
        self.ensure(8, "long")?;
        Ok(self.cursor.get_i64_le())
    }

    pub fn read_f32(&mut self) -> Result<f32, DecodeError> {
        self.ensure(4, "float")?;
        Ok(self.cursor.get_f32_le())
    }

    /// Any non-zero byte reads as `true`.
    pub fn read_bool(&mut self) -> Result<bool, DecodeError> {
        self.ensure(1, "bool")?;
        Ok(self.cursor.get_u8() != 0)
    }

    pub fn read_string(&mut self) -> Result<String, DecodeError> {
        let len = self.read_len("string")?;
        let raw = self.take(len);
        std::str::from_utf8(raw)
            .map(str::to_owned)
            .map_err(|_| DecodeError::InvalidUtf8 {
                expected: "string",
            })
    }

    pub fn read_bytes(&mut self) -> Result<Vec<u8>, DecodeError> {
        let len = self.read_len("byte[]")?;
        Ok(self.take(len).to_vec())
    }

    /// Elements equal to `1` read as `true`.
    pub fn read_bools(&mut self) -> Result<Vec<bool>, DecodeError> {
        let len = self.read_len("bool[]")?;
        Ok(self.take(len).iter().map(|&b| b == 1).collect())
    }

    pub fn read_vector3(&mut self) -> Result<Vector3, DecodeError> {
        self.ensure(12, "Vector3")?;
        Ok(Vector3::new(
            self.cursor.get_f32_le(),
            self.cursor.get_f32_le(),
            self.cursor.get_f32_le(),
        ))
    }

    pub fn read_quaternion(&mut self) -> Result<Quaternion, DecodeError> {
        self.ensure(16, "Quaternion")?;
        Ok(Quaternion::new(
            self.cursor.get_f32_le(),
            self.cursor.get_f32_le(),
            self.cursor.get_f32_le(),
            self.cursor.get_f32_le(),
        ))
    }

    pub fn read_peer_id(&mut self) -> Result<PeerId, DecodeError> {
        self.ensure(8, "PeerId")?;
        Ok(PeerId(self.cursor.get_u64_le()))
    }

    /// Read the next value as type `ty`
    pub fn read_value(&mut self, ty: WireType) -> Result<Value, DecodeError> {
        Ok(match ty {
            WireType::U8 => Value::U8(self.read_u8()?),
            WireType::I8 => Value::I8(self.read_i8()?),
            WireType::U16 => Value::U16(self.read_u16()?),
            WireType::I16 => Value::I16(self.read_i16()?),
            WireType::U32 => Value::U32(self.read_u32()?),
            WireType::I32 => Value::I32(self.read_i32()?),
            WireType::U64 => Value::U64(self.read_u64()?),
            WireType::I64 => Value::I64(self.read_i64()?),
            WireType::F32 => Value::F32(self.read_f32()?),
            WireType::Bool => Value::Bool(self.read_bool()?),
            WireType::String => Value::String(self.read_string()?),
            WireType::Bytes => Value::Bytes(self.read_bytes()?),
            WireType::Bools => Value::Bools(self.read_bools()?),
            WireType::Vector3 => Value::Vector3(self.read_vector3()?),
            WireType::Quaternion => Value::Quaternion(self.read_quaternion()?),
            WireType::PeerId => Value::PeerId(self.read_peer_id()?),
        })
    }
}

/// A received message: owns its bytes, with the header decoded eagerly.
#[derive(Debug, Clone)]
pub struct Message {
    header: MessageHeader,
    bytes: Bytes,
    payload_offset: usize,
}

impl Message {
    /// Decode the header of a received buffer. Rejects unknown protocol versions.
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Result<Self, DecodeError> {
        let bytes = bytes.into();
        let (header, payload_offset) = decode_header(&bytes)?;
        if header.version != PROTOCOL_VERSION {
            return Err(DecodeError::UnsupportedVersion(header.version));
        }
        Ok(Self {
            header,
            bytes,
            payload_offset,
        })
    }

    pub fn header(&self) -> &MessageHeader {
        &self.header
    }

    pub fn payload_offset(&self) -> usize {
        self.payload_offset
    }

    pub fn payload(&self) -> &[u8] {
        &self.bytes[self.payload_offset..]
    }

    /// A fresh cursor positioned at the start of the payload
    pub fn reader(&self) -> MessageReader<'_> {
        MessageReader::at(&self.bytes, self.payload_offset)
    }

    pub fn as_bytes(&self) -> &Bytes {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn test_header_layout_is_little_endian() {
        let buf = encode_header(1, 42, "Ping", 7).expect("encode");
        let expected: Vec<u8> = vec![
            0x01, // version
            0x2A, 0x00, 0x00, 0x00, // module id 42
            0x04, 0x00, 0x00, 0x00, // name length 4
            b'P', b'i', b'n', b'g', // name
            0x07, 0x00, 0x00, 0x00, // mask 7
        ];
        assert_eq!(&buf[..], &expected[..]);
    }

    #[test]
    fn test_header_roundtrip_offset() {
        let buf = encode_header(1, 42, "Ping", 7).expect("encode");
        let (header, offset) = decode_header(&buf).expect("decode");
        assert_eq!(header.version, 1);
        assert_eq!(header.module_id, 42);
        assert_eq!(header.method, "Ping");
        assert_eq!(header.mask, 7);
        assert_eq!(offset, buf.len());
        assert_eq!(offset, header.encoded_len());
    }

    #[test]
    fn test_primitive_byte_order() {
        let mut writer = MessageWriter::new(&MessageHeader::new(0, "", 0)).expect("writer");
        let start = writer.len();
        writer
            .write_u16(0x0102)
            .write_i32(-2)
            .write_u64(0x0102_0304_0506_0708)
            .write_f32(1.0)
            .write_bool(true);
        let bytes = writer.finish();
        assert_eq!(
            &bytes[start..],
            &[
                0x02, 0x01, // u16
                0xFE, 0xFF, 0xFF, 0xFF, // i32 -2
                0x08, 0x07, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01, // u64
                0x00, 0x00, 0x80, 0x3F, // f32 1.0
                0x01, // bool
            ]
        );
    }

    #[test]
    fn test_write_value_rejects_wrong_variant() {
        let mut writer = MessageWriter::new(&MessageHeader::new(1, "Hit", 0)).expect("writer");
        let before = writer.len();
        let err = writer
            .write_value(WireType::I32, &Value::F32(1.0))
            .unwrap_err();
        assert_eq!(
            err,
            EncodeError::TypeMismatch {
                expected: WireType::I32,
                actual: WireType::F32
            }
        );
        assert_eq!(writer.len(), before);
    }

    #[test]
    fn test_read_past_end_names_type() {
        let mut reader = MessageReader::new(&[0x01, 0x02]);
        let err = reader.read_i32().unwrap_err();
        assert_eq!(
            err,
            DecodeError::Exhausted {
                expected: "int",
                needed: 4,
                remaining: 2
            }
        );
        // Failed reads do not consume input
        assert_eq!(reader.remaining(), 2);
    }

    #[test]
    fn test_negative_length_prefix() {
        let data = (-1i32).to_le_bytes();
        let mut reader = MessageReader::new(&data);
        assert!(matches!(
            reader.read_bytes(),
            Err(DecodeError::InvalidLength {
                expected: "byte[]",
                length: -1,
                ..
            })
        ));
    }

    #[test]
    fn test_length_prefix_beyond_buffer() {
        let mut data = 1000i32.to_le_bytes().to_vec();
        data.extend_from_slice(b"short");
        let mut reader = MessageReader::new(&data);
        assert!(matches!(
            reader.read_string(),
            Err(DecodeError::InvalidLength {
                expected: "string",
                length: 1000,
                remaining: 5
            })
        ));
    }

    #[test]
    fn test_invalid_utf8() {
        let mut data = 2i32.to_le_bytes().to_vec();
        data.extend_from_slice(&[0xC3, 0x28]);
        let mut reader = MessageReader::new(&data);
        assert_eq!(
            reader.read_string(),
            Err(DecodeError::InvalidUtf8 {
                expected: "string"
            })
        );
    }

    #[test]
    fn test_bool_decoding_rules() {
        let mut reader = MessageReader::new(&[0x02]);
        assert!(reader.read_bool().unwrap());

        let mut data = 3i32.to_le_bytes().to_vec();
        data.extend_from_slice(&[1, 0, 2]);
        let mut reader = MessageReader::new(&data);
        assert_eq!(reader.read_bools().unwrap(), vec![true, false, false]);
    }

    #[test]
    fn test_message_rejects_unknown_version() {
        let buf = encode_header(9, 1, "Hit", 0).expect("encode");
        assert!(matches!(
            Message::from_bytes(buf.freeze()),
            Err(DecodeError::UnsupportedVersion(9))
        ));
    }

    #[test]
    fn test_message_reader_starts_at_payload() {
        let mut writer = MessageWriter::new(&MessageHeader::new(3, "Move", 0)).expect("writer");
        writer.write_vector3(Vector3::new(1.0, 2.0, 3.0));
        let message = Message::from_bytes(writer.finish()).expect("message");

        assert_eq!(message.payload().len(), 12);
        let mut first = message.reader();
        let mut second = message.reader();
        assert_eq!(first.read_vector3().unwrap(), Vector3::new(1.0, 2.0, 3.0));
        assert_eq!(second.read_f32().unwrap(), 1.0);
    }
}
