//! Minimal Protocol Buffers wire format support.
//!
//! This module implements just enough of the [Protocol
//! Buffers](https://protobuf.dev/) wire format to read and write the ONNX
//! message subset in [`crate::onnx`]: varints, field tags, 32-bit scalars and
//! length-delimited fields. Messages in this crate are at most a few hundred
//! kilobytes, so both directions operate on in-memory buffers.
//!
//! See <https://protobuf.dev/programming-guides/encoding/> for a guide to the
//! encoding.

use std::error::Error as StdError;
use std::fmt;
use std::fmt::{Display, Formatter};

/// Errors that occur when decoding a Protocol Buffers message.
#[derive(Debug, PartialEq)]
pub enum Error {
    /// The buffer ended in the middle of a field.
    UnexpectedEof,

    /// A varint had no terminating byte within the maximum length.
    InvalidVarint,

    /// A field tag used a wire type this module does not support.
    UnsupportedWireType(u64),

    /// A field's wire type did not match the type expected for the field.
    WrongWireType {
        expected: WireType,
        actual: WireType,
    },

    /// A string field contained invalid UTF-8.
    InvalidUtf8,

    /// A length-delimited field's length exceeded the remaining buffer.
    InvalidLength,
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Error::UnexpectedEof => write!(f, "unexpected end of input"),
            Error::InvalidVarint => write!(f, "invalid varint"),
            Error::UnsupportedWireType(wire) => write!(f, "unsupported wire type {}", wire),
            Error::WrongWireType { expected, actual } => {
                write!(f, "expected wire type {:?} but found {:?}", expected, actual)
            }
            Error::InvalidUtf8 => write!(f, "string field is not valid UTF-8"),
            Error::InvalidLength => write!(f, "field length exceeds input"),
        }
    }
}

impl StdError for Error {}

/// Encoding used for a field on the wire.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum WireType {
    Varint,
    Fixed64,
    Len,
    Fixed32,
}

impl WireType {
    fn from_tag(tag: u64) -> Result<WireType, Error> {
        match tag & 7 {
            0 => Ok(WireType::Varint),
            1 => Ok(WireType::Fixed64),
            2 => Ok(WireType::Len),
            5 => Ok(WireType::Fixed32),
            wire => Err(Error::UnsupportedWireType(wire)),
        }
    }
}

/// Incremental reader for an encoded message.
///
/// [`next_field`](Reader::next_field) yields `(field number, wire type)`
/// pairs; the caller then reads or skips the field's value. Nested messages
/// are decoded by creating a new `Reader` over the bytes of a
/// length-delimited field.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Reader<'a> {
        Reader { buf, pos: 0 }
    }

    /// Return true if the reader has not yet consumed the whole buffer.
    ///
    /// Used when reading packed repeated fields, whose elements are not
    /// tagged.
    pub fn has_remaining(&self) -> bool {
        self.pos < self.buf.len()
    }

    /// Read the tag of the next field, or `None` at the end of the buffer.
    pub fn next_field(&mut self) -> Result<Option<(u64, WireType)>, Error> {
        if self.pos == self.buf.len() {
            return Ok(None);
        }
        let tag = self.read_varint()?;
        let wire = WireType::from_tag(tag)?;
        Ok(Some((tag >> 3, wire)))
    }

    pub fn read_varint(&mut self) -> Result<u64, Error> {
        let mut value = 0u64;
        for shift in 0..10 {
            let byte = *self.buf.get(self.pos).ok_or(Error::UnexpectedEof)?;
            self.pos += 1;
            value |= ((byte & 0x7f) as u64) << (shift * 7);
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(Error::InvalidVarint)
    }

    /// Read a varint field holding an `int64` value.
    pub fn read_int64(&mut self) -> Result<i64, Error> {
        self.read_varint().map(|v| v as i64)
    }

    /// Read a fixed 32-bit `float` value.
    pub fn read_f32(&mut self) -> Result<f32, Error> {
        let end = self.pos.checked_add(4).ok_or(Error::UnexpectedEof)?;
        let bytes = self
            .buf
            .get(self.pos..end)
            .ok_or(Error::UnexpectedEof)?
            .try_into()
            .map_err(|_| Error::UnexpectedEof)?;
        self.pos = end;
        Ok(f32::from_le_bytes(bytes))
    }

    /// Read the contents of a length-delimited field.
    pub fn read_bytes(&mut self) -> Result<&'a [u8], Error> {
        let len = self.read_varint()? as usize;
        let end = self.pos.checked_add(len).ok_or(Error::InvalidLength)?;
        let bytes = self.buf.get(self.pos..end).ok_or(Error::InvalidLength)?;
        self.pos = end;
        Ok(bytes)
    }

    pub fn read_string(&mut self) -> Result<String, Error> {
        let bytes = self.read_bytes()?;
        String::from_utf8(bytes.to_vec()).map_err(|_| Error::InvalidUtf8)
    }

    /// Skip over a field's value.
    pub fn skip(&mut self, wire: WireType) -> Result<(), Error> {
        match wire {
            WireType::Varint => {
                self.read_varint()?;
            }
            WireType::Fixed64 => {
                let end = self.pos.checked_add(8).ok_or(Error::UnexpectedEof)?;
                if end > self.buf.len() {
                    return Err(Error::UnexpectedEof);
                }
                self.pos = end;
            }
            WireType::Len => {
                self.read_bytes()?;
            }
            WireType::Fixed32 => {
                self.read_f32()?;
            }
        }
        Ok(())
    }

    /// Check that a field's wire type matches the type its value is read as.
    pub fn expect_wire_type(wire: WireType, expected: WireType) -> Result<(), Error> {
        if wire == expected {
            Ok(())
        } else {
            Err(Error::WrongWireType {
                expected,
                actual: wire,
            })
        }
    }
}

/// Append-only writer for an encoded message.
///
/// Fields with default values should simply not be written, matching proto3
/// semantics. Nested messages are written via
/// [`message_field`](Writer::message_field), which encodes the inner message
/// into its own buffer to obtain the length prefix.
#[derive(Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Writer {
        Writer { buf: Vec::new() }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn push_varint(&mut self, mut value: u64) {
        loop {
            let byte = (value & 0x7f) as u8;
            value >>= 7;
            if value == 0 {
                self.buf.push(byte);
                break;
            }
            self.buf.push(byte | 0x80);
        }
    }

    fn push_tag(&mut self, field: u64, wire: WireType) {
        let wire = match wire {
            WireType::Varint => 0,
            WireType::Fixed64 => 1,
            WireType::Len => 2,
            WireType::Fixed32 => 5,
        };
        self.push_varint(field << 3 | wire);
    }

    pub fn varint_field(&mut self, field: u64, value: u64) {
        self.push_tag(field, WireType::Varint);
        self.push_varint(value);
    }

    pub fn int64_field(&mut self, field: u64, value: i64) {
        self.varint_field(field, value as u64);
    }

    pub fn float_field(&mut self, field: u64, value: f32) {
        self.push_tag(field, WireType::Fixed32);
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn bytes_field(&mut self, field: u64, value: &[u8]) {
        self.push_tag(field, WireType::Len);
        self.push_varint(value.len() as u64);
        self.buf.extend_from_slice(value);
    }

    pub fn string_field(&mut self, field: u64, value: &str) {
        self.bytes_field(field, value.as_bytes());
    }

    /// Write a nested message field. `encode` writes the message's fields
    /// into the supplied writer.
    pub fn message_field<F: FnOnce(&mut Writer)>(&mut self, field: u64, encode: F) {
        let mut inner = Writer::new();
        encode(&mut inner);
        self.bytes_field(field, &inner.buf);
    }
}
