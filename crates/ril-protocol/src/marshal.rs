//! Generic payload shapes
//!
//! Most request and indication types carry one of a handful of payload
//! shapes. This module marshals those shapes so a dispatch table can be
//! assembled without a hand-written codec per request type.
//!
//! # Encoding
//! ```text
//! Void    (nothing)
//! Int     [value: i32]
//! Ints    [count: i32] [value: i32]...
//! String  [len: i32] [utf8 bytes] [zero pad to 4]      len = -1 means absent
//! Strings [count: i32] String...
//! Raw     [bytes...]
//! ```
//!
//! All integers are little-endian.

use crate::error::CodecError;
use crate::{RequestEncoder, RequestId, ResponseDecoder};

/// A decoded (native) payload value
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Payload {
    /// No payload
    #[default]
    Void,
    /// A single integer
    Int(i32),
    /// An integer array
    Ints(Vec<i32>),
    /// A single, possibly absent, string
    String(Option<String>),
    /// An array of possibly absent strings
    Strings(Vec<Option<String>>),
    /// Opaque bytes
    Raw(Vec<u8>),
}

impl Payload {
    /// Shape of this value
    pub fn shape(&self) -> Shape {
        match self {
            Self::Void => Shape::Void,
            Self::Int(_) => Shape::Int,
            Self::Ints(_) => Shape::Ints,
            Self::String(_) => Shape::String,
            Self::Strings(_) => Shape::Strings,
            Self::Raw(_) => Shape::Raw,
        }
    }

    /// Convenience constructor for a present string
    pub fn string(s: impl Into<String>) -> Self {
        Self::String(Some(s.into()))
    }
}

/// Payload shape selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Shape {
    Void,
    Int,
    Ints,
    String,
    Strings,
    Raw,
}

impl Shape {
    /// Returns the shape name for error messages
    pub fn name(&self) -> &'static str {
        match self {
            Self::Void => "void",
            Self::Int => "int",
            Self::Ints => "ints",
            Self::String => "string",
            Self::Strings => "strings",
            Self::Raw => "raw",
        }
    }

    /// Encode a payload of this shape
    pub fn encode(&self, payload: &Payload) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::new();
        match (self, payload) {
            (Shape::Void, Payload::Void) => {}
            (Shape::Int, Payload::Int(v)) => put_i32(&mut out, *v),
            (Shape::Ints, Payload::Ints(values)) => {
                put_i32(&mut out, values.len() as i32);
                for v in values {
                    put_i32(&mut out, *v);
                }
            }
            (Shape::String, Payload::String(s)) => put_string(&mut out, s.as_deref()),
            (Shape::Strings, Payload::Strings(values)) => {
                put_i32(&mut out, values.len() as i32);
                for s in values {
                    put_string(&mut out, s.as_deref());
                }
            }
            (Shape::Raw, Payload::Raw(bytes)) => out.extend_from_slice(bytes),
            (expected, actual) => {
                return Err(CodecError::ShapeMismatch {
                    expected: expected.name(),
                    actual: actual.shape().name(),
                })
            }
        }
        Ok(out)
    }

    /// Decode bytes as this shape
    pub fn decode(&self, bytes: &[u8]) -> Result<Payload, CodecError> {
        let mut reader = Reader::new(bytes);
        let payload = match self {
            // Void responses may carry filler the peer never meant to be read
            Shape::Void => return Ok(Payload::Void),
            Shape::Int => Payload::Int(reader.i32()?),
            Shape::Ints => {
                let count = reader.count()?;
                let mut values = Vec::with_capacity(count.min(bytes.len() / 4));
                for _ in 0..count {
                    values.push(reader.i32()?);
                }
                Payload::Ints(values)
            }
            Shape::String => Payload::String(reader.string()?),
            Shape::Strings => {
                let count = reader.count()?;
                let mut values = Vec::with_capacity(count.min(bytes.len() / 4));
                for _ in 0..count {
                    values.push(reader.string()?);
                }
                Payload::Strings(values)
            }
            Shape::Raw => return Ok(Payload::Raw(bytes.to_vec())),
        };
        reader.finish()?;
        Ok(payload)
    }
}

/// Codec pairing a request shape with a response shape
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShapeCodec {
    pub request: Shape,
    pub response: Shape,
}

impl ShapeCodec {
    /// Create a new shape codec
    pub fn new(request: Shape, response: Shape) -> Self {
        Self { request, response }
    }
}

impl RequestEncoder for ShapeCodec {
    fn encode(&self, _request: RequestId, payload: &Payload) -> Result<Vec<u8>, CodecError> {
        self.request.encode(payload)
    }
}

impl ResponseDecoder for ShapeCodec {
    fn decode(&self, _id: u32, bytes: &[u8]) -> Result<Payload, CodecError> {
        self.response.decode(bytes)
    }
}

fn put_i32(out: &mut Vec<u8>, v: i32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put_string(out: &mut Vec<u8>, s: Option<&str>) {
    match s {
        None => put_i32(out, -1),
        Some(s) => {
            put_i32(out, s.len() as i32);
            out.extend_from_slice(s.as_bytes());
            let pad = (4 - s.len() % 4) % 4;
            out.extend(std::iter::repeat(0u8).take(pad));
        }
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, offset: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        let end = self
            .offset
            .checked_add(n)
            .filter(|&end| end <= self.buf.len())
            .ok_or(CodecError::Truncated {
                offset: self.offset,
            })?;
        let slice = &self.buf[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn i32(&mut self) -> Result<i32, CodecError> {
        let b = self.take(4)?;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn count(&mut self) -> Result<usize, CodecError> {
        let offset = self.offset;
        let len = self.i32()?;
        usize::try_from(len).map_err(|_| CodecError::InvalidLength { len, offset })
    }

    fn string(&mut self) -> Result<Option<String>, CodecError> {
        let offset = self.offset;
        let len = self.i32()?;
        if len == -1 {
            return Ok(None);
        }
        let len = usize::try_from(len).map_err(|_| CodecError::InvalidLength { len, offset })?;
        let bytes = self.take(len)?;
        let s = std::str::from_utf8(bytes)
            .map_err(|_| CodecError::InvalidUtf8 { offset: offset + 4 })?
            .to_string();
        self.take((4 - len % 4) % 4)?;
        Ok(Some(s))
    }

    fn finish(&self) -> Result<(), CodecError> {
        match self.buf.len() - self.offset {
            0 => Ok(()),
            n => Err(CodecError::TrailingBytes(n)),
        }
    }
}
