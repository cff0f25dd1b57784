//! Error types for frame parsing and payload marshaling

use thiserror::Error;

/// Errors that can occur while parsing frames off the wire
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Buffer is incomplete - need more data
    #[error("incomplete data: need {needed} more bytes")]
    Incomplete { needed: usize },

    /// Declared frame length exceeds the configured limit
    #[error("frame too large: {len} bytes (limit {max})")]
    FrameTooLarge { len: u32, max: u32 },

    /// Frame body is shorter than its fixed header
    #[error("truncated frame header: {len} bytes, need {needed}")]
    TruncatedHeader { len: usize, needed: usize },

    /// Unknown frame kind discriminator
    #[error("unknown frame kind: {0}")]
    UnknownKind(u32),
}

/// Errors raised by request encoders and response decoders
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Payload value does not match the shape the codec expects
    #[error("payload shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch {
        expected: &'static str,
        actual: &'static str,
    },

    /// Payload bytes ended before the value was complete
    #[error("payload truncated at offset {offset}")]
    Truncated { offset: usize },

    /// A length field was negative or otherwise invalid
    #[error("invalid length {len} at offset {offset}")]
    InvalidLength { len: i32, offset: usize },

    /// String bytes were not valid UTF-8
    #[error("invalid UTF-8 string at offset {offset}")]
    InvalidUtf8 { offset: usize },

    /// Bytes remained after the value was decoded
    #[error("{0} trailing bytes after payload")]
    TrailingBytes(usize),

    /// Codec-specific failure
    #[error("{0}")]
    Other(String),
}
