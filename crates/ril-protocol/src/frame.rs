//! Length-prefixed frame encoding and streaming parser
//!
//! # Envelope
//! ```text
//! [len: u32 BE] [body: len bytes]
//! ```
//!
//! The length prefix is in network byte order. Body integers are 32-bit
//! little-endian. A zero-length body is legal on the wire; it is rejected
//! only when decoded as a [`Frame`] or [`Command`], which have fixed headers.
//!
//! # Inbound body (modem → framework)
//! ```text
//! [kind: u32] [token: u32] [id: u32] [status: i32] [payload...]
//! ```
//!
//! # Outbound body (framework → modem)
//! ```text
//! [request: u32] [token: u32] [payload...]
//! ```

use crate::error::ParseError;
use crate::{IndicationId, RequestId, Status, Token};

/// Size of the length prefix in bytes
pub const LENGTH_PREFIX_LEN: usize = 4;
/// Size of the fixed inbound frame header
pub const FRAME_HEADER_LEN: usize = 16;
/// Size of the fixed outbound command header
pub const COMMAND_HEADER_LEN: usize = 8;
/// Default maximum body size (8 KiB)
pub const DEFAULT_MAX_FRAME_LEN: u32 = 8 * 1024;

/// Frame class discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FrameKind {
    /// Solicited response, no acknowledgment required
    Solicited,
    /// Unsolicited indication, no acknowledgment required
    Unsolicited,
    /// Peer acknowledges receipt of a command; the response follows later
    SolicitedAck,
    /// Solicited response that must be acknowledged before resolution
    SolicitedAckExpected,
    /// Unsolicited indication that must be acknowledged
    UnsolicitedAckExpected,
}

impl FrameKind {
    /// Wire tag for this kind
    pub fn as_u32(&self) -> u32 {
        match self {
            Self::Solicited => 0,
            Self::Unsolicited => 1,
            Self::SolicitedAck => 2,
            Self::SolicitedAckExpected => 3,
            Self::UnsolicitedAckExpected => 4,
        }
    }

    /// Parse a wire tag
    pub fn from_u32(tag: u32) -> Option<Self> {
        match tag {
            0 => Some(Self::Solicited),
            1 => Some(Self::Unsolicited),
            2 => Some(Self::SolicitedAck),
            3 => Some(Self::SolicitedAckExpected),
            4 => Some(Self::UnsolicitedAckExpected),
            _ => None,
        }
    }

    /// Whether frames of this kind are correlated by token
    pub fn is_solicited(&self) -> bool {
        matches!(
            self,
            Self::Solicited | Self::SolicitedAck | Self::SolicitedAckExpected
        )
    }

    /// Whether the receiver must emit an acknowledgment
    pub fn expects_ack(&self) -> bool {
        matches!(
            self,
            Self::SolicitedAckExpected | Self::UnsolicitedAckExpected
        )
    }

    /// Returns a short name for logging
    pub fn name(&self) -> &'static str {
        match self {
            Self::Solicited => "SOLICITED",
            Self::Unsolicited => "UNSOLICITED",
            Self::SolicitedAck => "SOLICITED_ACK",
            Self::SolicitedAckExpected => "SOLICITED_ACK_EXP",
            Self::UnsolicitedAckExpected => "UNSOLICITED_ACK_EXP",
        }
    }
}

/// One inbound transport message
///
/// `token` is meaningful only for solicited kinds and is zero for
/// indications. `id` is the request number for responses and the indication
/// number for indications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: FrameKind,
    pub token: Token,
    pub id: u32,
    pub status: Status,
    pub payload: Vec<u8>,
}

impl Frame {
    /// Build a solicited frame
    pub fn solicited(
        kind: FrameKind,
        token: Token,
        request: RequestId,
        status: Status,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            kind,
            token,
            id: request.0,
            status,
            payload,
        }
    }

    /// Build an unsolicited indication frame
    pub fn indication(kind: FrameKind, indication: IndicationId, payload: Vec<u8>) -> Self {
        Self {
            kind,
            token: Token(0),
            id: indication.0,
            status: Status::SUCCESS,
            payload,
        }
    }

    /// Request number, for solicited frames
    pub fn request_id(&self) -> RequestId {
        RequestId(self.id)
    }

    /// Indication number, for unsolicited frames
    pub fn indication_id(&self) -> IndicationId {
        IndicationId(self.id)
    }

    /// Encode the body (without length prefix)
    pub fn encode_body(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(FRAME_HEADER_LEN + self.payload.len());
        body.extend_from_slice(&self.kind.as_u32().to_le_bytes());
        body.extend_from_slice(&self.token.0.to_le_bytes());
        body.extend_from_slice(&self.id.to_le_bytes());
        body.extend_from_slice(&self.status.0.to_le_bytes());
        body.extend_from_slice(&self.payload);
        body
    }

    /// Encode the body with its length prefix
    pub fn encode(&self) -> Vec<u8> {
        with_length_prefix(self.encode_body())
    }

    /// Decode a body (without length prefix)
    pub fn decode_body(body: &[u8]) -> Result<Self, ParseError> {
        if body.len() < FRAME_HEADER_LEN {
            return Err(ParseError::TruncatedHeader {
                len: body.len(),
                needed: FRAME_HEADER_LEN,
            });
        }

        let tag = read_u32_le(body, 0);
        let kind = FrameKind::from_u32(tag).ok_or(ParseError::UnknownKind(tag))?;

        Ok(Self {
            kind,
            token: Token(read_u32_le(body, 4)),
            id: read_u32_le(body, 8),
            status: Status(read_u32_le(body, 12) as i32),
            payload: body[FRAME_HEADER_LEN..].to_vec(),
        })
    }
}

/// One outbound command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub request: RequestId,
    pub token: Token,
    pub payload: Vec<u8>,
}

impl Command {
    /// Create a new command
    pub fn new(request: RequestId, token: Token, payload: Vec<u8>) -> Self {
        Self {
            request,
            token,
            payload,
        }
    }

    /// Zero-payload acknowledgment for a solicited response
    pub fn ack(token: Token) -> Self {
        Self::new(RequestId::ACKNOWLEDGEMENT, token, Vec::new())
    }

    /// Zero-payload acknowledgment for an indication, keyed by its number
    pub fn ack_indication(indication: IndicationId) -> Self {
        Self::ack(Token(indication.0))
    }

    /// Whether this is an acknowledgment
    pub fn is_ack(&self) -> bool {
        self.request.is_ack()
    }

    /// Encode the body (without length prefix)
    pub fn encode_body(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(COMMAND_HEADER_LEN + self.payload.len());
        body.extend_from_slice(&self.request.0.to_le_bytes());
        body.extend_from_slice(&self.token.0.to_le_bytes());
        body.extend_from_slice(&self.payload);
        body
    }

    /// Encode the body with its length prefix
    pub fn encode(&self) -> Vec<u8> {
        with_length_prefix(self.encode_body())
    }

    /// Decode a body (without length prefix)
    pub fn decode_body(body: &[u8]) -> Result<Self, ParseError> {
        if body.len() < COMMAND_HEADER_LEN {
            return Err(ParseError::TruncatedHeader {
                len: body.len(),
                needed: COMMAND_HEADER_LEN,
            });
        }

        Ok(Self {
            request: RequestId(read_u32_le(body, 0)),
            token: Token(read_u32_le(body, 4)),
            payload: body[COMMAND_HEADER_LEN..].to_vec(),
        })
    }
}

fn with_length_prefix(body: Vec<u8>) -> Vec<u8> {
    let mut out = Vec::with_capacity(LENGTH_PREFIX_LEN + body.len());
    out.extend_from_slice(&(body.len() as u32).to_be_bytes());
    out.extend_from_slice(&body);
    out
}

fn read_u32_le(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        buf[offset],
        buf[offset + 1],
        buf[offset + 2],
        buf[offset + 3],
    ])
}

/// Streaming parser for length-prefixed frames
///
/// Bytes are pushed as they arrive; complete bodies are extracted in order.
/// A bad length prefix cannot be resynchronized past, so after a framing
/// error the caller must close the stream.
#[derive(Debug)]
pub struct FrameCodec {
    buffer: Vec<u8>,
    max_frame_len: u32,
}

impl FrameCodec {
    /// Create a codec with the default frame limit
    pub fn new() -> Self {
        Self::with_max_frame_len(DEFAULT_MAX_FRAME_LEN)
    }

    /// Create a codec with a custom frame limit
    pub fn with_max_frame_len(max_frame_len: u32) -> Self {
        Self {
            buffer: Vec::with_capacity(256),
            max_frame_len,
        }
    }

    /// Maximum accepted body size
    pub fn max_frame_len(&self) -> u32 {
        self.max_frame_len
    }

    /// Push raw bytes into the codec buffer
    pub fn push_bytes(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Number of buffered bytes not yet consumed
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Extract the next complete body, if available
    pub fn next_body(&mut self) -> Option<Result<Vec<u8>, ParseError>> {
        if self.buffer.len() < LENGTH_PREFIX_LEN {
            return None;
        }

        let len = u32::from_be_bytes([
            self.buffer[0],
            self.buffer[1],
            self.buffer[2],
            self.buffer[3],
        ]);
        if len > self.max_frame_len {
            tracing::debug!(len, max = self.max_frame_len, "Rejecting oversized frame");
            return Some(Err(ParseError::FrameTooLarge {
                len,
                max: self.max_frame_len,
            }));
        }

        let total = LENGTH_PREFIX_LEN + len as usize;
        if self.buffer.len() < total {
            return None;
        }

        let body = self.buffer[LENGTH_PREFIX_LEN..total].to_vec();
        self.buffer.drain(..total);
        tracing::trace!(len, remaining = self.buffer.len(), "Extracted frame body");
        Some(Ok(body))
    }

    /// Extract the next complete inbound frame, if available
    pub fn next_frame(&mut self) -> Option<Result<Frame, ParseError>> {
        self.next_body()
            .map(|body| body.and_then(|b| Frame::decode_body(&b)))
    }

    /// Extract the next complete outbound command, if available
    pub fn next_command(&mut self) -> Option<Result<Command, ParseError>> {
        self.next_body()
            .map(|body| body.and_then(|b| Command::decode_body(&b)))
    }

    /// Clear the internal buffer
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}
