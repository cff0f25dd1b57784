//! Radio Interface Layer Protocol Library
//!
//! This crate provides the wire layer shared by the multiplexer core and any
//! peer that speaks to it:
//!
//! - **Identifiers**: request numbers, indication numbers and correlation tokens
//! - **Status codes**: the 32-bit error/status field carried by every response
//! - **Framing**: length-prefixed frames with a streaming parser that handles
//!   partial data
//! - **Payload shapes**: the generic void/int/ints/string/strings/raw payloads
//!   most request types use
//!
//! # Frame Direction
//!
//! The same length-prefixed envelope is used in both directions, with a
//! different body layout per direction:
//!
//! - Framework → modem: [`Command`] (`request | token | payload`)
//! - Modem → framework: [`Frame`] (`kind | token | id | status | payload`)
//!
//! # Example
//!
//! ```rust
//! use ril_protocol::{Frame, FrameCodec, FrameKind, Status, Token, RequestId};
//!
//! let frame = Frame::solicited(FrameKind::Solicited, Token(7), RequestId(4), Status::SUCCESS, vec![1, 2]);
//! let bytes = frame.encode();
//!
//! let mut codec = FrameCodec::new();
//! codec.push_bytes(&bytes);
//! let parsed = codec.next_frame().unwrap().unwrap();
//! assert_eq!(parsed, frame);
//! ```

pub mod error;
pub mod frame;
pub mod marshal;

use std::fmt;
use std::sync::Arc;

pub use error::{CodecError, ParseError};
pub use frame::{
    Command, Frame, FrameCodec, FrameKind, COMMAND_HEADER_LEN, DEFAULT_MAX_FRAME_LEN,
    FRAME_HEADER_LEN, LENGTH_PREFIX_LEN,
};
pub use marshal::{Payload, Shape, ShapeCodec};

/// Reserved request number used for acknowledgment commands
pub const RESPONSE_ACKNOWLEDGEMENT: u32 = 800;

/// First indication number; everything below is a request number
pub const UNSOL_RESPONSE_BASE: u32 = 1000;

/// Correlation token linking a solicited command to its response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Token(pub u32);

impl Token {
    /// Get the raw token value
    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}", self.0)
    }
}

/// Numeric identifier of a solicited request type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RequestId(pub u32);

impl RequestId {
    /// Acknowledgment pseudo-request
    pub const ACKNOWLEDGEMENT: RequestId = RequestId(RESPONSE_ACKNOWLEDGEMENT);

    /// Whether this is the acknowledgment pseudo-request
    pub fn is_ack(&self) -> bool {
        self.0 == RESPONSE_ACKNOWLEDGEMENT
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "REQ#{}", self.0)
    }
}

/// Numeric identifier of an unsolicited indication
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IndicationId(pub u32);

impl fmt::Display for IndicationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UNSOL#{}", self.0)
    }
}

/// Status code carried by every response frame
///
/// Unknown values are preserved as-is so that newer modems can report codes
/// this crate does not name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Status(pub i32);

impl Status {
    pub const SUCCESS: Status = Status(0);
    /// Radio did not start or is resetting
    pub const RADIO_NOT_AVAILABLE: Status = Status(1);
    pub const GENERIC_FAILURE: Status = Status(2);
    pub const PASSWORD_INCORRECT: Status = Status(3);
    pub const SIM_PIN2: Status = Status(4);
    pub const SIM_PUK2: Status = Status(5);
    pub const REQUEST_NOT_SUPPORTED: Status = Status(6);
    pub const CANCELLED: Status = Status(7);
    pub const OP_NOT_ALLOWED_DURING_VOICE_CALL: Status = Status(8);
    pub const OP_NOT_ALLOWED_BEFORE_REG_TO_NW: Status = Status(9);
    pub const SMS_SEND_FAIL_RETRY: Status = Status(10);

    /// Whether this status reports success
    pub fn is_success(&self) -> bool {
        *self == Self::SUCCESS
    }

    /// Returns a human-readable name for known status codes
    pub fn name(&self) -> &'static str {
        match self.0 {
            0 => "SUCCESS",
            1 => "RADIO_NOT_AVAILABLE",
            2 => "GENERIC_FAILURE",
            3 => "PASSWORD_INCORRECT",
            4 => "SIM_PIN2",
            5 => "SIM_PUK2",
            6 => "REQUEST_NOT_SUPPORTED",
            7 => "CANCELLED",
            8 => "OP_NOT_ALLOWED_DURING_VOICE_CALL",
            9 => "OP_NOT_ALLOWED_BEFORE_REG_TO_NW",
            10 => "SMS_SEND_FAIL_RETRY",
            _ => "UNKNOWN",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.0)
    }
}

/// Radio power/SIM state reported by the vendor's initial-state query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RadioState {
    /// Radio explicitly powered off
    Off,
    /// Radio unavailable (resetting or not booted)
    #[default]
    Unavailable,
    /// Radio is on, but the SIM interface is not ready
    SimNotReady,
    /// SIM PIN locked, PUK required, or SIM absent
    SimLockedOrAbsent,
    /// Radio is on and the SIM interface is available
    SimReady,
}

impl RadioState {
    /// Wire value of this state
    pub fn as_i32(&self) -> i32 {
        match self {
            Self::Off => 0,
            Self::Unavailable => 1,
            Self::SimNotReady => 2,
            Self::SimLockedOrAbsent => 3,
            Self::SimReady => 4,
        }
    }

    /// Parse a wire value
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::Off),
            1 => Some(Self::Unavailable),
            2 => Some(Self::SimNotReady),
            3 => Some(Self::SimLockedOrAbsent),
            4 => Some(Self::SimReady),
            _ => None,
        }
    }
}

/// Encodes a native request payload into command body bytes
///
/// Implementations are looked up by request number; the core never inspects
/// the bytes they produce.
pub trait RequestEncoder: Send + Sync {
    /// Encode `payload` for request `request`
    fn encode(&self, request: RequestId, payload: &Payload) -> Result<Vec<u8>, CodecError>;
}

/// Decodes response or indication payload bytes into a native value
pub trait ResponseDecoder: Send + Sync {
    /// Decode `bytes` received for identifier `id`
    ///
    /// `id` is the request number for solicited responses and the indication
    /// number for indications.
    fn decode(&self, id: u32, bytes: &[u8]) -> Result<Payload, CodecError>;
}

impl<T: RequestEncoder + ?Sized> RequestEncoder for Arc<T> {
    fn encode(&self, request: RequestId, payload: &Payload) -> Result<Vec<u8>, CodecError> {
        (**self).encode(request, payload)
    }
}

impl<T: ResponseDecoder + ?Sized> ResponseDecoder for Arc<T> {
    fn decode(&self, id: u32, bytes: &[u8]) -> Result<Payload, CodecError> {
        (**self).decode(id, bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_names() {
        assert_eq!(Status::SUCCESS.name(), "SUCCESS");
        assert_eq!(Status::REQUEST_NOT_SUPPORTED.name(), "REQUEST_NOT_SUPPORTED");
        assert_eq!(Status(4242).name(), "UNKNOWN");
        assert_eq!(Status(4242).to_string(), "UNKNOWN(4242)");
        assert!(Status::SUCCESS.is_success());
        assert!(!Status::CANCELLED.is_success());
    }

    #[test]
    fn test_radio_state_wire_values() {
        for state in [
            RadioState::Off,
            RadioState::Unavailable,
            RadioState::SimNotReady,
            RadioState::SimLockedOrAbsent,
            RadioState::SimReady,
        ] {
            assert_eq!(RadioState::from_i32(state.as_i32()), Some(state));
        }
        assert_eq!(RadioState::from_i32(9), None);
    }

    #[test]
    fn test_ack_request_id() {
        assert!(RequestId::ACKNOWLEDGEMENT.is_ack());
        assert!(!RequestId(4).is_ack());
    }
}
