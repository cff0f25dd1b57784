//! Error types for the multiplexer

use ril_protocol::{CodecError, ParseError, RequestId, Status, Token};
use thiserror::Error;

use crate::slot::SlotId;

/// Errors that can occur in the multiplexer
#[derive(Debug, Error)]
pub enum MuxError {
    /// Transport channel closed or broken
    #[error("transport channel closed")]
    TransportClosed,

    /// Slot was shut down locally
    #[error("slot shut down")]
    ShutDown,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Inbound bytes could not be framed
    #[error("framing error: {0}")]
    Framing(#[from] ParseError),

    /// Outbound frame exceeds the configured limit
    #[error("frame too large: {len} bytes (limit {max})")]
    FrameTooLarge {
        /// Body length that was attempted
        len: usize,
        /// Configured limit
        max: u32,
    },

    /// No dispatch entry for this request number
    #[error("unknown request: {0}")]
    UnknownRequest(RequestId),

    /// Vendor reports the request as unsupported
    #[error("request not supported: {0}")]
    Unsupported(RequestId),

    /// Request payload could not be encoded
    #[error("failed to encode {request}: {source}")]
    Encode {
        /// Request being encoded
        request: RequestId,
        /// Codec failure
        #[source]
        source: CodecError,
    },

    /// Response payload could not be decoded
    #[error("failed to decode response: {0}")]
    Decode(CodecError),

    /// Caller-chosen token is already pending on this slot
    #[error("token {0} is already pending")]
    DuplicateToken(Token),

    /// Vendor refused a local request
    #[error("{request} rejected: {status}")]
    Rejected {
        /// Request that was refused
        request: RequestId,
        /// Status returned by the vendor
        status: Status,
    },

    /// No response within the configured timeout
    #[error("request timed out after {0}ms")]
    Timeout(u64),

    /// Completion sink was dropped without a response
    #[error("response for token {0} was dropped")]
    ResponseDropped(Token),

    /// Slot not configured
    #[error("slot not found: {0}")]
    SlotNotFound(SlotId),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// Serial port could not be opened
    #[error("serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),
}

impl MuxError {
    /// Whether this error means the slot's transport is gone
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::TransportClosed | Self::ShutDown)
    }
}
