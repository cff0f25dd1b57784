//! Values handed back to callers and indication listeners

use ril_protocol::{CodecError, IndicationId, Payload, RequestId, Status, Token};
use tokio::sync::oneshot;

use crate::error::MuxError;
use crate::slot::SlotId;

/// Where a solicited request's result is delivered
///
/// Completion happens on the slot's reader task, so results travel through a
/// channel rather than a return value.
pub type CompletionSink = oneshot::Sender<Response>;

/// Result of one solicited request
#[derive(Debug)]
pub struct Response {
    /// Slot the request was issued on
    pub slot: SlotId,
    /// Token the request was issued with
    pub token: Token,
    /// Request number
    pub request: RequestId,
    /// Status reported by the peer, or a synthesized status for local failures
    pub status: Status,
    /// Decoded payload, or why there is none
    pub result: Result<Payload, MuxError>,
}

impl Response {
    /// Whether the request succeeded and its payload decoded
    pub fn is_success(&self) -> bool {
        self.status.is_success() && self.result.is_ok()
    }

    /// Take the decoded payload, discarding the status
    pub fn into_payload(self) -> Result<Payload, MuxError> {
        self.result
    }
}

/// One resolved unsolicited indication
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Indication {
    /// Slot the indication arrived on
    pub slot: SlotId,
    /// Indication number
    pub id: IndicationId,
    /// Decoded payload or the decoder's failure
    pub result: Result<Payload, CodecError>,
}
