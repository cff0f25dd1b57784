//! Slot event stream
//!
//! Each slot publishes its lifecycle and traffic through a broadcast channel.
//! Observers (loggers, monitors, tests) subscribe independently; publishing
//! never blocks the reader task, and a lagging observer only loses events.

use ril_protocol::{FrameKind, RequestId, Status, Token};

use crate::slot::SlotId;

/// Unified event enum for slot activity
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotEvent {
    // -------------------------------------------------------------------------
    // Lifecycle events
    // -------------------------------------------------------------------------
    /// The slot's reader task started
    Connected {
        /// Slot
        slot: SlotId,
    },

    /// The slot's transport closed; all pending requests were drained
    Disconnected {
        /// Slot
        slot: SlotId,
        /// Why the transport closed
        reason: String,
        /// Number of pending requests completed with an error
        drained: usize,
    },

    /// A new callback set was installed
    CallbacksRegistered {
        /// Slot
        slot: SlotId,
        /// Vendor version string
        version: String,
    },

    // -------------------------------------------------------------------------
    // Traffic events
    // -------------------------------------------------------------------------
    /// A command was written to the transport
    CommandSent {
        /// Slot
        slot: SlotId,
        /// Token
        token: Token,
        /// Request number
        request: RequestId,
        /// Encoded payload length
        len: usize,
    },

    /// A frame was read from the transport
    FrameReceived {
        /// Slot
        slot: SlotId,
        /// Frame class
        kind: FrameKind,
        /// Token (zero for indications)
        token: Token,
        /// Request or indication number
        id: u32,
        /// Status field
        status: Status,
        /// Payload length
        len: usize,
    },

    /// An acknowledgment was written to the transport
    AckSent {
        /// Slot
        slot: SlotId,
        /// Acknowledged token, or indication number for indications
        token: Token,
    },

    // -------------------------------------------------------------------------
    // Protocol events
    // -------------------------------------------------------------------------
    /// The peer acknowledged receipt of a pending command
    RequestAcknowledged {
        /// Slot
        slot: SlotId,
        /// Token
        token: Token,
    },

    /// A solicited frame matched no pending request
    UnmatchedToken {
        /// Slot
        slot: SlotId,
        /// Token
        token: Token,
        /// Frame class
        kind: FrameKind,
    },

    /// An ack-expected frame arrived for a token that was already acknowledged
    DuplicateAck {
        /// Slot
        slot: SlotId,
        /// Token
        token: Token,
    },
}

impl SlotEvent {
    /// Slot this event belongs to
    pub fn slot(&self) -> SlotId {
        match self {
            SlotEvent::Connected { slot }
            | SlotEvent::Disconnected { slot, .. }
            | SlotEvent::CallbacksRegistered { slot, .. }
            | SlotEvent::CommandSent { slot, .. }
            | SlotEvent::FrameReceived { slot, .. }
            | SlotEvent::AckSent { slot, .. }
            | SlotEvent::RequestAcknowledged { slot, .. }
            | SlotEvent::UnmatchedToken { slot, .. }
            | SlotEvent::DuplicateAck { slot, .. } => *slot,
        }
    }

    /// Check if this is a traffic event (for traffic monitor filtering)
    pub fn is_traffic(&self) -> bool {
        matches!(
            self,
            SlotEvent::CommandSent { .. }
                | SlotEvent::FrameReceived { .. }
                | SlotEvent::AckSent { .. }
        )
    }

    /// Check if this is a protocol anomaly worth surfacing
    pub fn is_anomaly(&self) -> bool {
        matches!(
            self,
            SlotEvent::UnmatchedToken { .. } | SlotEvent::DuplicateAck { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_classification() {
        let sent = SlotEvent::CommandSent {
            slot: SlotId(0),
            token: Token(1),
            request: RequestId(4),
            len: 0,
        };
        assert!(sent.is_traffic());
        assert!(!sent.is_anomaly());

        let unmatched = SlotEvent::UnmatchedToken {
            slot: SlotId(1),
            token: Token(9),
            kind: FrameKind::Solicited,
        };
        assert!(!unmatched.is_traffic());
        assert!(unmatched.is_anomaly());
        assert_eq!(unmatched.slot(), SlotId(1));
    }
}
