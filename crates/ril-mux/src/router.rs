//! Inbound frame routing
//!
//! The router runs on a slot's reader task and handles each frame to
//! completion before the next is read, so acknowledgments, completions and
//! indication deliveries happen in arrival order.
//!
//! ```text
//! classify ─┬─ SolicitedAck ────────────────────────── mark peer ack
//!           ├─ Solicited ────────────────────────────┐
//!           ├─ SolicitedAckExpected ──── ack(token) ──┴─ complete(token) → decode → sink
//!           ├─ Unsolicited ──────────────────────────┐
//!           └─ UnsolicitedAckExpected ── ack(id) ─────┴─ decode → indication listener
//! ```

use std::sync::Arc;

use parking_lot::Mutex;
use ril_protocol::{Command, Frame, FrameKind, Payload, RequestId, Status, Token};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::dispatch::{CallbackCell, DispatchTable};
use crate::error::MuxError;
use crate::events::SlotEvent;
use crate::registry::{AckDecision, Completion, Origin, PendingCompletion, PendingRegistry};
use crate::response::{Indication, Response};
use crate::slot::SlotId;
use crate::transport::TransportWriter;

/// Routing path chosen for an inbound frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Solicited response, resolve directly
    SolicitedNoAck,
    /// Solicited response, acknowledge then resolve
    SolicitedAckExpected,
    /// Peer acknowledged receipt of a command
    PeerAck,
    /// Indication, deliver directly
    UnsolicitedNoAck,
    /// Indication, acknowledge then deliver
    UnsolicitedAckExpected,
}

/// Map a frame kind to its routing path
pub fn classify(kind: FrameKind) -> Route {
    match kind {
        FrameKind::Solicited => Route::SolicitedNoAck,
        FrameKind::SolicitedAckExpected => Route::SolicitedAckExpected,
        FrameKind::SolicitedAck => Route::PeerAck,
        FrameKind::Unsolicited => Route::UnsolicitedNoAck,
        FrameKind::UnsolicitedAckExpected => Route::UnsolicitedAckExpected,
    }
}

/// Slot-scoped indication listener
#[derive(Debug, Default)]
pub struct IndicationListener {
    tx: Mutex<Option<mpsc::UnboundedSender<Indication>>>,
}

impl IndicationListener {
    /// Install a listener, replacing any previous one
    pub fn set(&self, tx: mpsc::UnboundedSender<Indication>) {
        *self.tx.lock() = Some(tx);
    }

    /// Remove the listener
    pub fn clear(&self) {
        *self.tx.lock() = None;
    }

    fn deliver(&self, indication: Indication) -> bool {
        let mut guard = self.tx.lock();
        match guard.as_ref() {
            Some(tx) => {
                if tx.send(indication).is_err() {
                    debug!("Indication listener went away");
                    *guard = None;
                    false
                } else {
                    true
                }
            }
            None => false,
        }
    }
}

/// Decode a solicited payload and build the caller's response
///
/// A failing status with an empty payload carries no result body, so it
/// resolves to [`Payload::Void`] rather than a decode error.
pub(crate) fn build_response(
    slot: SlotId,
    table: &DispatchTable,
    pending: &PendingCompletion,
    decode_as: RequestId,
    status: Status,
    payload: &[u8],
) -> Response {
    let result = match table.response_decoder(decode_as) {
        None => {
            warn!(%slot, token = %pending.token, request = %decode_as, "No decoder registered for response");
            return pending.response(
                slot,
                Status::REQUEST_NOT_SUPPORTED,
                Err(MuxError::UnknownRequest(decode_as)),
            );
        }
        Some(_) if !status.is_success() && payload.is_empty() => Ok(Payload::Void),
        Some(decoder) => decoder.decode(decode_as.0, payload).map_err(|e| {
            warn!(%slot, token = %pending.token, request = %decode_as, "Response decode failed: {}", e);
            MuxError::Decode(e)
        }),
    };
    pending.response(slot, status, result)
}

/// Per-slot inbound frame router
pub struct Router {
    slot: SlotId,
    registry: Arc<PendingRegistry>,
    callbacks: Arc<CallbackCell>,
    writer: Arc<TransportWriter>,
    indications: Arc<IndicationListener>,
    events: broadcast::Sender<SlotEvent>,
}

impl Router {
    /// Create a router over a slot's shared components
    pub fn new(
        slot: SlotId,
        registry: Arc<PendingRegistry>,
        callbacks: Arc<CallbackCell>,
        writer: Arc<TransportWriter>,
        indications: Arc<IndicationListener>,
        events: broadcast::Sender<SlotEvent>,
    ) -> Self {
        Self {
            slot,
            registry,
            callbacks,
            writer,
            indications,
            events,
        }
    }

    /// Process one inbound frame to completion
    pub async fn route(&self, frame: Frame) {
        let _ = self.events.send(SlotEvent::FrameReceived {
            slot: self.slot,
            kind: frame.kind,
            token: frame.token,
            id: frame.id,
            status: frame.status,
            len: frame.payload.len(),
        });

        match classify(frame.kind) {
            Route::SolicitedNoAck => self.resolve_solicited(frame),
            Route::SolicitedAckExpected => {
                self.acknowledge_response(frame.token).await;
                self.resolve_solicited(frame);
            }
            Route::PeerAck => self.on_peer_ack(frame.token),
            Route::UnsolicitedNoAck => self.resolve_indication(frame),
            Route::UnsolicitedAckExpected => {
                self.send_ack(Command::ack_indication(frame.indication_id()))
                    .await;
                self.resolve_indication(frame);
            }
        }
    }

    async fn acknowledge_response(&self, token: Token) {
        match self.registry.begin_ack(token) {
            AckDecision::Send => self.send_ack(Command::ack(token)).await,
            AckDecision::Unknown => {
                debug!(slot = %self.slot, %token, "Acknowledging response for unknown token");
                self.send_ack(Command::ack(token)).await;
            }
            AckDecision::Duplicate => {
                warn!(slot = %self.slot, %token, "Ack-expected frame for already acknowledged token, not acking again");
                let _ = self.events.send(SlotEvent::DuplicateAck {
                    slot: self.slot,
                    token,
                });
            }
        }
    }

    async fn send_ack(&self, ack: Command) {
        let token = ack.token;
        match self.writer.send_command(&ack).await {
            Ok(()) => {
                debug!(slot = %self.slot, %token, "Sent acknowledgment");
                let _ = self.events.send(SlotEvent::AckSent {
                    slot: self.slot,
                    token,
                });
            }
            Err(e) => {
                warn!(slot = %self.slot, %token, "Failed to send acknowledgment: {}", e);
            }
        }
    }

    fn on_peer_ack(&self, token: Token) {
        if self.registry.mark_peer_ack(token) {
            debug!(slot = %self.slot, %token, "Peer acknowledged command");
            let _ = self.events.send(SlotEvent::RequestAcknowledged {
                slot: self.slot,
                token,
            });
        } else {
            warn!(slot = %self.slot, %token, "Peer ack for unknown token");
            let _ = self.events.send(SlotEvent::UnmatchedToken {
                slot: self.slot,
                token,
                kind: FrameKind::SolicitedAck,
            });
        }
    }

    fn resolve_solicited(&self, frame: Frame) {
        let pending = match self.registry.complete(frame.token, Origin::Remote) {
            Completion::Pending(pending) => pending,
            Completion::Cancelled { request } => {
                debug!(slot = %self.slot, token = %frame.token, %request, "Discarding response for cancelled request");
                return;
            }
            Completion::Unmatched => {
                warn!(
                    slot = %self.slot,
                    token = %frame.token,
                    request = %frame.request_id(),
                    "Response matches no pending request"
                );
                let _ = self.events.send(SlotEvent::UnmatchedToken {
                    slot: self.slot,
                    token: frame.token,
                    kind: frame.kind,
                });
                return;
            }
        };

        if pending.request != frame.request_id() {
            warn!(
                slot = %self.slot,
                token = %frame.token,
                expected = %pending.request,
                actual = %frame.request_id(),
                "Response request number differs from submission"
            );
        }

        let callbacks = self.callbacks.load();
        let response = build_response(
            self.slot,
            &callbacks.table,
            &pending,
            frame.request_id(),
            frame.status,
            &frame.payload,
        );
        info!(
            slot = %self.slot,
            token = %pending.token,
            request = %pending.request,
            status = %response.status,
            elapsed_ms = pending.submitted_at.elapsed().as_millis() as u64,
            "Request completed"
        );
        pending.deliver(response);
    }

    fn resolve_indication(&self, frame: Frame) {
        let id = frame.indication_id();
        let callbacks = self.callbacks.load();
        let Some(decoder) = callbacks.table.indication_decoder(id) else {
            warn!(slot = %self.slot, indication = %id, "No decoder registered for indication, dropping");
            return;
        };

        let result = decoder.decode(id.0, &frame.payload);
        if let Err(e) = &result {
            warn!(slot = %self.slot, indication = %id, "Indication decode failed: {}", e);
        }

        let delivered = self.indications.deliver(Indication {
            slot: self.slot,
            id,
            result,
        });
        if delivered {
            debug!(slot = %self.slot, indication = %id, "Delivered indication");
        } else {
            debug!(slot = %self.slot, indication = %id, "No indication listener, dropping");
        }
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("slot", &self.slot)
            .finish_non_exhaustive()
    }
}
