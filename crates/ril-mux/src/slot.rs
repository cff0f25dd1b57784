//! Per-slot manager
//!
//! A [`SlotManager`] owns one slot's transport channel, pending request
//! registry and callback cell, and runs the background reader task that
//! feeds inbound frames to the [`Router`]. The reader task is the only
//! reader of the channel; any task may submit or cancel requests.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use ril_protocol::{Command, Payload, RadioState, RequestId, Status, Token};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{SlotConfig, SlotOptions};
use crate::dispatch::{CallbackCell, CallbackSet};
use crate::error::MuxError;
use crate::events::SlotEvent;
use crate::registry::{Completion, DrainReason, Origin, PendingRegistry};
use crate::response::{CompletionSink, Indication, Response};
use crate::router::{build_response, IndicationListener, Router};
use crate::transport::{self, ChannelIo, TransportReader, TransportWriter};

/// Identifier of a logical radio slot (SIM/modem instance)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SlotId(pub u8);

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// State shared between a slot's manager, its reader task and local completers
struct SlotShared {
    slot: SlotId,
    options: SlotOptions,
    registry: Arc<PendingRegistry>,
    callbacks: Arc<CallbackCell>,
    writer: Arc<TransportWriter>,
    indications: Arc<IndicationListener>,
    events: broadcast::Sender<SlotEvent>,
    closing: AtomicBool,
    closed_tx: watch::Sender<bool>,
}

impl SlotShared {
    fn router(&self) -> Router {
        Router::new(
            self.slot,
            self.registry.clone(),
            self.callbacks.clone(),
            self.writer.clone(),
            self.indications.clone(),
            self.events.clone(),
        )
    }

    /// Drain the registry and mark the slot closed; runs once
    ///
    /// Pending requests are resolved before the writer is touched, so a send
    /// stalled on the transport cannot hold up their completion.
    async fn close(&self, reason: DrainReason, why: String) {
        if self.mark_closed(reason, why) {
            self.writer.close().await;
        }
    }

    /// Synchronous part of [`close`](Self::close); returns `false` if the slot
    /// was already closed
    fn mark_closed(&self, reason: DrainReason, why: String) -> bool {
        if self.closing.swap(true, Ordering::SeqCst) {
            return false;
        }

        let drained = self.registry.drain_all(reason);
        self.writer.abort();
        info!(slot = %self.slot, drained, "Slot closed: {}", why);
        let _ = self.events.send(SlotEvent::Disconnected {
            slot: self.slot,
            reason: why,
            drained,
        });
        self.closed_tx.send_replace(true);
        true
    }

    fn complete_local(&self, token: Token, status: Status, payload: &[u8]) -> bool {
        match self.registry.complete(token, Origin::Local) {
            Completion::Pending(pending) => {
                let callbacks = self.callbacks.load();
                let response = build_response(
                    self.slot,
                    &callbacks.table,
                    &pending,
                    pending.request,
                    status,
                    payload,
                );
                debug!(slot = %self.slot, %token, request = %pending.request, %status, "Local request completed");
                pending.deliver(response);
                true
            }
            Completion::Cancelled { request } => {
                debug!(slot = %self.slot, %token, %request, "Discarding local completion for cancelled request");
                true
            }
            Completion::Unmatched => {
                warn!(slot = %self.slot, %token, "Local completion matches no local request");
                false
            }
        }
    }
}

/// Handle a vendor uses to complete local requests
#[derive(Clone)]
pub struct LocalCompleter {
    shared: Arc<SlotShared>,
}

impl LocalCompleter {
    /// Complete a local request
    ///
    /// Returns `false` if `token` is not a pending local request.
    pub fn complete(&self, token: Token, status: Status, payload: &[u8]) -> bool {
        self.shared.complete_local(token, status, payload)
    }

    /// Slot this completer belongs to
    pub fn slot(&self) -> SlotId {
        self.shared.slot
    }
}

impl fmt::Debug for LocalCompleter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalCompleter")
            .field("slot", &self.shared.slot)
            .finish()
    }
}

/// Manager for one radio slot
pub struct SlotManager {
    shared: Arc<SlotShared>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl SlotManager {
    /// Start managing a connected byte stream
    ///
    /// Spawns the reader task; must be called from within a tokio runtime.
    pub fn spawn<T: ChannelIo>(slot: SlotId, io: T, options: SlotOptions) -> Self {
        let (reader, writer) = transport::split(slot, io, options.max_frame_len);
        let (events, _) = broadcast::channel(options.event_capacity.max(1));
        let (closed_tx, _) = watch::channel(false);

        let shared = Arc::new(SlotShared {
            slot,
            registry: Arc::new(PendingRegistry::new(slot, options.ack_history)),
            callbacks: Arc::new(CallbackCell::default()),
            writer: Arc::new(writer),
            indications: Arc::new(IndicationListener::default()),
            events,
            closing: AtomicBool::new(false),
            closed_tx,
            options,
        });

        info!(%slot, "Slot started");
        let _ = shared.events.send(SlotEvent::Connected { slot });
        let handle = tokio::spawn(run_reader(shared.clone(), reader));

        Self {
            shared,
            reader: Mutex::new(Some(handle)),
        }
    }

    /// Connect to a configured endpoint and start managing it
    pub async fn connect(config: &SlotConfig, options: SlotOptions) -> Result<Self, MuxError> {
        let io = transport::connect(&config.endpoint).await?;
        info!(slot = %config.slot, endpoint = %config.endpoint, "Connected");
        Ok(Self::spawn(config.slot, io, options))
    }

    /// Slot identifier
    pub fn slot(&self) -> SlotId {
        self.shared.slot
    }

    /// Runtime options
    pub fn options(&self) -> &SlotOptions {
        &self.shared.options
    }

    /// Install a new callback set, replacing the previous one as a unit
    pub fn register_callbacks(&self, callbacks: CallbackSet) {
        let version = callbacks.vendor.version();
        let state = callbacks.vendor.on_state_request();
        info!(
            slot = %self.shared.slot,
            version = %version,
            requests = callbacks.table.request_count(),
            indications = callbacks.table.indication_count(),
            state = ?state,
            "Registered callbacks"
        );
        self.shared.callbacks.replace(callbacks);
        let _ = self.shared.events.send(SlotEvent::CallbacksRegistered {
            slot: self.shared.slot,
            version,
        });
    }

    /// Snapshot of the active callback set
    pub fn callbacks(&self) -> Arc<CallbackSet> {
        self.shared.callbacks.load()
    }

    /// Deliver resolved indications to `tx`, replacing any previous listener
    pub fn set_indication_listener(&self, tx: mpsc::UnboundedSender<Indication>) {
        self.shared.indications.set(tx);
    }

    /// Subscribe to slot events
    pub fn subscribe(&self) -> broadcast::Receiver<SlotEvent> {
        self.shared.events.subscribe()
    }

    /// Submit a request under a freshly allocated token
    ///
    /// Nothing is written if the vendor does not support `request`, no
    /// encoder is registered for it, or encoding fails. The result arrives
    /// later through `sink`.
    pub async fn submit_request(
        &self,
        request: RequestId,
        payload: &Payload,
        sink: CompletionSink,
    ) -> Result<Token, MuxError> {
        let body = self.encode(request, payload)?;
        let token = self.shared.registry.submit(request, sink, false)?;
        self.dispatch(token, request, body).await?;
        Ok(token)
    }

    /// Submit a request under a caller-chosen token
    pub async fn submit_request_with_token(
        &self,
        token: Token,
        request: RequestId,
        payload: &Payload,
        sink: CompletionSink,
    ) -> Result<(), MuxError> {
        let body = self.encode(request, payload)?;
        self.shared
            .registry
            .submit_with_token(token, request, sink, false)?;
        self.dispatch(token, request, body).await
    }

    /// Submit a request and wait for its response
    ///
    /// Applies the configured request timeout; on expiry the request is
    /// cancelled and [`MuxError::Timeout`] is returned.
    pub async fn call(&self, request: RequestId, payload: &Payload) -> Result<Response, MuxError> {
        let (tx, rx) = oneshot::channel();
        let token = self.submit_request(request, payload, tx).await?;

        let received = match self.shared.options.request_timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(received) => received,
                Err(_) => {
                    warn!(slot = %self.shared.slot, %token, %request, "Request timed out");
                    self.cancel_request(token);
                    return Err(MuxError::Timeout(limit.as_millis() as u64));
                }
            },
            None => rx.await,
        };
        received.map_err(|_| MuxError::ResponseDropped(token))
    }

    /// Submit a request the vendor serves in-process
    ///
    /// The response is never written to the transport; the vendor reports it
    /// through [`complete_local`](Self::complete_local) or a
    /// [`LocalCompleter`].
    pub fn submit_local_request(
        &self,
        request: RequestId,
        data: &[u8],
        sink: CompletionSink,
    ) -> Result<Token, MuxError> {
        let callbacks = self.shared.callbacks.load();
        if !callbacks.vendor.supports(request) {
            return Err(MuxError::Unsupported(request));
        }

        let token = self.shared.registry.submit(request, sink, true)?;
        if let Err(status) = callbacks.vendor.on_request(request, token, data) {
            self.shared.registry.rollback(token);
            warn!(slot = %self.shared.slot, %token, %request, %status, "Vendor refused local request");
            return Err(MuxError::Rejected { request, status });
        }

        debug!(slot = %self.shared.slot, %token, %request, "Local request accepted");
        Ok(token)
    }

    /// Complete a local request
    pub fn complete_local(&self, token: Token, status: Status, payload: &[u8]) -> bool {
        self.shared.complete_local(token, status, payload)
    }

    /// Handle for completing local requests from vendor code
    pub fn local_completer(&self) -> LocalCompleter {
        LocalCompleter {
            shared: self.shared.clone(),
        }
    }

    /// Withdraw interest in a pending request
    ///
    /// The entry stays registered until its response arrives, which is then
    /// acknowledged if required and discarded. Returns `false` if `token` is
    /// not pending.
    pub fn cancel_request(&self, token: Token) -> bool {
        if !self.shared.registry.cancel(token) {
            debug!(slot = %self.shared.slot, %token, "Cancel for token that is not pending");
            return false;
        }

        info!(slot = %self.shared.slot, %token, "Request cancelled");
        self.shared.callbacks.load().vendor.on_cancel(token);
        true
    }

    /// Radio state reported by the registered vendor
    pub fn radio_state(&self) -> RadioState {
        self.shared.callbacks.load().vendor.on_state_request()
    }

    /// Version string of the registered vendor
    pub fn vendor_version(&self) -> String {
        self.shared.callbacks.load().vendor.version()
    }

    /// Number of requests awaiting a response
    pub fn pending_count(&self) -> usize {
        self.shared.registry.len()
    }

    /// Whether the slot has closed
    pub fn is_closed(&self) -> bool {
        *self.shared.closed_tx.borrow()
    }

    /// Wait until the slot closes
    pub async fn closed(&self) {
        let mut rx = self.shared.closed_tx.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Stop the reader, fail every pending request and close the channel
    pub async fn shutdown(&self) {
        if let Some(handle) = self.reader.lock().take() {
            handle.abort();
        }
        self.shared
            .close(DrainReason::Shutdown, "shut down locally".to_string())
            .await;
    }

    fn encode(&self, request: RequestId, payload: &Payload) -> Result<Vec<u8>, MuxError> {
        let callbacks = self.shared.callbacks.load();
        if !callbacks.vendor.supports(request) {
            debug!(slot = %self.shared.slot, %request, "Vendor does not support request");
            return Err(MuxError::Unsupported(request));
        }

        let encoder = callbacks
            .table
            .request_encoder(request)
            .ok_or(MuxError::UnknownRequest(request))?;
        encoder
            .encode(request, payload)
            .map_err(|source| MuxError::Encode { request, source })
    }

    async fn dispatch(&self, token: Token, request: RequestId, body: Vec<u8>) -> Result<(), MuxError> {
        let len = body.len();
        let command = Command::new(request, token, body);
        if let Err(e) = self.shared.writer.send_command(&command).await {
            self.shared.registry.rollback(token);
            warn!(slot = %self.shared.slot, %token, %request, "Failed to send command: {}", e);
            return Err(e);
        }

        debug!(slot = %self.shared.slot, %token, %request, len, "Command sent");
        let _ = self.shared.events.send(SlotEvent::CommandSent {
            slot: self.shared.slot,
            token,
            request,
            len,
        });
        Ok(())
    }
}

impl Drop for SlotManager {
    fn drop(&mut self) {
        if let Some(handle) = self.reader.get_mut().take() {
            handle.abort();
        }
        self.shared
            .mark_closed(DrainReason::Shutdown, "manager dropped".to_string());
    }
}

impl fmt::Debug for SlotManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotManager")
            .field("slot", &self.shared.slot)
            .field("pending", &self.shared.registry.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

async fn run_reader(shared: Arc<SlotShared>, mut reader: TransportReader) {
    let router = shared.router();

    let reason = loop {
        match reader.receive().await {
            Ok(Some(frame)) => router.route(frame).await,
            Ok(None) => break "peer closed the channel".to_string(),
            Err(e) => {
                warn!(slot = %shared.slot, "Transport read failed: {}", e);
                break e.to_string();
            }
        }
    };

    shared.close(DrainReason::TransportClosed, reason).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::DispatchTable;
    use crate::vendor::RadioFunctions;
    use ril_protocol::{Frame, FrameCodec, FrameKind, Shape};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

    struct LocalVendor;

    impl RadioFunctions for LocalVendor {
        fn on_state_request(&self) -> RadioState {
            RadioState::SimReady
        }

        fn supports(&self, request: RequestId) -> bool {
            request != RequestId(13)
        }

        fn on_cancel(&self, _token: Token) {}

        fn version(&self) -> String {
            "local-vendor 1.0".to_string()
        }

        fn on_request(&self, request: RequestId, _token: Token, _data: &[u8]) -> Result<(), Status> {
            if request == RequestId(61) {
                Ok(())
            } else {
                Err(Status::GENERIC_FAILURE)
            }
        }
    }

    fn table() -> DispatchTable {
        DispatchTable::new()
            .with_shapes(RequestId(4), Shape::Void, Shape::Ints)
            .with_shapes(RequestId(13), Shape::Void, Shape::Void)
            .with_shapes(RequestId(61), Shape::Raw, Shape::String)
    }

    fn slot_with_vendor(options: SlotOptions) -> (SlotManager, DuplexStream) {
        let (ours, theirs) = tokio::io::duplex(4096);
        let slot = SlotManager::spawn(SlotId(0), ours, options);
        slot.register_callbacks(CallbackSet::new(table(), Arc::new(LocalVendor)));
        (slot, theirs)
    }

    async fn read_command(peer: &mut DuplexStream) -> Command {
        let mut codec = FrameCodec::new();
        let mut buf = [0u8; 64];
        loop {
            if let Some(command) = codec.next_command() {
                return command.unwrap();
            }
            let n = peer.read(&mut buf).await.unwrap();
            assert!(n > 0, "peer stream closed");
            codec.push_bytes(&buf[..n]);
        }
    }

    #[test]
    fn test_slot_id_display() {
        assert_eq!(SlotId(1).to_string(), "1");
    }

    #[tokio::test]
    async fn test_unsupported_request_not_sent() {
        let (slot, _peer) = slot_with_vendor(SlotOptions::default());
        let (tx, _rx) = oneshot::channel();
        let err = slot
            .submit_request(RequestId(13), &Payload::Void, tx)
            .await
            .unwrap_err();
        assert!(matches!(err, MuxError::Unsupported(RequestId(13))));
        assert_eq!(slot.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_encode_failure_rolls_back() {
        let (slot, _peer) = slot_with_vendor(SlotOptions::default());
        let (tx, _rx) = oneshot::channel();
        let err = slot
            .submit_request(RequestId(4), &Payload::Int(1), tx)
            .await
            .unwrap_err();
        assert!(matches!(err, MuxError::Encode { request: RequestId(4), .. }));
        assert_eq!(slot.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_call_round_trip() {
        let (slot, mut peer) = slot_with_vendor(SlotOptions::default());

        let responder = tokio::spawn(async move {
            let command = read_command(&mut peer).await;
            let payload = Shape::Ints.encode(&Payload::Ints(vec![1])).unwrap();
            let frame = Frame::solicited(
                FrameKind::Solicited,
                command.token,
                command.request,
                Status::SUCCESS,
                payload,
            );
            peer.write_all(&frame.encode()).await.unwrap();
            peer
        });

        let response = slot.call(RequestId(4), &Payload::Void).await.unwrap();
        assert_eq!(response.request, RequestId(4));
        assert_eq!(response.result.unwrap(), Payload::Ints(vec![1]));
        assert_eq!(slot.pending_count(), 0);
        drop(responder.await.unwrap());
    }

    #[tokio::test]
    async fn test_call_timeout_cancels() {
        let options = SlotOptions {
            request_timeout: Some(Duration::from_millis(20)),
            ..Default::default()
        };
        let (slot, _peer) = slot_with_vendor(options);

        let err = slot.call(RequestId(4), &Payload::Void).await.unwrap_err();
        assert!(matches!(err, MuxError::Timeout(20)));
        // Still registered, but cancelled
        assert_eq!(slot.pending_count(), 1);
        assert!(!slot.cancel_request(Token(1)));
    }

    #[tokio::test]
    async fn test_local_request_completes_without_transport() {
        let (slot, mut peer) = slot_with_vendor(SlotOptions::default());
        let (tx, rx) = oneshot::channel();

        let token = slot
            .submit_local_request(RequestId(61), b"AT+CSQ", tx)
            .unwrap();
        assert_eq!(slot.pending_count(), 1);

        let payload = Shape::String.encode(&Payload::string("+CSQ: 20,99")).unwrap();
        let completer = slot.local_completer();
        assert!(completer.complete(token, Status::SUCCESS, &payload));

        let response = rx.await.unwrap();
        assert_eq!(response.result.unwrap(), Payload::string("+CSQ: 20,99"));

        // Nothing was written to the peer
        let mut buf = [0u8; 1];
        let read = tokio::time::timeout(Duration::from_millis(20), peer.read(&mut buf)).await;
        assert!(read.is_err());
    }

    #[tokio::test]
    async fn test_local_completion_for_unknown_token() {
        let (slot, _peer) = slot_with_vendor(SlotOptions::default());
        let (tx, _rx) = oneshot::channel();
        let token = slot.submit_local_request(RequestId(61), &[], tx).unwrap();
        assert!(!slot.complete_local(Token(token.0 + 1), Status::SUCCESS, &[]));
        assert_eq!(slot.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_rejected_local_request() {
        let (slot, _peer) = slot_with_vendor(SlotOptions::default());
        let (tx, _rx) = oneshot::channel();
        let err = slot.submit_local_request(RequestId(4), &[], tx).unwrap_err();
        assert!(matches!(
            err,
            MuxError::Rejected {
                request: RequestId(4),
                status: Status::GENERIC_FAILURE
            }
        ));
        assert_eq!(slot.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_register_callbacks_replaces_vendor() {
        let (ours, _theirs) = tokio::io::duplex(64);
        let slot = SlotManager::spawn(SlotId(2), ours, SlotOptions::default());
        assert_eq!(slot.radio_state(), RadioState::Unavailable);

        let mut events = slot.subscribe();
        slot.register_callbacks(CallbackSet::new(table(), Arc::new(LocalVendor)));

        assert_eq!(slot.radio_state(), RadioState::SimReady);
        assert_eq!(slot.vendor_version(), "local-vendor 1.0");
        assert_eq!(
            events.recv().await.unwrap(),
            SlotEvent::CallbacksRegistered {
                slot: SlotId(2),
                version: "local-vendor 1.0".into()
            }
        );
    }

    #[tokio::test]
    async fn test_shutdown_drains_and_refuses() {
        let (slot, _peer) = slot_with_vendor(SlotOptions::default());
        let (tx, rx) = oneshot::channel();
        slot.submit_request(RequestId(4), &Payload::Void, tx)
            .await
            .unwrap();

        slot.shutdown().await;
        assert!(slot.is_closed());

        let response = rx.await.unwrap();
        assert_eq!(response.status, Status::CANCELLED);
        assert!(matches!(response.result, Err(MuxError::ShutDown)));

        let (tx, _rx) = oneshot::channel();
        assert!(slot
            .submit_request(RequestId(4), &Payload::Void, tx)
            .await
            .is_err());

        // Second shutdown is a no-op
        slot.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_with_stalled_writer() {
        // Peer never reads, so a large command fills the pipe and blocks
        let (ours, _peer) = tokio::io::duplex(64);
        let slot = Arc::new(SlotManager::spawn(SlotId(0), ours, SlotOptions::default()));
        slot.register_callbacks(CallbackSet::new(table(), Arc::new(LocalVendor)));

        let (tx, rx) = oneshot::channel();
        let submitter = {
            let slot = slot.clone();
            tokio::spawn(async move {
                slot.submit_request(RequestId(61), &Payload::Raw(vec![0xAB; 1000]), tx)
                    .await
            })
        };
        while slot.pending_count() == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        tokio::time::timeout(Duration::from_secs(2), slot.shutdown())
            .await
            .expect("shutdown blocked on the stalled writer");
        assert!(slot.is_closed());

        let response = tokio::time::timeout(Duration::from_secs(1), rx)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(response.status, Status::CANCELLED);
        assert!(matches!(response.result, Err(MuxError::ShutDown)));

        let submitted = tokio::time::timeout(Duration::from_secs(1), submitter)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(submitted, Err(MuxError::TransportClosed)));
    }

    #[tokio::test]
    async fn test_drop_drains_pending_requests() {
        let (slot, _peer) = slot_with_vendor(SlotOptions::default());
        let mut events = slot.subscribe();
        let (tx, rx) = oneshot::channel();
        slot.submit_request(RequestId(4), &Payload::Void, tx)
            .await
            .unwrap();

        drop(slot);

        let response = rx.await.unwrap();
        assert_eq!(response.status, Status::CANCELLED);
        assert!(matches!(response.result, Err(MuxError::ShutDown)));

        let mut drained = None;
        while let Ok(event) = events.recv().await {
            if let SlotEvent::Disconnected { drained: n, .. } = event {
                drained = Some(n);
                break;
            }
        }
        assert_eq!(drained, Some(1));
    }
}
