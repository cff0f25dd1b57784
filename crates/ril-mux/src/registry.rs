//! Pending request registry
//!
//! Every solicited request in flight on a slot has exactly one entry here,
//! keyed by token. Completion, cancellation and the close-time drain all go
//! through the same lock, so a token is resolved at most once no matter
//! which path reaches it first. Completion sinks are always invoked after the
//! lock is released.

use std::collections::{HashMap, VecDeque};
use std::time::Instant;

use parking_lot::Mutex;
use ril_protocol::{Payload, RequestId, Status, Token};
use tracing::{debug, trace};

use crate::error::MuxError;
use crate::response::{CompletionSink, Response};
use crate::slot::SlotId;

/// Token reserved for requests served by the vendor in-process
pub const LOCAL_TOKEN_SENTINEL: Token = Token(u32::MAX);

/// Which side is allowed to complete a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Completed by a frame from the transport
    Remote,
    /// Completed by the vendor through `complete_local`
    Local,
}

/// Why the registry is being drained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainReason {
    /// Transport closed or failed
    TransportClosed,
    /// Local shutdown
    Shutdown,
}

/// One in-flight request
#[derive(Debug)]
pub struct PendingRequest {
    /// Correlation token
    pub token: Token,
    /// Request number
    pub request: RequestId,
    /// Caller withdrew interest; the eventual response is discarded
    pub cancelled: bool,
    /// An acknowledgment for this token has been written
    pub ack_sent: bool,
    /// The peer acknowledged receipt of the command
    pub peer_acknowledged: bool,
    /// Served by the vendor rather than the transport
    pub local: bool,
    /// When the request was registered
    pub submitted_at: Instant,
    sink: CompletionSink,
}

/// Outcome of looking up a token for completion
#[derive(Debug)]
pub enum Completion {
    /// The entry was removed; deliver the response with [`PendingCompletion::deliver`]
    Pending(PendingCompletion),
    /// The entry was cancelled; it has been removed and nothing is delivered
    Cancelled {
        /// Request number recorded at submission
        request: RequestId,
    },
    /// No entry for this token (or it belongs to the other origin)
    Unmatched,
}

/// A removed entry whose sink has not been invoked yet
#[derive(Debug)]
pub struct PendingCompletion {
    /// Token
    pub token: Token,
    /// Request number recorded at submission
    pub request: RequestId,
    /// When the request was registered
    pub submitted_at: Instant,
    sink: CompletionSink,
}

impl PendingCompletion {
    /// Build the response for this request
    pub fn response(
        &self,
        slot: SlotId,
        status: Status,
        result: Result<Payload, MuxError>,
    ) -> Response {
        Response {
            slot,
            token: self.token,
            request: self.request,
            status,
            result,
        }
    }

    /// Invoke the completion sink
    pub fn deliver(self, response: Response) {
        if self.sink.send(response).is_err() {
            debug!(token = %self.token, "Completion receiver dropped before response arrived");
        }
    }
}

/// Whether an acknowledgment should be written for a token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckDecision {
    /// First ack for a pending token
    Send,
    /// Already acknowledged; do not ack again
    Duplicate,
    /// Token is not known; ack anyway so the peer can release it
    Unknown,
}

#[derive(Debug)]
struct RegistryInner {
    entries: HashMap<Token, PendingRequest>,
    next_token: u32,
    recently_acked: VecDeque<Token>,
    closed: bool,
}

/// Token-keyed registry of in-flight requests for one slot
#[derive(Debug)]
pub struct PendingRegistry {
    slot: SlotId,
    ack_history: usize,
    inner: Mutex<RegistryInner>,
}

impl PendingRegistry {
    /// Create an empty registry
    ///
    /// `ack_history` bounds how many completed, acknowledged tokens are
    /// remembered for duplicate-ack suppression.
    pub fn new(slot: SlotId, ack_history: usize) -> Self {
        Self {
            slot,
            ack_history,
            inner: Mutex::new(RegistryInner {
                entries: HashMap::new(),
                next_token: 1,
                recently_acked: VecDeque::with_capacity(ack_history),
                closed: false,
            }),
        }
    }

    /// Register a request under a freshly allocated token
    ///
    /// Tokens count up from 1, wrap, and skip 0, the local sentinel and any
    /// token still pending.
    pub fn submit(
        &self,
        request: RequestId,
        sink: CompletionSink,
        local: bool,
    ) -> Result<Token, MuxError> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(MuxError::TransportClosed);
        }

        let token = loop {
            let candidate = Token(inner.next_token);
            inner.next_token = inner.next_token.wrapping_add(1);
            if candidate.0 == 0 || candidate == LOCAL_TOKEN_SENTINEL {
                continue;
            }
            if !inner.entries.contains_key(&candidate) {
                break candidate;
            }
        };

        inner
            .entries
            .insert(token, PendingRequest::new(token, request, local, sink));
        trace!(slot = %self.slot, %token, %request, local, "Registered request");
        Ok(token)
    }

    /// Register a request under a caller-chosen token
    pub fn submit_with_token(
        &self,
        token: Token,
        request: RequestId,
        sink: CompletionSink,
        local: bool,
    ) -> Result<(), MuxError> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(MuxError::TransportClosed);
        }
        if inner.entries.contains_key(&token) {
            return Err(MuxError::DuplicateToken(token));
        }

        inner
            .entries
            .insert(token, PendingRequest::new(token, request, local, sink));
        trace!(slot = %self.slot, %token, %request, local, "Registered request");
        Ok(())
    }

    /// Remove an entry whose submission failed after registration
    pub fn rollback(&self, token: Token) {
        self.inner.lock().entries.remove(&token);
    }

    /// Take the entry for `token` so its response can be delivered
    pub fn complete(&self, token: Token, origin: Origin) -> Completion {
        let mut inner = self.inner.lock();
        let local = match inner.entries.get(&token) {
            Some(entry) => entry.local,
            None => return Completion::Unmatched,
        };
        if local != (origin == Origin::Local) {
            return Completion::Unmatched;
        }

        let Some(entry) = inner.entries.remove(&token) else {
            return Completion::Unmatched;
        };
        if entry.ack_sent {
            remember_ack(&mut inner.recently_acked, self.ack_history, token);
        }

        if entry.cancelled {
            Completion::Cancelled {
                request: entry.request,
            }
        } else {
            Completion::Pending(PendingCompletion {
                token,
                request: entry.request,
                submitted_at: entry.submitted_at,
                sink: entry.sink,
            })
        }
    }

    /// Mark a pending request as cancelled
    ///
    /// Returns `false` if the token is not pending or was already cancelled.
    /// The entry stays registered so that an ack-expected response can still
    /// be acknowledged.
    pub fn cancel(&self, token: Token) -> bool {
        let mut inner = self.inner.lock();
        match inner.entries.get_mut(&token) {
            Some(entry) if !entry.cancelled => {
                entry.cancelled = true;
                true
            }
            _ => false,
        }
    }

    /// Record that the peer acknowledged receipt of `token`
    pub fn mark_peer_ack(&self, token: Token) -> bool {
        let mut inner = self.inner.lock();
        match inner.entries.get_mut(&token) {
            Some(entry) if !entry.local => {
                entry.peer_acknowledged = true;
                true
            }
            _ => false,
        }
    }

    /// Decide whether to acknowledge `token`, recording the ack if so
    ///
    /// Local requests never see transport frames, so their tokens count as
    /// unknown here.
    pub fn begin_ack(&self, token: Token) -> AckDecision {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        match inner.entries.get_mut(&token) {
            Some(entry) if entry.local => AckDecision::Unknown,
            Some(entry) if entry.ack_sent => AckDecision::Duplicate,
            Some(entry) => {
                entry.ack_sent = true;
                AckDecision::Send
            }
            None if inner.recently_acked.contains(&token) => AckDecision::Duplicate,
            None => AckDecision::Unknown,
        }
    }

    /// Whether an acknowledgment has been written for a pending `token`
    pub fn ack_sent(&self, token: Token) -> bool {
        self.inner
            .lock()
            .entries
            .get(&token)
            .is_some_and(|entry| entry.ack_sent)
    }

    /// Complete every pending request with an error and refuse new ones
    ///
    /// Cancelled entries are discarded without invoking their sinks. Returns
    /// the number of sinks invoked.
    pub fn drain_all(&self, reason: DrainReason) -> usize {
        let drained: Vec<PendingRequest> = {
            let mut inner = self.inner.lock();
            inner.closed = true;
            inner.entries.drain().map(|(_, entry)| entry).collect()
        };

        let mut delivered = 0;
        for entry in drained {
            if entry.cancelled {
                continue;
            }
            let (status, error) = match reason {
                DrainReason::TransportClosed => {
                    (Status::RADIO_NOT_AVAILABLE, MuxError::TransportClosed)
                }
                DrainReason::Shutdown => (Status::CANCELLED, MuxError::ShutDown),
            };
            let response = Response {
                slot: self.slot,
                token: entry.token,
                request: entry.request,
                status,
                result: Err(error),
            };
            if entry.sink.send(response).is_err() {
                debug!(slot = %self.slot, token = %entry.token, "Completion receiver dropped during drain");
            }
            delivered += 1;
        }
        delivered
    }

    /// Number of pending requests
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Whether nothing is pending
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `token` is pending
    pub fn contains(&self, token: Token) -> bool {
        self.inner.lock().entries.contains_key(&token)
    }

    /// Whether the registry has been drained
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }
}

impl PendingRequest {
    fn new(token: Token, request: RequestId, local: bool, sink: CompletionSink) -> Self {
        Self {
            token,
            request,
            cancelled: false,
            ack_sent: false,
            peer_acknowledged: false,
            local,
            submitted_at: Instant::now(),
            sink,
        }
    }
}

fn remember_ack(history: &mut VecDeque<Token>, limit: usize, token: Token) {
    if limit == 0 {
        return;
    }
    if history.len() == limit {
        history.pop_front();
    }
    history.push_back(token);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    fn registry() -> PendingRegistry {
        PendingRegistry::new(SlotId(0), 4)
    }

    #[test]
    fn test_tokens_start_at_one_and_increase() {
        let reg = registry();
        let (tx1, _rx1) = oneshot::channel();
        let (tx2, _rx2) = oneshot::channel();
        assert_eq!(reg.submit(RequestId(4), tx1, false).unwrap(), Token(1));
        assert_eq!(reg.submit(RequestId(4), tx2, false).unwrap(), Token(2));
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn test_allocation_skips_pending_tokens() {
        let reg = registry();
        let (tx, _rx) = oneshot::channel();
        reg.submit_with_token(Token(1), RequestId(4), tx, false)
            .unwrap();
        let (tx, _rx2) = oneshot::channel();
        assert_eq!(reg.submit(RequestId(4), tx, false).unwrap(), Token(2));
    }

    #[test]
    fn test_allocation_skips_zero_and_sentinel_on_wrap() {
        let reg = registry();
        reg.inner.lock().next_token = u32::MAX;
        let (tx, _rx) = oneshot::channel();
        assert_eq!(reg.submit(RequestId(4), tx, false).unwrap(), Token(1));
    }

    #[test]
    fn test_duplicate_token_rejected() {
        let reg = registry();
        let (tx1, _rx1) = oneshot::channel();
        let (tx2, _rx2) = oneshot::channel();
        reg.submit_with_token(Token(7), RequestId(4), tx1, false)
            .unwrap();
        assert!(matches!(
            reg.submit_with_token(Token(7), RequestId(5), tx2, false),
            Err(MuxError::DuplicateToken(Token(7)))
        ));
    }

    #[test]
    fn test_complete_removes_entry() {
        let reg = registry();
        let (tx, mut rx) = oneshot::channel();
        let token = reg.submit(RequestId(4), tx, false).unwrap();

        let Completion::Pending(pending) = reg.complete(token, Origin::Remote) else {
            panic!("expected pending completion");
        };
        assert_eq!(pending.request, RequestId(4));
        assert!(!reg.contains(token));
        assert!(matches!(
            reg.complete(token, Origin::Remote),
            Completion::Unmatched
        ));

        let response = pending.response(SlotId(0), Status::SUCCESS, Ok(Payload::Void));
        pending.deliver(response);
        assert_eq!(rx.try_recv().unwrap().token, token);
    }

    #[test]
    fn test_origin_mismatch_is_unmatched() {
        let reg = registry();
        let (tx, _rx) = oneshot::channel();
        let token = reg.submit(RequestId(4), tx, true).unwrap();
        assert!(matches!(
            reg.complete(token, Origin::Remote),
            Completion::Unmatched
        ));
        assert!(reg.contains(token));
        assert!(matches!(
            reg.complete(token, Origin::Local),
            Completion::Pending(_)
        ));
    }

    #[test]
    fn test_cancelled_entry_is_discarded() {
        let reg = registry();
        let (tx, mut rx) = oneshot::channel();
        let token = reg.submit(RequestId(4), tx, false).unwrap();

        assert!(reg.cancel(token));
        assert!(!reg.cancel(token));
        assert!(reg.contains(token));

        assert!(matches!(
            reg.complete(token, Origin::Remote),
            Completion::Cancelled {
                request: RequestId(4)
            }
        ));
        assert!(!reg.contains(token));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_cancel_unknown_token() {
        assert!(!registry().cancel(Token(42)));
    }

    #[test]
    fn test_ack_once_per_token() {
        let reg = registry();
        let (tx, _rx) = oneshot::channel();
        let token = reg.submit(RequestId(4), tx, false).unwrap();

        assert_eq!(reg.begin_ack(token), AckDecision::Send);
        assert_eq!(reg.begin_ack(token), AckDecision::Duplicate);

        let _ = reg.complete(token, Origin::Remote);
        assert_eq!(reg.begin_ack(token), AckDecision::Duplicate);
        assert_eq!(reg.begin_ack(Token(99)), AckDecision::Unknown);
    }

    #[test]
    fn test_ack_history_is_bounded() {
        let reg = PendingRegistry::new(SlotId(0), 2);
        let mut tokens = Vec::new();
        for _ in 0..3 {
            let (tx, _rx) = oneshot::channel();
            let token = reg.submit(RequestId(4), tx, false).unwrap();
            assert_eq!(reg.begin_ack(token), AckDecision::Send);
            let _ = reg.complete(token, Origin::Remote);
            tokens.push(token);
        }
        assert_eq!(reg.begin_ack(tokens[0]), AckDecision::Unknown);
        assert_eq!(reg.begin_ack(tokens[2]), AckDecision::Duplicate);
    }

    #[test]
    fn test_local_token_is_not_acked() {
        let reg = registry();
        let (tx, _rx) = oneshot::channel();
        let token = reg.submit(RequestId(61), tx, true).unwrap();

        assert_eq!(reg.begin_ack(token), AckDecision::Unknown);
        assert!(!reg.ack_sent(token));
        assert!(!reg.mark_peer_ack(token));
        assert!(matches!(
            reg.complete(token, Origin::Local),
            Completion::Pending(_)
        ));
        assert_eq!(reg.begin_ack(token), AckDecision::Unknown);
    }

    #[test]
    fn test_drain_completes_each_once() {
        let reg = registry();
        let (tx1, mut rx1) = oneshot::channel();
        let (tx2, mut rx2) = oneshot::channel();
        let (tx3, mut rx3) = oneshot::channel();
        reg.submit_with_token(Token(1), RequestId(4), tx1, false)
            .unwrap();
        reg.submit_with_token(Token(2), RequestId(5), tx2, false)
            .unwrap();
        reg.submit_with_token(Token(3), RequestId(6), tx3, false)
            .unwrap();
        reg.cancel(Token(3));

        assert_eq!(reg.drain_all(DrainReason::TransportClosed), 2);
        assert!(reg.is_empty());
        assert!(reg.is_closed());

        for rx in [&mut rx1, &mut rx2] {
            let response = rx.try_recv().unwrap();
            assert_eq!(response.status, Status::RADIO_NOT_AVAILABLE);
            assert!(matches!(response.result, Err(MuxError::TransportClosed)));
        }
        assert!(rx3.try_recv().is_err());

        assert_eq!(reg.drain_all(DrainReason::TransportClosed), 0);
        let (tx, _rx) = oneshot::channel();
        assert!(matches!(
            reg.submit(RequestId(4), tx, false),
            Err(MuxError::TransportClosed)
        ));
    }

    #[test]
    fn test_shutdown_drain_status() {
        let reg = registry();
        let (tx, mut rx) = oneshot::channel();
        reg.submit(RequestId(4), tx, false).unwrap();
        reg.drain_all(DrainReason::Shutdown);

        let response = rx.try_recv().unwrap();
        assert_eq!(response.status, Status::CANCELLED);
        assert!(matches!(response.result, Err(MuxError::ShutDown)));
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;
        use std::collections::HashSet;

        proptest! {
            #[test]
            fn pending_tokens_are_unique(
                start in any::<u32>(),
                ops in prop::collection::vec(any::<bool>(), 1..64),
            ) {
                let reg = registry();
                reg.inner.lock().next_token = start;
                let mut live: Vec<Token> = Vec::new();
                let mut receivers = Vec::new();

                for submit in ops {
                    if submit || live.is_empty() {
                        let (tx, rx) = oneshot::channel();
                        receivers.push(rx);
                        let token = reg.submit(RequestId(1), tx, false).unwrap();
                        prop_assert!(token.0 != 0);
                        prop_assert!(token != LOCAL_TOKEN_SENTINEL);
                        prop_assert!(!live.contains(&token));
                        live.push(token);
                    } else {
                        let token = live.remove(0);
                        let completed = matches!(reg.complete(token, Origin::Remote), Completion::Pending(_));
                        prop_assert!(completed);
                    }
                }

                let unique: HashSet<_> = live.iter().collect();
                prop_assert_eq!(unique.len(), live.len());
                prop_assert_eq!(reg.len(), live.len());
            }
        }
    }
}
