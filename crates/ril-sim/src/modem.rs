//! Virtual modem simulation
//!
//! Plays the modem side of a slot's transport: it decodes commands written by
//! the multiplexer, answers them according to per-request rules and queues
//! length-prefixed response and indication frames as output bytes.

use std::collections::{HashMap, VecDeque};

use ril_protocol::{
    Command, Frame, FrameCodec, FrameKind, IndicationId, ParseError, RequestId, Status, Token,
};
use tracing::{debug, trace};

/// How a rule answers a command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplyStyle {
    /// One solicited response, no ack requested
    #[default]
    Plain,
    /// One solicited response that must be acknowledged
    AckExpected,
    /// A receipt ack first, then the solicited response
    EarlyAck,
}

impl ReplyStyle {
    fn response_kind(&self) -> FrameKind {
        match self {
            Self::AckExpected => FrameKind::SolicitedAckExpected,
            Self::Plain | Self::EarlyAck => FrameKind::Solicited,
        }
    }
}

/// Canned answer for one request number
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModemRule {
    /// Status to report
    pub status: Status,
    /// Response payload bytes
    pub payload: Vec<u8>,
    /// Reply framing
    pub style: ReplyStyle,
}

impl ModemRule {
    /// Successful response carrying `payload`
    pub fn ok(payload: Vec<u8>) -> Self {
        Self {
            status: Status::SUCCESS,
            payload,
            style: ReplyStyle::Plain,
        }
    }

    /// Failure response with an empty payload
    pub fn fail(status: Status) -> Self {
        Self {
            status,
            payload: Vec::new(),
            style: ReplyStyle::Plain,
        }
    }

    /// Request an acknowledgment for the response
    pub fn ack_expected(mut self) -> Self {
        self.style = ReplyStyle::AckExpected;
        self
    }

    /// Send a receipt ack before the response
    pub fn early_ack(mut self) -> Self {
        self.style = ReplyStyle::EarlyAck;
        self
    }
}

/// What the modem did with one inbound command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handled {
    /// An acknowledgment from the multiplexer
    Ack(Token),
    /// A command answered by a rule
    Answered(Command),
    /// A command with no rule, held for a manual answer
    Held(Command),
}

/// A simulated modem peer
#[derive(Debug)]
pub struct VirtualModem {
    /// Identifier for logging
    id: String,
    /// Command parser
    codec: FrameCodec,
    /// Per-request answers
    rules: HashMap<RequestId, ModemRule>,
    /// Commands received, in order, excluding acks
    received: Vec<Command>,
    /// Acknowledgments received, in order
    acks: Vec<Token>,
    /// Commands waiting for a manual answer
    unanswered: VecDeque<Command>,
    /// Pending output bytes (length-prefixed frames)
    pending_output: VecDeque<Vec<u8>>,
}

impl VirtualModem {
    /// Create a modem with no rules
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            codec: FrameCodec::new(),
            rules: HashMap::new(),
            received: Vec::new(),
            acks: Vec::new(),
            unanswered: VecDeque::new(),
            pending_output: VecDeque::new(),
        }
    }

    /// Add a rule, builder style
    pub fn with_rule(mut self, request: RequestId, rule: ModemRule) -> Self {
        self.set_rule(request, rule);
        self
    }

    /// Get the modem's identifier
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Install or replace the rule for `request`
    pub fn set_rule(&mut self, request: RequestId, rule: ModemRule) {
        self.rules.insert(request, rule);
    }

    /// Remove the rule for `request`; later commands are held
    pub fn clear_rule(&mut self, request: RequestId) {
        self.rules.remove(&request);
    }

    /// Feed bytes written by the multiplexer
    pub fn process_bytes(&mut self, data: &[u8]) -> Result<Vec<Handled>, ParseError> {
        self.codec.push_bytes(data);
        let mut handled = Vec::new();
        while let Some(command) = self.codec.next_command() {
            handled.push(self.handle_command(command?));
        }
        Ok(handled)
    }

    fn handle_command(&mut self, command: Command) -> Handled {
        if command.is_ack() {
            trace!("Virtual modem {} received ack for {}", self.id, command.token);
            self.acks.push(command.token);
            return Handled::Ack(command.token);
        }

        debug!(
            "Virtual modem {} received {} token {} ({} bytes)",
            self.id,
            command.request,
            command.token,
            command.payload.len()
        );
        self.received.push(command.clone());

        match self.rules.get(&command.request).cloned() {
            Some(rule) => {
                self.answer(&command, &rule);
                Handled::Answered(command)
            }
            None => {
                self.unanswered.push_back(command.clone());
                Handled::Held(command)
            }
        }
    }

    fn answer(&mut self, command: &Command, rule: &ModemRule) {
        if rule.style == ReplyStyle::EarlyAck {
            self.queue_frame(Frame::solicited(
                FrameKind::SolicitedAck,
                command.token,
                command.request,
                Status::SUCCESS,
                Vec::new(),
            ));
        }
        self.queue_frame(Frame::solicited(
            rule.style.response_kind(),
            command.token,
            command.request,
            rule.status,
            rule.payload.clone(),
        ));
    }

    /// Answer the oldest held command with `rule`
    ///
    /// Returns the command that was answered, if any was held.
    pub fn answer_next(&mut self, rule: &ModemRule) -> Option<Command> {
        let command = self.unanswered.pop_front()?;
        self.answer(&command, rule);
        Some(command)
    }

    /// Queue a response for an arbitrary token
    pub fn respond(
        &mut self,
        kind: FrameKind,
        token: Token,
        request: RequestId,
        status: Status,
        payload: Vec<u8>,
    ) {
        self.queue_frame(Frame::solicited(kind, token, request, status, payload));
    }

    /// Queue an unsolicited indication
    pub fn indicate(&mut self, id: IndicationId, payload: Vec<u8>, ack_expected: bool) {
        let kind = if ack_expected {
            FrameKind::UnsolicitedAckExpected
        } else {
            FrameKind::Unsolicited
        };
        self.queue_frame(Frame::indication(kind, id, payload));
    }

    /// Queue a prepared frame
    pub fn queue_frame(&mut self, frame: Frame) {
        trace!(
            "Virtual modem {} queued {} id {} token {}",
            self.id,
            frame.kind.name(),
            frame.id,
            frame.token
        );
        self.pending_output.push_back(frame.encode());
    }

    /// Queue raw bytes, bypassing framing
    pub fn queue_raw(&mut self, bytes: Vec<u8>) {
        self.pending_output.push_back(bytes);
    }

    /// Take the next chunk of pending output
    pub fn take_output(&mut self) -> Option<Vec<u8>> {
        self.pending_output.pop_front()
    }

    /// Whether output is waiting to be written
    pub fn has_output(&self) -> bool {
        !self.pending_output.is_empty()
    }

    /// Commands received so far, excluding acks
    pub fn received(&self) -> &[Command] {
        &self.received
    }

    /// Acknowledgments received so far
    pub fn acks(&self) -> &[Token] {
        &self.acks
    }

    /// Number of commands waiting for a manual answer
    pub fn unanswered_count(&self) -> usize {
        self.unanswered.len()
    }
}
