//! Virtual modem actor task
//!
//! Owns a [`VirtualModem`] and connects it to an async stream. The task uses
//! a select! loop to:
//! - Read commands from the stream and answer them
//! - Apply control messages (new rules, injected frames, disconnect)
//! - Report what it received on a broadcast channel

use ril_protocol::{Frame, FrameKind, IndicationId, RequestId, Status, Token};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::error::SimError;
use crate::modem::{Handled, ModemRule, VirtualModem};

/// Control messages for a running virtual modem
#[derive(Debug, Clone)]
pub enum ModemControl {
    /// Install or replace a rule
    SetRule {
        /// Request number
        request: RequestId,
        /// Answer
        rule: ModemRule,
    },
    /// Answer the oldest held command
    AnswerNext(ModemRule),
    /// Send a solicited frame for an arbitrary token
    Respond {
        /// Frame kind
        kind: FrameKind,
        /// Token
        token: Token,
        /// Request number
        request: RequestId,
        /// Status
        status: Status,
        /// Payload bytes
        payload: Vec<u8>,
    },
    /// Send an indication
    Indicate {
        /// Indication number
        id: IndicationId,
        /// Payload bytes
        payload: Vec<u8>,
        /// Whether the indication must be acknowledged
        ack_expected: bool,
    },
    /// Send a prepared frame
    Frame(Frame),
    /// Send raw bytes
    Raw(Vec<u8>),
    /// Close the stream and stop
    Disconnect,
}

/// Activity reported by a running virtual modem
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModemActivity {
    /// A command arrived (answered or held)
    Command {
        /// Request number
        request: RequestId,
        /// Token
        token: Token,
        /// Whether a rule answered it
        answered: bool,
    },
    /// An acknowledgment arrived
    Ack(Token),
}

/// Run the virtual modem actor task
///
/// Returns the modem when the stream closes or a
/// [`ModemControl::Disconnect`] arrives, so callers can inspect what it
/// received.
pub async fn run_virtual_modem<S>(
    mut stream: S,
    mut modem: VirtualModem,
    mut control_rx: mpsc::Receiver<ModemControl>,
    activity_tx: broadcast::Sender<ModemActivity>,
) -> Result<VirtualModem, SimError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = [0u8; 1024];
    let mut control_open = true;

    info!("Starting virtual modem task for {}", modem.id());

    loop {
        tokio::select! {
            result = stream.read(&mut buf) => {
                let n = result?;
                if n == 0 {
                    debug!("Virtual modem stream closed for {}", modem.id());
                    break;
                }

                let handled = match modem.process_bytes(&buf[..n]) {
                    Ok(handled) => handled,
                    Err(e) => {
                        warn!("Virtual modem {} got malformed bytes: {}", modem.id(), e);
                        return Err(e.into());
                    }
                };
                flush(&mut stream, &mut modem).await?;

                for item in handled {
                    let activity = match item {
                        Handled::Ack(token) => ModemActivity::Ack(token),
                        Handled::Answered(command) => ModemActivity::Command {
                            request: command.request,
                            token: command.token,
                            answered: true,
                        },
                        Handled::Held(command) => ModemActivity::Command {
                            request: command.request,
                            token: command.token,
                            answered: false,
                        },
                    };
                    let _ = activity_tx.send(activity);
                }
            }

            control = control_rx.recv(), if control_open => {
                match control {
                    Some(ModemControl::Disconnect) => {
                        info!("Virtual modem {} disconnecting", modem.id());
                        break;
                    }
                    Some(control) => {
                        apply(&mut modem, control);
                        flush(&mut stream, &mut modem).await?;
                    }
                    None => {
                        debug!("Control channel closed for {}", modem.id());
                        control_open = false;
                    }
                }
            }
        }
    }

    if let Err(e) = stream.shutdown().await {
        debug!("Virtual modem shutdown failed: {}", e);
    }
    Ok(modem)
}

fn apply(modem: &mut VirtualModem, control: ModemControl) {
    match control {
        ModemControl::SetRule { request, rule } => modem.set_rule(request, rule),
        ModemControl::AnswerNext(rule) => {
            if modem.answer_next(&rule).is_none() {
                warn!("Virtual modem {} has no held command to answer", modem.id());
            }
        }
        ModemControl::Respond {
            kind,
            token,
            request,
            status,
            payload,
        } => modem.respond(kind, token, request, status, payload),
        ModemControl::Indicate {
            id,
            payload,
            ack_expected,
        } => modem.indicate(id, payload, ack_expected),
        ModemControl::Frame(frame) => modem.queue_frame(frame),
        ModemControl::Raw(bytes) => modem.queue_raw(bytes),
        ModemControl::Disconnect => {}
    }
}

async fn flush<S>(stream: &mut S, modem: &mut VirtualModem) -> Result<(), SimError>
where
    S: AsyncWrite + Unpin,
{
    if !modem.has_output() {
        return Ok(());
    }
    while let Some(bytes) = modem.take_output() {
        stream.write_all(&bytes).await?;
    }
    stream.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ril_protocol::{Command, FrameCodec};

    #[tokio::test]
    async fn test_task_answers_and_reports() {
        let (mut mux_side, modem_side) = tokio::io::duplex(1024);
        let (control_tx, control_rx) = mpsc::channel(8);
        let (activity_tx, mut activity_rx) = broadcast::channel(16);
        let modem = VirtualModem::new("sim0").with_rule(RequestId(4), ModemRule::ok(vec![9]));

        let task = tokio::spawn(run_virtual_modem(modem_side, modem, control_rx, activity_tx));

        mux_side
            .write_all(&Command::new(RequestId(4), Token(1), vec![]).encode())
            .await
            .unwrap();

        assert_eq!(
            activity_rx.recv().await.unwrap(),
            ModemActivity::Command {
                request: RequestId(4),
                token: Token(1),
                answered: true
            }
        );

        let mut codec = FrameCodec::new();
        let mut buf = [0u8; 64];
        let frame = loop {
            if let Some(frame) = codec.next_frame() {
                break frame.unwrap();
            }
            let n = mux_side.read(&mut buf).await.unwrap();
            codec.push_bytes(&buf[..n]);
        };
        assert_eq!(frame.token, Token(1));
        assert_eq!(frame.payload, vec![9]);

        control_tx.send(ModemControl::Disconnect).await.unwrap();
        let modem = task.await.unwrap().unwrap();
        assert_eq!(modem.received().len(), 1);
    }

    #[tokio::test]
    async fn test_task_stops_on_stream_close() {
        let (mux_side, modem_side) = tokio::io::duplex(64);
        let (_control_tx, control_rx) = mpsc::channel(1);
        let (activity_tx, _) = broadcast::channel(1);

        let task = tokio::spawn(run_virtual_modem(
            modem_side,
            VirtualModem::new("sim0"),
            control_rx,
            activity_tx,
        ));
        drop(mux_side);
        assert!(task.await.unwrap().is_ok());
    }
}
