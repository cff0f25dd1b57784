//! Transport channel for one slot
//!
//! A slot's byte stream (Unix socket, TCP connection, serial port or an
//! in-memory duplex for tests) is split into a [`TransportReader`], owned by
//! the slot's reader task, and a [`TransportWriter`], shared by every task
//! that sends commands or acknowledgments.
//!
//! Each outbound frame is assembled in full and written with a single
//! `write_all` while the writer lock is held, so frames from concurrent
//! senders never interleave. Closing the writer does not wait for that lock:
//! a send stalled on a peer that stopped reading is abandoned instead.

use std::time::Duration;

use ril_protocol::{Command, Frame, FrameCodec, LENGTH_PREFIX_LEN};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{watch, Mutex};
use tracing::{debug, trace, warn};

use crate::config::Endpoint;
use crate::error::MuxError;
use crate::slot::SlotId;

/// Read buffer size
const READ_CHUNK: usize = 4096;

/// Upper bound on flushing and shutting down the stream at close
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Byte stream usable as a slot transport
pub trait ChannelIo: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> ChannelIo for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Boxed transport stream
pub type BoxedIo = Box<dyn ChannelIo>;

/// Open the byte stream for `endpoint`
pub async fn connect(endpoint: &Endpoint) -> Result<BoxedIo, MuxError> {
    debug!(%endpoint, "Connecting transport");
    match endpoint {
        #[cfg(unix)]
        Endpoint::Unix { path } => {
            let stream = tokio::net::UnixStream::connect(path).await?;
            Ok(Box::new(stream))
        }
        #[cfg(not(unix))]
        Endpoint::Unix { .. } => Err(MuxError::Config(
            "unix sockets are not available on this platform".into(),
        )),
        Endpoint::Tcp { addr } => {
            let stream = tokio::net::TcpStream::connect(addr.as_str()).await?;
            stream.set_nodelay(true)?;
            Ok(Box::new(stream))
        }
        Endpoint::Serial { path, baud_rate } => {
            use tokio_serial::SerialPortBuilderExt;

            let stream = tokio_serial::new(path.as_str(), *baud_rate)
                .timeout(Duration::from_millis(100))
                .open_native_async()?;
            Ok(Box::new(stream))
        }
    }
}

/// Split a stream into its reader and writer halves
pub fn split<T: ChannelIo>(
    slot: SlotId,
    io: T,
    max_frame_len: u32,
) -> (TransportReader, TransportWriter) {
    let (read_half, write_half) = tokio::io::split(io);
    (
        TransportReader::new(slot, Box::new(read_half), max_frame_len),
        TransportWriter::new(slot, Box::new(write_half), max_frame_len),
    )
}

type BoxedRead = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWrite = Box<dyn AsyncWrite + Send + Unpin>;

/// Inbound half of a transport channel
pub struct TransportReader {
    slot: SlotId,
    io: BoxedRead,
    codec: FrameCodec,
    buf: Vec<u8>,
}

impl TransportReader {
    fn new(slot: SlotId, io: BoxedRead, max_frame_len: u32) -> Self {
        Self {
            slot,
            io,
            codec: FrameCodec::with_max_frame_len(max_frame_len),
            buf: vec![0u8; READ_CHUNK],
        }
    }

    /// Wait for the next complete frame
    ///
    /// Returns `Ok(None)` when the peer closes the stream. Framing errors are
    /// not recoverable; the caller should close the channel.
    pub async fn receive(&mut self) -> Result<Option<Frame>, MuxError> {
        loop {
            if let Some(frame) = self.codec.next_frame() {
                return Ok(Some(frame?));
            }

            let n = self.io.read(&mut self.buf).await?;
            if n == 0 {
                if self.codec.buffered() > 0 {
                    warn!(
                        slot = %self.slot,
                        buffered = self.codec.buffered(),
                        "Stream closed with a partial frame buffered"
                    );
                }
                return Ok(None);
            }

            trace!(slot = %self.slot, "Read {} bytes: {:02X?}", n, &self.buf[..n]);
            self.codec.push_bytes(&self.buf[..n]);
        }
    }
}

impl std::fmt::Debug for TransportReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportReader")
            .field("slot", &self.slot)
            .field("codec", &self.codec)
            .finish_non_exhaustive()
    }
}

/// Outbound half of a transport channel
pub struct TransportWriter {
    slot: SlotId,
    io: Mutex<Option<BoxedWrite>>,
    max_frame_len: u32,
    closed: watch::Sender<bool>,
}

impl TransportWriter {
    fn new(slot: SlotId, io: BoxedWrite, max_frame_len: u32) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            slot,
            io: Mutex::new(Some(io)),
            max_frame_len,
            closed,
        }
    }

    /// Send one command
    pub async fn send_command(&self, command: &Command) -> Result<(), MuxError> {
        self.send_raw(&command.encode_body()).await
    }

    /// Send one frame body, adding the length prefix
    ///
    /// A failed write closes the writer; later sends return
    /// [`MuxError::TransportClosed`]. A send still waiting for the lock or
    /// the peer when the writer is closed also returns
    /// [`MuxError::TransportClosed`].
    pub async fn send_raw(&self, body: &[u8]) -> Result<(), MuxError> {
        if self.is_closing() {
            return Err(MuxError::TransportClosed);
        }
        if body.len() > self.max_frame_len as usize {
            return Err(MuxError::FrameTooLarge {
                len: body.len(),
                max: self.max_frame_len,
            });
        }

        let mut frame = Vec::with_capacity(LENGTH_PREFIX_LEN + body.len());
        frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
        frame.extend_from_slice(body);

        let mut guard = tokio::select! {
            guard = self.io.lock() => guard,
            _ = wait_closed(self.closed.subscribe()) => return Err(MuxError::TransportClosed),
        };
        let Some(io) = guard.as_mut() else {
            return Err(MuxError::TransportClosed);
        };

        let written = tokio::select! {
            result = write_frame(io, &frame) => Some(result),
            _ = wait_closed(self.closed.subscribe()) => None,
        };
        match written {
            Some(Ok(())) => {}
            Some(Err(e)) => {
                warn!(slot = %self.slot, "Transport write failed: {}", e);
                *guard = None;
                self.closed.send_replace(true);
                return Err(e.into());
            }
            None => {
                debug!(slot = %self.slot, "Writer closed during send, frame abandoned");
                *guard = None;
                return Err(MuxError::TransportClosed);
            }
        }

        trace!(slot = %self.slot, "Wrote {} bytes: {:02X?}", frame.len(), frame);
        Ok(())
    }

    /// Refuse further sends and abandon any send in progress
    ///
    /// Does not wait; the stream itself is released by the abandoned send or
    /// by [`close`](Self::close).
    pub fn abort(&self) {
        self.closed.send_replace(true);
    }

    /// Shut down the outbound stream
    pub async fn close(&self) {
        self.abort();
        let Some(mut io) = self.io.lock().await.take() else {
            return;
        };
        match tokio::time::timeout(CLOSE_TIMEOUT, io.shutdown()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(slot = %self.slot, "Transport shutdown failed: {}", e),
            Err(_) => debug!(slot = %self.slot, "Transport shutdown timed out"),
        }
    }

    /// Whether the writer has been closed
    pub async fn is_closed(&self) -> bool {
        self.is_closing() || self.io.lock().await.is_none()
    }

    fn is_closing(&self) -> bool {
        *self.closed.borrow()
    }
}

async fn write_frame(io: &mut BoxedWrite, frame: &[u8]) -> std::io::Result<()> {
    io.write_all(frame).await?;
    io.flush().await
}

async fn wait_closed(mut closed: watch::Receiver<bool>) {
    let _ = closed.wait_for(|closed| *closed).await;
}

impl std::fmt::Debug for TransportWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportWriter")
            .field("slot", &self.slot)
            .field("max_frame_len", &self.max_frame_len)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ril_protocol::{FrameKind, RequestId, Status, Token};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_send_command_is_length_prefixed() {
        let (ours, mut theirs) = tokio::io::duplex(1024);
        let (_reader, writer) = split(SlotId(0), ours, 8192);

        writer
            .send_command(&Command::new(RequestId(4), Token(7), vec![1, 2, 3]))
            .await
            .unwrap();

        let mut buf = [0u8; 15];
        theirs.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf[..4], &[0, 0, 0, 11]);
        assert_eq!(&buf[4..8], &4u32.to_le_bytes());
        assert_eq!(&buf[8..12], &7u32.to_le_bytes());
        assert_eq!(&buf[12..], &[1, 2, 3]);
    }

    #[tokio::test]
    async fn test_zero_length_body() {
        let (ours, mut theirs) = tokio::io::duplex(64);
        let (_reader, writer) = split(SlotId(0), ours, 8192);

        writer.send_raw(&[]).await.unwrap();

        let mut buf = [0u8; 4];
        theirs.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, [0, 0, 0, 0]);
    }

    #[tokio::test]
    async fn test_oversized_body_rejected() {
        let (ours, _theirs) = tokio::io::duplex(64);
        let (_reader, writer) = split(SlotId(0), ours, 8);

        let err = writer.send_raw(&[0u8; 9]).await.unwrap_err();
        assert!(matches!(err, MuxError::FrameTooLarge { len: 9, max: 8 }));
        assert!(!writer.is_closed().await);
    }

    #[tokio::test]
    async fn test_receive_across_partial_reads() {
        let (ours, mut theirs) = tokio::io::duplex(1024);
        let (mut reader, _writer) = split(SlotId(0), ours, 8192);

        let frame = Frame::solicited(
            FrameKind::Solicited,
            Token(3),
            RequestId(4),
            Status::SUCCESS,
            vec![9; 20],
        );
        let bytes = frame.encode();

        let feeder = tokio::spawn(async move {
            for chunk in bytes.chunks(5) {
                theirs.write_all(chunk).await.unwrap();
                tokio::task::yield_now().await;
            }
            theirs
        });

        assert_eq!(reader.receive().await.unwrap(), Some(frame));
        drop(feeder.await.unwrap());
        assert_eq!(reader.receive().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_oversized_inbound_frame_is_error() {
        let (ours, mut theirs) = tokio::io::duplex(64);
        let (mut reader, _writer) = split(SlotId(0), ours, 16);

        theirs.write_all(&[0, 0, 1, 0]).await.unwrap();
        assert!(matches!(
            reader.receive().await,
            Err(MuxError::Framing(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_senders_do_not_interleave() {
        let (ours, theirs) = tokio::io::duplex(64);
        let (_reader, writer) = split(SlotId(0), ours, 8192);
        let writer = Arc::new(writer);

        let mut tasks = Vec::new();
        for i in 0..8u32 {
            let writer = writer.clone();
            tasks.push(tokio::spawn(async move {
                writer
                    .send_command(&Command::new(RequestId(i), Token(i + 1), vec![i as u8; 100]))
                    .await
                    .unwrap();
            }));
        }

        let collector = tokio::spawn(async move {
            let mut theirs = theirs;
            let mut codec = FrameCodec::new();
            let mut commands = Vec::new();
            let mut buf = [0u8; 37];
            while commands.len() < 8 {
                let n = theirs.read(&mut buf).await.unwrap();
                codec.push_bytes(&buf[..n]);
                while let Some(command) = codec.next_command() {
                    commands.push(command.unwrap());
                }
            }
            commands
        });

        for task in tasks {
            task.await.unwrap();
        }
        let commands = collector.await.unwrap();
        for command in commands {
            let i = command.request.0;
            assert_eq!(command.token, Token(i + 1));
            assert_eq!(command.payload, vec![i as u8; 100]);
        }
    }

    #[tokio::test]
    async fn test_close_abandons_stalled_send() {
        let (ours, _theirs) = tokio::io::duplex(64);
        let (_reader, writer) = split(SlotId(0), ours, 8192);
        let writer = Arc::new(writer);

        let sender = {
            let writer = writer.clone();
            tokio::spawn(async move { writer.send_raw(&[0x55; 1000]).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!sender.is_finished());

        tokio::time::timeout(Duration::from_secs(2), writer.close())
            .await
            .expect("close waited on the stalled send");
        assert!(matches!(
            sender.await.unwrap(),
            Err(MuxError::TransportClosed)
        ));
        assert!(writer.is_closed().await);
        assert!(matches!(
            writer.send_raw(&[]).await,
            Err(MuxError::TransportClosed)
        ));
    }

    #[tokio::test]
    async fn test_write_to_closed_peer_closes_writer() {
        let (ours, theirs) = tokio::io::duplex(64);
        let (_reader, writer) = split(SlotId(0), ours, 8192);
        drop(theirs);

        assert!(writer.send_command(&Command::ack(Token(1))).await.is_err());
        assert!(writer.is_closed().await);
        assert!(matches!(
            writer.send_command(&Command::ack(Token(1))).await,
            Err(MuxError::TransportClosed)
        ));
    }
}
