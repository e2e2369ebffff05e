use bytes::{Bytes, BytesMut};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use super::config::TransportConfig;
use super::framer::{FrameDecoder, MsgParser};
use crate::protocol::error::{ActornetError, Result};

/// Initial read buffer size per connection.
const READ_BUFFER_SIZE: usize = 8 * 1024;

/// One framed TCP connection.
///
/// Writes go through a bounded queue drained by a dedicated writer task, so
/// concurrent writers never interleave frames and are delivered in enqueue
/// order. Reads are serialized by an internal lock; normally only the
/// connection's agent reads.
///
/// Any read or write failure closes the connection. Closing is idempotent and
/// safe from any task.
pub struct TcpConn {
    parser: MsgParser,
    read_deadline: Duration,
    local_addr: SocketAddr,
    remote_addr: SocketAddr,
    sender: mpsc::Sender<Bytes>,
    reader: Mutex<ConnReader>,
    closed: CancellationToken,
}

struct ConnReader {
    half: OwnedReadHalf,
    buf: BytesMut,
    decoder: FrameDecoder,
}

impl TcpConn {
    /// Wraps an established stream and spawns its writer task.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Arguments
    ///
    /// * `stream` - Connected socket
    /// * `parser` - Framing rules shared by both directions
    /// * `config` - Supplies the queue depth and deadlines; expected normalized
    pub fn new(stream: TcpStream, parser: MsgParser, config: &TransportConfig) -> Result<Arc<Self>> {
        let local_addr = stream.local_addr()?;
        let remote_addr = stream.peer_addr()?;
        let (read_half, write_half) = stream.into_split();

        let (sender, receiver) = mpsc::channel(config.pending_write_num.max(1));
        let closed = CancellationToken::new();

        tokio::spawn(write_loop(
            write_half,
            receiver,
            closed.clone(),
            config.write_deadline(),
            remote_addr,
        ));

        Ok(Arc::new(Self {
            parser,
            read_deadline: config.read_deadline(),
            local_addr,
            remote_addr,
            sender,
            reader: Mutex::new(ConnReader {
                half: read_half,
                buf: BytesMut::with_capacity(READ_BUFFER_SIZE),
                decoder: parser.decoder(),
            }),
            closed,
        }))
    }

    /// Queues one message for sending.
    ///
    /// Fails with [`ActornetError::ConnectionClosed`] once closed. Otherwise
    /// the payload is framed before anything is queued, so an out-of-range
    /// payload fails with a frame error and leaves the connection open. When
    /// the outbound queue is full this waits for space.
    pub async fn write_msg(&self, payload: &[u8]) -> Result<()> {
        if self.closed.is_cancelled() {
            return Err(ActornetError::ConnectionClosed);
        }

        let frame = self.parser.encode(payload)?;

        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(ActornetError::ConnectionClosed),
            sent = self.sender.send(frame) => sent.map_err(|_| ActornetError::ConnectionClosed),
        }
    }

    /// Reads the next complete message.
    ///
    /// Fails on read deadline, socket error, peer EOF or a framing violation;
    /// each of these closes the connection.
    pub async fn read_msg(&self) -> Result<Bytes> {
        if self.closed.is_cancelled() {
            return Err(ActornetError::ConnectionClosed);
        }

        let mut reader = self.reader.lock().await;
        let deadline = self.read_deadline;

        let result = tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(ActornetError::ConnectionClosed),
            read = tokio::time::timeout(deadline, reader.next_frame()) => match read {
                Ok(frame) => frame,
                Err(_) => Err(ActornetError::Timeout(deadline.as_millis() as u64)),
            },
        };

        if result.is_err() {
            self.close();
        }
        result
    }

    /// Closes the connection.
    ///
    /// Further writes fail with [`ActornetError::ConnectionClosed`]. Frames
    /// already queued are still flushed by the writer before the socket is
    /// shut down.
    pub fn close(&self) {
        if !self.closed.is_cancelled() {
            tracing::debug!(addr = %self.remote_addr, "closing connection");
        }
        self.closed.cancel();
    }

    pub fn is_connected(&self) -> bool {
        !self.closed.is_cancelled()
    }

    /// Resolves once the connection has been closed.
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn parser(&self) -> &MsgParser {
        &self.parser
    }
}

impl Drop for TcpConn {
    fn drop(&mut self) {
        self.closed.cancel();
    }
}

impl std::fmt::Debug for TcpConn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpConn")
            .field("local_addr", &self.local_addr)
            .field("remote_addr", &self.remote_addr)
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl ConnReader {
    async fn next_frame(&mut self) -> Result<Bytes> {
        loop {
            if let Some(frame) = self.decoder.decode(&mut self.buf)? {
                return Ok(frame);
            }

            let n = self.half.read_buf(&mut self.buf).await?;
            if n == 0 {
                return match self.decoder.decode_eof(&mut self.buf)? {
                    Some(frame) => Ok(frame),
                    None => Err(ActornetError::ConnectionClosed),
                };
            }
        }
    }
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut receiver: mpsc::Receiver<Bytes>,
    closed: CancellationToken,
    deadline: Duration,
    addr: SocketAddr,
) {
    loop {
        let frame = tokio::select! {
            biased;
            frame = receiver.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
            _ = closed.cancelled() => break,
        };

        if let Err(e) = write_frame(&mut writer, &frame, deadline).await {
            tracing::debug!(%addr, error = %e, "write failed");
            closed.cancel();
            return;
        }
    }

    // Flush whatever was queued before the close.
    receiver.close();
    while let Ok(frame) = receiver.try_recv() {
        if write_frame(&mut writer, &frame, deadline).await.is_err() {
            break;
        }
    }

    let _ = writer.shutdown().await;
    closed.cancel();
}

async fn write_frame(writer: &mut OwnedWriteHalf, frame: &[u8], deadline: Duration) -> Result<()> {
    match tokio::time::timeout(deadline, writer.write_all(frame)).await {
        Ok(written) => Ok(written?),
        Err(_) => Err(ActornetError::Timeout(deadline.as_millis() as u64)),
    }
}
