//! Framed TCP transport.
//!
//! Every stream gets its own TCP connection. Frames are length-prefixed:
//!
//! ```text
//! [u32 BE: len][u8 kind][payload of len - 1 bytes]
//! ```
//!
//! A stream starts with an `Open` frame (JSON `{method, response_stream}`),
//! carries `Message` frames in both directions, and the client ends its
//! direction with `HalfClose`. The server ends the stream with a single
//! `Status` frame (JSON [`Status`]). A response stream is a duplex stream
//! whose only client message is the request.
//!
//! Inbound frames are drained by a background task into a bounded channel,
//! which keeps [`StreamReader::read`] cancel-safe.

use super::{Channel, DuplexStream, Status, StatusCode, StreamReader, StreamWriter};
use crate::config::TransportConfig;
use crate::error::{Result, StreamError};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// Frame discriminator, the first byte after the length prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    Open = 1,
    Message = 2,
    HalfClose = 3,
    Status = 4,
}

impl TryFrom<u8> for FrameKind {
    type Error = StreamError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(FrameKind::Open),
            2 => Ok(FrameKind::Message),
            3 => Ok(FrameKind::HalfClose),
            4 => Ok(FrameKind::Status),
            other => Err(StreamError::Validation {
                field: "frame_kind".to_string(),
                message: format!("Unknown frame kind {}", other),
            }),
        }
    }
}

/// One decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: FrameKind,
    pub payload: Bytes,
}

/// Payload of the `Open` frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenFrame {
    pub method: String,
    #[serde(default)]
    pub response_stream: bool,
}

/// Read one frame.
///
/// Returns `None` on clean EOF (peer closed connection between frames). EOF
/// part-way through a frame is an error.
pub async fn read_frame<R: AsyncReadExt + Unpin>(reader: &mut R) -> Result<Option<Frame>> {
    let mut len_buf = [0u8; 4];
    let mut filled = 0;
    while filled < len_buf.len() {
        let n = reader.read(&mut len_buf[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("connection closed after {} of 4 length bytes", filled),
            )
            .into());
        }
        filled += n;
    }

    let len = u32::from_be_bytes(len_buf) as usize;

    if len == 0 || len > TransportConfig::MAX_FRAME_SIZE {
        return Err(StreamError::Validation {
            field: "frame".to_string(),
            message: format!(
                "Frame size {} outside 1..={}",
                len,
                TransportConfig::MAX_FRAME_SIZE
            ),
        });
    }

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;

    let kind = FrameKind::try_from(buf[0])?;
    let payload = Bytes::from(buf).slice(1..);

    Ok(Some(Frame { kind, payload }))
}

/// Write one frame and flush it.
pub async fn write_frame<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    kind: FrameKind,
    payload: &[u8],
) -> Result<()> {
    let len = payload.len() + 1;
    if len > TransportConfig::MAX_FRAME_SIZE {
        return Err(StreamError::Validation {
            field: "frame".to_string(),
            message: format!(
                "Frame size {} exceeds maximum {}",
                len,
                TransportConfig::MAX_FRAME_SIZE
            ),
        });
    }
    writer.write_all(&(len as u32).to_be_bytes()).await?;
    writer.write_u8(kind as u8).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

fn io_failure(context: &str, err: impl std::fmt::Display) -> StreamError {
    StreamError::transport(Status::unavailable(format!("{}: {}", context, err)))
}

/// Channel that opens one TCP connection per stream against a fixed endpoint.
#[derive(Debug)]
pub struct TcpChannel {
    addr: SocketAddr,
    connected: AtomicBool,
}

impl TcpChannel {
    /// Create a channel for `addr`. No connection is made until a stream opens.
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            connected: AtomicBool::new(true),
        }
    }

    /// Get the endpoint this channel connects to.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    async fn open(&self, method: &str, response_stream: bool) -> Result<(TcpWriter, TcpReader)> {
        let stream = tokio::time::timeout(
            TransportConfig::CONNECT_TIMEOUT,
            TcpStream::connect(self.addr),
        )
        .await
        .map_err(|_| {
            self.connected.store(false, Ordering::SeqCst);
            StreamError::transport(Status::new(
                StatusCode::DeadlineExceeded,
                format!("connect to {} timed out", self.addr),
            ))
        })?
        .map_err(|e| {
            self.connected.store(false, Ordering::SeqCst);
            io_failure(&format!("connect to {}", self.addr), e)
        })?;

        self.connected.store(true, Ordering::SeqCst);
        stream
            .set_nodelay(true)
            .map_err(|e| io_failure("set TCP_NODELAY", e))?;

        let (read_half, mut write_half) = stream.into_split();
        let open = serde_json::to_vec(&OpenFrame {
            method: method.to_string(),
            response_stream,
        })?;
        write_frame(&mut write_half, FrameKind::Open, &open)
            .await
            .map_err(|e| io_failure("send open frame", e))?;

        debug!("Opened TCP stream {} on {}", method, self.addr);

        Ok((
            TcpWriter {
                half: Some(write_half),
            },
            TcpReader::spawn(read_half),
        ))
    }
}

#[async_trait::async_trait]
impl Channel for TcpChannel {
    async fn open_duplex(&self, method: &str) -> Result<DuplexStream> {
        let (writer, reader) = self.open(method, false).await?;
        Ok(DuplexStream {
            writer: Box::new(writer),
            reader: Box::new(reader),
        })
    }

    async fn open_response_stream(
        &self,
        method: &str,
        request: Bytes,
    ) -> Result<Box<dyn StreamReader>> {
        let (mut writer, reader) = self.open(method, true).await?;
        writer.write(request).await?;
        writer.half_close().await?;
        Ok(Box::new(reader))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

struct TcpWriter {
    half: Option<OwnedWriteHalf>,
}

#[async_trait::async_trait]
impl StreamWriter for TcpWriter {
    async fn write(&mut self, message: Bytes) -> Result<()> {
        let half = self.half.as_mut().ok_or_else(|| {
            StreamError::transport(Status::new(
                StatusCode::FailedPrecondition,
                "write after half-close",
            ))
        })?;
        write_frame(half, FrameKind::Message, &message)
            .await
            .map_err(|e| io_failure("write message", e))
    }

    async fn half_close(&mut self) -> Result<()> {
        let Some(mut half) = self.half.take() else {
            return Ok(());
        };
        write_frame(&mut half, FrameKind::HalfClose, &[])
            .await
            .map_err(|e| io_failure("send half-close", e))?;
        half.shutdown()
            .await
            .map_err(|e| io_failure("shutdown write half", e))
    }
}

struct TcpReader {
    rx: mpsc::Receiver<Result<Bytes>>,
    status_rx: oneshot::Receiver<Status>,
    task: tokio::task::JoinHandle<()>,
}

impl TcpReader {
    fn spawn(read_half: OwnedReadHalf) -> Self {
        let (tx, rx) = mpsc::channel(TransportConfig::READ_BUFFER_FRAMES);
        let (status_tx, status_rx) = oneshot::channel();
        let task = tokio::spawn(Self::read_loop(read_half, tx, status_tx));
        Self {
            rx,
            status_rx,
            task,
        }
    }

    async fn read_loop(
        mut read_half: OwnedReadHalf,
        tx: mpsc::Sender<Result<Bytes>>,
        status_tx: oneshot::Sender<Status>,
    ) {
        loop {
            match read_frame(&mut read_half).await {
                Ok(Some(Frame {
                    kind: FrameKind::Message,
                    payload,
                })) => {
                    // A dropped receiver means the reader is finishing; keep
                    // draining until the status frame arrives.
                    let _ = tx.send(Ok(payload)).await;
                }
                Ok(Some(Frame {
                    kind: FrameKind::Status,
                    payload,
                })) => {
                    let status = serde_json::from_slice::<Status>(&payload).unwrap_or_else(|e| {
                        Status::internal(format!("Malformed status frame: {}", e))
                    });
                    let _ = status_tx.send(status);
                    return;
                }
                Ok(Some(frame)) => {
                    warn!("Unexpected {:?} frame from server", frame.kind);
                    let _ = tx
                        .send(Err(StreamError::transport(Status::internal(format!(
                            "unexpected {:?} frame",
                            frame.kind
                        )))))
                        .await;
                    return;
                }
                Ok(None) => return,
                Err(e) => {
                    let _ = tx.send(Err(io_failure("read frame", e))).await;
                    return;
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl StreamReader for TcpReader {
    async fn read(&mut self) -> Result<Option<Bytes>> {
        self.rx.recv().await.transpose()
    }

    async fn finish(mut self: Box<Self>) -> Status {
        // Unread messages are discarded; the socket task keeps going until
        // the status frame arrives.
        self.rx.close();

        match tokio::time::timeout(TransportConfig::FINISH_TIMEOUT, &mut self.status_rx).await {
            Ok(Ok(status)) => status,
            Ok(Err(_)) => Status::unavailable("connection closed without status"),
            Err(_) => Status::new(
                StatusCode::DeadlineExceeded,
                "timed out waiting for stream status",
            ),
        }
    }
}

impl Drop for TcpReader {
    fn drop(&mut self) {
        self.task.abort();
    }
}
