//! In-process loopback transport.
//!
//! Every stream opened on a [`MemoryChannel`] surfaces at its
//! [`MemoryAcceptor`] as a [`MemoryPeer`], which plays the remote service:
//! it sees client writes in order, sends responses, and ends the stream with
//! a terminal [`Status`].

use super::{Channel, DuplexStream, Status, StatusCode, StreamReader, StreamWriter};
use crate::error::{Result, StreamError};
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

/// Client side of the loopback transport.
#[derive(Debug, Clone)]
pub struct MemoryChannel {
    accept_tx: mpsc::UnboundedSender<MemoryPeer>,
    connected: Arc<AtomicBool>,
}

/// Receives the remote end of every stream opened on the paired channel.
#[derive(Debug)]
pub struct MemoryAcceptor {
    accept_rx: mpsc::UnboundedReceiver<MemoryPeer>,
}

impl MemoryChannel {
    /// Create a connected channel and the acceptor that serves it.
    pub fn new() -> (Self, MemoryAcceptor) {
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        (
            Self {
                accept_tx,
                connected: Arc::new(AtomicBool::new(true)),
            },
            MemoryAcceptor { accept_rx },
        )
    }

    /// Make subsequent opens fail with `Unavailable`. Open streams are unaffected.
    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    /// Undo [`disconnect`](Self::disconnect).
    pub fn reconnect(&self) {
        self.connected.store(true, Ordering::SeqCst);
    }

    fn open(&self, method: &str, request: Option<Bytes>) -> Result<(MemoryWriter, MemoryReader)> {
        if !self.is_connected() {
            return Err(StreamError::transport(Status::unavailable(
                "memory channel disconnected",
            )));
        }

        let (client_tx, peer_rx) = mpsc::unbounded_channel();
        let (peer_tx, client_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = oneshot::channel();

        let peer = MemoryPeer {
            method: method.to_string(),
            request,
            inbound: peer_rx,
            outbound: Some(peer_tx),
            status: Some(status_tx),
        };

        self.accept_tx.send(peer).map_err(|_| {
            StreamError::transport(Status::unavailable("memory acceptor dropped"))
        })?;

        debug!("Opened memory stream on {}", method);

        Ok((
            MemoryWriter {
                tx: Some(client_tx),
            },
            MemoryReader {
                rx: client_rx,
                status: status_rx,
            },
        ))
    }
}

#[async_trait::async_trait]
impl Channel for MemoryChannel {
    async fn open_duplex(&self, method: &str) -> Result<DuplexStream> {
        let (writer, reader) = self.open(method, None)?;
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
        // The writer is dropped here, so the peer sees its inbound side already closed.
        let (_writer, reader) = self.open(method, Some(request))?;
        Ok(Box::new(reader))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

impl MemoryAcceptor {
    /// Wait for the next opened stream. Returns `None` once every channel
    /// clone has been dropped.
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.accept_rx.recv().await
    }
}

/// Remote end of one loopback stream.
#[derive(Debug)]
pub struct MemoryPeer {
    method: String,
    request: Option<Bytes>,
    inbound: mpsc::UnboundedReceiver<Bytes>,
    outbound: Option<mpsc::UnboundedSender<Bytes>>,
    status: Option<oneshot::Sender<Status>>,
}

impl MemoryPeer {
    /// Method the client opened the stream on.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Request sent when the stream was opened as a response stream.
    pub fn request(&self) -> Option<&Bytes> {
        self.request.as_ref()
    }

    /// Next message written by the client, or `None` after it half-closed.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.inbound.recv().await
    }

    /// Send a message to the client. Returns `false` if the stream has ended.
    pub fn send(&self, message: impl Into<Bytes>) -> bool {
        match &self.outbound {
            Some(tx) => tx.send(message.into()).is_ok(),
            None => false,
        }
    }

    /// End the stream with a terminal status.
    pub fn finish(mut self, status: Status) {
        self.outbound.take();
        if let Some(tx) = self.status.take() {
            let _ = tx.send(status);
        }
    }
}

struct MemoryWriter {
    tx: Option<mpsc::UnboundedSender<Bytes>>,
}

#[async_trait::async_trait]
impl StreamWriter for MemoryWriter {
    async fn write(&mut self, message: Bytes) -> Result<()> {
        let tx = self.tx.as_ref().ok_or_else(|| {
            StreamError::transport(Status::new(
                StatusCode::FailedPrecondition,
                "write after half-close",
            ))
        })?;
        tx.send(message)
            .map_err(|_| StreamError::transport(Status::unavailable("memory peer closed")))
    }

    async fn half_close(&mut self) -> Result<()> {
        self.tx.take();
        Ok(())
    }
}

struct MemoryReader {
    rx: mpsc::UnboundedReceiver<Bytes>,
    status: oneshot::Receiver<Status>,
}

#[async_trait::async_trait]
impl StreamReader for MemoryReader {
    async fn read(&mut self) -> Result<Option<Bytes>> {
        Ok(self.rx.recv().await)
    }

    async fn finish(self: Box<Self>) -> Status {
        self.status
            .await
            .unwrap_or_else(|_| Status::unavailable("memory peer dropped without status"))
    }
}
