//! Transport abstraction for the remote service.
//!
//! The client never builds a channel itself; a host hands it something that
//! implements [`Channel`]. Two implementations ship with the crate:
//!
//! - **Memory**: in-process loopback, the remote end is driven by a [`MemoryPeer`]
//! - **Tcp**: one TCP connection per stream with length-prefixed frames
//!
//! Messages cross this seam as opaque [`Bytes`]; encoding is the client's job.

pub mod memory;
pub mod tcp;

pub use memory::{MemoryAcceptor, MemoryChannel, MemoryPeer};
pub use tcp::TcpChannel;

use crate::error::Result;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Terminal status codes, mirroring the gRPC code space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "uniffi", derive(uniffi::Enum))]
pub enum StatusCode {
    Ok,
    Cancelled,
    Unknown,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    AlreadyExists,
    ResourceExhausted,
    FailedPrecondition,
    Aborted,
    Unavailable,
    Internal,
}

impl StatusCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusCode::Ok => "OK",
            StatusCode::Cancelled => "CANCELLED",
            StatusCode::Unknown => "UNKNOWN",
            StatusCode::InvalidArgument => "INVALID_ARGUMENT",
            StatusCode::DeadlineExceeded => "DEADLINE_EXCEEDED",
            StatusCode::NotFound => "NOT_FOUND",
            StatusCode::AlreadyExists => "ALREADY_EXISTS",
            StatusCode::ResourceExhausted => "RESOURCE_EXHAUSTED",
            StatusCode::FailedPrecondition => "FAILED_PRECONDITION",
            StatusCode::Aborted => "ABORTED",
            StatusCode::Unavailable => "UNAVAILABLE",
            StatusCode::Internal => "INTERNAL",
        }
    }
}

/// Final outcome of a stream, obtainable exactly once after it ends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "uniffi", derive(uniffi::Record))]
pub struct Status {
    pub code: StatusCode,
    #[serde(default)]
    pub message: String,
}

impl Status {
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn ok() -> Self {
        Self::new(StatusCode::Ok, "")
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Cancelled, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Unavailable, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Internal, message)
    }

    pub fn is_ok(&self) -> bool {
        self.code == StatusCode::Ok
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.message.is_empty() {
            write!(f, "status {}", self.code.as_str())
        } else {
            write!(f, "status {}: {}", self.code.as_str(), self.message)
        }
    }
}

/// Write half of a stream.
#[async_trait::async_trait]
pub trait StreamWriter: Send {
    /// Write one encoded message. Callers serialize access; a writer is never
    /// driven by two tasks at once.
    async fn write(&mut self, message: Bytes) -> Result<()>;

    /// Announce that no further messages follow. Calling it again is a no-op.
    async fn half_close(&mut self) -> Result<()>;
}

/// Read half of a stream.
#[async_trait::async_trait]
pub trait StreamReader: Send {
    /// Next inbound message, or `None` once the remote has ended the stream.
    ///
    /// Must be cancel-safe: dropping the future before it completes loses no
    /// message.
    async fn read(&mut self) -> Result<Option<Bytes>>;

    /// Obtain the terminal status. Consumes the reader, so the status is
    /// fetched exactly once.
    async fn finish(self: Box<Self>) -> Status;
}

/// Both halves of a freshly opened duplex stream.
pub struct DuplexStream {
    pub writer: Box<dyn StreamWriter>,
    pub reader: Box<dyn StreamReader>,
}

impl std::fmt::Debug for DuplexStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DuplexStream").finish_non_exhaustive()
    }
}

/// An RPC channel to a single remote service endpoint.
#[async_trait::async_trait]
pub trait Channel: Send + Sync + 'static {
    /// Open a bidirectional stream on `method`.
    async fn open_duplex(&self, method: &str) -> Result<DuplexStream>;

    /// Send one request on `method` and open the stream of its responses.
    async fn open_response_stream(
        &self,
        method: &str,
        request: Bytes,
    ) -> Result<Box<dyn StreamReader>>;

    /// Whether the channel currently believes the endpoint is reachable.
    fn is_connected(&self) -> bool;
}
