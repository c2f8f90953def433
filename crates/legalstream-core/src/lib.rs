//! LegalStream Core - multi-session bidirectional streaming client for the
//! legal inference service.
//!
//! The client multiplexes many concurrent duplex sessions over one
//! [`Channel`], delivering inbound messages to a per-session
//! [`ResponseSink`] while each session keeps an ordered write path of its
//! own. One-shot operations (document processing, semantic search, case
//! similarity) run as jobs that stream their responses into a per-call sink.
//!
//! # Example
//!
//! ```rust,ignore
//! use legalstream_core::{ChannelSink, InferenceResponse, StreamingClient, TcpChannel};
//!
//! #[tokio::main]
//! async fn main() -> legalstream_core::Result<()> {
//!     let client = StreamingClient::new(TcpChannel::new("127.0.0.1:50051".parse().unwrap()));
//!
//!     let (sink, mut events) = ChannelSink::<InferenceResponse>::new();
//!     let session = client.start_session("s1", sink).await?;
//!     client.send_embedding_chunk(&session, "The parties agree", false).await?;
//!     client.send_embedding_chunk(&session, "to the following terms.", true).await?;
//!
//!     while let Some(event) = events.recv().await {
//!         println!("{:?}", event);
//!     }
//!     Ok(())
//! }
//! ```

// UniFFI scaffolding - generates the FFI type registry when uniffi feature is enabled
#[cfg(feature = "uniffi")]
uniffi::setup_scaffolding!();

pub mod cancel;
pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod models;
pub mod runner;
pub mod session;
pub mod sink;
pub mod transport;

pub use cancel::CancellationToken;
pub use client::StreamingClient;
pub use config::{ClientConfig, ServiceConfig, SessionConfig, TransportConfig};
pub use error::{Result, StreamError};
pub use models::{
    AccelerationOptions, AcceleratorMetrics, DocumentRequest, DocumentResponse,
    InferenceRequest, InferenceResponse, OperationType, ProcessingFlags, SearchFilters,
    SearchHit, SearchRequest, SearchResponse, SimilarityMetrics, SimilarityRequest,
    SimilarityResponse,
};
pub use runner::JobHandle;
pub use session::SessionState;
pub use sink::{ChannelSink, FnSink, ResponseSink, SinkEvent};
pub use transport::{
    Channel, MemoryAcceptor, MemoryChannel, MemoryPeer, Status, StatusCode, StreamReader,
    StreamWriter, TcpChannel,
};
