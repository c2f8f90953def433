//! Centralized configuration for the streaming client.
//!
//! Compile-time constants live on unit structs grouped by concern; runtime
//! knobs a host may want to change live on [`ClientConfig`].

use crate::models::AccelerationOptions;
use std::time::Duration;

/// Remote service method names.
pub struct ServiceConfig;

impl ServiceConfig {
    pub const BIDIRECTIONAL_STREAM: &'static str =
        "/legal_cuda_streaming.LegalCudaService/BidirectionalLegalStream";
    pub const PROCESS_DOCUMENT: &'static str =
        "/legal_cuda_streaming.LegalCudaService/ProcessLegalDocument";
    pub const SEMANTIC_SEARCH: &'static str =
        "/legal_cuda_streaming.LegalCudaService/StreamSemanticSearch";
    pub const CASE_SIMILARITY: &'static str =
        "/legal_cuda_streaming.LegalCudaService/AnalyzeCaseSimilarity";

    /// Document type that additionally requests clause detection.
    pub const CONTRACT_DOCUMENT_TYPE: &'static str = "contract";
}

/// Session registry limits and teardown timing.
pub struct SessionConfig;

impl SessionConfig {
    /// Default cap on concurrently registered duplex sessions.
    pub const MAX_ACTIVE_SESSIONS: usize = 1024;
    /// Default time `shutdown` waits for read loops before aborting them.
    pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);
    pub const MAX_SESSION_ID_LEN: usize = 256;
}

/// Framed TCP transport configuration.
pub struct TransportConfig;

impl TransportConfig {
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
    /// How long `finish` waits for the remote's status frame.
    pub const FINISH_TIMEOUT: Duration = Duration::from_secs(10);
    pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024; // 16MB
    /// Inbound frames buffered per stream before the socket reader waits.
    pub const READ_BUFFER_FRAMES: usize = 64;
}

/// Runtime configuration for a [`StreamingClient`](crate::StreamingClient).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Maximum number of sessions registered at once.
    pub max_sessions: usize,
    /// How long `shutdown` waits before aborting remaining read loops.
    pub shutdown_grace: Duration,
    /// Accelerator options stamped on every embedding request.
    pub default_acceleration: AccelerationOptions,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_sessions: SessionConfig::MAX_ACTIVE_SESSIONS,
            shutdown_grace: SessionConfig::SHUTDOWN_GRACE,
            default_acceleration: AccelerationOptions::default(),
        }
    }
}

impl ClientConfig {
    pub fn max_sessions(mut self, max_sessions: usize) -> Self {
        self.max_sessions = max_sessions;
        self
    }

    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn default_acceleration(mut self, options: AccelerationOptions) -> Self {
        self.default_acceleration = options;
        self
    }
}
