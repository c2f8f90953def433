use legalstream_core::{ClientConfig, ResponseSink, StreamError, StreamingClient, TcpChannel};
use serde::Serialize;
use std::marker::PhantomData;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

// Core records that appear in FFI signatures
pub use legalstream_core::AccelerationOptions;

// =============================================================================
// FfiError: Simplified error type for the FFI boundary
// =============================================================================

/// FFI-friendly error type.
///
/// Flattened version of `StreamError`. Transport and remote failures carry
/// the status code name (`UNAVAILABLE`, `INTERNAL`, ...) as a string.
#[derive(Debug, Clone, uniffi::Error, thiserror::Error)]
pub enum FfiError {
    #[error("Session already exists: {session_id}")]
    AlreadyExists { session_id: String },

    #[error("Session not found: {session_id}")]
    NotFound { session_id: String },

    #[error("Session closed: {message}")]
    SessionClosed { message: String },

    #[error("Session limit reached: {message}")]
    LimitReached { message: String },

    #[error("Transport error ({code}): {message}")]
    Transport { code: String, message: String },

    #[error("Remote error ({code}): {message}")]
    Remote { code: String, message: String },

    #[error("Serialization error: {message}")]
    Serialization { message: String },

    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

impl From<StreamError> for FfiError {
    fn from(err: StreamError) -> Self {
        let code = err.status_code().as_str().to_string();
        match err {
            StreamError::AlreadyExists { session_id } => FfiError::AlreadyExists { session_id },
            StreamError::NotFound { session_id } => FfiError::NotFound { session_id },
            StreamError::SessionClosed { session_id } => FfiError::SessionClosed {
                message: session_id,
            },
            StreamError::StreamHalfClosed { session_id } => FfiError::SessionClosed {
                message: format!("{} is half-closed", session_id),
            },
            StreamError::SessionLimitReached { limit } => FfiError::LimitReached {
                message: format!("{} active sessions", limit),
            },
            StreamError::Transport { message, .. } => FfiError::Transport { code, message },
            StreamError::Io { message, .. } => FfiError::Transport { code, message },
            StreamError::RemoteTerminal { status } => FfiError::Remote {
                code,
                message: status.message,
            },
            StreamError::Json { message, .. } => FfiError::Serialization { message },
            StreamError::Validation { field, message } => FfiError::Validation {
                message: format!("{}: {}", field, message),
            },
            StreamError::Cancelled => FfiError::Cancelled,
            StreamError::Other(message) => FfiError::Other(message),
        }
    }
}

/// Result type for FFI operations.
pub type FfiResult<T> = Result<T, FfiError>;

// =============================================================================
// Host sinks
// =============================================================================

/// Callbacks implemented by the host for one session or job.
///
/// `on_message` receives each response as a JSON object. The stream ends
/// with `on_completion`, preceded by `on_error` if it failed.
#[uniffi::export(callback_interface)]
pub trait FfiResponseSink: Send + Sync {
    fn on_message(&self, json: String);
    fn on_error(&self, message: String);
    fn on_completion(&self);
}

/// Adapts a host sink to the core's typed sink interface.
struct JsonSink<M> {
    host: Box<dyn FfiResponseSink>,
    _message: PhantomData<fn(M)>,
}

impl<M: Serialize + 'static> JsonSink<M> {
    fn wrap(host: Box<dyn FfiResponseSink>) -> Arc<dyn ResponseSink<M>> {
        Arc::new(Self {
            host,
            _message: PhantomData,
        })
    }
}

impl<M: Serialize + 'static> ResponseSink<M> for JsonSink<M> {
    fn on_message(&self, message: M) {
        // Response records are plain data; encoding them cannot fail.
        if let Ok(json) = serde_json::to_string(&message) {
            self.host.on_message(json);
        }
    }

    fn on_error(&self, error: &StreamError) {
        self.host.on_error(error.to_string());
    }

    fn on_completion(&self) {
        self.host.on_completion();
    }
}

// =============================================================================
// FfiClientConfig: Configuration record for client construction
// =============================================================================

/// Configuration for creating an `FfiStreamingClient`.
#[derive(uniffi::Record)]
pub struct FfiClientConfig {
    /// Maximum number of concurrently registered sessions.
    pub max_sessions: u32,
    /// Milliseconds `shutdown` waits before aborting remaining streams.
    pub shutdown_grace_ms: u64,
    /// Accelerator options stamped on every embedding request.
    pub acceleration: AccelerationOptions,
}

impl From<FfiClientConfig> for ClientConfig {
    fn from(config: FfiClientConfig) -> Self {
        ClientConfig::default()
            .max_sessions(config.max_sessions as usize)
            .shutdown_grace(Duration::from_millis(config.shutdown_grace_ms))
            .default_acceleration(config.acceleration)
    }
}

fn parse_endpoint(endpoint: &str) -> FfiResult<SocketAddr> {
    endpoint.parse().map_err(|e| FfiError::Validation {
        message: format!("endpoint {:?}: {}", endpoint, e),
    })
}

// =============================================================================
// FfiStreamingClient: The client object exposed to foreign languages
// =============================================================================

/// Streaming client handle.
///
/// # Example (Python)
///
/// ```python
/// client = FfiStreamingClient.connect("127.0.0.1:50051")
/// session = await client.start_session("s1", MySink())
/// await client.send_embedding_chunk(session, "The lessee shall", True)
/// await client.close_session(session)
/// ```
#[derive(uniffi::Object)]
pub struct FfiStreamingClient {
    inner: StreamingClient,
}

#[uniffi::export(async_runtime = "tokio")]
impl FfiStreamingClient {
    /// Create a client for a `host:port` endpoint with default settings.
    #[uniffi::constructor]
    pub fn connect(endpoint: String) -> FfiResult<Arc<Self>> {
        let addr = parse_endpoint(&endpoint)?;
        Ok(Arc::new(Self {
            inner: StreamingClient::new(TcpChannel::new(addr)),
        }))
    }

    /// Create a client with a configuration record.
    #[uniffi::constructor]
    pub fn connect_with_config(endpoint: String, config: FfiClientConfig) -> FfiResult<Arc<Self>> {
        let addr = parse_endpoint(&endpoint)?;
        Ok(Arc::new(Self {
            inner: StreamingClient::with_config(TcpChannel::new(addr), config.into()),
        }))
    }

    // ========================================
    // Sessions
    // ========================================

    /// Open a duplex session. Returns the session id.
    pub async fn start_session(
        &self,
        session_id: String,
        sink: Box<dyn FfiResponseSink>,
    ) -> FfiResult<String> {
        self.inner
            .start_session(session_id, JsonSink::wrap(sink))
            .await
            .map_err(FfiError::from)
    }

    /// Open a duplex session under a generated id. Returns the id.
    pub async fn start_session_auto(&self, sink: Box<dyn FfiResponseSink>) -> FfiResult<String> {
        self.inner
            .start_session_auto(JsonSink::wrap(sink))
            .await
            .map_err(FfiError::from)
    }

    /// Send an embedding chunk. Returns `false` if the write was rejected.
    pub async fn send_embedding_chunk(&self, session_id: String, text: String, is_final: bool) -> bool {
        self.inner
            .send_embedding_chunk(&session_id, &text, is_final)
            .await
            .is_ok()
    }

    /// Send a search vector. Returns `false` if the write was rejected.
    pub async fn send_search_vector(
        &self,
        session_id: String,
        vector: Vec<f32>,
        is_final: bool,
    ) -> bool {
        self.inner
            .send_search_vector(&session_id, vector, is_final)
            .await
            .is_ok()
    }

    /// Close a session. Returns `false` for an unknown or already closing
    /// session, or when the stream ended with a failure.
    pub async fn close_session(&self, session_id: String) -> bool {
        match self.inner.close_session(&session_id).await {
            Ok(status) => status.is_ok(),
            Err(_) => false,
        }
    }

    /// Ids of every registered session.
    pub fn active_sessions(&self) -> Vec<String> {
        self.inner.active_sessions()
    }

    // ========================================
    // One-shot jobs
    // ========================================

    /// Process a document. Results arrive on `sink`.
    pub async fn run_document_job(
        &self,
        document_id: String,
        content: String,
        document_type: String,
        sink: Box<dyn FfiResponseSink>,
    ) -> FfiResult<()> {
        self.inner
            .run_document_job(&document_id, &content, &document_type, JsonSink::wrap(sink))
            .await
            .map(|_| ())
            .map_err(FfiError::from)
    }

    /// Run a semantic search. Result batches arrive on `sink`.
    pub async fn run_semantic_search(
        &self,
        query: String,
        collection: String,
        top_k: u32,
        sink: Box<dyn FfiResponseSink>,
    ) -> FfiResult<()> {
        self.inner
            .run_semantic_search(&query, &collection, top_k, JsonSink::wrap(sink))
            .await
            .map(|_| ())
            .map_err(FfiError::from)
    }

    /// Compare one case against others. Scores arrive on `sink`.
    pub async fn run_similarity_analysis(
        &self,
        base_case_id: String,
        compare_case_ids: Vec<String>,
        sink: Box<dyn FfiResponseSink>,
    ) -> FfiResult<()> {
        self.inner
            .run_similarity_analysis(&base_case_id, compare_case_ids, JsonSink::wrap(sink))
            .await
            .map(|_| ())
            .map_err(FfiError::from)
    }

    // ========================================
    // Lifecycle
    // ========================================

    pub fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    /// Close every session and cancel every job.
    pub async fn shutdown(&self) {
        self.inner.shutdown().await;
    }
}
