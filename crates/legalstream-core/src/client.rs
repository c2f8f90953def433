//! The streaming client: the public operation surface.
//!
//! Duplex sessions go through the [`SessionRegistry`]; one-shot operations go
//! through the job runner. Both share one [`Channel`].

use crate::codec;
use crate::config::{ClientConfig, ServiceConfig};
use crate::error::{Result, StreamError};
use crate::models::{
    validate_session_id, DocumentRequest, DocumentResponse, InferenceRequest,
    InferenceResponse, SearchRequest, SearchResponse, SimilarityRequest, SimilarityResponse,
};
use crate::runner::{JobHandle, JobTracker};
use crate::session::{SessionRegistry, SessionState};
use crate::sink::ResponseSink;
use crate::transport::{Channel, Status};
use bytes::Bytes;
use futures::future::join_all;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Multi-session streaming client bound to one remote endpoint.
pub struct StreamingClient {
    channel: Arc<dyn Channel>,
    registry: Arc<SessionRegistry>,
    jobs: Arc<JobTracker>,
    config: ClientConfig,
    shut_down: AtomicBool,
}

impl std::fmt::Debug for StreamingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingClient")
            .field("sessions", &self.registry.len())
            .field("jobs", &self.jobs.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl StreamingClient {
    pub fn new(channel: impl Channel) -> Self {
        Self::with_config(channel, ClientConfig::default())
    }

    pub fn with_config(channel: impl Channel, config: ClientConfig) -> Self {
        Self::from_shared(Arc::new(channel), config)
    }

    /// Build a client over a channel that is shared with something else.
    pub fn from_shared(channel: Arc<dyn Channel>, config: ClientConfig) -> Self {
        Self {
            channel,
            registry: Arc::new(SessionRegistry::new(config.max_sessions)),
            jobs: Arc::new(JobTracker::new()),
            config,
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn ensure_running(&self) -> Result<()> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(StreamError::Cancelled);
        }
        Ok(())
    }

    // ========================================
    // Duplex sessions
    // ========================================

    /// Open a duplex session under `session_id`, delivering its responses to `sink`.
    ///
    /// Returns the session id. Fails with `AlreadyExists` while a session with
    /// the same id is still registered; an id becomes reusable once its
    /// previous session has fully closed.
    pub async fn start_session(
        &self,
        session_id: impl Into<String>,
        sink: Arc<dyn ResponseSink<InferenceResponse>>,
    ) -> Result<String> {
        self.ensure_running()?;
        let session_id = session_id.into();
        validate_session_id(&session_id)?;

        self.registry
            .create(self.channel.as_ref(), session_id.clone(), sink)
            .await?;
        Ok(session_id)
    }

    /// Open a duplex session under a freshly generated id.
    pub async fn start_session_auto(
        &self,
        sink: Arc<dyn ResponseSink<InferenceResponse>>,
    ) -> Result<String> {
        let session_id = uuid::Uuid::new_v4().to_string();
        self.start_session(session_id, sink).await
    }

    /// Write one embedding chunk. With `is_final`, the session half-closes
    /// after this chunk and rejects further sends with `StreamHalfClosed`.
    pub async fn send_embedding_chunk(
        &self,
        session_id: &str,
        text: &str,
        is_final: bool,
    ) -> Result<()> {
        let request = InferenceRequest::embedding(
            session_id,
            text,
            is_final,
            self.config.default_acceleration.clone(),
        );
        self.send(session_id, codec::encode(&request)?, is_final)
            .await
    }

    /// Write one search vector. With `is_final`, the session half-closes
    /// after this message.
    pub async fn send_search_vector(
        &self,
        session_id: &str,
        vector: Vec<f32>,
        is_final: bool,
    ) -> Result<()> {
        let request = InferenceRequest::search(session_id, vector, is_final);
        self.send(session_id, codec::encode(&request)?, is_final)
            .await
    }

    async fn send(&self, session_id: &str, message: Bytes, is_final: bool) -> Result<()> {
        let handle = self.registry.lookup(session_id)?;
        match handle.send(message, is_final).await {
            Ok(()) => {
                debug!("Sent message on session {} (final: {})", session_id, is_final);
                Ok(())
            }
            Err(e) => {
                warn!("Send on session {} rejected: {}", session_id, e);
                Err(e)
            }
        }
    }

    /// Close a session and wait for its terminal status.
    ///
    /// The session's sink has received its completion by the time this
    /// returns. Fails for an unknown id and for a session that is already
    /// closing.
    pub async fn close_session(&self, session_id: &str) -> Result<Status> {
        let handle = self.registry.lookup(session_id)?;
        let status = handle.close().await?;
        info!("Closed session {}: {}", session_id, status);
        Ok(status)
    }

    /// Current state of a registered session.
    pub fn session_state(&self, session_id: &str) -> Option<SessionState> {
        self.registry.lookup(session_id).ok().map(|handle| handle.state())
    }

    /// Ids of every registered session, sorted.
    pub fn active_sessions(&self) -> Vec<String> {
        let mut ids = self.registry.ids();
        ids.sort();
        ids
    }

    // ========================================
    // One-shot jobs
    // ========================================

    /// Process one document, streaming progress and results into `sink`.
    pub async fn run_document_job(
        &self,
        document_id: &str,
        content: &str,
        document_type: &str,
        sink: Arc<dyn ResponseSink<DocumentResponse>>,
    ) -> Result<JobHandle> {
        self.ensure_running()?;
        let request = DocumentRequest::new(document_id, content, document_type);
        request.validate()?;
        self.jobs
            .start(
                self.channel.as_ref(),
                ServiceConfig::PROCESS_DOCUMENT,
                &request,
                sink,
            )
            .await
    }

    /// Search `collection` for documents matching `query`.
    pub async fn run_semantic_search(
        &self,
        query: &str,
        collection: &str,
        top_k: u32,
        sink: Arc<dyn ResponseSink<SearchResponse>>,
    ) -> Result<JobHandle> {
        self.ensure_running()?;
        let request = SearchRequest::new(query, collection, top_k);
        request.validate()?;
        self.jobs
            .start(
                self.channel.as_ref(),
                ServiceConfig::SEMANTIC_SEARCH,
                &request,
                sink,
            )
            .await
    }

    /// Compare `base_case_id` against each of `compare_case_ids`.
    pub async fn run_similarity_analysis(
        &self,
        base_case_id: &str,
        compare_case_ids: Vec<String>,
        sink: Arc<dyn ResponseSink<SimilarityResponse>>,
    ) -> Result<JobHandle> {
        self.ensure_running()?;
        let request = SimilarityRequest::new(base_case_id, compare_case_ids);
        request.validate()?;
        self.jobs
            .start(
                self.channel.as_ref(),
                ServiceConfig::CASE_SIMILARITY,
                &request,
                sink,
            )
            .await
    }

    pub fn outstanding_jobs(&self) -> usize {
        self.jobs.len()
    }

    // ========================================
    // Lifecycle
    // ========================================

    pub fn is_connected(&self) -> bool {
        !self.shut_down.load(Ordering::SeqCst) && self.channel.is_connected()
    }

    /// Close every session and cancel every job.
    ///
    /// Waits up to `shutdown_grace` for read loops to finish on their own,
    /// then aborts the rest and delivers their terminal signals. Every sink
    /// has seen its completion when this returns. Later calls are no-ops.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }

        // Nothing may register after the snapshot below.
        self.registry.seal();
        self.jobs.seal();

        let handles = self.registry.snapshot();
        info!(
            "Shutting down: {} sessions, {} jobs",
            handles.len(),
            self.jobs.len()
        );

        self.jobs.cancel_all();

        let graceful = async {
            join_all(handles.iter().map(|handle| async move {
                if let Err(e) = handle.close().await {
                    debug!("Session {} already closing: {}", handle.id(), e);
                    handle.wait_closed().await;
                }
            }))
            .await;
            self.jobs.wait_idle().await;
        };

        if tokio::time::timeout(self.config.shutdown_grace, graceful)
            .await
            .is_err()
        {
            warn!(
                "Shutdown grace period of {:?} elapsed, aborting remaining streams",
                self.config.shutdown_grace
            );
            for handle in self.registry.snapshot() {
                handle.abort("client shutdown").await;
                self.registry.remove(handle.id(), &handle);
            }
            self.jobs.abort_all("client shutdown").await;
        }

        info!("Shutdown complete");
    }
}
