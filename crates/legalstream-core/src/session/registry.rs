//! Session registry: the single source of truth for which sessions exist.
//!
//! The map is only reachable through `create`, `lookup` and `remove`, all of
//! which run under one mutex. The mutex is never held across an await; the
//! slow part of `create` (opening the stream) runs after the id has been
//! reserved by inserting a handle in the `Opening` state.

use super::dispatcher::ReadDispatcher;
use super::handle::{SessionHandle, SessionState};
use crate::config::ServiceConfig;
use crate::error::{Result, StreamError};
use crate::models::InferenceResponse;
use crate::sink::ResponseSink;
use crate::transport::Channel;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// Registry of live duplex sessions keyed by session id.
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Arc<SessionHandle>>>,
    max_sessions: usize,
    sealed: AtomicBool,
}

impl SessionRegistry {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            max_sessions,
            sealed: AtomicBool::new(false),
        }
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<String, Arc<SessionHandle>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open a duplex stream for `session_id`, register it, and start its
    /// read dispatcher.
    ///
    /// Fails with `AlreadyExists` if the id is taken. If the stream cannot be
    /// opened the reservation is withdrawn and the error returned; the sink is
    /// never called in that case.
    pub async fn create(
        self: &Arc<Self>,
        channel: &dyn Channel,
        session_id: String,
        sink: Arc<dyn ResponseSink<InferenceResponse>>,
    ) -> Result<Arc<SessionHandle>> {
        let handle = SessionHandle::new(session_id.clone(), sink);

        // Holding the write path until the stream is live makes concurrent
        // senders wait for `Active` instead of observing a half-built session.
        let mut slot = handle.writer.lock().await;

        self.insert(&handle)?;

        let stream = match channel.open_duplex(ServiceConfig::BIDIRECTIONAL_STREAM).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Failed to open stream for session {}: {}", session_id, e);
                handle.mark_closed();
                self.remove(&session_id, &handle);
                drop(slot);
                handle.publish_terminal(e.to_status());
                return Err(e);
            }
        };

        *slot = Some(stream.writer);
        if handle
            .transition(&[SessionState::Opening], SessionState::Active)
            .is_none()
        {
            debug!("Session {} closed while opening", session_id);
        }

        let dispatcher = ReadDispatcher::new(handle.clone(), stream.reader, Arc::clone(self));
        handle.attach_task(tokio::spawn(dispatcher.run()));
        drop(slot);

        info!("Started bidirectional stream for session: {}", session_id);
        Ok(handle)
    }

    fn insert(&self, handle: &Arc<SessionHandle>) -> Result<()> {
        let mut sessions = self.sessions();
        if self.sealed.load(Ordering::SeqCst) {
            return Err(StreamError::Cancelled);
        }
        if sessions.contains_key(handle.id()) {
            return Err(StreamError::AlreadyExists {
                session_id: handle.id().to_string(),
            });
        }
        if sessions.len() >= self.max_sessions {
            return Err(StreamError::SessionLimitReached {
                limit: self.max_sessions,
            });
        }
        sessions.insert(handle.id().to_string(), Arc::clone(handle));
        Ok(())
    }

    /// Refuse every later `create` with `Cancelled`.
    ///
    /// Taken under the map lock, so a snapshot taken afterwards holds every
    /// session that will ever be registered.
    pub fn seal(&self) {
        let _sessions = self.sessions();
        self.sealed.store(true, Ordering::SeqCst);
    }

    /// Find a registered session.
    pub fn lookup(&self, session_id: &str) -> Result<Arc<SessionHandle>> {
        self.sessions()
            .get(session_id)
            .cloned()
            .ok_or_else(|| StreamError::NotFound {
                session_id: session_id.to_string(),
            })
    }

    /// Remove `session_id` if it still maps to `handle`.
    ///
    /// Idempotent, and a handle can only ever remove itself, never a newer
    /// session that reused the id.
    pub fn remove(&self, session_id: &str, handle: &Arc<SessionHandle>) -> bool {
        let mut sessions = self.sessions();
        match sessions.get(session_id) {
            Some(current) if Arc::ptr_eq(current, handle) => {
                sessions.remove(session_id);
                true
            }
            _ => false,
        }
    }

    /// Ids of every registered session.
    pub fn ids(&self) -> Vec<String> {
        self.sessions().keys().cloned().collect()
    }

    /// Handles of every registered session.
    pub fn snapshot(&self) -> Vec<Arc<SessionHandle>> {
        self.sessions().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.sessions().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::ChannelSink;
    use crate::transport::{MemoryChannel, Status};

    fn sink() -> Arc<dyn ResponseSink<InferenceResponse>> {
        let (sink, _rx) = ChannelSink::<InferenceResponse>::new();
        sink
    }

    #[tokio::test]
    async fn test_create_registers_active_session() {
        let (channel, mut acceptor) = MemoryChannel::new();
        let registry = Arc::new(SessionRegistry::new(8));

        let handle = registry
            .create(&channel, "s1".to_string(), sink())
            .await
            .unwrap();
        let peer = acceptor.accept().await.unwrap();

        assert_eq!(peer.method(), ServiceConfig::BIDIRECTIONAL_STREAM);
        assert_eq!(handle.state(), SessionState::Active);
        assert!(Arc::ptr_eq(&registry.lookup("s1").unwrap(), &handle));
        assert_eq!(registry.ids(), vec!["s1".to_string()]);

        peer.finish(Status::ok());
        handle.wait_closed().await;
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected() {
        let (channel, mut acceptor) = MemoryChannel::new();
        let registry = Arc::new(SessionRegistry::new(8));

        registry
            .create(&channel, "dup".to_string(), sink())
            .await
            .unwrap();
        let _peer = acceptor.accept().await.unwrap();

        let err = registry
            .create(&channel, "dup".to_string(), sink())
            .await
            .unwrap_err();
        assert!(matches!(err, StreamError::AlreadyExists { .. }));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_open_failure_leaves_no_entry() {
        let (channel, _acceptor) = MemoryChannel::new();
        channel.disconnect();
        let registry = Arc::new(SessionRegistry::new(8));

        let err = registry
            .create(&channel, "s1".to_string(), sink())
            .await
            .unwrap_err();
        assert!(matches!(err, StreamError::Transport { .. }));
        assert!(registry.is_empty());
        assert!(matches!(
            registry.lookup("s1"),
            Err(StreamError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_session_limit() {
        let (channel, _acceptor) = MemoryChannel::new();
        let registry = Arc::new(SessionRegistry::new(1));

        registry
            .create(&channel, "a".to_string(), sink())
            .await
            .unwrap();
        let err = registry
            .create(&channel, "b".to_string(), sink())
            .await
            .unwrap_err();
        assert!(matches!(err, StreamError::SessionLimitReached { limit: 1 }));
    }

    #[tokio::test]
    async fn test_sealed_registry_refuses_create() {
        let (channel, mut acceptor) = MemoryChannel::new();
        let registry = Arc::new(SessionRegistry::new(8));
        registry.seal();

        let err = registry
            .create(&channel, "late".to_string(), sink())
            .await
            .unwrap_err();
        assert!(matches!(err, StreamError::Cancelled));
        assert!(registry.is_empty());

        drop(channel);
        assert!(acceptor.accept().await.is_none());
    }

    #[test]
    fn test_remove_only_matching_handle() {
        let registry = SessionRegistry::new(8);
        let first = SessionHandle::new("s1", sink());
        let second = SessionHandle::new("s1", sink());

        registry.insert(&first).unwrap();
        assert!(!registry.remove("s1", &second));
        assert!(registry.remove("s1", &first));
        assert!(!registry.remove("s1", &first));
        assert!(registry.is_empty());
    }
}
