//! Duplex stream handle and its state machine.
//!
//! ```text
//! Opening -> Active -> HalfClosed -> Finishing -> Closed
//!              \__________\___________/
//!                 close / EOF / error
//! ```
//!
//! The state lives in one atomic so every transition is a single
//! compare-and-swap; whoever wins a transition owns its side effects.
//! The write path is a `tokio::sync::Mutex` around the transport writer,
//! held across the write so concurrent senders are serialized in FIFO order.

use crate::cancel::CancellationToken;
use crate::error::{Result, StreamError};
use crate::models::InferenceResponse;
use crate::sink::{Delivery, ResponseSink, TerminalGuard};
use crate::transport::{Status, StreamWriter};
use bytes::Bytes;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SessionState {
    /// Registered, stream not yet established.
    Opening = 0,
    /// Reads and writes flowing.
    Active = 1,
    /// Local side sent its final message; reads continue.
    HalfClosed = 2,
    /// Winding down; the terminal status is being collected.
    Finishing = 3,
    /// Terminal.
    Closed = 4,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::Opening,
            1 => SessionState::Active,
            2 => SessionState::HalfClosed,
            3 => SessionState::Finishing,
            _ => SessionState::Closed,
        }
    }

    /// Inbound messages may still be forwarded to the sink.
    pub fn is_open(&self) -> bool {
        matches!(self, SessionState::Active | SessionState::HalfClosed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Opening => "opening",
            SessionState::Active => "active",
            SessionState::HalfClosed => "half_closed",
            SessionState::Finishing => "finishing",
            SessionState::Closed => "closed",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One duplex session: its state, write path, and terminal bookkeeping.
///
/// The read path is not here; it is owned by the session's
/// [`ReadDispatcher`](super::dispatcher::ReadDispatcher).
pub struct SessionHandle {
    id: String,
    state: AtomicU8,
    pub(crate) writer: tokio::sync::Mutex<Option<Box<dyn StreamWriter>>>,
    pub(crate) cancel: CancellationToken,
    pub(crate) delivery: Arc<Delivery<InferenceResponse>>,
    failure: Mutex<Option<StreamError>>,
    terminal_tx: watch::Sender<Option<Status>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl SessionHandle {
    pub(crate) fn new(
        id: impl Into<String>,
        sink: Arc<dyn ResponseSink<InferenceResponse>>,
    ) -> Arc<Self> {
        let (terminal_tx, _) = watch::channel(None);
        Arc::new(Self {
            id: id.into(),
            state: AtomicU8::new(SessionState::Opening as u8),
            writer: tokio::sync::Mutex::new(None),
            cancel: CancellationToken::new(),
            delivery: Arc::new(Delivery::new(sink)),
            failure: Mutex::new(None),
            terminal_tx,
            task: Mutex::new(None),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Move to `to` if the current state is one of `from`.
    ///
    /// Returns the state that was replaced, or `None` if no transition happened.
    pub(crate) fn transition(&self, from: &[SessionState], to: SessionState) -> Option<SessionState> {
        let mut current = self.state.load(Ordering::SeqCst);
        loop {
            let state = SessionState::from_u8(current);
            if !from.contains(&state) {
                return None;
            }
            match self.state.compare_exchange(
                current,
                to as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => {
                    debug!("Session {}: {} -> {}", self.id, state, to);
                    return Some(state);
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// Write one encoded message; with `is_final`, half-close right after it.
    pub(crate) async fn send(&self, message: Bytes, is_final: bool) -> Result<()> {
        let mut slot = self.writer.lock().await;

        match self.state() {
            SessionState::Active => {}
            SessionState::HalfClosed => {
                return Err(StreamError::StreamHalfClosed {
                    session_id: self.id.clone(),
                })
            }
            _ => {
                return Err(StreamError::SessionClosed {
                    session_id: self.id.clone(),
                })
            }
        }

        let writer = slot.as_mut().ok_or_else(|| StreamError::SessionClosed {
            session_id: self.id.clone(),
        })?;

        if let Err(e) = writer.write(message).await {
            self.fail(&e);
            return Err(e);
        }

        if is_final && self
            .transition(&[SessionState::Active], SessionState::HalfClosed)
            .is_some()
        {
            if let Err(e) = writer.half_close().await {
                self.fail(&e);
                return Err(e);
            }
        }

        Ok(())
    }

    /// Record a write-path failure and wind the session down. The dispatcher
    /// reports the failure to the sink if the remote's status does not.
    fn fail(&self, error: &StreamError) {
        warn!("Session {} write failed: {}", self.id, error);
        {
            let mut failure = self.failure.lock().unwrap_or_else(PoisonError::into_inner);
            if failure.is_none() {
                *failure = Some(StreamError::transport(error.to_status()));
            }
        }
        self.transition(
            &[SessionState::Active, SessionState::HalfClosed],
            SessionState::Finishing,
        );
        self.cancel.cancel();
    }

    pub(crate) fn take_failure(&self) -> Option<StreamError> {
        self.failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Cooperative close: stop accepting writes, half-close the write path
    /// unless that already happened, and wait for the dispatcher to collect
    /// the terminal status.
    ///
    /// Fails with `SessionClosed` if the session is already winding down.
    pub(crate) async fn close(&self) -> Result<Status> {
        let previous = self
            .transition(
                &[
                    SessionState::Opening,
                    SessionState::Active,
                    SessionState::HalfClosed,
                ],
                SessionState::Finishing,
            )
            .ok_or_else(|| StreamError::SessionClosed {
                session_id: self.id.clone(),
            })?;

        if previous != SessionState::HalfClosed {
            let mut slot = self.writer.lock().await;
            if let Some(writer) = slot.as_mut() {
                if let Err(e) = writer.half_close().await {
                    debug!("Session {} half-close during close failed: {}", self.id, e);
                }
            }
        }

        self.cancel.cancel();
        Ok(self.wait_closed().await)
    }

    /// Wait until the session has published its terminal status.
    pub async fn wait_closed(&self) -> Status {
        let mut rx = self.terminal_tx.subscribe();
        let result = rx.wait_for(|status| status.is_some()).await;
        match result {
            Ok(status) => status.clone().unwrap_or_else(Status::ok),
            Err(_) => Status::cancelled("session dropped before finishing"),
        }
    }

    /// Drop the transport writer, releasing the write half.
    pub(crate) async fn release_writer(&self) {
        self.writer.lock().await.take();
    }

    pub(crate) fn mark_closed(&self) {
        self.state
            .store(SessionState::Closed as u8, Ordering::SeqCst);
    }

    pub(crate) fn publish_terminal(&self, status: Status) {
        self.terminal_tx.send_replace(Some(status));
    }

    pub(crate) fn attach_task(&self, task: JoinHandle<()>) {
        *self.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(task);
    }

    /// Forced teardown: abort the read loop and deliver the terminal signals
    /// on its behalf if it had not already.
    pub(crate) async fn abort(&self, reason: &str) -> Status {
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.abort();
            let _ = task.await;
        }

        let status = Status::cancelled(reason);
        if self
            .delivery
            .terminate(Some(StreamError::transport(status.clone())))
        {
            warn!("Session {} aborted: {}", self.id, reason);
        }

        if let Ok(mut slot) = self.writer.try_lock() {
            slot.take();
        }
        self.mark_closed();
        if self.terminal_tx.borrow().is_none() {
            self.publish_terminal(status.clone());
        }
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::ChannelSink;

    fn handle() -> Arc<SessionHandle> {
        let (sink, _rx) = ChannelSink::<InferenceResponse>::new();
        SessionHandle::new("s1", sink)
    }

    #[test]
    fn test_new_handle_is_opening() {
        let handle = handle();
        assert_eq!(handle.state(), SessionState::Opening);
        assert_eq!(handle.id(), "s1");
    }

    #[test]
    fn test_transition_only_from_listed_states() {
        let handle = handle();
        assert_eq!(
            handle.transition(&[SessionState::Opening], SessionState::Active),
            Some(SessionState::Opening)
        );
        assert_eq!(
            handle.transition(&[SessionState::Opening], SessionState::Closed),
            None
        );
        assert_eq!(handle.state(), SessionState::Active);
    }

    #[test]
    fn test_open_states() {
        assert!(SessionState::Active.is_open());
        assert!(SessionState::HalfClosed.is_open());
        assert!(!SessionState::Opening.is_open());
        assert!(!SessionState::Finishing.is_open());
        assert!(!SessionState::Closed.is_open());
    }

    #[tokio::test]
    async fn test_send_before_active_is_rejected() {
        let handle = handle();
        handle.mark_closed();
        let err = handle.send(Bytes::from_static(b"{}"), false).await.unwrap_err();
        assert!(matches!(err, StreamError::SessionClosed { .. }));
    }

    #[tokio::test]
    async fn test_second_close_fails() {
        let handle = handle();
        handle.transition(&[SessionState::Opening], SessionState::Active);
        handle.publish_terminal(Status::ok());

        assert!(handle.close().await.unwrap().is_ok());
        assert!(matches!(
            handle.close().await,
            Err(StreamError::SessionClosed { .. })
        ));
    }
}
