//! Response sinks.
//!
//! A sink is the consumer side of a session or one-shot job. The client calls
//! `on_message` once per decoded inbound message, in arrival order, and then
//! exactly once either `on_error` followed by `on_completion`, or
//! `on_completion` alone. Sinks are invoked from the background read task,
//! so they must not block for long.

use crate::error::StreamError;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;

/// Consumer of one stream's messages and terminal signals.
pub trait ResponseSink<M>: Send + Sync + 'static {
    /// A decoded inbound message.
    fn on_message(&self, message: M);

    /// The stream ended with a failure. Always followed by `on_completion`.
    fn on_error(&self, error: &StreamError);

    /// The stream is over. Called exactly once.
    fn on_completion(&self);
}

/// Event forwarded by a [`ChannelSink`].
#[derive(Debug, Clone, PartialEq)]
pub enum SinkEvent<M> {
    Message(M),
    Error(String),
    Completed,
}

/// Sink that forwards every signal into an unbounded tokio channel.
#[derive(Debug)]
pub struct ChannelSink<M> {
    tx: mpsc::UnboundedSender<SinkEvent<M>>,
}

impl<M: Send + 'static> ChannelSink<M> {
    /// Create a sink and the receiver its events arrive on.
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<SinkEvent<M>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

impl<M: Send + 'static> ResponseSink<M> for ChannelSink<M> {
    fn on_message(&self, message: M) {
        let _ = self.tx.send(SinkEvent::Message(message));
    }

    fn on_error(&self, error: &StreamError) {
        let _ = self.tx.send(SinkEvent::Error(error.to_string()));
    }

    fn on_completion(&self) {
        let _ = self.tx.send(SinkEvent::Completed);
    }
}

type MessageFn<M> = Box<dyn Fn(M) + Send + Sync>;
type ErrorFn = Box<dyn Fn(&StreamError) + Send + Sync>;
type CompletionFn = Box<dyn Fn() + Send + Sync>;

/// Sink built from closures. Unset callbacks are ignored.
pub struct FnSink<M> {
    on_message: Option<MessageFn<M>>,
    on_error: Option<ErrorFn>,
    on_completion: Option<CompletionFn>,
}

impl<M> Default for FnSink<M> {
    fn default() -> Self {
        Self {
            on_message: None,
            on_error: None,
            on_completion: None,
        }
    }
}

impl<M> FnSink<M> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_message(mut self, f: impl Fn(M) + Send + Sync + 'static) -> Self {
        self.on_message = Some(Box::new(f));
        self
    }

    pub fn on_error(mut self, f: impl Fn(&StreamError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }

    pub fn on_completion(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_completion = Some(Box::new(f));
        self
    }
}

impl<M: 'static> ResponseSink<M> for FnSink<M> {
    fn on_message(&self, message: M) {
        if let Some(f) = &self.on_message {
            f(message);
        }
    }

    fn on_error(&self, error: &StreamError) {
        if let Some(f) = &self.on_error {
            f(error);
        }
    }

    fn on_completion(&self) {
        if let Some(f) = &self.on_completion {
            f();
        }
    }
}

/// Type-erased access to a delivery's terminal transition, used when a
/// read loop is aborted and someone else must deliver its completion.
pub(crate) trait TerminalGuard: Send + Sync {
    /// Deliver the terminal signals unless they were already delivered.
    fn terminate(&self, error: Option<StreamError>) -> bool;
}

/// Wraps a caller's sink and enforces the delivery contract: no message after
/// the terminal signal, and the terminal signal exactly once.
pub(crate) struct Delivery<M> {
    sink: Arc<dyn ResponseSink<M>>,
    // Held while calling into the sink so a message and the terminal signal
    // can never interleave.
    terminated: Mutex<bool>,
}

impl<M: 'static> Delivery<M> {
    pub(crate) fn new(sink: Arc<dyn ResponseSink<M>>) -> Self {
        Self {
            sink,
            terminated: Mutex::new(false),
        }
    }

    /// Forward one message. Returns `false` once the delivery has terminated.
    pub(crate) fn deliver(&self, message: M) -> bool {
        let terminated = self
            .terminated
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if *terminated {
            return false;
        }
        self.sink.on_message(message);
        true
    }
}

impl<M: Send + 'static> TerminalGuard for Delivery<M> {
    fn terminate(&self, error: Option<StreamError>) -> bool {
        let mut terminated = self
            .terminated
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if *terminated {
            return false;
        }
        *terminated = true;
        if let Some(error) = error {
            self.sink.on_error(&error);
        }
        self.sink.on_completion();
        true
    }
}
