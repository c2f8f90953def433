//! Per-session read dispatcher and the read loop it shares with one-shot jobs.
//!
//! The loop reads until end-of-stream, a read or decode error, or
//! cancellation, forwarding each decoded message to the sink. Afterwards the
//! terminal status is fetched once (the reader is consumed by `finish`), a
//! failure is reported through `on_error`, and `on_completion` fires.

use super::handle::{SessionHandle, SessionState};
use super::registry::SessionRegistry;
use crate::cancel::CancellationToken;
use crate::codec;
use crate::error::StreamError;
use crate::sink::{Delivery, TerminalGuard};
use crate::transport::{Status, StreamReader};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Why a read loop stopped.
#[derive(Debug)]
pub(crate) enum LoopExit {
    EndOfStream,
    Cancelled,
    Failed(StreamError),
}

/// Drain `reader` into `delivery` until the stream ends or `cancel` fires.
///
/// `accepting` is consulted before each forward; once it returns `false` the
/// message in hand is dropped and the loop stops.
pub(crate) async fn drain<M, F>(
    reader: &mut Box<dyn StreamReader>,
    delivery: &Delivery<M>,
    cancel: &CancellationToken,
    accepting: F,
    label: &str,
) -> LoopExit
where
    M: DeserializeOwned + 'static,
    F: Fn() -> bool,
{
    let mut forwarded: u64 = 0;
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return LoopExit::Cancelled,
            next = reader.read() => next,
        };

        match next {
            Ok(Some(bytes)) => {
                let message = match codec::decode::<M>(&bytes) {
                    Ok(message) => message,
                    Err(e) => return LoopExit::Failed(e),
                };
                if !accepting() || !delivery.deliver(message) {
                    debug!("{}: dropping message after close began", label);
                    return LoopExit::Cancelled;
                }
                forwarded += 1;
            }
            Ok(None) => {
                debug!("{}: end of stream after {} messages", label, forwarded);
                return LoopExit::EndOfStream;
            }
            Err(e) => return LoopExit::Failed(e),
        }
    }
}

/// Fetch the terminal status and deliver the terminal signals.
///
/// A non-success status is reported as `RemoteTerminal`; otherwise a local
/// failure from the loop is reported. Returns the effective status.
pub(crate) async fn conclude<M: Send + 'static>(
    reader: Box<dyn StreamReader>,
    delivery: &Delivery<M>,
    exit: LoopExit,
    label: &str,
) -> Status {
    let status = reader.finish().await;

    let (effective, error) = if !status.is_ok() {
        (
            status.clone(),
            Some(StreamError::RemoteTerminal {
                status: status.clone(),
            }),
        )
    } else if let LoopExit::Failed(e) = exit {
        (e.to_status(), Some(e))
    } else {
        (status, None)
    };

    if let Some(e) = &error {
        warn!("{} ended with error: {}", label, e);
    }
    delivery.terminate(error);
    effective
}

/// Background reader for one duplex session.
pub(crate) struct ReadDispatcher {
    handle: Arc<SessionHandle>,
    reader: Box<dyn StreamReader>,
    registry: Arc<SessionRegistry>,
}

impl ReadDispatcher {
    pub(crate) fn new(
        handle: Arc<SessionHandle>,
        reader: Box<dyn StreamReader>,
        registry: Arc<SessionRegistry>,
    ) -> Self {
        Self {
            handle,
            reader,
            registry,
        }
    }

    pub(crate) async fn run(self) {
        let ReadDispatcher {
            handle,
            mut reader,
            registry,
        } = self;
        let label = format!("session {}", handle.id());

        let exit = drain(
            &mut reader,
            &handle.delivery,
            &handle.cancel,
            || handle.state().is_open(),
            &label,
        )
        .await;

        // Remote EOF or a read error: stop accepting writes.
        handle.transition(
            &[
                SessionState::Opening,
                SessionState::Active,
                SessionState::HalfClosed,
            ],
            SessionState::Finishing,
        );
        handle.release_writer().await;

        let exit = match (exit, handle.take_failure()) {
            (LoopExit::Failed(e), _) => LoopExit::Failed(e),
            (_, Some(write_failure)) => LoopExit::Failed(write_failure),
            (exit, None) => exit,
        };

        let status = conclude(reader, &handle.delivery, exit, &label).await;

        handle.mark_closed();
        registry.remove(handle.id(), &handle);
        handle.publish_terminal(status.clone());

        info!("Closed stream for session: {} ({})", handle.id(), status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::InferenceResponse;
    use crate::sink::{ChannelSink, ResponseSink, SinkEvent};
    use crate::transport::{Channel, MemoryChannel, StatusCode};

    async fn open_reader(
        channel: &MemoryChannel,
        acceptor: &mut crate::transport::MemoryAcceptor,
    ) -> (Box<dyn StreamReader>, crate::transport::MemoryPeer) {
        let stream = channel.open_duplex("/svc/Stream").await.unwrap();
        let peer = acceptor.accept().await.unwrap();
        (stream.reader, peer)
    }

    fn message(n: i32) -> bytes::Bytes {
        codec::encode(&InferenceResponse {
            session_id: "s1".into(),
            status: n,
            ..Default::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_drain_forwards_in_order_then_completes() {
        let (channel, mut acceptor) = MemoryChannel::new();
        let (mut reader, peer) = open_reader(&channel, &mut acceptor).await;
        let (sink, mut rx) = ChannelSink::<InferenceResponse>::new();
        let delivery = Delivery::new(sink as Arc<dyn ResponseSink<InferenceResponse>>);

        for n in 0..3 {
            assert!(peer.send(message(n)));
        }
        peer.finish(Status::ok());

        let exit = drain(&mut reader, &delivery, &CancellationToken::new(), || true, "t").await;
        assert!(matches!(exit, LoopExit::EndOfStream));
        let status = conclude(reader, &delivery, exit, "t").await;
        assert!(status.is_ok());

        for n in 0..3 {
            match rx.recv().await.unwrap() {
                SinkEvent::Message(m) => assert_eq!(m.status, n),
                other => panic!("expected message, got {:?}", other),
            }
        }
        assert_eq!(rx.recv().await.unwrap(), SinkEvent::Completed);
    }

    #[tokio::test]
    async fn test_remote_error_reported_before_completion() {
        let (channel, mut acceptor) = MemoryChannel::new();
        let (mut reader, peer) = open_reader(&channel, &mut acceptor).await;
        let (sink, mut rx) = ChannelSink::<InferenceResponse>::new();
        let delivery = Delivery::new(sink as Arc<dyn ResponseSink<InferenceResponse>>);

        peer.finish(Status::internal("gpu fault"));

        let exit = drain(&mut reader, &delivery, &CancellationToken::new(), || true, "t").await;
        let status = conclude(reader, &delivery, exit, "t").await;
        assert_eq!(status.code, StatusCode::Internal);

        match rx.recv().await.unwrap() {
            SinkEvent::Error(message) => assert!(message.contains("gpu fault")),
            other => panic!("expected error, got {:?}", other),
        }
        assert_eq!(rx.recv().await.unwrap(), SinkEvent::Completed);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_decode_failure_reported_once() {
        let (channel, mut acceptor) = MemoryChannel::new();
        let (mut reader, peer) = open_reader(&channel, &mut acceptor).await;
        let (sink, mut rx) = ChannelSink::<InferenceResponse>::new();
        let delivery = Delivery::new(sink as Arc<dyn ResponseSink<InferenceResponse>>);

        assert!(peer.send(bytes::Bytes::from_static(b"garbage")));
        peer.finish(Status::ok());

        let exit = drain(&mut reader, &delivery, &CancellationToken::new(), || true, "t").await;
        assert!(matches!(exit, LoopExit::Failed(StreamError::Json { .. })));
        let status = conclude(reader, &delivery, exit, "t").await;
        assert_eq!(status.code, StatusCode::InvalidArgument);

        assert!(matches!(rx.recv().await.unwrap(), SinkEvent::Error(_)));
        assert_eq!(rx.recv().await.unwrap(), SinkEvent::Completed);
    }

    #[tokio::test]
    async fn test_cancelled_loop_stops_without_forwarding() {
        let (channel, mut acceptor) = MemoryChannel::new();
        let (mut reader, peer) = open_reader(&channel, &mut acceptor).await;
        let (sink, mut rx) = ChannelSink::<InferenceResponse>::new();
        let delivery = Delivery::new(sink as Arc<dyn ResponseSink<InferenceResponse>>);

        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(peer.send(message(1)));

        let exit = drain(&mut reader, &delivery, &cancel, || true, "t").await;
        assert!(matches!(exit, LoopExit::Cancelled));

        peer.finish(Status::ok());
        assert!(conclude(reader, &delivery, exit, "t").await.is_ok());
        assert_eq!(rx.recv().await.unwrap(), SinkEvent::Completed);
    }
}
