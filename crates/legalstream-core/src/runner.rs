//! One-shot request runner.
//!
//! Sends a single request, then drains its response stream into the
//! caller's sink on a background task. There is no registry entry and no
//! write path to coordinate. A failed run is reported once and never retried.

use crate::cancel::CancellationToken;
use crate::codec;
use crate::error::{Result, StreamError};
use crate::session::dispatcher::{conclude, drain, LoopExit};
use crate::sink::{Delivery, ResponseSink, TerminalGuard};
use crate::transport::{Channel, Status};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Handle to an outstanding one-shot job.
#[derive(Debug, Clone)]
pub struct JobHandle {
    id: u64,
    cancel: CancellationToken,
    terminal: watch::Receiver<Option<Status>>,
}

impl JobHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Stop the job without waiting for the remote. Its sink receives the
    /// completion and [`wait`](Self::wait) yields a `Cancelled` status.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.terminal.borrow().is_some()
    }

    /// Wait for the job's effective terminal status.
    pub async fn wait(&self) -> Status {
        let mut rx = self.terminal.clone();
        let result = rx.wait_for(|status| status.is_some()).await;
        match result {
            Ok(status) => status.clone().unwrap_or_else(Status::ok),
            Err(_) => Status::cancelled("job dropped before finishing"),
        }
    }
}

struct TrackedJob {
    cancel: CancellationToken,
    guard: Arc<dyn TerminalGuard>,
    terminal_tx: watch::Sender<Option<Status>>,
    task: JoinHandle<()>,
}

/// Outstanding one-shot jobs, so shutdown can reach them.
#[derive(Default)]
pub(crate) struct JobTracker {
    next_id: AtomicU64,
    jobs: Mutex<HashMap<u64, TrackedJob>>,
    sealed: AtomicBool,
}

impl JobTracker {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn jobs(&self) -> MutexGuard<'_, HashMap<u64, TrackedJob>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn len(&self) -> usize {
        self.jobs().len()
    }

    /// Send `request` on `method` and start draining the responses into `sink`.
    ///
    /// Encoding and stream-open failures are returned here and the sink is
    /// not called.
    pub(crate) async fn start<Req, M>(
        self: &Arc<Self>,
        channel: &dyn Channel,
        method: &'static str,
        request: &Req,
        sink: Arc<dyn ResponseSink<M>>,
    ) -> Result<JobHandle>
    where
        Req: Serialize,
        M: DeserializeOwned + Send + 'static,
    {
        let payload = codec::encode(request)?;
        let mut reader = channel.open_response_stream(method, payload).await?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let delivery = Arc::new(Delivery::new(sink));
        let cancel = CancellationToken::new();
        let (terminal_tx, terminal_rx) = watch::channel(None);

        // Spawn under the lock so the job cannot deregister before it is registered.
        let mut jobs = self.jobs();
        if self.sealed.load(Ordering::SeqCst) {
            debug!("Dropping job on {}: tracker sealed", method);
            return Err(StreamError::Cancelled);
        }
        let task = {
            let tracker = Arc::clone(self);
            let delivery = Arc::clone(&delivery);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let label = format!("job {} ({})", id, method);
                let exit = drain(
                    &mut reader,
                    &delivery,
                    &cancel,
                    || !cancel.is_cancelled(),
                    &label,
                )
                .await;
                let status = match exit {
                    LoopExit::Cancelled => {
                        drop(reader);
                        delivery.terminate(None);
                        debug!("{} cancelled", label);
                        Status::cancelled("job cancelled")
                    }
                    exit => conclude(reader, &delivery, exit, &label).await,
                };
                tracker.finish(id, status);
            })
        };
        jobs.insert(
            id,
            TrackedJob {
                cancel: cancel.clone(),
                guard: delivery,
                terminal_tx,
                task,
            },
        );
        drop(jobs);

        debug!("Started job {} on {}", id, method);

        Ok(JobHandle {
            id,
            cancel,
            terminal: terminal_rx,
        })
    }

    fn finish(&self, id: u64, status: Status) {
        if let Some(job) = self.jobs().remove(&id) {
            debug!("Job {} finished with {}", id, status);
            job.terminal_tx.send_replace(Some(status));
        }
    }

    /// Refuse every later `start` with `Cancelled`.
    pub(crate) fn seal(&self) {
        let _jobs = self.jobs();
        self.sealed.store(true, Ordering::SeqCst);
    }

    /// Cancel every outstanding job.
    pub(crate) fn cancel_all(&self) {
        for job in self.jobs().values() {
            job.cancel.cancel();
        }
    }

    /// Wait until no job is outstanding.
    pub(crate) async fn wait_idle(&self) {
        loop {
            let pending: Vec<watch::Receiver<Option<Status>>> = self
                .jobs()
                .values()
                .map(|job| job.terminal_tx.subscribe())
                .collect();
            if pending.is_empty() {
                return;
            }
            for mut rx in pending {
                let _ = rx.wait_for(|status| status.is_some()).await;
            }
        }
    }

    /// Forced teardown of whatever is still outstanding.
    pub(crate) async fn abort_all(&self, reason: &str) {
        let jobs: Vec<(u64, TrackedJob)> = self.jobs().drain().collect();
        for (id, job) in jobs {
            job.task.abort();
            let _ = job.task.await;
            let status = Status::cancelled(reason);
            if job
                .guard
                .terminate(Some(StreamError::transport(status.clone())))
            {
                warn!("Job {} aborted: {}", id, reason);
            }
            job.terminal_tx.send_replace(Some(status));
        }
    }
}
