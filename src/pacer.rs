use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, Instant};

use crate::{OfflineController, PacerOptions, PkgScoutError, Result};

type Call<T> = Box<dyn FnMut() -> BoxFuture<'static, Result<T>> + Send>;

struct PacedJob<T> {
    call: Call<T>,
    reply: oneshot::Sender<Result<T>>,
}

struct Shared<T> {
    queue: Mutex<VecDeque<PacedJob<T>>>,
    wake: Notify,
    options: PacerOptions,
    gate: Option<OfflineController>,
}

impl<T> Shared<T> {
    fn queue(&self) -> MutexGuard<'_, VecDeque<PacedJob<T>>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn gate_closed(&self) -> bool {
        self.gate
            .as_ref()
            .is_some_and(OfflineController::should_use_offline_mode)
    }

    fn reject_all(&self, error: impl Fn() -> PkgScoutError) -> usize {
        let rejected: Vec<PacedJob<T>> = self.queue().drain(..).collect();
        let count = rejected.len();
        for job in rejected {
            let _ = job.reply.send(Err(error()));
        }
        count
    }
}

/// Serializes calls producing `T` through one worker task, spacing them to
/// stay under a per-minute ceiling.
///
/// Every call is paced, including ones that never fail. Each dequeued call
/// also gets a small retry budget of its own for transient failures.
pub struct RequestPacer<T> {
    shared: Arc<Shared<T>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<T> fmt::Debug for RequestPacer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestPacer")
            .field("pending", &self.shared.queue().len())
            .field("options", &self.shared.options)
            .finish()
    }
}

impl<T: Send + 'static> RequestPacer<T> {
    pub fn new(options: PacerOptions) -> Self {
        Self::build(options, None)
    }

    /// A pacer that stops dispatching while `offline` reports offline mode:
    /// everything still queued then fails with [`PkgScoutError::Offline`]
    /// instead of waiting for a slot.
    pub fn with_offline_gate(options: PacerOptions, offline: OfflineController) -> Self {
        Self::build(options, Some(offline))
    }

    fn build(options: PacerOptions, gate: Option<OfflineController>) -> Self {
        Self {
            shared: Arc::new(Shared {
                queue: Mutex::new(VecDeque::new()),
                wake: Notify::new(),
                options,
                gate,
            }),
            worker: Mutex::new(None),
        }
    }

    pub fn options(&self) -> &PacerOptions {
        &self.shared.options
    }

    /// Queues `call` behind everything submitted earlier and resolves with its
    /// outcome.
    ///
    /// The call is enqueued when `submit` is invoked, so submission order is
    /// dispatch order even if the returned futures are polled in another
    /// order. `call` may run more than once when a transient failure is
    /// retried.
    pub fn submit<F, Fut>(&self, mut call: F) -> impl Future<Output = Result<T>> + '_
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let (reply, outcome) = oneshot::channel();
        let call: Call<T> = Box::new(move || call().boxed());
        self.shared.queue().push_back(PacedJob { call, reply });

        async move {
            self.ensure_worker();
            self.shared.wake.notify_one();
            // the worker only drops a job unanswered when it is torn down
            outcome.await.unwrap_or(Err(PkgScoutError::QueueCleared))
        }
    }

    /// Resolves every queued call with [`PkgScoutError::QueueCleared`] and
    /// returns how many there were. A call already in flight is unaffected.
    pub fn clear_queue(&self) -> usize {
        let count = self.shared.reject_all(|| PkgScoutError::QueueCleared);

        #[cfg(feature = "tracing")]
        tracing::debug!(cleared = count, "request queue cleared");

        count
    }

    /// Number of calls waiting for a dispatch slot.
    pub fn pending(&self) -> usize {
        self.shared.queue().len()
    }

    fn ensure_worker(&self) {
        let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        if worker.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }
        *worker = Some(tokio::spawn(drain(Arc::clone(&self.shared))));
    }
}

impl<T> Drop for RequestPacer<T> {
    fn drop(&mut self) {
        let worker = self.worker.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = worker.take() {
            handle.abort();
        }
    }
}

async fn drain<T>(shared: Arc<Shared<T>>) {
    let spacing = Duration::from_millis(shared.options.spacing_ms());
    let mut next_slot = Instant::now();
    loop {
        if shared.queue().is_empty() {
            shared.wake.notified().await;
            continue;
        }

        if shared.gate_closed() {
            shared.reject_all(|| PkgScoutError::Offline);
            #[cfg(feature = "tracing")]
            tracing::debug!("offline, rejected queued requests without dispatch");
            continue;
        }

        sleep_until(next_slot).await;
        // the queue may have been cleared or the gate closed while waiting
        if shared.gate_closed() {
            continue;
        }
        let Some(mut job) = shared.queue().pop_front() else {
            continue;
        };
        if job.reply.is_closed() {
            continue;
        }

        next_slot = Instant::now() + spacing;

        #[cfg(feature = "tracing")]
        tracing::debug!(spacing_ms = spacing.as_millis() as u64, "dispatching paced request");

        let outcome = run_with_retry(&mut job.call, &shared.options).await;
        let _ = job.reply.send(outcome);
    }
}

/// Retries transient failures, waiting the server's `Retry-After` when it
/// sent one and `retry_delay_ms * 2^attempt` otherwise.
///
/// A hint longer than `max_retry_wait_ms` makes the failure final; computed
/// delays are capped at it.
async fn run_with_retry<T>(call: &mut Call<T>, options: &PacerOptions) -> Result<T> {
    let max_wait = Duration::from_millis(options.max_retry_wait_ms);
    let mut attempt = 0usize;
    loop {
        match call().await {
            Err(err) if err.is_transient() && attempt < options.max_retries => {
                let delay = match err.retry_after_secs() {
                    Some(secs) if Duration::from_secs(secs) > max_wait => return Err(err),
                    Some(secs) => Duration::from_secs(secs),
                    None => {
                        let exp = attempt.min(16) as u32;
                        Duration::from_millis(options.retry_delay_ms.saturating_mul(1u64 << exp))
                            .min(max_wait)
                    }
                };

                #[cfg(feature = "tracing")]
                tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, error = %err, "retrying paced request");

                sleep(delay).await;
                attempt += 1;
            }
            outcome => return outcome,
        }
    }
}
