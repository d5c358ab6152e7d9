//! Queued tasks and their completion tickets.

use std::cmp::Ordering;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use lumen_flowcontrol::{ClientId, ClientTier};
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::ServingError;

/// Timing of one served request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServedReport {
    /// Time spent waiting for a worker.
    pub queued: Duration,
    /// Time the job ran.
    pub elapsed: Duration,
}

/// Output of a served request.
#[derive(Debug)]
pub struct Served<T> {
    pub output: T,
    pub report: ServedReport,
}

/// Resolves when the request has run, was cancelled, or was refused.
#[derive(Debug)]
#[must_use = "the ticket carries the request's output"]
pub struct TaskTicket<T> {
    rx: oneshot::Receiver<Result<Served<T>, ServingError>>,
}

impl<T> TaskTicket<T> {
    pub(crate) fn closed() -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(Err(ServingError::Closed));
        Self { rx }
    }
}

impl<T> Future for TaskTicket<T> {
    type Output = Result<Served<T>, ServingError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.unwrap_or(Err(ServingError::Cancelled)))
    }
}

type Job = Box<dyn FnOnce(Duration) -> BoxFuture<'static, bool> + Send>;

/// A request waiting in the queue.
pub(crate) struct ServingTask {
    pub(crate) client: ClientId,
    pub(crate) tier: ClientTier,
    pub(crate) seq: u64,
    enqueued_at: Instant,
    job: Job,
}

impl ServingTask {
    pub(crate) fn new<F, T>(
        client: ClientId,
        tier: ClientTier,
        seq: u64,
        job: F,
    ) -> (Self, TaskTicket<T>)
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::new(move |queued| {
            async move {
                let started = Instant::now();
                // A panicking job drops `tx`, which resolves the ticket as cancelled.
                let Ok(output) = AssertUnwindSafe(job).catch_unwind().await else {
                    return false;
                };
                let report = ServedReport {
                    queued,
                    elapsed: started.elapsed(),
                };
                let _ = tx.send(Ok(Served { output, report }));
                true
            }
            .boxed()
        });

        let task = Self {
            client,
            tier,
            seq,
            enqueued_at: Instant::now(),
            job,
        };
        (task, TaskTicket { rx })
    }

    /// Run the job. Returns `false` if it panicked.
    pub(crate) async fn run(self) -> bool {
        let queued = self.enqueued_at.elapsed();
        (self.job)(queued).await
    }
}

// Heap order: higher tier first, then lower sequence number.
impl Ord for ServingTask {
    fn cmp(&self, other: &Self) -> Ordering {
        self.tier
            .cmp(&other.tier)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for ServingTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for ServingTask {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for ServingTask {}
