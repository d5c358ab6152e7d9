use std::collections::BinaryHeap;
use std::future::Future;
use std::pin::pin;
use std::sync::Arc;

use lumen_flowcontrol::{ClientId, ClientTier};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tracing::{debug, error, trace};

use crate::metrics::ServingMetrics;
use crate::task::{ServingTask, TaskTicket};

/// Queue and worker pool sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServingStatus {
    pub queued: usize,
    pub busy: usize,
    pub workers: usize,
    pub target: usize,
    pub closed: bool,
}

#[derive(Default)]
struct State {
    heap: BinaryHeap<ServingTask>,
    next_seq: u64,
    /// Workers alive, including those about to retire.
    workers: usize,
    target: usize,
    busy: usize,
    closed: bool,
}

struct Shared {
    state: Mutex<State>,
    notify: Notify,
    metrics: ServingMetrics,
}

impl Shared {
    fn record(&self, state: &State) {
        self.metrics
            .record_sizes(state.heap.len(), state.workers, state.target);
    }
}

enum Step {
    Run(ServingTask),
    Wait,
    Retire,
}

/// Priority-ordered request queue drained by a resizable set of workers.
///
/// The pool starts with no workers; call [`Self::set_threads`] to start it.
pub struct ServingQueue {
    shared: Arc<Shared>,
    runtime: Handle,
}

impl ServingQueue {
    /// Create a queue whose workers run on `runtime`.
    pub fn new(runtime: Handle) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                notify: Notify::new(),
                metrics: ServingMetrics::default(),
            }),
            runtime,
        }
    }

    /// Queue `job` on behalf of `client`.
    pub fn enqueue<F, T>(&self, client: ClientId, tier: ClientTier, job: F) -> TaskTicket<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let mut state = self.shared.state.lock();
        if state.closed {
            return TaskTicket::closed();
        }
        let seq = state.next_seq;
        state.next_seq += 1;
        let (task, ticket) = ServingTask::new(client, tier, seq, job);
        state.heap.push(task);
        self.shared.metrics.enqueued_total.increment(1);
        self.shared.record(&state);
        drop(state);

        trace!(%client, %tier, seq, "request queued");
        self.shared.notify.notify_one();
        ticket
    }

    /// Move the worker pool towards `threads` workers. New workers start
    /// immediately; surplus workers retire once they are idle.
    pub fn set_threads(&self, threads: usize) {
        let mut state = self.shared.state.lock();
        if state.closed {
            return;
        }
        let previous = state.target;
        state.target = threads;
        let spawn = threads.saturating_sub(state.workers);
        state.workers += spawn;
        self.shared.record(&state);
        drop(state);

        for _ in 0..spawn {
            self.runtime.spawn(worker(Arc::clone(&self.shared)));
        }
        if threads < previous {
            self.shared.notify.notify_waiters();
        }
        if threads != previous {
            debug!(previous, threads, spawned = spawn, "serving threads changed");
        }
    }

    /// Target worker count.
    pub fn threads(&self) -> usize {
        self.shared.state.lock().target
    }

    /// Drop a client's requests that have not started. Their tickets resolve
    /// as cancelled. Returns the number dropped.
    pub fn drop_client(&self, client: &ClientId) -> usize {
        let mut state = self.shared.state.lock();
        let before = state.heap.len();
        state.heap.retain(|task| task.client != *client);
        let dropped = before - state.heap.len();
        self.shared.record(&state);
        drop(state);

        if dropped > 0 {
            self.shared.metrics.cancelled_total.increment(dropped as u64);
            debug!(%client, dropped, "queued requests dropped");
        }
        dropped
    }

    /// Stop all workers and cancel queued requests. Running requests finish.
    pub fn close(&self) {
        let mut state = self.shared.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        state.target = 0;
        let cancelled = std::mem::take(&mut state.heap).len();
        self.shared.record(&state);
        drop(state);

        self.shared.metrics.cancelled_total.increment(cancelled as u64);
        self.shared.notify.notify_waiters();
        debug!(cancelled, "serving queue closed");
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    pub fn len(&self) -> usize {
        self.shared.state.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn status(&self) -> ServingStatus {
        let state = self.shared.state.lock();
        ServingStatus {
            queued: state.heap.len(),
            busy: state.busy,
            workers: state.workers,
            target: state.target,
            closed: state.closed,
        }
    }
}

impl Drop for ServingQueue {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for ServingQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServingQueue")
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

async fn worker(shared: Arc<Shared>) {
    loop {
        // Register for wakeups before looking at the state so a notification
        // sent in between is not lost.
        let mut notified = pin!(shared.notify.notified());
        notified.as_mut().enable();

        let step = {
            let mut state = shared.state.lock();
            if state.closed || state.workers > state.target {
                state.workers -= 1;
                shared.record(&state);
                Step::Retire
            } else if let Some(task) = state.heap.pop() {
                state.busy += 1;
                shared.record(&state);
                Step::Run(task)
            } else {
                Step::Wait
            }
        };

        match step {
            Step::Run(task) => {
                let client = task.client;
                if task.run().await {
                    shared.metrics.served_total.increment(1);
                } else {
                    shared.metrics.panicked_total.increment(1);
                    error!(%client, "serving job panicked");
                }
                shared.state.lock().busy -= 1;
            }
            Step::Wait => notified.await,
            Step::Retire => {
                trace!("serving worker retired");
                return;
            }
        }
    }
}
