//! Serving queue metrics.

use metrics::{Counter, Gauge};

#[derive(Clone, Debug)]
pub(crate) struct ServingMetrics {
    /// Requests accepted into the queue
    pub(crate) enqueued_total: Counter,
    /// Requests a worker finished
    pub(crate) served_total: Counter,
    /// Requests dropped before running
    pub(crate) cancelled_total: Counter,
    /// Jobs that panicked while running
    pub(crate) panicked_total: Counter,
    pub(crate) queue_len: Gauge,
    pub(crate) workers: Gauge,
    pub(crate) target_workers: Gauge,
}

impl Default for ServingMetrics {
    fn default() -> Self {
        Self {
            enqueued_total: metrics::counter!("serving.enqueued_total"),
            served_total: metrics::counter!("serving.served_total"),
            cancelled_total: metrics::counter!("serving.cancelled_total"),
            panicked_total: metrics::counter!("serving.panicked_total"),
            queue_len: metrics::gauge!("serving.queue_len"),
            workers: metrics::gauge!("serving.workers"),
            target_workers: metrics::gauge!("serving.target_workers"),
        }
    }
}

impl ServingMetrics {
    pub(crate) fn record_sizes(&self, queue_len: usize, workers: usize, target: usize) {
        self.queue_len.set(queue_len as f64);
        self.workers.set(workers as f64);
        self.target_workers.set(target as f64);
    }
}
