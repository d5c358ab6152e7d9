//! Server-level metrics.

use metrics::{Counter, Gauge};

#[derive(Clone, Debug)]
pub(crate) struct ServerMetrics {
    /// Requests charged and queued
    pub(crate) requests_total: Counter,
    /// Requests refused for lack of buffer
    pub(crate) insufficient_buffer_total: Counter,
    /// Cost units returned to clients after serving
    pub(crate) refunded_total: Counter,
    /// Connections refused by the pools
    pub(crate) connect_rejected_total: Counter,
    pub(crate) heads_announced_total: Counter,
    pub(crate) block_processing: Gauge,
    pub(crate) serving_threads: Gauge,
    pub(crate) max_free_peers: Gauge,
}

impl Default for ServerMetrics {
    fn default() -> Self {
        Self {
            requests_total: metrics::counter!("server.requests_total"),
            insufficient_buffer_total: metrics::counter!("server.insufficient_buffer_total"),
            refunded_total: metrics::counter!("server.refunded_total"),
            connect_rejected_total: metrics::counter!("server.connect_rejected_total"),
            heads_announced_total: metrics::counter!("server.heads_announced_total"),
            block_processing: metrics::gauge!("server.block_processing"),
            serving_threads: metrics::gauge!("server.serving_threads"),
            max_free_peers: metrics::gauge!("server.max_free_peers"),
        }
    }
}
