//! Serving queue for accepted requests.
//!
//! Requests are queued by tier (priority before free, FIFO within a tier) and
//! executed by a pool of tokio worker tasks whose size can be changed at
//! runtime. Shrinking never interrupts a running request: surplus workers
//! retire once they are idle.

mod error;
mod metrics;
mod queue;
mod task;

pub use error::ServingError;
pub use queue::{ServingQueue, ServingStatus};
pub use task::{Served, ServedReport, TaskTicket};
