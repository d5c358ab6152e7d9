//! Light-client serving.
//!
//! [`LightServer`] ties the pieces together: connecting clients go through the
//! priority and free pools, every request is charged against the client's
//! flow-control buffer, queued by tier and run on the serving workers, then
//! partially refunded once its real cost is known. A coordinator task adapts
//! the worker count and recharge curve to block processing and to the measured
//! serving cost.

mod announce;
mod args;
mod config;
pub mod constants;
mod coordinator;
mod error;
mod metrics;
mod server;

pub use announce::{HeadAnnouncer, HeadInfo, NoopAnnouncer};
pub use args::ServerArgs;
pub use config::ServerConfig;
pub use coordinator::{CoordinatorHandle, CoordinatorStatus};
pub use error::{Result, ServerError};
pub use server::{ClientInfo, LightServer, LightServerBuilder, PoolStatus};
