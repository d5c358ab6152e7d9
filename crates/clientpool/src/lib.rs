//! Admission pools for light-client connections.
//!
//! Every connecting client is first checked against the [`PriorityClientPool`];
//! clients without a reservation fall through to the [`FreeClientPool`], which
//! admits them with the shared free capacity or refuses them when full and not
//! preferable to the least useful member.
//!
//! Lock order is priority pool, free pool, then the client manager. Eviction
//! callbacks run after every pool lock has been released.

pub mod constants;
mod error;
mod events;
mod free;
mod priority;
mod usage;

pub use error::PoolError;
pub use events::{PoolEvent, PoolEventEmitter};
pub use free::{FreeClientPool, FreePoolConfig, FreePoolStatus};
pub use priority::{PriorityClientPool, PriorityPoolStatus, Reservation};

use std::sync::Arc;

use lumen_flowcontrol::ClientId;

/// Invoked for every client a pool disconnects on its own, so the protocol
/// layer can drop the connection.
pub type EvictHandler = Arc<dyn Fn(ClientId) + Send + Sync>;
