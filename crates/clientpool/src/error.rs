//! Pool error types.

use lumen_flowcontrol::{ClientId, FlowControlError};

/// Errors returned by admission and reservation operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    /// Free pool is at its limit and the candidate is not preferable to any member.
    #[error("free pool full ({max} clients)")]
    PoolFull { max: usize },

    /// Reservation would exceed the reservable total.
    #[error("reservation exceeds capacity: requested {requested}, available {available}")]
    CapacityExceeded { requested: u64, available: u64 },

    /// Client is already a pool member.
    #[error("client {0} already connected")]
    AlreadyConnected(ClientId),

    /// Underlying flow control refused the change.
    #[error(transparent)]
    FlowControl(#[from] FlowControlError),
}
