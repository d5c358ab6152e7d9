//! Flow control error types.

use crate::ClientId;

/// Errors that can occur during flow control operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FlowControlError {
    /// Buffer cannot cover the request; delay or drop it, do not retry immediately.
    #[error("client {client} buffer {buffer} cannot cover cost {cost}")]
    InsufficientBuffer { client: ClientId, buffer: u64, cost: u64 },

    /// Allocation would exceed the total or per-client capacity.
    #[error("capacity exceeded: requested {requested}, available {available}")]
    CapacityExceeded { requested: u64, available: u64 },

    /// Parameters violate their invariants; the previous parameters stay in effect.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Client is not connected.
    #[error("client {0} not connected")]
    UnknownClient(ClientId),

    /// Client is already connected.
    #[error("client {0} already connected")]
    AlreadyConnected(ClientId),
}
