//! Server error types.

use lumen_clientpool::PoolError;
use lumen_flowcontrol::FlowControlError;
use lumen_serving::ServingError;

/// Errors surfaced by [`crate::LightServer`].
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    FlowControl(#[from] FlowControlError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Serving(#[from] ServingError),

    /// The load coordinator task has exited.
    #[error("coordinator stopped")]
    CoordinatorStopped,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Spawned outside a tokio runtime.
    #[error(transparent)]
    Runtime(#[from] tokio::runtime::TryCurrentError),
}

impl ServerError {
    /// The client's buffer could not cover the request.
    pub fn is_insufficient_buffer(&self) -> bool {
        matches!(
            self,
            Self::FlowControl(FlowControlError::InsufficientBuffer { .. })
        )
    }
}

pub type Result<T, E = ServerError> = std::result::Result<T, E>;
