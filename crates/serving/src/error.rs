//! Serving error types.

/// Why a queued request did not run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ServingError {
    /// Dropped before a worker picked it up, or the job panicked.
    #[error("request cancelled")]
    Cancelled,

    /// The queue was closed when the request was submitted.
    #[error("serving queue closed")]
    Closed,
}
