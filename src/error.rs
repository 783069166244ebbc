//! Error types for the fan-out sink

use thiserror::Error;

/// Error type for sink operations
#[derive(Debug, Error)]
pub enum SinkError {
    /// The sink has not been started yet (no poll set, no I/O thread)
    #[error("sink has not been started")]
    NotStarted,

    /// `start()` was called on a sink that is already running
    #[error("sink is already started")]
    AlreadyStarted,

    /// The poll wait failed with an unrecoverable error
    #[error("poll wait failed: {0}")]
    PollWait(#[source] std::io::Error),

    /// Generic I/O error (pipe creation, thread spawn, ...)
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Convenience result alias used throughout the crate
pub type Result<T> = std::result::Result<T, SinkError>;
