//! Error types for device detection and watching

use thiserror::Error;

/// Errors that can occur while querying or watching devices
#[derive(Debug, Error)]
pub enum DetectError {
    /// Invalid construction arguments
    #[error("invalid argument: {0}")]
    Validation(String),

    /// Operation invoked after the owner was disposed
    #[error("{0} has been disposed")]
    Disposed(&'static str),

    /// Watcher started while already watching
    #[error("already watching")]
    AlreadyWatching,

    /// Device directory backend unavailable
    #[error("device query failed: {0}")]
    QueryFailed(String),

    /// Failed to spawn the notification thread
    #[error("failed to spawn notification thread: {0}")]
    Spawn(#[from] std::io::Error),
}

impl From<serialport::Error> for DetectError {
    fn from(e: serialport::Error) -> Self {
        DetectError::QueryFailed(e.to_string())
    }
}
