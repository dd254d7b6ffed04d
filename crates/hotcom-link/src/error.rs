//! Error types for the port lifecycle controller

use hotcom_detect::DetectError;
use thiserror::Error;

/// Errors that can occur while managing a port
#[derive(Debug, Error)]
pub enum LinkError {
    /// Invalid construction arguments
    #[error("invalid argument: {0}")]
    Validation(String),

    /// Operation invoked after dispose
    #[error("port controller has been disposed")]
    Disposed,

    /// The OS refused to open the port
    #[error("failed to open port {port}: {reason}")]
    OpenFailed { port: String, reason: String },

    /// The OS failed to close the port
    #[error("failed to close port {port}: {reason}")]
    CloseFailed { port: String, reason: String },

    /// Device detection error
    #[error(transparent)]
    Detect(DetectError),
}

impl From<DetectError> for LinkError {
    fn from(e: DetectError) -> Self {
        match e {
            DetectError::Validation(msg) => LinkError::Validation(msg),
            DetectError::Disposed(_) => LinkError::Disposed,
            other => LinkError::Detect(other),
        }
    }
}
