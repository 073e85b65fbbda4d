//! Error types for scale-link.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Main error type for all scale-link operations.
#[derive(Debug, Error)]
pub enum ScaleError {
    /// I/O error outside of the read loop (device discovery, stdout, ...).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error (config and control bridge).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Device could not be configured (hardware absent, unsupported settings).
    #[error("Failed to open device: {0}")]
    Open(String),

    /// Device is already open, usually by a concurrent open attempt.
    #[error("Device is already open")]
    AlreadyOpen,

    /// Device signalled end-of-stream (e.g. unplugged).
    #[error("Device stream closed")]
    StreamClosed,

    /// I/O fault while reading from an open device.
    #[error("Read error: {0}")]
    Read(std::io::Error),

    /// Another acquisition is still outstanding.
    #[error("Acquisition already in progress")]
    AcquisitionInProgress,

    /// Invalid configuration value.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl ScaleError {
    /// Map a device-level error onto the failure reason published by the supervisor.
    ///
    /// Returns `None` for errors that never end a connection.
    pub fn failure_reason(&self) -> Option<FailureReason> {
        match self {
            ScaleError::Open(msg) => Some(FailureReason::OpenError(msg.clone())),
            ScaleError::AlreadyOpen => Some(FailureReason::OpenError(self.to_string())),
            ScaleError::StreamClosed => Some(FailureReason::StreamClosed),
            ScaleError::Read(e) => Some(FailureReason::ReadError(e.to_string())),
            _ => None,
        }
    }
}

/// Typed reason a connection ended up in `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    /// Device could not be opened with the scale configuration.
    OpenError(String),
    /// Device reached end-of-stream.
    StreamClosed,
    /// I/O error mid-stream.
    ReadError(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::OpenError(msg) => write!(f, "open error: {}", msg),
            FailureReason::StreamClosed => f.write_str("stream closed"),
            FailureReason::ReadError(msg) => write!(f, "read error: {}", msg),
        }
    }
}

/// Result type alias using ScaleError.
pub type Result<T> = std::result::Result<T, ScaleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_reason_mapping() {
        assert_eq!(
            ScaleError::Open("busy".into()).failure_reason(),
            Some(FailureReason::OpenError("busy".into()))
        );
        assert_eq!(
            ScaleError::StreamClosed.failure_reason(),
            Some(FailureReason::StreamClosed)
        );

        let read = ScaleError::Read(std::io::Error::new(std::io::ErrorKind::Other, "fault"));
        assert_eq!(
            read.failure_reason(),
            Some(FailureReason::ReadError("fault".into()))
        );

        assert!(ScaleError::AcquisitionInProgress.failure_reason().is_none());
        assert!(ScaleError::Config("x".into()).failure_reason().is_none());
    }

    #[test]
    fn test_failure_reason_display() {
        assert_eq!(FailureReason::StreamClosed.to_string(), "stream closed");
        assert_eq!(
            FailureReason::OpenError("busy".into()).to_string(),
            "open error: busy"
        );
    }
}
