//! Centralized error types for the Transflow transcription engine.
//!
//! One `thiserror` enum for the whole process, plus an [`ErrorCode`] trait
//! so every failure domain exposes a stable, machine-readable code usable
//! for diagnostics counters.

use thiserror::Error;

/// Trait for error types that provide machine-readable error codes.
pub trait ErrorCode {
    /// Returns a machine-readable error code for diagnostics/logging.
    fn code(&self) -> &'static str;
}

/// Application-wide error type for the Transflow engine.
///
/// No variant here is fatal to the process: every call site that produces
/// one of these logs it and continues, it never propagates out of a
/// tailer, watcher, or orchestrator loop.
#[derive(Debug, Error)]
pub enum TransflowError {
    /// The control-plane query failed (DB unreachable, bad credentials, …).
    #[error("control plane query failed: {0}")]
    ControlPlane(String),

    /// A filesystem operation on an audio file failed transiently.
    #[error("audio file IO failed: {0}")]
    AudioIo(String),

    /// The recognizer rejected a frame or returned malformed output.
    #[error("recognizer error: {0}")]
    Recognizer(String),

    /// Publishing an event to the message bus failed.
    #[error("publish failed: {0}")]
    Publish(String),

    /// A configuration value was missing or invalid.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl ErrorCode for TransflowError {
    fn code(&self) -> &'static str {
        match self {
            Self::ControlPlane(_) => "control_plane_error",
            Self::AudioIo(_) => "audio_io_error",
            Self::Recognizer(_) => "recognizer_error",
            Self::Publish(_) => "publish_error",
            Self::Configuration(_) => "configuration_error",
        }
    }
}

/// Convenient Result alias for engine-wide operations.
pub type TransflowResult<T> = Result<T, TransflowError>;

impl From<sqlx::Error> for TransflowError {
    fn from(err: sqlx::Error) -> Self {
        Self::ControlPlane(err.to_string())
    }
}

impl From<redis::RedisError> for TransflowError {
    fn from(err: redis::RedisError) -> Self {
        Self::Publish(err.to_string())
    }
}

impl From<std::io::Error> for TransflowError {
    fn from(err: std::io::Error) -> Self {
        Self::AudioIo(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_plane_error_code() {
        let err = TransflowError::ControlPlane("connection refused".into());
        assert_eq!(err.code(), "control_plane_error");
    }

    #[test]
    fn recognizer_error_code() {
        let err = TransflowError::Recognizer("decoder panic".into());
        assert_eq!(err.code(), "recognizer_error");
    }
}
