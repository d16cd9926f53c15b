//! Audio backend error types

use thiserror::Error;

/// Errors that can occur while opening or running the output stream
#[derive(Error, Debug)]
pub enum AudioError {
    /// No audio output device available
    #[error("No audio output devices found")]
    NoDevice,

    /// Failed to get device configuration
    #[error("Failed to get device config: {0}")]
    ConfigError(String),

    /// Failed to build the output stream
    #[error("Failed to build audio stream: {0}")]
    StreamBuildError(String),

    /// Failed to start the output stream
    #[error("Failed to start audio stream: {0}")]
    StreamPlayError(String),

    /// The engine output is already running
    #[error("Audio output already running")]
    AlreadyRunning,
}

/// Result type for audio operations
pub type AudioResult<T> = Result<T, AudioError>;
