//! Error types for preview-player
//!
//! Defines module-specific error types using thiserror for clear error propagation.

use crate::playback::frame_pool::PoolError;
use thiserror::Error;

/// Main error type for preview-player
#[derive(Error, Debug)]
pub enum Error {
    /// Errors from the shared library (config resolution, TOML parsing)
    #[error(transparent)]
    Common(#[from] preview_common::Error),

    /// Configuration values out of range
    #[error("Configuration error: {0}")]
    Config(String),

    /// The decode source failed to open, seek or decode
    #[error("Decode error: {0}")]
    Decode(String),

    /// The decode source was used after `close()`
    #[error("Decode source closed")]
    SourceClosed,

    /// The audio render context did not answer in time
    #[error("Audio request timed out: {0}")]
    AudioTimeout(String),

    /// The audio render context has gone away
    #[error("Audio render context closed")]
    AudioChannelClosed,

    /// Audio output device errors
    #[error("Audio output error: {0}")]
    AudioOutput(String),

    /// Frame pool allocation failures
    #[error("Frame pool error: {0}")]
    Pool(#[from] PoolError),

    /// Invalid state for operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// The engine has been closed
    #[error("Player closed")]
    Closed,

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience Result type using preview-player Error
pub type Result<T> = std::result::Result<T, Error>;
