//! Error types for media operations.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur during media processing.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("FFmpeg not found: {0}")]
    FfmpegNotFound(String),

    #[error("FFmpeg command failed: {message}")]
    FfmpegFailed {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Nothing to concatenate")]
    NoSegments,

    #[error("FFmpeg produced no output at {0}")]
    EmptyOutput(PathBuf),

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MediaError {
    /// Create an FFmpeg failure error.
    pub fn ffmpeg_failed(
        message: impl Into<String>,
        stderr: Option<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::FfmpegFailed {
            message: message.into(),
            stderr,
            exit_code,
        }
    }

    pub fn ffmpeg_not_found(binary: impl Into<String>) -> Self {
        Self::FfmpegNotFound(binary.into())
    }
}
