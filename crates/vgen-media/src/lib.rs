//! FFmpeg CLI wrapper for video processing.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building
//! - A runner with timeout and captured stderr
//! - Lossless segment concatenation via the concat demuxer

pub mod command;
pub mod concat;
pub mod error;

pub use command::{resolve_ffmpeg, FfmpegCommand, FfmpegRunner};
pub use concat::{concat_manifest, Concatenator, DEFAULT_CONCAT_TIMEOUT};
pub use error::{MediaError, MediaResult};
