//! FFmpeg command builder and runner.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{MediaError, MediaResult};

/// Longest stderr excerpt kept on a failure.
const STDERR_TAIL_BYTES: usize = 4096;

/// Builder for FFmpeg commands.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    /// Input file path
    input: PathBuf,
    /// Output file path
    output: PathBuf,
    /// Input arguments (before -i)
    input_args: Vec<String>,
    /// Output arguments (after -i)
    output_args: Vec<String>,
    /// Whether to overwrite output
    overwrite: bool,
}

impl FfmpegCommand {
    /// Create a new FFmpeg command.
    pub fn new(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Self {
        Self {
            input: input.as_ref().to_path_buf(),
            output: output.as_ref().to_path_buf(),
            input_args: Vec::new(),
            output_args: Vec::new(),
            overwrite: true,
        }
    }

    /// Add input arguments (before -i).
    pub fn input_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.input_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Add an output argument (after -i).
    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    /// Read the input as a concat demuxer manifest.
    pub fn concat_demuxer(self) -> Self {
        self.input_args(["-f", "concat", "-safe", "0"])
    }

    /// Copy all streams without re-encoding.
    pub fn stream_copy(self) -> Self {
        self.output_arg("-c").output_arg("copy")
    }

    /// Build the command arguments.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = vec!["-hide_banner".to_string(), "-v".to_string(), "error".to_string()];

        args.extend(self.input_args.clone());

        args.push("-i".to_string());
        args.push(self.input.to_string_lossy().to_string());

        args.extend(self.output_args.clone());

        if self.overwrite {
            args.push("-y".to_string());
        }

        args.push(self.output.to_string_lossy().to_string());

        args
    }
}

/// Runs FFmpeg with a timeout, capturing stderr for diagnostics.
#[derive(Debug, Clone)]
pub struct FfmpegRunner {
    /// Binary name (looked up in PATH) or explicit path
    binary: PathBuf,
    timeout: Option<Duration>,
}

impl Default for FfmpegRunner {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl FfmpegRunner {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            timeout: None,
        }
    }

    /// Set timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Run an FFmpeg command to completion.
    pub async fn run(&self, cmd: &FfmpegCommand) -> MediaResult<()> {
        let program = resolve_ffmpeg(&self.binary)?;
        let args = cmd.build_args();
        debug!("Running FFmpeg: {} {}", program.display(), args.join(" "));

        let child = Command::new(&program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => MediaError::ffmpeg_not_found(program.display().to_string()),
                _ => MediaError::Io(e),
            })?;

        let output = match self.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, child.wait_with_output()).await {
                Ok(result) => result?,
                Err(_) => {
                    // Dropping the future drops the child, which kills it.
                    warn!("FFmpeg timed out after {:?}, killing process", timeout);
                    return Err(MediaError::Timeout(timeout));
                }
            },
            None => child.wait_with_output().await?,
        };

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let stderr = stderr.trim();
        let tail = if stderr.len() > STDERR_TAIL_BYTES {
            let mut start = stderr.len() - STDERR_TAIL_BYTES;
            while !stderr.is_char_boundary(start) {
                start += 1;
            }
            &stderr[start..]
        } else {
            stderr
        };

        Err(MediaError::ffmpeg_failed(
            "FFmpeg exited with non-zero status",
            (!tail.is_empty()).then(|| tail.to_string()),
            output.status.code(),
        ))
    }
}

/// Locate the FFmpeg binary: explicit paths must exist, bare names are
/// looked up in PATH.
pub fn resolve_ffmpeg(binary: &Path) -> MediaResult<PathBuf> {
    if binary.components().count() > 1 || binary.is_absolute() {
        if binary.is_file() {
            return Ok(binary.to_path_buf());
        }
        return Err(MediaError::ffmpeg_not_found(binary.display().to_string()));
    }
    which::which(binary).map_err(|_| MediaError::ffmpeg_not_found(binary.display().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_concat_command_args() {
        let cmd = FfmpegCommand::new("/tmp/list.txt", "/tmp/out.mp4")
            .concat_demuxer()
            .stream_copy();

        let args = cmd.build_args();
        let joined = args.join(" ");
        assert!(joined.contains("-f concat -safe 0 -i /tmp/list.txt"));
        assert!(joined.ends_with("-c copy -y /tmp/out.mp4"));
    }

    #[test]
    fn test_missing_explicit_binary() {
        let err = resolve_ffmpeg(Path::new("/definitely/not/here/ffmpeg")).unwrap_err();
        assert!(matches!(err, MediaError::FfmpegNotFound(_)));
    }

    #[tokio::test]
    async fn test_runner_reports_missing_binary() {
        let runner = FfmpegRunner::new("/definitely/not/here/ffmpeg");
        let cmd = FfmpegCommand::new("a", "b");
        assert!(matches!(
            runner.run(&cmd).await,
            Err(MediaError::FfmpegNotFound(_))
        ));
    }
}
