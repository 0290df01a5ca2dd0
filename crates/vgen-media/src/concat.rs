//! Segment concatenation.
//!
//! Segments come from the same model with identical codec parameters, so the
//! concat demuxer with stream copy joins them without re-encoding.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};

/// Default FFmpeg timeout for one concatenation.
pub const DEFAULT_CONCAT_TIMEOUT: Duration = Duration::from_secs(300);

/// Joins ordered segment files into one video.
#[derive(Debug, Clone)]
pub struct Concatenator {
    runner: FfmpegRunner,
    temp_dir: PathBuf,
}

impl Concatenator {
    /// `temp_dir` holds the short-lived manifest files.
    pub fn new(runner: FfmpegRunner, temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            temp_dir: temp_dir.into(),
        }
    }

    pub fn runner(&self) -> &FfmpegRunner {
        &self.runner
    }

    /// Join `segments` in order into `output`.
    ///
    /// A single segment is published to `output` byte for byte (hard link,
    /// copy when linking is not possible); the segment file stays in place.
    pub async fn concatenate(&self, segments: &[PathBuf], output: &Path) -> MediaResult<PathBuf> {
        if segments.is_empty() {
            return Err(MediaError::NoSegments);
        }

        let mut absolute = Vec::with_capacity(segments.len());
        for segment in segments {
            match tokio::fs::canonicalize(segment).await {
                Ok(path) => absolute.push(path),
                Err(_) => return Err(MediaError::FileNotFound(segment.clone())),
            }
        }

        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        if absolute.len() == 1 {
            debug!(path = %segments[0].display(), "Single segment, no concatenation needed");
            publish_single(&absolute[0], output).await?;
            return Ok(output.to_path_buf());
        }
        tokio::fs::create_dir_all(&self.temp_dir).await?;

        // Removed when dropped, on every return path.
        let manifest = tempfile::Builder::new()
            .prefix("concat_")
            .suffix(".txt")
            .tempfile_in(&self.temp_dir)?;
        tokio::fs::write(manifest.path(), concat_manifest(&absolute)).await?;

        let started = Instant::now();
        let cmd = FfmpegCommand::new(manifest.path(), output)
            .concat_demuxer()
            .stream_copy();
        self.runner.run(&cmd).await?;

        match tokio::fs::metadata(output).await {
            Ok(meta) if meta.len() > 0 => {}
            _ => return Err(MediaError::EmptyOutput(output.to_path_buf())),
        }

        info!(
            segments = absolute.len(),
            output = %output.display(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Concatenated segments"
        );
        Ok(output.to_path_buf())
    }
}

async fn publish_single(segment: &Path, output: &Path) -> MediaResult<()> {
    if tokio::fs::canonicalize(output).await.ok().as_deref() == Some(segment) {
        return Ok(());
    }
    match tokio::fs::remove_file(output).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    if let Err(e) = tokio::fs::hard_link(segment, output).await {
        debug!(error = %e, "Hard link failed, copying segment");
        tokio::fs::copy(segment, output).await?;
    }
    Ok(())
}

/// Concat demuxer manifest, one `file '<path>'` line per segment.
pub fn concat_manifest(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| format!("file '{}'\n", p.to_string_lossy().replace('\'', r"'\''")))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_escapes_quotes() {
        let manifest = concat_manifest(&[
            PathBuf::from("/data/a.mp4"),
            PathBuf::from("/data/it's.mp4"),
        ]);
        assert_eq!(manifest, "file '/data/a.mp4'\nfile '/data/it'\\''s.mp4'\n");
    }

    #[tokio::test]
    async fn test_single_segment_returned_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let seg = dir.path().join("only.mp4");
        std::fs::write(&seg, b"video").unwrap();

        let concat = Concatenator::new(FfmpegRunner::new("/no/such/ffmpeg"), dir.path().join("tmp"));
        let target = dir.path().join("videos").join("out.mp4");
        let out = concat.concatenate(&[seg.clone()], &target).await.unwrap();

        assert_eq!(out, target);
        assert_eq!(std::fs::read(&target).unwrap(), b"video");
        assert!(seg.exists());

        // Publishing again over an existing output is fine.
        let again = concat.concatenate(&[seg.clone()], &target).await.unwrap();
        assert_eq!(std::fs::read(again).unwrap(), b"video");
    }

    #[tokio::test]
    async fn test_missing_segment() {
        let dir = tempfile::tempdir().unwrap();
        let concat = Concatenator::new(FfmpegRunner::default(), dir.path());
        let err = concat
            .concatenate(&[dir.path().join("nope.mp4")], &dir.path().join("out.mp4"))
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::FileNotFound(_)));
    }

    #[tokio::test]
    async fn test_empty_input() {
        let dir = tempfile::tempdir().unwrap();
        let concat = Concatenator::new(FfmpegRunner::default(), dir.path());
        assert!(matches!(
            concat.concatenate(&[], &dir.path().join("out.mp4")).await,
            Err(MediaError::NoSegments)
        ));
    }

    #[cfg(unix)]
    mod fake_ffmpeg {
        use super::*;
        use std::os::unix::fs::PermissionsExt;

        /// Concatenates the manifest's files byte-wise and records the
        /// manifest path next to the output.
        const CAT_SCRIPT: &str = r#"#!/bin/sh
manifest=""
out=""
prev=""
for arg in "$@"; do
  if [ "$prev" = "-i" ]; then manifest="$arg"; fi
  prev="$arg"
  out="$arg"
done
echo "$manifest" > "$(dirname "$out")/manifest_path"
: > "$out"
sed -e "s/^file '//" -e "s/'\$//" "$manifest" | while IFS= read -r f; do
  cat "$f" >> "$out"
done
"#;

        fn install(dir: &Path, name: &str, body: &str) -> PathBuf {
            let path = dir.join(name);
            std::fs::write(&path, body).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        fn segments(dir: &Path, n: usize) -> Vec<PathBuf> {
            (0..n)
                .map(|i| {
                    let p = dir.join(format!("seg_{}.mp4", i));
                    std::fs::write(&p, format!("[segment {}]", i)).unwrap();
                    p
                })
                .collect()
        }

        #[tokio::test]
        async fn test_order_preserved_and_manifest_removed() {
            let dir = tempfile::tempdir().unwrap();
            let ffmpeg = install(dir.path(), "ffmpeg", CAT_SCRIPT);
            let segs = segments(dir.path(), 3);
            let out_dir = dir.path().join("videos");
            let output = out_dir.join("final.mp4");

            let concat = Concatenator::new(FfmpegRunner::new(ffmpeg), dir.path().join("tmp"));
            let result = concat.concatenate(&segs, &output).await.unwrap();

            assert_eq!(result, output);
            assert_eq!(
                std::fs::read_to_string(&output).unwrap(),
                "[segment 0][segment 1][segment 2]"
            );
            let manifest = std::fs::read_to_string(out_dir.join("manifest_path")).unwrap();
            assert!(!Path::new(manifest.trim()).exists());
        }

        #[tokio::test]
        async fn test_ffmpeg_failure_surfaces_stderr() {
            let dir = tempfile::tempdir().unwrap();
            let ffmpeg = install(
                dir.path(),
                "ffmpeg",
                "#!/bin/sh\necho 'Invalid data found when processing input' >&2\nexit 1\n",
            );
            let segs = segments(dir.path(), 2);

            let concat = Concatenator::new(FfmpegRunner::new(ffmpeg), dir.path().join("tmp"));
            let err = concat
                .concatenate(&segs, &dir.path().join("out.mp4"))
                .await
                .unwrap_err();

            match err {
                MediaError::FfmpegFailed { stderr, exit_code, .. } => {
                    assert_eq!(exit_code, Some(1));
                    assert!(stderr.unwrap().contains("Invalid data"));
                }
                other => panic!("unexpected error {:?}", other),
            }
            let leftovers = std::fs::read_dir(dir.path().join("tmp")).unwrap().count();
            assert_eq!(leftovers, 0);
        }

        #[tokio::test]
        async fn test_ffmpeg_timeout() {
            let dir = tempfile::tempdir().unwrap();
            let ffmpeg = install(dir.path(), "ffmpeg", "#!/bin/sh\nexec sleep 10\n");
            let segs = segments(dir.path(), 2);

            let runner = FfmpegRunner::new(ffmpeg).with_timeout(Duration::from_millis(200));
            let concat = Concatenator::new(runner, dir.path().join("tmp"));
            let err = concat
                .concatenate(&segs, &dir.path().join("out.mp4"))
                .await
                .unwrap_err();
            assert!(matches!(err, MediaError::Timeout(_)));
        }

        #[tokio::test]
        async fn test_empty_output_is_error() {
            let dir = tempfile::tempdir().unwrap();
            let ffmpeg = install(dir.path(), "ffmpeg", "#!/bin/sh\nexit 0\n");
            let segs = segments(dir.path(), 2);

            let concat = Concatenator::new(FfmpegRunner::new(ffmpeg), dir.path().join("tmp"));
            let err = concat
                .concatenate(&segs, &dir.path().join("out.mp4"))
                .await
                .unwrap_err();
            assert!(matches!(err, MediaError::EmptyOutput(_)));
        }
    }
}
