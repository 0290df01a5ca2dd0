//! Worker configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use vgen_models::{CapabilityTable, GenerationMode};

use crate::error::WorkerError;

/// Where job records live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LedgerBackend {
    /// Process memory; jobs are lost on restart
    #[default]
    Memory,
    /// One JSON file per job under `{work_dir}/jobs`
    File,
}

impl FromStr for LedgerBackend {
    type Err = WorkerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" | "mem" => Ok(LedgerBackend::Memory),
            "file" | "fs" => Ok(LedgerBackend::File),
            other => Err(WorkerError::config_error(format!(
                "unknown ledger backend '{}', expected memory or file",
                other
            ))),
        }
    }
}

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Root for segments, final videos, manifests, images and job records
    pub work_dir: PathBuf,
    /// Delay between poll rounds
    pub poll_interval: Duration,
    /// Wall-clock budget for a job, measured from creation
    pub job_deadline: Duration,
    /// Jobs driven at the same time
    pub max_concurrent_jobs: usize,
    /// FFmpeg timeout for one concatenation
    pub concat_timeout: Duration,
    pub ledger: LedgerBackend,
    pub default_t2v_model: Option<String>,
    pub default_i2v_model: Option<String>,
    /// FFmpeg binary name or path
    pub ffmpeg_path: PathBuf,
    /// Largest inline (base64) image payload
    pub max_inline_image_bytes: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("/tmp/vgen"),
            poll_interval: Duration::from_secs(10),
            job_deadline: Duration::from_secs(600),
            max_concurrent_jobs: 4,
            concat_timeout: Duration::from_secs(300),
            ledger: LedgerBackend::Memory,
            default_t2v_model: None,
            default_i2v_model: None,
            ffmpeg_path: PathBuf::from("ffmpeg"),
            max_inline_image_bytes: 10 * 1024 * 1024,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Result<Self, WorkerError> {
        let defaults = Self::default();
        Ok(Self {
            work_dir: std::env::var("VGEN_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            poll_interval: Duration::from_secs(
                std::env::var("VGEN_POLL_INTERVAL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .filter(|n: &u64| *n > 0)
                    .unwrap_or(10),
            ),
            job_deadline: Duration::from_secs(
                std::env::var("VGEN_JOB_DEADLINE_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(600),
            ),
            max_concurrent_jobs: std::env::var("VGEN_MAX_CONCURRENT_JOBS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n: &usize| *n > 0)
                .unwrap_or(4),
            concat_timeout: Duration::from_secs(
                std::env::var("VGEN_CONCAT_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(300),
            ),
            ledger: match std::env::var("VGEN_LEDGER") {
                Ok(v) => v.parse()?,
                Err(_) => LedgerBackend::Memory,
            },
            default_t2v_model: std::env::var("VGEN_DEFAULT_T2V_MODEL").ok().filter(|s| !s.is_empty()),
            default_i2v_model: std::env::var("VGEN_DEFAULT_I2V_MODEL").ok().filter(|s| !s.is_empty()),
            ffmpeg_path: std::env::var("FFMPEG_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.ffmpeg_path),
            max_inline_image_bytes: defaults.max_inline_image_bytes,
        })
    }

    pub fn with_work_dir(mut self, work_dir: impl Into<PathBuf>) -> Self {
        self.work_dir = work_dir.into();
        self
    }

    pub fn with_polling(mut self, interval: Duration, deadline: Duration) -> Self {
        self.poll_interval = interval;
        self.job_deadline = deadline;
        self
    }

    pub fn segments_dir(&self) -> PathBuf {
        self.work_dir.join("segments")
    }

    pub fn videos_dir(&self) -> PathBuf {
        self.work_dir.join("videos")
    }

    pub fn tmp_dir(&self) -> PathBuf {
        self.work_dir.join("tmp")
    }

    pub fn images_dir(&self) -> PathBuf {
        self.work_dir.join("images")
    }

    pub fn jobs_dir(&self) -> PathBuf {
        self.work_dir.join("jobs")
    }

    /// Poll rounds needed to cover the deadline: `ceil(deadline / interval) + 1`.
    pub fn max_poll_attempts(&self) -> u32 {
        max_poll_attempts(self.job_deadline, self.poll_interval)
    }

    /// Built-in capability table with configured default models.
    pub fn capability_table(&self) -> CapabilityTable {
        let mut table = CapabilityTable::builtin();
        if let Some(model) = &self.default_t2v_model {
            table = table.with_default(GenerationMode::T2v, model.clone());
        }
        if let Some(model) = &self.default_i2v_model {
            table = table.with_default(GenerationMode::I2v, model.clone());
        }
        table
    }

    /// Create every working directory.
    pub async fn ensure_dirs(&self) -> std::io::Result<()> {
        for dir in [
            self.segments_dir(),
            self.videos_dir(),
            self.tmp_dir(),
            self.images_dir(),
            self.jobs_dir(),
        ] {
            tokio::fs::create_dir_all(dir).await?;
        }
        Ok(())
    }
}

pub(crate) fn max_poll_attempts(budget: Duration, interval: Duration) -> u32 {
    let interval = interval.as_millis().max(1);
    let rounds = budget.as_millis().div_ceil(interval);
    u32::try_from(rounds).unwrap_or(u32::MAX - 1) + 1
}
