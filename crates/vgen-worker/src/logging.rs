//! Structured job logging.
//!
//! Every line carries `job_id` and `phase` fields so one job can be followed
//! from submission through polling to the final video.

use std::fmt;
use std::path::Path;

use tracing::{debug, error, info, warn, Span};
use vgen_models::{FailureKind, GenerationPlan, JobId};

/// Pipeline stage a log line belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Submit,
    Poll,
    Concatenate,
    Resume,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Submit => "submit",
            Phase::Poll => "poll",
            Phase::Concatenate => "concatenate",
            Phase::Resume => "resume",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Job lifecycle events with the job id and phase attached.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: JobId,
    phase: Phase,
}

impl JobLogger {
    pub fn new(job_id: &JobId, phase: Phase) -> Self {
        Self {
            job_id: job_id.clone(),
            phase,
        }
    }

    pub fn accepted(&self, plan: &GenerationPlan) {
        info!(
            job_id = %self.job_id,
            phase = %self.phase,
            mode = %plan.mode,
            model = %plan.model,
            duration = plan.total_duration(),
            segments = ?plan.durations(),
            "Job accepted"
        );
    }

    pub fn ingestion_degraded(&self, reason: &str) {
        warn!(
            job_id = %self.job_id,
            phase = %self.phase,
            reason,
            "Source image sent inline"
        );
    }

    pub fn task_created(&self, segment: u32, task_id: &str) {
        debug!(
            job_id = %self.job_id,
            phase = %self.phase,
            segment,
            task_id,
            "Remote task created"
        );
    }

    pub fn tasks_running(&self, task_ids: &[String]) {
        info!(
            job_id = %self.job_id,
            phase = %self.phase,
            tasks = %task_ids.join(","),
            "All remote tasks created"
        );
    }

    /// Remote tasks left behind; the provider has no cancel call.
    pub fn orphaned(&self, task_ids: &[String]) {
        if task_ids.is_empty() {
            return;
        }
        warn!(
            job_id = %self.job_id,
            phase = %self.phase,
            count = task_ids.len(),
            tasks = %task_ids.join(","),
            "Abandoning remote tasks"
        );
    }

    pub fn concatenating(&self, segments: usize) {
        info!(
            job_id = %self.job_id,
            phase = %self.phase,
            segments,
            "Concatenating segments"
        );
    }

    pub fn succeeded(&self, artifact: &Path, size: u64) {
        info!(
            job_id = %self.job_id,
            phase = %self.phase,
            artifact = %artifact.display(),
            bytes = size,
            "Job succeeded"
        );
    }

    pub fn failed(&self, kind: FailureKind, message: &str) {
        error!(
            job_id = %self.job_id,
            phase = %self.phase,
            kind = %kind,
            "Job failed: {}", message
        );
    }

    /// Span for a whole phase, e.g. a spawned pipeline.
    pub fn span(&self) -> Span {
        tracing::info_span!("job", job_id = %self.job_id, phase = %self.phase)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_names() {
        assert_eq!(Phase::Submit.to_string(), "submit");
        assert_eq!(Phase::Poll.to_string(), "poll");
        assert_eq!(Phase::Concatenate.as_str(), "concatenate");
        assert_eq!(Phase::Resume.as_str(), "resume");
    }
}
