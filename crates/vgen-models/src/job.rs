//! Generation job definitions.

use chrono::{DateTime, Duration, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

use crate::ingestion::IngestionSummary;
use crate::plan::GenerationPlan;
use crate::request::{GenerationMode, GenerationRequest, Resolution};
use crate::task::{RemoteTask, RemoteTaskStatus, TaskObservation, TaskUsage};

const JOB_ID_PREFIX: &str = "job_";

/// Longest prompt excerpt shown in job listings.
pub const PROMPT_PREVIEW_CHARS: usize = 100;

/// URL path under which finished videos are served.
pub const VIDEO_URL_PREFIX: &str = "/media/videos/";

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(format!("{}{}", JOB_ID_PREFIX, Uuid::new_v4().simple()))
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Parse a caller-supplied id, rejecting anything not shaped like ours.
    pub fn parse(s: &str) -> Option<Self> {
        let hex = s.strip_prefix(JOB_ID_PREFIX)?;
        if hex.len() == 32 && hex.chars().all(|c| c.is_ascii_hexdigit()) {
            Some(Self(s.to_string()))
        } else {
            None
        }
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Job lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    /// Accepted, remote tasks being created
    #[default]
    Pending,
    /// Remote tasks in flight
    Running,
    /// Segments being merged
    Concatenating,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Running => "RUNNING",
            JobStatus::Concatenating => "CONCATENATING",
            JobStatus::Succeeded => "SUCCEEDED",
            JobStatus::Failed => "FAILED",
        }
    }

    /// Check if this is a terminal state (no more updates expected).
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a job failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Validation,
    ProviderRejection,
    TransientNetwork,
    Timeout,
    Download,
    Concatenation,
    Internal,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Validation => "validation",
            FailureKind::ProviderRejection => "provider_rejection",
            FailureKind::TransientNetwork => "transient_network",
            FailureKind::Timeout => "timeout",
            FailureKind::Download => "download",
            FailureKind::Concatenation => "concatenation",
            FailureKind::Internal => "internal",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A video generation job.
///
/// Status changes go through the guarded mutators below. Once a job is
/// SUCCEEDED or FAILED every mutator returns `false` and leaves it untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Job {
    pub id: JobId,

    /// Request as accepted
    pub request: GenerationRequest,

    pub plan: GenerationPlan,

    /// One task per created segment, in segment order
    #[serde(default)]
    pub tasks: Vec<RemoteTask>,

    #[serde(default)]
    pub status: JobStatus,

    /// Final video on local disk
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_path: Option<PathBuf>,

    /// Size of the final video in bytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_size: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<FailureKind>,

    /// Segments finished remotely when the job failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_segments: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingestion: Option<IngestionSummary>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a PENDING job for a planned request.
    pub fn new(request: GenerationRequest, plan: GenerationPlan) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            request,
            plan,
            tasks: Vec::new(),
            status: JobStatus::Pending,
            artifact_path: None,
            artifact_size: None,
            error_message: None,
            error_kind: None,
            completed_segments: None,
            ingestion: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn set_ingestion(&mut self, summary: IngestionSummary) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.ingestion = Some(summary);
        self.touch();
        true
    }

    /// Record a created remote task.
    pub fn attach_task(&mut self, task: RemoteTask) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.tasks.push(task);
        self.touch();
        true
    }

    /// PENDING -> RUNNING, once every segment has a remote task.
    pub fn mark_running(&mut self) -> bool {
        if self.status != JobStatus::Pending {
            return false;
        }
        self.status = JobStatus::Running;
        self.touch();
        true
    }

    /// RUNNING -> CONCATENATING.
    pub fn begin_concatenating(&mut self) -> bool {
        if self.status != JobStatus::Running {
            return false;
        }
        self.status = JobStatus::Concatenating;
        self.touch();
        true
    }

    /// Finish with the merged artifact.
    pub fn succeed(&mut self, artifact_path: PathBuf, size: u64) -> bool {
        if !matches!(self.status, JobStatus::Running | JobStatus::Concatenating) {
            return false;
        }
        let now = Utc::now();
        self.status = JobStatus::Succeeded;
        self.artifact_path = Some(artifact_path);
        self.artifact_size = Some(size);
        self.updated_at = now;
        self.completed_at = Some(now);
        true
    }

    /// Fail the job, keeping the count of segments that did finish.
    pub fn fail(&mut self, kind: FailureKind, message: impl Into<String>) -> bool {
        if self.is_terminal() {
            return false;
        }
        let now = Utc::now();
        self.status = JobStatus::Failed;
        self.error_kind = Some(kind);
        self.error_message = Some(message.into());
        self.completed_segments = Some(self.succeeded_segments());
        self.updated_at = now;
        self.completed_at = Some(now);
        true
    }

    /// Apply a provider observation to the task of `segment_index`.
    pub fn observe_task(&mut self, segment_index: u32, observation: TaskObservation) -> bool {
        if self.is_terminal() {
            return false;
        }
        let applied = self
            .task_mut(segment_index)
            .map(|t| t.observe(observation))
            .unwrap_or(false);
        if applied {
            self.touch();
        }
        applied
    }

    /// Record where a succeeded segment was downloaded.
    pub fn set_segment_path(&mut self, segment_index: u32, path: PathBuf) -> bool {
        if self.is_terminal() {
            return false;
        }
        match self.task_mut(segment_index) {
            Some(task) if task.status == RemoteTaskStatus::Succeeded => {
                task.local_path = Some(path);
                self.touch();
                true
            }
            _ => false,
        }
    }

    fn task_mut(&mut self, segment_index: u32) -> Option<&mut RemoteTask> {
        self.tasks.iter_mut().find(|t| t.segment_index == segment_index)
    }

    pub fn task(&self, segment_index: u32) -> Option<&RemoteTask> {
        self.tasks.iter().find(|t| t.segment_index == segment_index)
    }

    pub fn succeeded_segments(&self) -> u32 {
        self.tasks
            .iter()
            .filter(|t| t.status == RemoteTaskStatus::Succeeded)
            .count() as u32
    }

    /// Lowest-index failed task, if any.
    pub fn first_failed_task(&self) -> Option<&RemoteTask> {
        self.tasks
            .iter()
            .filter(|t| t.status == RemoteTaskStatus::Failed)
            .min_by_key(|t| t.segment_index)
    }

    /// Every planned segment has a task and all of them succeeded.
    pub fn all_segments_succeeded(&self) -> bool {
        self.tasks.len() == self.plan.segments.len()
            && self.tasks.iter().all(|t| t.status == RemoteTaskStatus::Succeeded)
    }

    pub fn pending_tasks(&self) -> impl Iterator<Item = &RemoteTask> {
        self.tasks.iter().filter(|t| !t.is_terminal())
    }

    /// Downloaded segment files in segment order.
    pub fn segment_paths(&self) -> Option<Vec<PathBuf>> {
        let mut tasks: Vec<&RemoteTask> = self.tasks.iter().collect();
        tasks.sort_by_key(|t| t.segment_index);
        tasks.into_iter().map(|t| t.local_path.clone()).collect()
    }

    /// When the job must be finished by.
    pub fn deadline(&self, budget: std::time::Duration) -> DateTime<Utc> {
        let budget = Duration::from_std(budget).unwrap_or_else(|_| Duration::days(36_500));
        self.created_at + budget
    }

    pub fn view(&self) -> JobView {
        JobView::from(self)
    }

    /// Served URL of the final video.
    pub fn video_url(&self) -> Option<String> {
        let name = self.artifact_path.as_deref()?.file_name()?.to_str()?;
        Some(format!("{}{}", VIDEO_URL_PREFIX, name))
    }

    pub fn summary(&self) -> JobSummary {
        JobSummary::from(self)
    }
}

/// Per-segment part of a status response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SegmentView {
    pub index: u32,
    pub task_id: String,
    pub duration: u32,
    pub status: RemoteTaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TaskUsage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Job status as returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct JobView {
    pub job_id: JobId,
    pub status: JobStatus,
    pub mode: GenerationMode,
    pub model: String,
    pub duration: u32,
    pub resolution: Resolution,
    pub segment_count: u32,
    pub completed_segments: u32,
    pub segments: Vec<SegmentView>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_path: Option<PathBuf>,
    /// Where the finished video is served, `/media/videos/{file}`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<FailureKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingestion: Option<IngestionSummary>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&Job> for JobView {
    fn from(job: &Job) -> Self {
        let mut segments: Vec<SegmentView> = job
            .tasks
            .iter()
            .map(|t| SegmentView {
                index: t.segment_index,
                task_id: t.task_id.clone(),
                duration: t.duration_seconds,
                status: t.status,
                video_url: t.remote_url.clone(),
                usage: t.usage.clone(),
                error: t.error.clone(),
            })
            .collect();
        segments.sort_by_key(|s| s.index);

        Self {
            job_id: job.id.clone(),
            status: job.status,
            mode: job.request.mode,
            model: job.plan.model.clone(),
            duration: job.request.duration,
            resolution: job.request.resolution,
            segment_count: job.plan.segments.len() as u32,
            completed_segments: job.completed_segments.unwrap_or_else(|| job.succeeded_segments()),
            segments,
            video_path: job.artifact_path.clone(),
            video_url: job.video_url(),
            file_size: job.artifact_size,
            error_message: job.error_message.clone(),
            error_kind: job.error_kind,
            ingestion: job.ingestion.clone(),
            created_at: job.created_at,
            updated_at: job.updated_at,
            completed_at: job.completed_at,
        }
    }
}

/// Compact job entry for listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct JobSummary {
    pub job_id: JobId,
    pub status: JobStatus,
    pub mode: GenerationMode,
    pub prompt: String,
    pub duration: u32,
    pub segment_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<&Job> for JobSummary {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id.clone(),
            status: job.status,
            mode: job.request.mode,
            prompt: preview(&job.request.prompt),
            duration: job.request.duration,
            segment_count: job.plan.segments.len() as u32,
            project_id: job.request.project_id,
            video_path: job.artifact_path.clone(),
            error_message: job.error_message.clone(),
            created_at: job.created_at,
        }
    }
}

fn preview(prompt: &str) -> String {
    if prompt.chars().count() <= PROMPT_PREVIEW_CHARS {
        return prompt.to_string();
    }
    let mut out: String = prompt.chars().take(PROMPT_PREVIEW_CHARS).collect();
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::Planner;

    fn job(duration: u32) -> Job {
        let request = GenerationRequest::text_to_video("a lighthouse at dusk", duration);
        let plan = Planner::default().plan(&request).unwrap();
        let mut job = Job::new(request, plan);
        let segments = job.plan.segments.clone();
        for seg in &segments {
            job.attach_task(RemoteTask::new(format!("task-{}", seg.index), seg));
        }
        job
    }

    #[test]
    fn test_job_id_format() {
        let id = JobId::new();
        assert!(id.as_str().starts_with("job_"));
        assert_eq!(id.as_str().len(), 36);
        assert_eq!(JobId::parse(id.as_str()), Some(id));

        assert!(JobId::parse("job_123").is_none());
        assert!(JobId::parse("../etc/passwd").is_none());
        assert!(JobId::parse("task_0123456789abcdef0123456789abcdef").is_none());
    }

    #[test]
    fn test_job_state_transitions() {
        let mut job = job(17);
        assert_eq!(job.status, JobStatus::Pending);
        assert!(!job.begin_concatenating());

        assert!(job.mark_running());
        assert!(!job.mark_running());
        assert!(job.begin_concatenating());
        assert!(job.succeed(PathBuf::from("/tmp/videos/out.mp4"), 42));
        assert!(job.completed_at.is_some());

        let view = job.view();
        assert_eq!(view.video_url.as_deref(), Some("/media/videos/out.mp4"));
        assert_eq!(view.file_size, Some(42));
    }

    #[test]
    fn test_terminal_job_is_immutable() {
        let mut job = job(5);
        job.mark_running();
        assert!(job.fail(FailureKind::Timeout, "deadline exceeded"));
        let snapshot = job.clone();

        assert!(!job.fail(FailureKind::Internal, "again"));
        assert!(!job.succeed(PathBuf::from("/tmp/x.mp4"), 1));
        assert!(!job.observe_task(0, TaskObservation::succeeded("https://cdn/x.mp4")));
        let first = job.plan.segments[0];
        assert!(!job.attach_task(RemoteTask::new("late", &first)));
        assert_eq!(job, snapshot);
    }

    #[test]
    fn test_fail_records_completed_segments() {
        let mut job = job(20);
        job.mark_running();
        job.observe_task(0, TaskObservation::succeeded("https://cdn/0.mp4"));
        job.fail(FailureKind::Timeout, "deadline exceeded");

        assert_eq!(job.completed_segments, Some(1));
        assert_eq!(job.view().completed_segments, 1);
        assert_eq!(job.error_kind, Some(FailureKind::Timeout));
    }

    #[test]
    fn test_first_failed_task_lowest_index() {
        let request = GenerationRequest::text_to_video("x", 15).with_model("wan2.2-t2v-plus").with_resolution(Resolution::P480);
        let plan = Planner::default().plan(&request).unwrap();
        let mut job = Job::new(request, plan);
        for seg in job.plan.segments.clone() {
            job.attach_task(RemoteTask::new(format!("t{}", seg.index), &seg));
        }

        job.observe_task(2, TaskObservation::failed("content policy"));
        job.observe_task(1, TaskObservation::failed("quota"));
        assert_eq!(job.first_failed_task().map(|t| t.segment_index), Some(1));
    }

    #[test]
    fn test_segment_paths_require_all_downloads() {
        let mut job = job(20);
        job.mark_running();
        job.observe_task(1, TaskObservation::succeeded("https://cdn/1.mp4"));
        job.observe_task(0, TaskObservation::succeeded("https://cdn/0.mp4"));
        assert!(job.all_segments_succeeded());
        assert!(job.segment_paths().is_none());

        assert!(job.set_segment_path(1, PathBuf::from("/s/1.mp4")));
        assert!(job.set_segment_path(0, PathBuf::from("/s/0.mp4")));
        assert_eq!(
            job.segment_paths().unwrap(),
            vec![PathBuf::from("/s/0.mp4"), PathBuf::from("/s/1.mp4")]
        );
    }

    #[test]
    fn test_summary_truncates_prompt() {
        let request = GenerationRequest::text_to_video("é".repeat(150), 5);
        let plan = Planner::default().plan(&request).unwrap();
        let summary = Job::new(request, plan).summary();
        assert_eq!(summary.prompt.chars().count(), PROMPT_PREVIEW_CHARS + 3);
        assert!(summary.prompt.ends_with("..."));
    }

    #[test]
    fn test_job_json_roundtrip_keeps_status() {
        let mut job = job(5);
        job.mark_running();
        let json = serde_json::to_string(&job).unwrap();
        assert!(json.contains(r#""status":"RUNNING""#));
        let back: Job = serde_json::from_str(&json).unwrap();
        assert_eq!(back, job);
    }
}
