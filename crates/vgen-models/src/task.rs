//! Remote provider task tracking.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::plan::SegmentSpec;

/// Lifecycle of one remote generation task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum RemoteTaskStatus {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl RemoteTaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RemoteTaskStatus::Pending => "PENDING",
            RemoteTaskStatus::Running => "RUNNING",
            RemoteTaskStatus::Succeeded => "SUCCEEDED",
            RemoteTaskStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RemoteTaskStatus::Succeeded | RemoteTaskStatus::Failed)
    }

    /// Map a provider status string.
    ///
    /// Provider-side cancellation and unknown states count as failures.
    pub fn from_provider(status: &str) -> Self {
        match status.trim().to_ascii_uppercase().as_str() {
            "PENDING" | "QUEUED" => RemoteTaskStatus::Pending,
            "RUNNING" => RemoteTaskStatus::Running,
            "SUCCEEDED" => RemoteTaskStatus::Succeeded,
            _ => RemoteTaskStatus::Failed,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            RemoteTaskStatus::Pending => 0,
            RemoteTaskStatus::Running => 1,
            RemoteTaskStatus::Succeeded | RemoteTaskStatus::Failed => 2,
        }
    }
}

impl fmt::Display for RemoteTaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Usage metadata reported by the provider for a finished task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TaskUsage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_ratio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_count: Option<u32>,
}

/// One provider task backing one segment of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RemoteTask {
    /// Provider-assigned id, stored verbatim
    pub task_id: String,
    pub segment_index: u32,
    pub duration_seconds: u32,
    #[serde(default)]
    pub status: RemoteTaskStatus,
    /// Provider artifact URL once succeeded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_url: Option<String>,
    /// Downloaded segment file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TaskUsage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl RemoteTask {
    pub fn new(task_id: impl Into<String>, segment: &SegmentSpec) -> Self {
        Self {
            task_id: task_id.into(),
            segment_index: segment.index,
            duration_seconds: segment.duration_seconds,
            status: RemoteTaskStatus::Pending,
            remote_url: None,
            local_path: None,
            usage: None,
            error: None,
            updated_at: Utc::now(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_downloaded(&self) -> bool {
        self.local_path.is_some()
    }

    /// Record a provider observation.
    ///
    /// Returns `false` when the observation is ignored: terminal tasks never
    /// change, and a status earlier than the current one is stale.
    pub fn observe(&mut self, observation: TaskObservation) -> bool {
        if self.status.is_terminal() || observation.status.rank() < self.status.rank() {
            return false;
        }

        self.status = observation.status;
        if observation.remote_url.is_some() {
            self.remote_url = observation.remote_url;
        }
        if observation.usage.is_some() {
            self.usage = observation.usage;
        }
        if observation.status == RemoteTaskStatus::Failed {
            self.error = Some(
                observation
                    .error
                    .unwrap_or_else(|| "remote task failed".to_string()),
            );
        }
        self.updated_at = Utc::now();
        true
    }
}

/// A single status reading for a remote task.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TaskObservation {
    pub status: RemoteTaskStatus,
    pub remote_url: Option<String>,
    pub usage: Option<TaskUsage>,
    pub error: Option<String>,
}

impl TaskObservation {
    pub fn new(status: RemoteTaskStatus) -> Self {
        Self {
            status,
            ..Default::default()
        }
    }

    pub fn succeeded(remote_url: impl Into<String>) -> Self {
        Self {
            status: RemoteTaskStatus::Succeeded,
            remote_url: Some(remote_url.into()),
            ..Default::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: RemoteTaskStatus::Failed,
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task() -> RemoteTask {
        RemoteTask::new("t-1", &SegmentSpec { index: 0, duration_seconds: 5 })
    }

    #[test]
    fn test_provider_status_mapping() {
        assert_eq!(RemoteTaskStatus::from_provider("RUNNING"), RemoteTaskStatus::Running);
        assert_eq!(RemoteTaskStatus::from_provider("succeeded"), RemoteTaskStatus::Succeeded);
        assert_eq!(RemoteTaskStatus::from_provider("CANCELED"), RemoteTaskStatus::Failed);
        assert_eq!(RemoteTaskStatus::from_provider("UNKNOWN"), RemoteTaskStatus::Failed);
    }

    #[test]
    fn test_status_never_regresses() {
        let mut t = task();
        assert!(t.observe(TaskObservation::new(RemoteTaskStatus::Running)));
        assert!(!t.observe(TaskObservation::new(RemoteTaskStatus::Pending)));
        assert_eq!(t.status, RemoteTaskStatus::Running);

        assert!(t.observe(TaskObservation::succeeded("https://cdn/x.mp4")));
        assert!(!t.observe(TaskObservation::failed("late failure")));
        assert_eq!(t.status, RemoteTaskStatus::Succeeded);
        assert_eq!(t.remote_url.as_deref(), Some("https://cdn/x.mp4"));
        assert!(t.error.is_none());
    }

    #[test]
    fn test_failed_observation_records_error() {
        let mut t = task();
        assert!(t.observe(TaskObservation::new(RemoteTaskStatus::Failed)));
        assert_eq!(t.error.as_deref(), Some("remote task failed"));
    }

    #[test]
    fn test_status_wire_format() {
        assert_eq!(
            serde_json::to_string(&RemoteTaskStatus::Succeeded).unwrap(),
            r#""SUCCEEDED""#
        );
    }
}
