//! Provider request/response types.

use serde::{Deserialize, Serialize};
use vgen_models::{
    GenerationPlan, GenerationRequest, RemoteTaskStatus, SegmentSpec, TaskObservation, TaskUsage,
};

/// Everything one provider call needs to render one segment.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskParams {
    pub model: String,
    pub prompt: String,
    /// Provider-consumable image reference (URL or data URI)
    pub image_url: Option<String>,
    pub audio_url: Option<String>,
    /// Frame size, `width*height`
    pub size: String,
    pub duration: u32,
    pub prompt_extend: bool,
    /// `None` when the model does not take the parameter
    pub audio: Option<bool>,
}

/// Prompt sent for one segment. Multi-segment plans tag each prompt with
/// its 1-based part number so the provider renders them as distinct shots.
pub fn segment_prompt(prompt: &str, segment_index: u32, segment_count: usize) -> String {
    if segment_count > 1 {
        format!("{}（第{}段）", prompt, segment_index + 1)
    } else {
        prompt.to_string()
    }
}

impl TaskParams {
    /// Parameters for `segment` of a planned request.
    pub fn for_segment(
        request: &GenerationRequest,
        plan: &GenerationPlan,
        segment: &SegmentSpec,
        image_reference: Option<&str>,
    ) -> Self {
        Self {
            model: plan.model.clone(),
            prompt: segment_prompt(&request.prompt, segment.index, plan.segments.len()),
            image_url: image_reference.map(str::to_string),
            audio_url: request.audio_url.clone(),
            size: plan.size.clone(),
            duration: segment.duration_seconds,
            prompt_extend: request.prompt_extend,
            audio: plan.audio_supported.then_some(plan.audio),
        }
    }

    pub fn has_inline_image(&self) -> bool {
        self.image_url
            .as_deref()
            .map_or(false, |u| u.starts_with("data:"))
    }
}

/// Outcome of a task creation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderResponse {
    /// Task queued remotely; never means the video is ready.
    Accepted { task_id: String },
    /// Refused; retrying the same call will not help.
    Rejected { reason: String, code: Option<String> },
    /// Worth retrying.
    TransientFailure { detail: String },
}

/// Handle to a created remote task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskHandle {
    pub task_id: String,
}

/// One status reading of a remote task.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskPoll {
    pub task_id: String,
    pub status: RemoteTaskStatus,
    pub video_url: Option<String>,
    pub usage: Option<TaskUsage>,
    pub message: Option<String>,
    pub code: Option<String>,
}

impl TaskPoll {
    pub fn new(task_id: impl Into<String>, status: RemoteTaskStatus) -> Self {
        Self {
            task_id: task_id.into(),
            status,
            video_url: None,
            usage: None,
            message: None,
            code: None,
        }
    }

    pub fn into_observation(self) -> TaskObservation {
        let error = match (self.code, self.message) {
            (Some(code), Some(message)) => Some(format!("{}: {}", code, message)),
            (None, Some(message)) => Some(message),
            (Some(code), None) => Some(code),
            (None, None) => None,
        };
        TaskObservation {
            status: self.status,
            remote_url: self.video_url,
            usage: self.usage,
            error,
        }
    }
}

// DashScope wire format

#[derive(Debug, Serialize)]
pub(crate) struct CreateTaskBody<'a> {
    pub model: &'a str,
    pub input: CreateTaskInput<'a>,
    pub parameters: CreateTaskParameters<'a>,
}

#[derive(Debug, Serialize)]
pub(crate) struct CreateTaskInput<'a> {
    pub prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub img_url: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<&'a str>,
}

#[derive(Debug, Serialize)]
pub(crate) struct CreateTaskParameters<'a> {
    pub size: &'a str,
    pub duration: u32,
    pub prompt_extend: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<bool>,
}

impl<'a> From<&'a TaskParams> for CreateTaskBody<'a> {
    fn from(params: &'a TaskParams) -> Self {
        Self {
            model: &params.model,
            input: CreateTaskInput {
                prompt: &params.prompt,
                img_url: params.image_url.as_deref(),
                audio_url: params.audio_url.as_deref(),
            },
            parameters: CreateTaskParameters {
                size: &params.size,
                duration: params.duration,
                prompt_extend: params.prompt_extend,
                audio: params.audio,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct TaskEnvelope {
    #[serde(default)]
    pub output: Option<TaskOutput>,
    #[serde(default)]
    pub usage: Option<TaskUsage>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TaskOutput {
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub task_status: Option<String>,
    #[serde(default)]
    pub video_url: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Error body returned with non-2xx statuses.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use vgen_models::Planner;

    #[test]
    fn test_audio_omitted_for_silent_models() {
        let request = GenerationRequest::image_to_video("x", "https://cdn.example.com/a.png", 5)
            .with_model("wan2.2-i2v-flash");
        let plan = Planner::default().plan(&request).unwrap();
        let params = TaskParams::for_segment(&request, &plan, &plan.segments[0], Some("https://cdn.example.com/a.png"));

        let body = serde_json::to_value(CreateTaskBody::from(&params)).unwrap();
        assert!(body["parameters"].get("audio").is_none());
        assert_eq!(body["input"]["img_url"], "https://cdn.example.com/a.png");
        assert_eq!(body["parameters"]["size"], "1280*720");
    }

    #[test]
    fn test_audio_sent_when_supported() {
        let mut request = GenerationRequest::text_to_video("x", 15);
        request.audio = false;
        let plan = Planner::default().plan(&request).unwrap();
        let params = TaskParams::for_segment(&request, &plan, &plan.segments[1], None);

        assert_eq!(params.audio, Some(false));
        assert_eq!(params.duration, 5);
        assert_eq!(params.prompt, "x（第2段）");
        let body = serde_json::to_value(CreateTaskBody::from(&params)).unwrap();
        assert_eq!(body["parameters"]["audio"], false);
        assert!(body["input"].get("img_url").is_none());
    }

    #[test]
    fn test_single_segment_prompt_untouched() {
        assert_eq!(segment_prompt("a red kite", 0, 1), "a red kite");
        assert_eq!(segment_prompt("a red kite", 0, 2), "a red kite（第1段）");
    }

    #[test]
    fn test_poll_observation_error_text() {
        let mut poll = TaskPoll::new("t", RemoteTaskStatus::Failed);
        poll.code = Some("DataInspectionFailed".into());
        poll.message = Some("unsafe content".into());
        let obs = poll.into_observation();
        assert_eq!(obs.error.as_deref(), Some("DataInspectionFailed: unsafe content"));
    }
}
