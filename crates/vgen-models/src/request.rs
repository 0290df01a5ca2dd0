//! Generation request models.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Shortest total duration a caller may request, in seconds.
pub const MIN_TOTAL_DURATION_SECS: u32 = 3;

/// Longest total duration a caller may request, in seconds.
pub const MAX_TOTAL_DURATION_SECS: u32 = 20;

/// Remote engine that renders the segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    /// Alibaba DashScope (Wanxiang video synthesis)
    #[default]
    Aliyun,
}

impl Engine {
    pub fn as_str(&self) -> &'static str {
        match self {
            Engine::Aliyun => "aliyun",
        }
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Generation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum GenerationMode {
    /// Text to video
    T2v,
    /// Image to video
    I2v,
}

impl GenerationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationMode::T2v => "t2v",
            GenerationMode::I2v => "i2v",
        }
    }

    /// Whether this mode needs a source image.
    pub fn requires_image(&self) -> bool {
        matches!(self, GenerationMode::I2v)
    }
}

impl fmt::Display for GenerationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output resolution tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
pub enum Resolution {
    #[serde(rename = "480P")]
    P480,
    #[default]
    #[serde(rename = "720P")]
    P720,
    #[serde(rename = "1080P")]
    P1080,
}

impl Resolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::P480 => "480P",
            Resolution::P720 => "720P",
            Resolution::P1080 => "1080P",
        }
    }

    /// Frame size in the provider's `width*height` notation.
    pub fn provider_size(&self) -> &'static str {
        match self {
            Resolution::P480 => "832*480",
            Resolution::P720 => "1280*720",
            Resolution::P1080 => "1920*1080",
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request to synthesize one video.
///
/// Accepted requests are stored by value on the job and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct GenerationRequest {
    /// Rendering engine
    #[serde(default)]
    pub engine: Engine,

    /// Text-to-video or image-to-video
    pub mode: GenerationMode,

    /// Scene description
    pub prompt: String,

    /// Source image (required for i2v)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,

    /// Driving audio track
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,

    /// Total duration in seconds
    #[serde(default = "default_duration")]
    pub duration: u32,

    /// Output resolution
    #[serde(default)]
    pub resolution: Resolution,

    /// Model id; the mode's default model when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Ask the provider to generate a soundtrack
    #[serde(default = "default_true")]
    pub audio: bool,

    /// Let the provider rewrite the prompt
    #[serde(default = "default_true")]
    pub prompt_extend: bool,

    /// Owning project
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<i64>,
}

fn default_duration() -> u32 {
    5
}

fn default_true() -> bool {
    true
}

impl GenerationRequest {
    /// Create a text-to-video request with default options.
    pub fn text_to_video(prompt: impl Into<String>, duration: u32) -> Self {
        Self {
            engine: Engine::Aliyun,
            mode: GenerationMode::T2v,
            prompt: prompt.into(),
            image_url: None,
            audio_url: None,
            duration,
            resolution: Resolution::default(),
            model: None,
            audio: true,
            prompt_extend: true,
            project_id: None,
        }
    }

    /// Create an image-to-video request with default options.
    pub fn image_to_video(
        prompt: impl Into<String>,
        image_url: impl Into<String>,
        duration: u32,
    ) -> Self {
        Self {
            mode: GenerationMode::I2v,
            image_url: Some(image_url.into()),
            ..Self::text_to_video(prompt, duration)
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_resolution(mut self, resolution: Resolution) -> Self {
        self.resolution = resolution;
        self
    }

    pub fn with_project(mut self, project_id: i64) -> Self {
        self.project_id = Some(project_id);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_defaults_from_json() {
        let req: GenerationRequest =
            serde_json::from_str(r#"{"mode":"t2v","prompt":"a cat on a boat"}"#).unwrap();

        assert_eq!(req.engine, Engine::Aliyun);
        assert_eq!(req.duration, 5);
        assert_eq!(req.resolution, Resolution::P720);
        assert!(req.audio);
        assert!(req.prompt_extend);
        assert!(req.model.is_none());
    }

    #[test]
    fn test_resolution_wire_names() {
        let res: Resolution = serde_json::from_str(r#""1080P""#).unwrap();
        assert_eq!(res, Resolution::P1080);
        assert_eq!(res.provider_size(), "1920*1080");
        assert_eq!(serde_json::to_string(&Resolution::P480).unwrap(), r#""480P""#);
    }

    #[test]
    fn test_image_to_video_builder() {
        let req = GenerationRequest::image_to_video("waves", "https://cdn.example.com/a.png", 12)
            .with_project(7);

        assert_eq!(req.mode, GenerationMode::I2v);
        assert!(req.mode.requires_image());
        assert_eq!(req.image_url.as_deref(), Some("https://cdn.example.com/a.png"));
        assert_eq!(req.project_id, Some(7));
    }
}
