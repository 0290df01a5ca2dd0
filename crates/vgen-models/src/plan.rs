//! Request validation and segmentation.
//!
//! A provider call renders at most a few seconds of video, so longer requests
//! are split into ordered segments that are rendered separately and joined
//! afterwards.
//!
//! # Segmentation policy
//!
//! Greedy, largest chunk first, over the model's supported per-call durations.
//! A remainder shorter than the smallest supported chunk is added to the
//! previous segment; with no previous segment it becomes the only segment.
//! With `{5, 10}` this yields `12 -> [12]`, `17 -> [10, 7]`, `20 -> [10, 10]`.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::capability::CapabilityTable;
use crate::error::UnsupportedParameterError;
use crate::request::{
    Engine, GenerationMode, GenerationRequest, Resolution, MAX_TOTAL_DURATION_SECS,
    MIN_TOTAL_DURATION_SECS,
};

/// One provider call within a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SegmentSpec {
    /// Position in the final video (0-based)
    pub index: u32,
    /// Seconds rendered by this call
    pub duration_seconds: u32,
}

/// Validated, provider-ready decomposition of a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct GenerationPlan {
    /// Resolved model id
    pub model: String,
    pub mode: GenerationMode,
    pub resolution: Resolution,
    /// Provider frame size (`width*height`)
    pub size: String,
    /// Frame rate of the model output
    pub fps: u32,
    /// Audio flag after applying model support
    pub audio: bool,
    /// Whether the model accepts the audio parameter at all
    pub audio_supported: bool,
    /// Ordered segments
    pub segments: Vec<SegmentSpec>,
}

impl GenerationPlan {
    pub fn total_duration(&self) -> u32 {
        self.segments.iter().map(|s| s.duration_seconds).sum()
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Whether the segments must be concatenated afterwards.
    pub fn needs_concatenation(&self) -> bool {
        self.segments.len() > 1
    }

    pub fn durations(&self) -> Vec<u32> {
        self.segments.iter().map(|s| s.duration_seconds).collect()
    }
}

/// Validates requests against a capability table and splits them into segments.
#[derive(Debug, Clone, Default)]
pub struct Planner {
    capabilities: CapabilityTable,
}

impl Planner {
    pub fn new(capabilities: CapabilityTable) -> Self {
        Self { capabilities }
    }

    pub fn capabilities(&self) -> &CapabilityTable {
        &self.capabilities
    }

    /// Validate `request` and build its plan.
    pub fn plan(&self, request: &GenerationRequest) -> Result<GenerationPlan, UnsupportedParameterError> {
        match request.engine {
            Engine::Aliyun => {}
        }

        if request.prompt.trim().is_empty() {
            return Err(UnsupportedParameterError::new("prompt", "prompt must not be empty"));
        }

        if !(MIN_TOTAL_DURATION_SECS..=MAX_TOTAL_DURATION_SECS).contains(&request.duration) {
            return Err(UnsupportedParameterError::new(
                "duration",
                format!(
                    "{}s is outside the supported range {}-{}s",
                    request.duration, MIN_TOTAL_DURATION_SECS, MAX_TOTAL_DURATION_SECS
                ),
            ));
        }

        let model_name = request
            .model
            .as_deref()
            .unwrap_or_else(|| self.capabilities.default_model(request.mode));

        let capability = match self.capabilities.get(model_name) {
            Some(cap) if cap.mode == request.mode => cap,
            Some(cap) => {
                return Err(UnsupportedParameterError::new(
                    "model",
                    format!("{} is a {} model, request mode is {}", cap.name, cap.mode, request.mode),
                ))
            }
            None => {
                return Err(UnsupportedParameterError::new(
                    "model",
                    format!(
                        "unknown model {}; supported {} models: {}",
                        model_name,
                        request.mode,
                        self.capabilities.models_for(request.mode).join(", ")
                    ),
                ))
            }
        };

        if !capability.supports_resolution(request.resolution) {
            let supported: Vec<&str> = capability.resolutions.iter().map(|r| r.as_str()).collect();
            return Err(UnsupportedParameterError::new(
                "resolution",
                format!(
                    "{} does not support {}; supported: {}",
                    capability.name,
                    request.resolution,
                    supported.join(", ")
                ),
            ));
        }

        if request.mode.requires_image()
            && request.image_url.as_deref().map_or(true, |u| u.trim().is_empty())
        {
            return Err(UnsupportedParameterError::new(
                "image_url",
                "image-to-video requests need a source image",
            ));
        }

        if capability.durations.is_empty() {
            return Err(UnsupportedParameterError::new(
                "model",
                format!("{} declares no supported durations", capability.name),
            ));
        }

        let segments = segment_durations(request.duration, &capability.durations)
            .into_iter()
            .enumerate()
            .map(|(index, duration_seconds)| SegmentSpec {
                index: index as u32,
                duration_seconds,
            })
            .collect();

        Ok(GenerationPlan {
            model: capability.name.clone(),
            mode: request.mode,
            resolution: request.resolution,
            size: request.resolution.provider_size().to_string(),
            fps: capability.fps,
            audio: request.audio && capability.supports_audio,
            audio_supported: capability.supports_audio,
            segments,
        })
    }
}

/// Split `total` seconds into per-call durations.
///
/// `supported` may be in any order; it must not be empty.
pub fn segment_durations(total: u32, supported: &[u32]) -> Vec<u32> {
    let mut chunks: Vec<u32> = supported.iter().copied().filter(|d| *d > 0).collect();
    chunks.sort_unstable_by(|a, b| b.cmp(a));
    chunks.dedup();

    let mut out: Vec<u32> = Vec::new();
    let mut remaining = total;

    while remaining > 0 {
        match chunks.iter().find(|c| **c <= remaining) {
            Some(chunk) => {
                out.push(*chunk);
                remaining -= chunk;
            }
            None => {
                match out.last_mut() {
                    Some(last) => *last += remaining,
                    None => out.push(remaining),
                }
                remaining = 0;
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::ModelCapability;

    #[test]
    fn test_segmentation_table_five_ten() {
        let expected: [(u32, &[u32]); 18] = [
            (3, &[3]),
            (4, &[4]),
            (5, &[5]),
            (6, &[6]),
            (7, &[7]),
            (8, &[8]),
            (9, &[9]),
            (10, &[10]),
            (11, &[11]),
            (12, &[12]),
            (13, &[13]),
            (14, &[14]),
            (15, &[10, 5]),
            (16, &[10, 6]),
            (17, &[10, 7]),
            (18, &[10, 8]),
            (19, &[10, 9]),
            (20, &[10, 10]),
        ];

        for (total, segments) in expected {
            assert_eq!(segment_durations(total, &[5, 10]), segments, "D={}", total);
        }
    }

    #[test]
    fn test_segmentation_invariants() {
        for total in MIN_TOTAL_DURATION_SECS..=MAX_TOTAL_DURATION_SECS {
            let segs = segment_durations(total, &[10, 5]);
            assert_eq!(segs.iter().sum::<u32>(), total, "D={}", total);
            for d in &segs[..segs.len() - 1] {
                assert!([5, 10].contains(d), "D={} non-final segment {}", total, d);
            }
        }
    }

    #[test]
    fn test_segmentation_single_chunk_model() {
        assert_eq!(segment_durations(15, &[5]), vec![5, 5, 5]);
        assert_eq!(segment_durations(17, &[5]), vec![5, 5, 7]);
        assert_eq!(segment_durations(7, &[3, 4, 5]), vec![7]);
        assert_eq!(segment_durations(9, &[3, 4, 5]), vec![5, 4]);
    }

    #[test]
    fn test_plan_long_request() {
        let planner = Planner::default();
        let plan = planner.plan(&GenerationRequest::text_to_video("sunrise", 17)).unwrap();

        assert_eq!(plan.model, "wan2.5-t2v-preview");
        assert_eq!(plan.durations(), vec![10, 7]);
        assert_eq!(plan.segments[1], SegmentSpec { index: 1, duration_seconds: 7 });
        assert_eq!(plan.size, "1280*720");
        assert!(plan.needs_concatenation());
        assert_eq!(plan.total_duration(), 17);
    }

    #[test]
    fn test_plan_rejects_duration() {
        let planner = Planner::default();
        let err = planner.plan(&GenerationRequest::text_to_video("x", 21)).unwrap_err();
        assert_eq!(err.field, "duration");

        let err = planner.plan(&GenerationRequest::text_to_video("x", 2)).unwrap_err();
        assert_eq!(err.field, "duration");
    }

    #[test]
    fn test_plan_rejects_blank_prompt() {
        let err = Planner::default()
            .plan(&GenerationRequest::text_to_video("   ", 5))
            .unwrap_err();
        assert_eq!(err.field, "prompt");
    }

    #[test]
    fn test_plan_rejects_unknown_or_mismatched_model() {
        let planner = Planner::default();

        let err = planner
            .plan(&GenerationRequest::text_to_video("x", 5).with_model("sora"))
            .unwrap_err();
        assert_eq!(err.field, "model");

        let err = planner
            .plan(&GenerationRequest::text_to_video("x", 5).with_model("wan2.2-i2v-flash"))
            .unwrap_err();
        assert_eq!(err.field, "model");
    }

    #[test]
    fn test_plan_rejects_resolution() {
        let err = Planner::default()
            .plan(
                &GenerationRequest::text_to_video("x", 5)
                    .with_model("wan2.2-t2v-plus")
                    .with_resolution(Resolution::P720),
            )
            .unwrap_err();
        assert_eq!(err.field, "resolution");
    }

    #[test]
    fn test_plan_requires_image_for_i2v() {
        let mut req = GenerationRequest::image_to_video("x", "", 5);
        let err = Planner::default().plan(&req).unwrap_err();
        assert_eq!(err.field, "image_url");

        req.image_url = None;
        assert_eq!(Planner::default().plan(&req).unwrap_err().field, "image_url");
    }

    #[test]
    fn test_plan_disables_unsupported_audio() {
        let plan = Planner::default()
            .plan(
                &GenerationRequest::image_to_video("x", "https://cdn.example.com/a.jpg", 5)
                    .with_model("wan2.2-i2v-flash"),
            )
            .unwrap();
        assert!(!plan.audio);
        assert!(!plan.audio_supported);
        assert_eq!(plan.fps, 30);
    }

    #[test]
    fn test_plan_with_custom_table() {
        let table = CapabilityTable::new(
            vec![ModelCapability::new(
                "tiny",
                GenerationMode::T2v,
                &[Resolution::P720],
                &[5],
                false,
                24,
            )],
            "tiny",
            "tiny",
        );
        let plan = Planner::new(table)
            .plan(&GenerationRequest::text_to_video("x", 15))
            .unwrap();
        assert_eq!(plan.durations(), vec![5, 5, 5]);
        assert_eq!(
            plan.segments.iter().map(|s| s.index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
    }
}
