//! Shared data models for the VGen video generation service.
//!
//! This crate provides Serde-serializable types for:
//! - Generation requests and the per-model capability table
//! - Planning (validation and segmentation)
//! - Jobs and the remote tasks backing their segments
//! - Image ingestion outcomes

pub mod capability;
pub mod error;
pub mod ingestion;
pub mod job;
pub mod plan;
pub mod request;
pub mod task;

// Re-export common types
pub use capability::{CapabilityTable, ModelCapability};
pub use error::UnsupportedParameterError;
pub use ingestion::{ImageIngestionResult, IngestionMethod, IngestionSummary};
pub use job::{
    FailureKind, Job, JobId, JobStatus, JobSummary, JobView, SegmentView, PROMPT_PREVIEW_CHARS,
    VIDEO_URL_PREFIX,
};
pub use plan::{segment_durations, GenerationPlan, Planner, SegmentSpec};
pub use request::{
    Engine, GenerationMode, GenerationRequest, Resolution, MAX_TOTAL_DURATION_SECS,
    MIN_TOTAL_DURATION_SECS,
};
pub use task::{RemoteTask, RemoteTaskStatus, TaskObservation, TaskUsage};
