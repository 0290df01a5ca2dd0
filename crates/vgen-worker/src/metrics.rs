//! Job pipeline metrics.
//!
//! Recorded through the `metrics` facade; the API process installs the
//! Prometheus recorder. Without a recorder these calls are no-ops.

use metrics::{counter, gauge, histogram};
use vgen_models::{FailureKind, GenerationMode};

/// Metric names as constants for consistency.
pub mod names {
    pub const JOBS_SUBMITTED_TOTAL: &str = "vgen_jobs_submitted_total";
    pub const JOBS_COMPLETED_TOTAL: &str = "vgen_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "vgen_jobs_failed_total";
    pub const JOBS_ACTIVE: &str = "vgen_jobs_active";
    pub const SEGMENTS_CREATED_TOTAL: &str = "vgen_segments_created_total";
    pub const INGESTION_DEGRADED_TOTAL: &str = "vgen_ingestion_degraded_total";
    pub const CONCAT_DURATION_SECONDS: &str = "vgen_concat_duration_seconds";
    pub const JOB_DURATION_SECONDS: &str = "vgen_job_duration_seconds";
}

pub fn record_job_submitted(mode: GenerationMode, segments: usize) {
    let labels = [("mode", mode.as_str().to_string())];
    counter!(names::JOBS_SUBMITTED_TOTAL, &labels).increment(1);
    histogram!("vgen_job_segments", &labels).record(segments as f64);
}

pub fn record_segment_created(model: &str) {
    let labels = [("model", model.to_string())];
    counter!(names::SEGMENTS_CREATED_TOTAL, &labels).increment(1);
}

pub fn record_job_completed(mode: GenerationMode, duration_secs: f64) {
    let labels = [("mode", mode.as_str().to_string())];
    counter!(names::JOBS_COMPLETED_TOTAL, &labels).increment(1);
    histogram!(names::JOB_DURATION_SECONDS, &labels).record(duration_secs);
}

pub fn record_job_failed(kind: FailureKind) {
    let labels = [("kind", kind.as_str().to_string())];
    counter!(names::JOBS_FAILED_TOTAL, &labels).increment(1);
}

pub fn record_ingestion_degraded() {
    counter!(names::INGESTION_DEGRADED_TOTAL).increment(1);
}

pub fn record_concat_duration(segments: usize, duration_secs: f64) {
    let labels = [("segments", segments.to_string())];
    histogram!(names::CONCAT_DURATION_SECONDS, &labels).record(duration_secs);
}

/// Jobs currently being driven by this process.
pub fn set_active_jobs(count: usize) {
    gauge!(names::JOBS_ACTIVE).set(count as f64);
}
