//! Video generation handlers.

use axum::body::Bytes;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{field, info, Span};
use vgen_models::{GenerationRequest, IngestionMethod, IngestionSummary, JobId, JobStatus, JobView};
use vgen_worker::{JobPage, JobQuery};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Accepted generation job.
#[derive(Debug, Serialize)]
pub struct GenerateResponse {
    pub job_id: JobId,
    pub status: JobStatus,
    pub task_ids: Vec<String>,
    pub segment_durations: Vec<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ingestion: Option<IngestionSummary>,
    pub message: String,
}

/// POST /api/video/generate
pub async fn generate_video(
    State(state): State<AppState>,
    payload: Result<Json<GenerationRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<GenerateResponse>)> {
    let Json(request) = payload?;
    let receipt = state.service.submit(request).await?;
    Span::current().record("job_id", field::display(&receipt.job_id));

    info!(
        job_id = %receipt.job_id,
        segments = receipt.segment_durations.len(),
        "Generation job accepted"
    );

    let message = match receipt.segment_durations.len() {
        1 => "generation started".to_string(),
        n => format!("generation started as {} segments", n),
    };

    Ok((
        StatusCode::ACCEPTED,
        Json(GenerateResponse {
            job_id: receipt.job_id,
            status: receipt.status,
            task_ids: receipt.remote_task_ids,
            segment_durations: receipt.segment_durations,
            ingestion: receipt.ingestion,
            message,
        }),
    ))
}

/// GET /api/video/job/:job_id
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobView>> {
    Ok(Json(state.service.get_status(&job_id).await?))
}

/// GET /api/video/jobs
pub async fn list_jobs(
    State(state): State<AppState>,
    query: Result<Query<JobQuery>, QueryRejection>,
) -> ApiResult<Json<JobPage>> {
    let Query(query) = query?;
    Ok(Json(state.service.list_jobs(&query).await?))
}

#[derive(Debug, Default, Deserialize)]
pub struct UploadParams {
    pub filename: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct UploadImageResponse {
    pub success: bool,
    pub image_url: String,
    pub method: IngestionMethod,
    pub degraded: bool,
    pub message: String,
}

/// POST /api/video/upload-image?filename=
///
/// The body is the raw image.
pub async fn upload_image(
    State(state): State<AppState>,
    params: Result<Query<UploadParams>, QueryRejection>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<UploadImageResponse>> {
    let Query(params) = params?;

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !content_type.starts_with("image/") {
        return Err(ApiError::unsupported_media_type(format!(
            "expected an image/* body, got '{}'",
            content_type
        )));
    }
    if body.is_empty() {
        return Err(ApiError::bad_request("empty image body"));
    }

    let uploaded = state
        .service
        .upload_image(body.to_vec(), params.filename.as_deref())
        .await?;

    Ok(Json(UploadImageResponse {
        success: true,
        image_url: uploaded.image_url,
        method: uploaded.method,
        degraded: uploaded.degraded,
        message: uploaded.message,
    }))
}
