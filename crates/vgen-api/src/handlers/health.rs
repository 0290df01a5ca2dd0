//! Health check handlers.

use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::Serialize;

use crate::state::AppState;

/// Health response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: String,
}

/// Liveness check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now().to_rfc3339(),
    })
}

/// Readiness check response.
#[derive(Serialize)]
pub struct ReadinessResponse {
    pub status: String,
    pub checks: ReadinessChecks,
}

#[derive(Serialize)]
pub struct ReadinessChecks {
    pub storage: CheckStatus,
    pub ffmpeg: CheckStatus,
}

#[derive(Serialize)]
pub struct CheckStatus {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

impl CheckStatus {
    fn ok(latency_ms: Option<u64>) -> Self {
        Self {
            status: "ok".to_string(),
            error: None,
            latency_ms,
        }
    }

    /// Not configured; the service runs degraded without it.
    fn disabled(reason: impl Into<String>) -> Self {
        Self {
            status: "disabled".to_string(),
            error: Some(reason.into()),
            latency_ms: None,
        }
    }

    fn error(msg: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            error: Some(msg.into()),
            latency_ms: None,
        }
    }

    fn is_failure(&self) -> bool {
        self.status == "error"
    }
}

/// Readiness check endpoint.
/// Checks object storage connectivity and FFmpeg presence.
pub async fn ready(
    State(state): State<AppState>,
) -> Result<Json<ReadinessResponse>, (StatusCode, Json<ReadinessResponse>)> {
    let storage = match state.service.object_store() {
        Some(store) => {
            let start = Instant::now();
            match store.check_connectivity().await {
                Ok(()) => CheckStatus::ok(Some(start.elapsed().as_millis() as u64)),
                Err(e) => CheckStatus::error(e.to_string()),
            }
        }
        None => CheckStatus::disabled("no object storage configured, images are sent inline"),
    };

    let ffmpeg = if state.service.ffmpeg_available() {
        CheckStatus::ok(None)
    } else {
        CheckStatus::error(format!(
            "ffmpeg not found at {}",
            state.service.config().ffmpeg_path.display()
        ))
    };

    let all_ok = !storage.is_failure() && !ffmpeg.is_failure();
    let response = ReadinessResponse {
        status: if all_ok { "ready" } else { "degraded" }.to_string(),
        checks: ReadinessChecks { storage, ffmpeg },
    };

    if all_ok {
        Ok(Json(response))
    } else {
        Err((StatusCode::SERVICE_UNAVAILABLE, Json(response)))
    }
}
