//! DashScope (Wanxiang) video synthesis over HTTP.

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{Client, Response, StatusCode};
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use vgen_models::RemoteTaskStatus;

use crate::config::ProviderConfig;
use crate::error::{ProviderError, ProviderResult};
use crate::provider::GenerationProvider;
use crate::types::{CreateTaskBody, ErrorBody, ProviderResponse, TaskEnvelope, TaskParams, TaskPoll};

const SYNTHESIS_PATH: &str = "/services/aigc/video-generation/video-synthesis";

/// HTTP client for the DashScope async task API.
pub struct DashScopeProvider {
    http: Client,
    config: ProviderConfig,
}

impl DashScopeProvider {
    pub fn new(config: ProviderConfig) -> ProviderResult<Self> {
        if !config.is_configured() {
            return Err(ProviderError::not_configured("DASHSCOPE_API_KEY is not set"));
        }

        let http = Client::builder()
            .connect_timeout(config.timeout)
            .build()
            .map_err(ProviderError::Network)?;

        Ok(Self { http, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> ProviderResult<Self> {
        Self::new(ProviderConfig::from_env())
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    async fn error_body(response: Response) -> ErrorBody {
        let text = response.text().await.unwrap_or_default();
        serde_json::from_str(&text).unwrap_or_else(|_| ErrorBody {
            code: None,
            message: (!text.trim().is_empty()).then_some(text),
        })
    }
}

/// 429 and 5xx are worth retrying; any other non-2xx is final.
fn is_transient_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

#[async_trait]
impl GenerationProvider for DashScopeProvider {
    fn name(&self) -> &str {
        "dashscope"
    }

    async fn create_generation_task(&self, params: &TaskParams) -> ProviderResponse {
        let body = match serde_json::to_vec(&CreateTaskBody::from(params)) {
            Ok(body) => body,
            Err(e) => {
                return ProviderResponse::Rejected {
                    reason: format!("request could not be encoded: {}", e),
                    code: None,
                }
            }
        };
        let timeout = self.config.create_timeout(body.len(), params.has_inline_image());

        debug!(
            model = %params.model,
            duration = params.duration,
            body_bytes = body.len(),
            timeout_secs = timeout.as_secs(),
            "Creating DashScope task"
        );

        let result = self
            .http
            .post(self.url(SYNTHESIS_PATH))
            .bearer_auth(&self.config.api_key)
            .header("X-DashScope-Async", "enable")
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .timeout(timeout)
            .body(body)
            .send()
            .await;

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "DashScope create request failed in transport");
                return ProviderResponse::TransientFailure {
                    detail: e.to_string(),
                };
            }
        };

        let status = response.status();
        if !status.is_success() {
            let err = Self::error_body(response).await;
            let reason = err
                .message
                .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
            if is_transient_status(status) {
                return ProviderResponse::TransientFailure {
                    detail: format!("HTTP {}: {}", status.as_u16(), reason),
                };
            }
            return ProviderResponse::Rejected {
                reason,
                code: err.code.or_else(|| Some(status.as_u16().to_string())),
            };
        }

        let envelope: TaskEnvelope = match response.json().await {
            Ok(envelope) => envelope,
            Err(e) => {
                return ProviderResponse::Rejected {
                    reason: format!("malformed response: {}", e),
                    code: None,
                }
            }
        };

        match envelope.output.and_then(|o| o.task_id) {
            Some(task_id) if !task_id.is_empty() => ProviderResponse::Accepted { task_id },
            _ => ProviderResponse::Rejected {
                reason: envelope
                    .message
                    .map(|m| format!("malformed response: {}", m))
                    .unwrap_or_else(|| "malformed response: missing task id".to_string()),
                code: envelope.code,
            },
        }
    }

    async fn get_task_status(&self, task_id: &str) -> ProviderResult<TaskPoll> {
        let response = self
            .http
            .get(self.url(&format!("/tasks/{}", task_id)))
            .bearer_auth(&self.config.api_key)
            .timeout(self.config.timeout)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let err = Self::error_body(response).await;
            let reason = err
                .message
                .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
            if is_transient_status(status) {
                return Err(ProviderError::transient(format!(
                    "HTTP {}: {}",
                    status.as_u16(),
                    reason
                )));
            }
            return Err(ProviderError::rejected(reason, err.code));
        }

        let envelope: TaskEnvelope = response
            .json()
            .await
            .map_err(|e| ProviderError::invalid_response(e.to_string()))?;

        let output = envelope
            .output
            .ok_or_else(|| ProviderError::invalid_response("missing output"))?;
        let raw_status = output
            .task_status
            .ok_or_else(|| ProviderError::invalid_response("missing task_status"))?;

        Ok(TaskPoll {
            task_id: output.task_id.unwrap_or_else(|| task_id.to_string()),
            status: RemoteTaskStatus::from_provider(&raw_status),
            video_url: output.video_url,
            usage: envelope.usage,
            message: output.message.or(envelope.message),
            code: output.code.or(envelope.code),
        })
    }

    async fn download_artifact(&self, url: &str, dest: &Path) -> ProviderResult<u64> {
        let response = self
            .http
            .get(url)
            .timeout(self.config.download_timeout)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            if is_transient_status(status) {
                return Err(ProviderError::transient(format!(
                    "artifact download returned HTTP {}",
                    status.as_u16()
                )));
            }
            return Err(ProviderError::download_failed(format!(
                "artifact download returned HTTP {}",
                status.as_u16()
            )));
        }

        let mut file = tokio::fs::File::create(dest).await?;
        let mut written = 0u64;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        Ok(written)
    }
}
