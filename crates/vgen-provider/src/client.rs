//! Remote task client: retries, classification and segment downloads.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::{ProviderError, ProviderResult};
use crate::provider::GenerationProvider;
use crate::retry::{retry_async, RetryConfig};
use crate::types::{ProviderResponse, TaskHandle, TaskParams, TaskPoll};

/// Wraps a [`GenerationProvider`] with bounded retries for transient
/// failures. Rejections are returned on the first attempt.
#[derive(Clone)]
pub struct RemoteTaskClient {
    provider: Arc<dyn GenerationProvider>,
    retry: RetryConfig,
    segments_dir: PathBuf,
}

impl RemoteTaskClient {
    pub fn new(
        provider: Arc<dyn GenerationProvider>,
        retry: RetryConfig,
        segments_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            provider,
            retry,
            segments_dir: segments_dir.into(),
        }
    }

    pub fn segments_dir(&self) -> &Path {
        &self.segments_dir
    }

    /// Create one remote task.
    pub async fn create_task(&self, params: &TaskParams) -> ProviderResult<TaskHandle> {
        let config = self.retry.named("create_task");
        let handle = retry_async(
            &config,
            || async {
                match self.provider.create_generation_task(params).await {
                    ProviderResponse::Accepted { task_id } => Ok(TaskHandle { task_id }),
                    ProviderResponse::Rejected { reason, code } => {
                        Err(ProviderError::rejected(reason, code))
                    }
                    ProviderResponse::TransientFailure { detail } => {
                        Err(ProviderError::transient(detail))
                    }
                }
            },
            ProviderError::is_retryable,
        )
        .await?;

        info!(
            provider = self.provider.name(),
            task_id = %handle.task_id,
            model = %params.model,
            duration = params.duration,
            "Remote task created"
        );
        Ok(handle)
    }

    /// Read the state of one remote task.
    pub async fn poll_task(&self, task_id: &str) -> ProviderResult<TaskPoll> {
        let config = self.retry.named("poll_task");
        let poll = retry_async(
            &config,
            || self.provider.get_task_status(task_id),
            ProviderError::is_retryable,
        )
        .await?;

        debug!(task_id, status = %poll.status, "Polled remote task");
        Ok(poll)
    }

    /// Where the artifact of `task_id` is stored locally.
    pub fn segment_path(&self, task_id: &str) -> PathBuf {
        let safe: String = task_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.segments_dir.join(format!("{}.mp4", safe))
    }

    /// Download a finished segment to `{segments_dir}/{task_id}.mp4`.
    ///
    /// An existing non-empty file is reused, so a segment is fetched at most
    /// once. Bytes land in a `.part` file that is renamed when complete.
    pub async fn download_segment(&self, task_id: &str, url: &str) -> ProviderResult<PathBuf> {
        let dest = self.segment_path(task_id);
        if let Ok(meta) = tokio::fs::metadata(&dest).await {
            if meta.is_file() && meta.len() > 0 {
                debug!(task_id, path = %dest.display(), "Segment already downloaded");
                return Ok(dest);
            }
        }

        tokio::fs::create_dir_all(&self.segments_dir).await.map_err(|e| {
            ProviderError::download_failed(format!(
                "cannot create {}: {}",
                self.segments_dir.display(),
                e
            ))
        })?;

        let part = dest.with_extension("mp4.part");
        let config = self.retry.named("download_segment");
        let result = retry_async(
            &config,
            || self.provider.download_artifact(url, &part),
            ProviderError::is_retryable,
        )
        .await;

        let written = match result {
            Ok(n) => n,
            Err(e) => {
                let _ = tokio::fs::remove_file(&part).await;
                warn!(task_id, error = %e, "Segment download failed");
                return Err(match e {
                    ProviderError::DownloadFailed(_) => e,
                    other => ProviderError::download_failed(other.to_string()),
                });
            }
        };

        if written == 0 {
            let _ = tokio::fs::remove_file(&part).await;
            return Err(ProviderError::download_failed(format!(
                "empty artifact for task {}",
                task_id
            )));
        }

        tokio::fs::rename(&part, &dest)
            .await
            .map_err(|e| ProviderError::download_failed(format!("finalize download: {}", e)))?;

        info!(task_id, bytes = written, path = %dest.display(), "Segment downloaded");
        Ok(dest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use vgen_models::RemoteTaskStatus;

    /// Replays scripted create responses and counts calls.
    struct ScriptedProvider {
        creates: Mutex<Vec<ProviderResponse>>,
        create_calls: AtomicU32,
        download_calls: AtomicU32,
        download_bytes: u64,
    }

    impl ScriptedProvider {
        fn new(creates: Vec<ProviderResponse>) -> Self {
            Self {
                creates: Mutex::new(creates),
                create_calls: AtomicU32::new(0),
                download_calls: AtomicU32::new(0),
                download_bytes: 16,
            }
        }
    }

    #[async_trait]
    impl GenerationProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn create_generation_task(&self, _params: &TaskParams) -> ProviderResponse {
            self.create_calls.fetch_add(1, Ordering::SeqCst);
            self.creates.lock().unwrap().remove(0)
        }

        async fn get_task_status(&self, task_id: &str) -> ProviderResult<TaskPoll> {
            Ok(TaskPoll::new(task_id, RemoteTaskStatus::Running))
        }

        async fn download_artifact(&self, _url: &str, dest: &Path) -> ProviderResult<u64> {
            self.download_calls.fetch_add(1, Ordering::SeqCst);
            let bytes = vec![1u8; self.download_bytes as usize];
            tokio::fs::write(dest, &bytes).await?;
            Ok(self.download_bytes)
        }
    }

    fn params() -> TaskParams {
        TaskParams {
            model: "wan2.5-t2v-preview".into(),
            prompt: "p".into(),
            image_url: None,
            audio_url: None,
            size: "1280*720".into(),
            duration: 5,
            prompt_extend: true,
            audio: None,
        }
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig::new("test").with_base_delay(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_create_retries_transient_then_accepts() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            ProviderResponse::TransientFailure { detail: "502".into() },
            ProviderResponse::TransientFailure { detail: "timeout".into() },
            ProviderResponse::Accepted { task_id: "t-9".into() },
        ]));
        let client = RemoteTaskClient::new(provider.clone(), fast_retry(), "/tmp/unused");

        let handle = client.create_task(&params()).await.unwrap();
        assert_eq!(handle.task_id, "t-9");
        assert_eq!(provider.create_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_create_rejection_not_retried() {
        let provider = Arc::new(ScriptedProvider::new(vec![ProviderResponse::Rejected {
            reason: "bad".into(),
            code: Some("400".into()),
        }]));
        let client = RemoteTaskClient::new(provider.clone(), fast_retry(), "/tmp/unused");

        let err = client.create_task(&params()).await.unwrap_err();
        assert!(err.is_rejection());
        assert_eq!(provider.create_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_create_gives_up_after_attempts() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            ProviderResponse::TransientFailure { detail: "1".into() },
            ProviderResponse::TransientFailure { detail: "2".into() },
            ProviderResponse::TransientFailure { detail: "3".into() },
        ]));
        let client = RemoteTaskClient::new(provider.clone(), fast_retry(), "/tmp/unused");

        let err = client.create_task(&params()).await.unwrap_err();
        assert!(matches!(err, ProviderError::Transient(_)));
        assert_eq!(provider.create_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_download_once_then_reuse() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let client = RemoteTaskClient::new(provider.clone(), fast_retry(), dir.path().join("segments"));

        let first = client.download_segment("task-1", "https://cdn/x.mp4").await.unwrap();
        let second = client.download_segment("task-1", "https://cdn/x.mp4").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first, dir.path().join("segments").join("task-1.mp4"));
        assert_eq!(provider.download_calls.load(Ordering::SeqCst), 1);
        assert!(!dir.path().join("segments").join("task-1.mp4.part").exists());
    }

    #[tokio::test]
    async fn test_empty_download_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut provider = ScriptedProvider::new(vec![]);
        provider.download_bytes = 0;
        let client = RemoteTaskClient::new(Arc::new(provider), fast_retry(), dir.path());

        let err = client.download_segment("t", "https://cdn/x.mp4").await.unwrap_err();
        assert!(matches!(err, ProviderError::DownloadFailed(_)));
        assert!(!client.segment_path("t").exists());
    }

    #[test]
    fn test_segment_path_sanitized() {
        let client = RemoteTaskClient::new(
            Arc::new(ScriptedProvider::new(vec![])),
            fast_retry(),
            "/data/segments",
        );
        assert_eq!(
            client.segment_path("../../etc/x"),
            PathBuf::from("/data/segments/______etc_x.mp4")
        );
    }
}
