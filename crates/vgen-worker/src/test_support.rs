//! In-process fakes for the provider and the object store.
//!
//! Compiled for this crate's tests and, with the `test-support` feature, for
//! downstream crates' tests.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use vgen_models::{CapabilityTable, GenerationRequest, Job, Planner, RemoteTaskStatus};
use vgen_provider::{
    GenerationProvider, ProviderError, ProviderResponse, ProviderResult, RetryConfig, TaskParams,
    TaskPoll,
};
use vgen_storage::{ObjectStore, StorageError, StorageResult};

use crate::config::WorkerConfig;
use crate::ledger::JobLedger;
use crate::service::{GenerationService, ServiceDeps};

/// Plan `request` against the built-in table and wrap it in a new job.
pub fn planned_job(request: GenerationRequest) -> Job {
    let plan = Planner::new(CapabilityTable::builtin())
        .plan(&request)
        .expect("test request must be valid");
    Job::new(request, plan)
}

/// Provider whose tasks follow scripted status sequences.
///
/// Task `n` (creation order, zero based) gets id `fake-task-{n}`. Each status
/// query pops the next status of its script; the last one repeats.
pub struct FakeProvider {
    default_script: Vec<RemoteTaskStatus>,
    scripts: Mutex<HashMap<usize, Vec<RemoteTaskStatus>>>,
    create_failures: Mutex<HashMap<usize, ProviderResponse>>,
    remaining: Mutex<HashMap<String, Vec<RemoteTaskStatus>>>,
    params: Mutex<Vec<TaskParams>>,
    fail_downloads: bool,
    create_calls: AtomicU32,
    status_calls: AtomicU32,
    download_calls: AtomicU32,
}

impl Default for FakeProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeProvider {
    /// Every task goes RUNNING then SUCCEEDED.
    pub fn new() -> Self {
        Self {
            default_script: vec![RemoteTaskStatus::Running, RemoteTaskStatus::Succeeded],
            scripts: Mutex::new(HashMap::new()),
            create_failures: Mutex::new(HashMap::new()),
            remaining: Mutex::new(HashMap::new()),
            params: Mutex::new(Vec::new()),
            fail_downloads: false,
            create_calls: AtomicU32::new(0),
            status_calls: AtomicU32::new(0),
            download_calls: AtomicU32::new(0),
        }
    }

    pub fn with_default_script(mut self, script: Vec<RemoteTaskStatus>) -> Self {
        self.default_script = script;
        self
    }

    /// Script for the task created `n`-th.
    pub fn with_script(self, n: usize, script: Vec<RemoteTaskStatus>) -> Self {
        self.scripts.lock().unwrap().insert(n, script);
        self
    }

    /// The `n`-th create call is rejected.
    pub fn reject_create(self, n: usize, reason: &str) -> Self {
        self.create_failures.lock().unwrap().insert(
            n,
            ProviderResponse::Rejected {
                reason: reason.to_string(),
                code: Some("InvalidParameter".to_string()),
            },
        );
        self
    }

    pub fn failing_downloads(mut self) -> Self {
        self.fail_downloads = true;
        self
    }

    pub fn create_calls(&self) -> u32 {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn status_calls(&self) -> u32 {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn download_calls(&self) -> u32 {
        self.download_calls.load(Ordering::SeqCst)
    }

    /// Parameters of every accepted or refused create call, in order.
    pub fn created_params(&self) -> Vec<TaskParams> {
        self.params.lock().unwrap().clone()
    }

    pub fn artifact_url(task_id: &str) -> String {
        format!("https://fake.provider/{}.mp4", task_id)
    }
}

#[async_trait]
impl GenerationProvider for FakeProvider {
    fn name(&self) -> &str {
        "fake"
    }

    async fn create_generation_task(&self, params: &TaskParams) -> ProviderResponse {
        let n = self.create_calls.fetch_add(1, Ordering::SeqCst) as usize;
        self.params.lock().unwrap().push(params.clone());

        if let Some(failure) = self.create_failures.lock().unwrap().remove(&n) {
            return failure;
        }

        let task_id = format!("fake-task-{}", n);
        let script = self
            .scripts
            .lock()
            .unwrap()
            .remove(&n)
            .unwrap_or_else(|| self.default_script.clone());
        self.remaining.lock().unwrap().insert(task_id.clone(), script);
        ProviderResponse::Accepted { task_id }
    }

    async fn get_task_status(&self, task_id: &str) -> ProviderResult<TaskPoll> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let status = {
            let mut remaining = self.remaining.lock().unwrap();
            let script = remaining.get_mut(task_id).ok_or_else(|| {
                ProviderError::rejected(format!("task {} not found", task_id), Some("NotFound".into()))
            })?;
            if script.len() > 1 {
                script.remove(0)
            } else {
                script.first().copied().unwrap_or(RemoteTaskStatus::Running)
            }
        };

        let mut poll = TaskPoll::new(task_id, status);
        match status {
            RemoteTaskStatus::Succeeded => poll.video_url = Some(Self::artifact_url(task_id)),
            RemoteTaskStatus::Failed => {
                poll.code = Some("DataInspectionFailed".to_string());
                poll.message = Some("output failed content review".to_string());
            }
            _ => {}
        }
        Ok(poll)
    }

    async fn download_artifact(&self, url: &str, dest: &Path) -> ProviderResult<u64> {
        self.download_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_downloads {
            return Err(ProviderError::download_failed("connection reset by peer"));
        }
        let task_id = url
            .rsplit('/')
            .next()
            .and_then(|name| name.strip_suffix(".mp4"))
            .unwrap_or(url);
        let body = format!("[{}]", task_id);
        tokio::fs::write(dest, body.as_bytes()).await?;
        Ok(body.len() as u64)
    }
}

/// Object store that records uploads, or fails every one.
pub struct FakeObjectStore {
    failure: Option<String>,
    puts: Mutex<Vec<String>>,
}

impl Default for FakeObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeObjectStore {
    pub fn new() -> Self {
        Self {
            failure: None,
            puts: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            failure: Some(message.to_string()),
            puts: Mutex::new(Vec::new()),
        }
    }

    pub fn put_calls(&self) -> usize {
        self.puts.lock().unwrap().len()
    }

    pub fn keys(&self) -> Vec<String> {
        self.puts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ObjectStore for FakeObjectStore {
    fn name(&self) -> &str {
        "fake"
    }

    async fn put(&self, _data: Vec<u8>, key: &str, _content_type: &str) -> StorageResult<String> {
        self.puts.lock().unwrap().push(key.to_string());
        match &self.failure {
            Some(message) => Err(StorageError::upload_failed(message.clone())),
            None => Ok(format!("https://bucket.fake/{}", key)),
        }
    }

    async fn check_connectivity(&self) -> StorageResult<()> {
        match &self.failure {
            Some(message) => Err(StorageError::AwsSdk(message.clone())),
            None => Ok(()),
        }
    }
}

/// Fast-polling config rooted at `work_dir`. FFmpeg points nowhere unless
/// the test installs one.
pub fn test_config(work_dir: &Path) -> WorkerConfig {
    WorkerConfig {
        ffmpeg_path: work_dir.join("no-ffmpeg"),
        ..WorkerConfig::default()
    }
    .with_work_dir(work_dir)
    .with_polling(Duration::from_millis(20), Duration::from_secs(5))
}

/// Retries without meaningful backoff.
pub fn fast_retry() -> RetryConfig {
    RetryConfig::new("test")
        .with_max_attempts(2)
        .with_base_delay(Duration::from_millis(1))
        .with_max_delay(Duration::from_millis(2))
}

/// Service over the fakes with an in-memory ledger.
pub fn test_service(
    config: WorkerConfig,
    provider: Arc<FakeProvider>,
    store: Option<Arc<FakeObjectStore>>,
) -> GenerationService {
    let store = store.map(|s| s as Arc<dyn ObjectStore>);
    let deps = ServiceDeps::new(config, provider, store, fast_retry(), Arc::new(JobLedger::in_memory()));
    GenerationService::new(deps)
}
