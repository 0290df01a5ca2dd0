//! Generation service.
//!
//! `submit` plans the request, ingests the source image, creates one remote
//! task per segment and returns. A detached task then polls the segments,
//! downloads them and concatenates the final video. `get_status` reads the
//! ledger and, for unfinished jobs, reconciles with the provider once.
//!
//! There is no remote cancel: tasks of a job abandoned at its deadline, or
//! created before a later segment's creation failed, keep running upstream
//! and their output is never collected.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{info, warn, Instrument};
use vgen_media::{resolve_ffmpeg, Concatenator, FfmpegRunner, MediaError};
use vgen_models::{
    FailureKind, GenerationRequest, IngestionMethod, IngestionSummary, Job, JobId, JobStatus,
    JobSummary, JobView, Planner, RemoteTask,
};
use vgen_provider::{GenerationProvider, RemoteTaskClient, RetryConfig, TaskParams};
use vgen_storage::ObjectStore;

use crate::config::{LedgerBackend, WorkerConfig};
use crate::error::{WorkerError, WorkerResult};
use crate::ingestion::{validate_image, ImageIngestionResolver, DEFAULT_IMAGE_EXTENSION};
use crate::ledger::{FileJobStore, JobLedger, JobStore, MemoryJobStore};
use crate::logging::{JobLogger, Phase};
use crate::metrics;
use crate::poller::SegmentPoller;

/// Default and maximum page sizes for [`GenerationService::list_jobs`].
pub const DEFAULT_PAGE_SIZE: usize = 20;
pub const MAX_PAGE_SIZE: usize = 100;

/// What `submit` hands back.
#[derive(Debug, Clone, Serialize)]
pub struct SubmitReceipt {
    pub job_id: JobId,
    pub status: JobStatus,
    pub remote_task_ids: Vec<String>,
    pub segment_durations: Vec<u32>,
    pub ingestion: Option<IngestionSummary>,
}

/// Filter and page for job listings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobQuery {
    pub project_id: Option<i64>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobPage {
    pub total: usize,
    pub jobs: Vec<JobSummary>,
}

/// Where an uploaded image ended up.
#[derive(Debug, Clone, Serialize)]
pub struct UploadedImage {
    pub image_url: String,
    pub method: IngestionMethod,
    pub degraded: bool,
    pub message: String,
}

/// Everything the service is built from.
pub struct ServiceDeps {
    pub config: WorkerConfig,
    pub planner: Planner,
    pub client: RemoteTaskClient,
    pub ingestion: ImageIngestionResolver,
    pub concatenator: Concatenator,
    pub ledger: Arc<JobLedger>,
}

impl ServiceDeps {
    /// Wire the pipeline from configuration.
    pub fn new(
        config: WorkerConfig,
        provider: Arc<dyn GenerationProvider>,
        object_store: Option<Arc<dyn ObjectStore>>,
        retry: RetryConfig,
        ledger: Arc<JobLedger>,
    ) -> Self {
        let planner = Planner::new(config.capability_table());
        let client = RemoteTaskClient::new(provider, retry, config.segments_dir());
        let ingestion = ImageIngestionResolver::new(
            object_store,
            config.images_dir(),
            config.max_inline_image_bytes,
        );
        let runner = FfmpegRunner::new(config.ffmpeg_path.clone()).with_timeout(config.concat_timeout);
        let concatenator = Concatenator::new(runner, config.tmp_dir());

        Self {
            config,
            planner,
            client,
            ingestion,
            concatenator,
            ledger,
        }
    }
}

/// Open the ledger backend selected by `config`.
pub async fn open_ledger(config: &WorkerConfig) -> WorkerResult<JobLedger> {
    let store: Arc<dyn JobStore> = match config.ledger {
        LedgerBackend::Memory => Arc::new(MemoryJobStore::new()),
        LedgerBackend::File => Arc::new(FileJobStore::new(config.jobs_dir()).await?),
    };
    info!(backend = store.name(), "Job ledger opened");
    Ok(JobLedger::new(store))
}

struct Inner {
    config: WorkerConfig,
    planner: Planner,
    client: RemoteTaskClient,
    ingestion: ImageIngestionResolver,
    concatenator: Concatenator,
    ledger: Arc<JobLedger>,
    poller: SegmentPoller,
    permits: Arc<Semaphore>,
    /// Jobs with a live pipeline task in this process
    active: Mutex<HashSet<JobId>>,
}

/// Removes a job from the active set when its pipeline ends.
struct ActiveGuard {
    inner: Arc<Inner>,
    job_id: JobId,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        let mut active = self.inner.active.lock().unwrap_or_else(|e| e.into_inner());
        active.remove(&self.job_id);
        metrics::set_active_jobs(active.len());
    }
}

/// Orchestrates generation jobs. Cheap to clone.
#[derive(Clone)]
pub struct GenerationService {
    inner: Arc<Inner>,
}

impl GenerationService {
    pub fn new(deps: ServiceDeps) -> Self {
        let poller = SegmentPoller::new(
            deps.client.clone(),
            deps.ledger.clone(),
            deps.config.poll_interval,
            deps.config.job_deadline,
        );
        let permits = Arc::new(Semaphore::new(deps.config.max_concurrent_jobs.max(1)));
        Self {
            inner: Arc::new(Inner {
                config: deps.config,
                planner: deps.planner,
                client: deps.client,
                ingestion: deps.ingestion,
                concatenator: deps.concatenator,
                ledger: deps.ledger,
                poller,
                permits,
                active: Mutex::new(HashSet::new()),
            }),
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.inner.config
    }

    pub fn ledger(&self) -> &Arc<JobLedger> {
        &self.inner.ledger
    }

    pub fn object_store(&self) -> Option<&Arc<dyn ObjectStore>> {
        self.inner.ingestion.object_store()
    }

    /// Whether the configured FFmpeg binary can be found.
    pub fn ffmpeg_available(&self) -> bool {
        resolve_ffmpeg(self.inner.concatenator.runner().binary()).is_ok()
    }

    /// Accept a request and start generating.
    ///
    /// Validation and ingestion errors return before any job exists. When a
    /// segment's task cannot be created the job is recorded FAILED and
    /// [`WorkerError::TaskCreationFailed`] carries its id.
    pub async fn submit(&self, request: GenerationRequest) -> WorkerResult<SubmitReceipt> {
        let inner = &self.inner;
        let plan = inner.planner.plan(&request)?;

        let ingestion = match (&request.image_url, request.mode.requires_image()) {
            (Some(reference), true) => Some(inner.ingestion.resolve(reference).await?),
            _ => None,
        };
        let image_reference = ingestion.as_ref().map(|i| i.reference.clone());

        let mut job = Job::new(request, plan);
        if let Some(result) = &ingestion {
            job.set_ingestion(result.summary());
        }
        inner.ledger.insert(&job).await?;

        let logger = JobLogger::new(&job.id, Phase::Submit);
        logger.accepted(&job.plan);
        if let Some(result) = ingestion.as_ref().filter(|r| r.degraded()) {
            logger.ingestion_degraded(result.error.as_deref().unwrap_or("object storage unavailable"));
        }

        let mut task_ids = Vec::with_capacity(job.plan.segment_count());
        for segment in job.plan.segments.clone() {
            let params =
                TaskParams::for_segment(&job.request, &job.plan, &segment, image_reference.as_deref());
            match inner.client.create_task(&params).await {
                Ok(handle) => {
                    logger.task_created(segment.index, &handle.task_id);
                    metrics::record_segment_created(&params.model);
                    task_ids.push(handle.task_id.clone());
                    let task = RemoteTask::new(handle.task_id, &segment);
                    inner.ledger.update(&job.id, move |j| j.attach_task(task)).await?;
                }
                Err(e) => {
                    let kind = if e.is_rejection() {
                        FailureKind::ProviderRejection
                    } else {
                        FailureKind::TransientNetwork
                    };
                    let message = format!(
                        "segment {} task creation failed: {}",
                        segment.index, e
                    );
                    logger.orphaned(&task_ids);
                    logger.failed(kind, &message);
                    let failure = message.clone();
                    inner.ledger.update(&job.id, move |j| j.fail(kind, failure)).await?;
                    metrics::record_job_failed(kind);
                    return Err(WorkerError::TaskCreationFailed {
                        job_id: job.id,
                        kind,
                        message,
                    });
                }
            }
        }

        let job = inner.ledger.update(&job.id, |j| j.mark_running()).await?.job;
        metrics::record_job_submitted(job.plan.mode, job.plan.segment_count());
        logger.tasks_running(&task_ids);

        self.spawn_pipeline(job.id.clone());

        Ok(SubmitReceipt {
            job_id: job.id,
            status: job.status,
            remote_task_ids: task_ids,
            segment_durations: job.plan.durations(),
            ingestion: job.ingestion,
        })
    }

    /// Current view of a job.
    ///
    /// Finished jobs are served from the ledger without touching the
    /// provider. Unfinished ones get one reconciliation round first.
    pub async fn get_status(&self, job_id: &str) -> WorkerResult<JobView> {
        let id = JobId::parse(job_id).ok_or_else(|| WorkerError::invalid_job_id(job_id))?;
        let job = self
            .inner
            .ledger
            .get(&id)
            .await?
            .ok_or_else(|| WorkerError::job_not_found(job_id))?;

        if job.is_terminal() || job.status == JobStatus::Pending {
            return Ok(job.view());
        }

        match self.inner.poller.reconcile(&id).await {
            Ok(job) => Ok(job.view()),
            Err(e) => {
                warn!(job_id = %id, error = %e, "Reconciliation failed, serving stored state");
                Ok(job.view())
            }
        }
    }

    /// Jobs newest first, optionally for one project.
    pub async fn list_jobs(&self, query: &JobQuery) -> WorkerResult<JobPage> {
        let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
        let offset = query.offset.unwrap_or(0);

        let jobs: Vec<Job> = self
            .inner
            .ledger
            .list()
            .await?
            .into_iter()
            .filter(|j| query.project_id.is_none() || j.request.project_id == query.project_id)
            .collect();

        Ok(JobPage {
            total: jobs.len(),
            jobs: jobs.iter().skip(offset).take(limit).map(Job::summary).collect(),
        })
    }

    /// Store an uploaded source image for a later i2v request.
    ///
    /// Without usable object storage the image is kept locally and will be
    /// sent inline when a job references it.
    pub async fn upload_image(
        &self,
        bytes: Vec<u8>,
        filename: Option<&str>,
    ) -> WorkerResult<UploadedImage> {
        let extension = filename
            .and_then(|f| std::path::Path::new(f).extension())
            .and_then(|e| e.to_str())
            .unwrap_or(DEFAULT_IMAGE_EXTENSION)
            .to_ascii_lowercase();
        let mime = validate_image(&bytes, &extension)?;
        let ingestion = &self.inner.ingestion;

        match ingestion.upload(bytes.clone(), &extension, mime).await {
            Ok(url) => Ok(UploadedImage {
                image_url: url,
                method: IngestionMethod::ObjectStorage,
                degraded: false,
                message: "uploaded to object storage".to_string(),
            }),
            Err(e) => {
                let served = ingestion.stage_local(&bytes, &extension).await?;
                warn!(reason = %e, path = %served, "Image kept locally, will be sent inline");
                metrics::record_ingestion_degraded();
                Ok(UploadedImage {
                    image_url: served,
                    method: IngestionMethod::InlineEncoded,
                    degraded: true,
                    message: format!("{}; image stored locally and will be sent inline", e),
                })
            }
        }
    }

    /// Restart pipelines for unfinished jobs in a durable ledger.
    ///
    /// Jobs interrupted while their tasks were being created cannot be
    /// resumed and are failed. Returns the number of pipelines restarted.
    pub async fn resume_incomplete(&self) -> WorkerResult<usize> {
        let ledger = &self.inner.ledger;
        if !ledger.store().is_durable() {
            return Ok(0);
        }

        let mut resumed = 0;
        for job in ledger.list().await? {
            match job.status {
                JobStatus::Pending => {
                    let update = ledger
                        .update(&job.id, |j| {
                            j.fail(FailureKind::Internal, "interrupted during task creation")
                        })
                        .await?;
                    if update.applied {
                        metrics::record_job_failed(FailureKind::Internal);
                        let logger = JobLogger::new(&job.id, Phase::Resume);
                        let created: Vec<String> = job.tasks.iter().map(|t| t.task_id.clone()).collect();
                        logger.orphaned(&created);
                        logger.failed(FailureKind::Internal, "interrupted during task creation");
                    }
                }
                JobStatus::Running | JobStatus::Concatenating => {
                    if self.spawn_pipeline(job.id.clone()) {
                        resumed += 1;
                    }
                }
                JobStatus::Succeeded | JobStatus::Failed => {}
            }
        }

        if resumed > 0 {
            info!(resumed, "Resumed unfinished jobs");
        }
        Ok(resumed)
    }

    /// Start the background pipeline for a job unless one is already live.
    fn spawn_pipeline(&self, job_id: JobId) -> bool {
        {
            let mut active = self.inner.active.lock().unwrap_or_else(|e| e.into_inner());
            if !active.insert(job_id.clone()) {
                return false;
            }
            metrics::set_active_jobs(active.len());
        }

        let guard = ActiveGuard {
            inner: self.inner.clone(),
            job_id: job_id.clone(),
        };
        let service = self.clone();
        let span = JobLogger::new(&job_id, Phase::Poll).span();

        tokio::spawn(
            async move {
                let _guard = guard;
                let _permit = match service.inner.permits.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return,
                };
                if let Err(e) = service.drive(&job_id).await {
                    let kind = e.failure_kind();
                    let message = e.to_string();
                    let result = service
                        .inner
                        .ledger
                        .update(&job_id, move |j| j.fail(kind, message))
                        .await;
                    if let Ok(update) = result {
                        if update.applied {
                            metrics::record_job_failed(kind);
                        }
                    }
                    warn!(job_id = %job_id, error = %e, "Job pipeline aborted");
                }
            }
            .instrument(span),
        );
        true
    }

    /// Poll to completion, then produce the final artifact.
    async fn drive(&self, job_id: &JobId) -> WorkerResult<Job> {
        let inner = &self.inner;
        let logger = JobLogger::new(job_id, Phase::Concatenate);

        let job = inner.poller.run(job_id).await?;
        if job.is_terminal() {
            return Ok(job);
        }

        let paths = job
            .segment_paths()
            .ok_or_else(|| WorkerError::internal("segments ready but not all downloaded"))?;

        let needs_concat = job.plan.needs_concatenation();
        if needs_concat {
            inner.ledger.update(job_id, |j| j.begin_concatenating()).await?;
            logger.concatenating(paths.len());
        }

        let output = self.artifact_path(job_id);
        let started = Instant::now();
        match inner.concatenator.concatenate(&paths, &output).await {
            Ok(artifact) => {
                let size = tokio::fs::metadata(&artifact).await?.len();
                if needs_concat {
                    metrics::record_concat_duration(paths.len(), started.elapsed().as_secs_f64());
                }
                let update = inner
                    .ledger
                    .update(job_id, move |j| j.succeed(artifact, size))
                    .await?;
                if update.applied {
                    let elapsed = (Utc::now() - update.job.created_at).num_milliseconds() as f64 / 1000.0;
                    metrics::record_job_completed(update.job.plan.mode, elapsed);
                    if let Some(path) = update.job.artifact_path.as_deref() {
                        logger.succeeded(path, size);
                    }
                }
                Ok(update.job)
            }
            Err(e) => {
                let message = concat_failure_message(&e);
                logger.failed(FailureKind::Concatenation, &message);
                let update = inner
                    .ledger
                    .update(job_id, move |j| j.fail(FailureKind::Concatenation, message))
                    .await?;
                if update.applied {
                    metrics::record_job_failed(FailureKind::Concatenation);
                }
                Ok(update.job)
            }
        }
    }

    fn artifact_path(&self, job_id: &JobId) -> PathBuf {
        self.inner.config.videos_dir().join(format!("{}.mp4", job_id))
    }
}

fn concat_failure_message(err: &MediaError) -> String {
    match err {
        MediaError::FfmpegFailed {
            stderr: Some(stderr), ..
        } => format!("concatenation failed: {}: {}", err, stderr),
        _ => format!("concatenation failed: {}", err),
    }
}
