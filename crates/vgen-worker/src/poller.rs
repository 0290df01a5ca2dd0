//! Segment poller.
//!
//! Drives the remote tasks of one job to a conclusion: poll every
//! unfinished segment each round, persist what was seen, download finished
//! segments, then decide whether the job is ready, failed or still waiting.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use tracing::{debug, info, warn};
use vgen_models::{FailureKind, Job, JobId, RemoteTaskStatus, TaskObservation};
use vgen_provider::{FailureTracker, RemoteTaskClient};

use crate::config::max_poll_attempts;
use crate::error::{WorkerError, WorkerResult};
use crate::ledger::JobLedger;
use crate::logging::{JobLogger, Phase};
use crate::metrics;

/// Consecutive transient poll failures logged before suppression.
const MAX_LOGGED_POLL_FAILURES: u32 = 3;

pub struct SegmentPoller {
    client: RemoteTaskClient,
    ledger: Arc<JobLedger>,
    interval: Duration,
    job_deadline: Duration,
}

impl SegmentPoller {
    pub fn new(
        client: RemoteTaskClient,
        ledger: Arc<JobLedger>,
        interval: Duration,
        job_deadline: Duration,
    ) -> Self {
        Self {
            client,
            ledger,
            interval,
            job_deadline,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Poll until every segment is downloaded or the job fails.
    ///
    /// Returns the job either FAILED or with all segments SUCCEEDED and on
    /// local disk. The number of rounds is bounded by the time left before
    /// the job's deadline.
    pub async fn run(&self, job_id: &JobId) -> WorkerResult<Job> {
        let job = self.load(job_id).await?;
        let remaining = (job.deadline(self.job_deadline) - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO);
        let max_attempts = max_poll_attempts(remaining, self.interval);
        let mut tracker = FailureTracker::new(MAX_LOGGED_POLL_FAILURES);

        debug!(job_id = %job_id, max_attempts, "Polling segments");

        for attempt in 0..max_attempts {
            if attempt > 0 {
                tokio::time::sleep(self.interval).await;
            }

            let job = self.load(job_id).await?;
            if job.is_terminal() {
                return Ok(job);
            }

            let job = self.poll_round(job, &mut tracker).await?;
            if let Some(failed) = self.fail_fast(&job).await? {
                return Ok(failed);
            }

            let job = self.download_finished(job).await?;
            if job.is_terminal() {
                return Ok(job);
            }
            if job.all_segments_succeeded() && job.segment_paths().is_some() {
                info!(job_id = %job_id, rounds = attempt + 1, "All segments ready");
                return Ok(job);
            }

            if Utc::now() >= job.deadline(self.job_deadline) {
                break;
            }
        }

        let job = self.load(job_id).await?;
        self.expire(&job).await
    }

    /// One reconciliation round for a status read: poll, persist, apply
    /// fail-fast and the deadline. Never downloads.
    pub async fn reconcile(&self, job_id: &JobId) -> WorkerResult<Job> {
        let job = self.load(job_id).await?;
        if job.is_terminal() {
            return Ok(job);
        }

        let mut tracker = FailureTracker::new(MAX_LOGGED_POLL_FAILURES);
        let job = self.poll_round(job, &mut tracker).await?;
        if let Some(failed) = self.fail_fast(&job).await? {
            return Ok(failed);
        }
        if !job.all_segments_succeeded() && Utc::now() >= job.deadline(self.job_deadline) {
            return self.expire(&job).await;
        }
        Ok(job)
    }

    async fn load(&self, job_id: &JobId) -> WorkerResult<Job> {
        self.ledger
            .get(job_id)
            .await?
            .ok_or_else(|| WorkerError::job_not_found(job_id.as_str()))
    }

    /// Query every unfinished segment once, concurrently, and persist the
    /// observations in one ledger write.
    async fn poll_round(&self, job: Job, tracker: &mut FailureTracker) -> WorkerResult<Job> {
        let pending: Vec<(u32, String)> = job
            .pending_tasks()
            .map(|t| (t.segment_index, t.task_id.clone()))
            .collect();
        if pending.is_empty() {
            return Ok(job);
        }

        let results = join_all(pending.iter().map(|(index, task_id)| async move {
            (*index, task_id.as_str(), self.client.poll_task(task_id).await)
        }))
        .await;

        let mut observations = Vec::with_capacity(results.len());
        for (index, task_id, result) in results {
            match result {
                Ok(poll) => {
                    tracker.record_success();
                    observations.push((index, poll.into_observation()));
                }
                Err(e) if e.is_rejection() => {
                    warn!(job_id = %job.id, task_id, error = %e, "Status query rejected, failing segment");
                    observations.push((
                        index,
                        TaskObservation::failed(format!("status query rejected: {}", e)),
                    ));
                }
                Err(e) => {
                    if tracker.record_failure() {
                        warn!(job_id = %job.id, task_id, error = %e, "Status query failed, retrying next round");
                    }
                }
            }
        }

        if observations.is_empty() {
            return Ok(job);
        }

        let update = self
            .ledger
            .update(&job.id, move |j| {
                let mut changed = false;
                for (index, observation) in observations {
                    changed |= j.observe_task(index, observation);
                }
                changed
            })
            .await?;
        Ok(update.job)
    }

    /// Fail the job on its lowest-index failed segment.
    async fn fail_fast(&self, job: &Job) -> WorkerResult<Option<Job>> {
        if job.is_terminal() {
            return Ok(Some(job.clone()));
        }
        let Some(task) = job.first_failed_task() else {
            return Ok(None);
        };
        let message = format!(
            "segment {} (task {}) failed: {}",
            task.segment_index,
            task.task_id,
            task.error.as_deref().unwrap_or("remote task failed")
        );
        self.fail(&job.id, FailureKind::ProviderRejection, message)
            .await
            .map(Some)
    }

    /// Download every succeeded segment that is not on disk yet.
    async fn download_finished(&self, mut job: Job) -> WorkerResult<Job> {
        let ready: Vec<(u32, String, Option<String>)> = job
            .tasks
            .iter()
            .filter(|t| t.status == RemoteTaskStatus::Succeeded && !t.is_downloaded())
            .map(|t| (t.segment_index, t.task_id.clone(), t.remote_url.clone()))
            .collect();

        for (index, task_id, url) in ready {
            let Some(url) = url else {
                let message = format!("segment {} (task {}) succeeded without a video URL", index, task_id);
                return self.fail(&job.id, FailureKind::Download, message).await;
            };

            match self.client.download_segment(&task_id, &url).await {
                Ok(path) => {
                    job = self
                        .ledger
                        .update(&job.id, move |j| j.set_segment_path(index, path))
                        .await?
                        .job;
                    if job.is_terminal() {
                        return Ok(job);
                    }
                }
                Err(e) => {
                    let message = format!("segment {} (task {}) download failed: {}", index, task_id, e);
                    return self.fail(&job.id, FailureKind::Download, message).await;
                }
            }
        }
        Ok(job)
    }

    /// Fail with `Timeout`, keeping the count of finished segments.
    async fn expire(&self, job: &Job) -> WorkerResult<Job> {
        if job.is_terminal() {
            return Ok(job.clone());
        }
        let message = format!(
            "job deadline of {}s exceeded with {}/{} segments complete",
            self.job_deadline.as_secs(),
            job.succeeded_segments(),
            job.plan.segment_count()
        );
        self.fail(&job.id, FailureKind::Timeout, message).await
    }

    async fn fail(&self, job_id: &JobId, kind: FailureKind, message: String) -> WorkerResult<Job> {
        let log_message = message.clone();
        let update = self.ledger.update(job_id, move |j| j.fail(kind, message)).await?;
        if update.applied {
            JobLogger::new(job_id, Phase::Poll).failed(kind, &log_message);
            metrics::record_job_failed(kind);
        }
        Ok(update.job)
    }
}
