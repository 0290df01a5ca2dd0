//! Job ledger: the single source of truth for job state.
//!
//! Reads go straight to the store. Writes for one job id are serialized
//! through a per-job async mutex, so a read-modify-write never interleaves
//! with another writer of the same job.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use vgen_models::{Job, JobId};

pub type LedgerResult<T> = Result<T, LedgerError>;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Job not found: {0}")]
    NotFound(JobId),

    #[error("Job already exists: {0}")]
    AlreadyExists(JobId),

    #[error("Invalid job id for storage: {0}")]
    InvalidId(String),

    #[error("Corrupt job record {path}: {message}")]
    Corrupt { path: PathBuf, message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Persistence backend for job records.
#[async_trait]
pub trait JobStore: Send + Sync {
    fn name(&self) -> &str;

    /// Whether records survive a restart.
    fn is_durable(&self) -> bool;

    async fn load(&self, id: &JobId) -> LedgerResult<Option<Job>>;

    async fn save(&self, job: &Job) -> LedgerResult<()>;

    async fn list(&self) -> LedgerResult<Vec<Job>>;
}

/// In-process store.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn is_durable(&self) -> bool {
        false
    }

    async fn load(&self, id: &JobId) -> LedgerResult<Option<Job>> {
        Ok(self.jobs.read().await.get(id).cloned())
    }

    async fn save(&self, job: &Job) -> LedgerResult<()> {
        self.jobs.write().await.insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn list(&self) -> LedgerResult<Vec<Job>> {
        Ok(self.jobs.read().await.values().cloned().collect())
    }
}

/// One JSON document per job, `{dir}/{job_id}.json`.
///
/// Writes go to a hidden temp file that is renamed over the record, so a
/// reader sees either the old or the new document.
pub struct FileJobStore {
    dir: PathBuf,
}

impl FileJobStore {
    pub async fn new(dir: impl Into<PathBuf>) -> LedgerResult<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, id: &JobId) -> LedgerResult<PathBuf> {
        // Only ids we minted are valid file names.
        if JobId::parse(id.as_str()).is_none() {
            return Err(LedgerError::InvalidId(id.to_string()));
        }
        Ok(self.dir.join(format!("{}.json", id)))
    }
}

#[async_trait]
impl JobStore for FileJobStore {
    fn name(&self) -> &str {
        "file"
    }

    fn is_durable(&self) -> bool {
        true
    }

    async fn load(&self, id: &JobId) -> LedgerResult<Option<Job>> {
        let path = self.record_path(id)?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| LedgerError::Corrupt {
                path,
                message: e.to_string(),
            })
    }

    async fn save(&self, job: &Job) -> LedgerResult<()> {
        let path = self.record_path(&job.id)?;
        let tmp = self.dir.join(format!(".{}.json.tmp", job.id));
        let body = serde_json::to_vec_pretty(job)?;
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn list(&self) -> LedgerResult<Vec<Job>> {
        let mut jobs = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_record = path.extension().is_some_and(|e| e == "json")
                && !entry.file_name().to_string_lossy().starts_with('.');
            if !is_record {
                continue;
            }
            let bytes = tokio::fs::read(&path).await?;
            match serde_json::from_slice::<Job>(&bytes) {
                Ok(job) => jobs.push(job),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping corrupt job record"),
            }
        }
        Ok(jobs)
    }
}

/// Result of [`JobLedger::update`].
#[derive(Debug, Clone)]
pub struct Update {
    /// Job as stored after the update
    pub job: Job,
    /// Whether the closure changed and persisted the job
    pub applied: bool,
}

/// Serializes writes per job over a [`JobStore`].
pub struct JobLedger {
    store: Arc<dyn JobStore>,
    locks: Mutex<HashMap<JobId, Arc<tokio::sync::Mutex<()>>>>,
}

impl JobLedger {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self {
            store,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryJobStore::new()))
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    fn lock_for(&self, id: &JobId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(id.clone()).or_default().clone()
    }

    /// Drop the lock entry unless another caller still holds or awaits it.
    fn release_if_idle(&self, id: &JobId) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        if locks.get(id).map_or(false, |l| Arc::strong_count(l) == 1) {
            locks.remove(id);
        }
    }

    #[cfg(test)]
    fn tracked_locks(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Record a new job.
    pub async fn insert(&self, job: &Job) -> LedgerResult<()> {
        let lock = self.lock_for(&job.id);
        let result = {
            let _guard = lock.lock().await;
            self.insert_locked(job).await
        };
        drop(lock);
        self.release_if_idle(&job.id);
        result
    }

    async fn insert_locked(&self, job: &Job) -> LedgerResult<()> {
        if self.store.load(&job.id).await?.is_some() {
            return Err(LedgerError::AlreadyExists(job.id.clone()));
        }
        self.store.save(job).await?;
        debug!(job_id = %job.id, "Job recorded");
        Ok(())
    }

    pub async fn get(&self, id: &JobId) -> LedgerResult<Option<Job>> {
        self.store.load(id).await
    }

    /// Load, mutate and persist one job under its write lock.
    ///
    /// Terminal jobs are returned untouched without calling `f`. The job is
    /// saved only when `f` returns `true`.
    pub async fn update<F>(&self, id: &JobId, f: F) -> LedgerResult<Update>
    where
        F: FnOnce(&mut Job) -> bool + Send,
    {
        let lock = self.lock_for(id);
        let result = {
            let _guard = lock.lock().await;
            self.update_locked(id, f).await
        };
        drop(lock);
        self.release_if_idle(id);
        result
    }

    async fn update_locked<F>(&self, id: &JobId, f: F) -> LedgerResult<Update>
    where
        F: FnOnce(&mut Job) -> bool + Send,
    {
        let mut job = self
            .store
            .load(id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(id.clone()))?;

        if job.is_terminal() {
            return Ok(Update { job, applied: false });
        }

        let applied = f(&mut job);
        if applied {
            self.store.save(&job).await?;
        }
        Ok(Update { job, applied })
    }

    /// Every job, newest first.
    pub async fn list(&self) -> LedgerResult<Vec<Job>> {
        let mut jobs = self.store.list().await?;
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(jobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::planned_job;
    use vgen_models::{FailureKind, GenerationRequest, JobStatus, RemoteTask};

    fn job() -> Job {
        planned_job(GenerationRequest::text_to_video("a lighthouse at dusk", 15))
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let ledger = JobLedger::in_memory();
        let job = job();
        ledger.insert(&job).await.unwrap();

        let loaded = ledger.get(&job.id).await.unwrap().unwrap();
        assert_eq!(loaded, job);
        assert!(matches!(
            ledger.insert(&job).await,
            Err(LedgerError::AlreadyExists(_))
        ));
        assert!(ledger.get(&JobId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_refuses_terminal_jobs() {
        let ledger = JobLedger::in_memory();
        let job = job();
        ledger.insert(&job).await.unwrap();

        let failed = ledger
            .update(&job.id, |j| j.fail(FailureKind::Timeout, "deadline"))
            .await
            .unwrap();
        assert!(failed.applied);
        assert_eq!(failed.job.status, JobStatus::Failed);

        let mut called = false;
        let again = ledger
            .update(&job.id, |j| {
                called = true;
                j.mark_running()
            })
            .await
            .unwrap();
        assert!(!called);
        assert!(!again.applied);
        assert_eq!(again.job.error_kind, Some(FailureKind::Timeout));
    }

    #[tokio::test]
    async fn test_update_unknown_job() {
        let ledger = JobLedger::in_memory();
        assert!(matches!(
            ledger.update(&JobId::new(), |_| true).await,
            Err(LedgerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_lock_entries_do_not_accumulate() {
        let ledger = JobLedger::in_memory();
        for _ in 0..5 {
            let _ = ledger.update(&JobId::new(), |_| true).await;
        }
        assert_eq!(ledger.tracked_locks(), 0);

        let job = job();
        ledger.insert(&job).await.unwrap();
        ledger
            .update(&job.id, |j| j.fail(FailureKind::Timeout, "deadline"))
            .await
            .unwrap();
        for _ in 0..5 {
            let update = ledger.update(&job.id, |j| j.mark_running()).await.unwrap();
            assert!(!update.applied);
        }
        assert_eq!(ledger.tracked_locks(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_writers_do_not_lose_updates() {
        let ledger = Arc::new(JobLedger::in_memory());
        let job = job();
        ledger.insert(&job).await.unwrap();
        let segment = job.plan.segments[0];

        let handles: Vec<_> = (0..25)
            .map(|i| {
                let ledger = ledger.clone();
                let id = job.id.clone();
                tokio::spawn(async move {
                    ledger
                        .update(&id, move |j| {
                            j.attach_task(RemoteTask::new(format!("task-{}", i), &segment))
                        })
                        .await
                        .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        let stored = ledger.get(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.tasks.len(), 25);
    }

    #[tokio::test]
    async fn test_file_store_round_trip_and_listing() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FileJobStore::new(dir.path()).await.unwrap());
        let ledger = JobLedger::new(store.clone());

        let first = job();
        let second = job();
        ledger.insert(&first).await.unwrap();
        ledger.insert(&second).await.unwrap();
        ledger.update(&first.id, |j| j.mark_running()).await.unwrap();
        std::fs::write(dir.path().join("garbage.json"), b"{not json").unwrap();

        let reopened = JobLedger::new(Arc::new(FileJobStore::new(dir.path()).await.unwrap()));
        let loaded = reopened.get(&first.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::Running);

        let listed = reopened.list().await.unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed[0].created_at >= listed[1].created_at);
        assert!(store.is_durable());
        assert!(!dir.path().join(format!(".{}.json.tmp", first.id)).exists());
    }

    #[tokio::test]
    async fn test_file_store_rejects_foreign_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileJobStore::new(dir.path()).await.unwrap();
        assert!(matches!(
            store.load(&JobId::from_string("../etc/passwd")).await,
            Err(LedgerError::InvalidId(_))
        ));
    }
}
