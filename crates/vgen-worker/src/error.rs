//! Worker error types.

use thiserror::Error;
use vgen_models::{FailureKind, JobId, UnsupportedParameterError};

use crate::ingestion::IngestionError;
use crate::ledger::LedgerError;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    /// The request cannot be planned.
    #[error(transparent)]
    Validation(#[from] UnsupportedParameterError),

    #[error("Image ingestion failed: {0}")]
    Ingestion(#[from] IngestionError),

    /// A segment's remote task could not be created. The job exists and is
    /// FAILED.
    #[error("Task creation failed for {job_id}: {message}")]
    TaskCreationFailed {
        job_id: JobId,
        kind: FailureKind,
        message: String,
    },

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Invalid job id: {0}")]
    InvalidJobId(String),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Provider error: {0}")]
    Provider(#[from] vgen_provider::ProviderError),

    #[error("Storage error: {0}")]
    Storage(#[from] vgen_storage::StorageError),

    #[error("Media error: {0}")]
    Media(#[from] vgen_media::MediaError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl WorkerError {
    pub fn job_not_found(id: impl Into<String>) -> Self {
        Self::JobNotFound(id.into())
    }

    pub fn invalid_job_id(id: impl Into<String>) -> Self {
        Self::InvalidJobId(id.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Caller supplied something unusable.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            WorkerError::Validation(_) | WorkerError::Ingestion(_) | WorkerError::InvalidJobId(_)
        )
    }

    /// Failure kind recorded on a job that fails with this error.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            WorkerError::Validation(_) | WorkerError::Ingestion(_) => FailureKind::Validation,
            WorkerError::TaskCreationFailed { kind, .. } => *kind,
            WorkerError::Provider(e) if e.is_rejection() => FailureKind::ProviderRejection,
            WorkerError::Provider(vgen_provider::ProviderError::DownloadFailed(_)) => {
                FailureKind::Download
            }
            WorkerError::Provider(_) => FailureKind::TransientNetwork,
            WorkerError::Media(_) => FailureKind::Concatenation,
            _ => FailureKind::Internal,
        }
    }
}
