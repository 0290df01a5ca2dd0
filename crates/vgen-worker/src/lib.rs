//! Video generation job orchestration.
//!
//! This crate provides:
//! - The job ledger with per-job write serialization
//! - Image ingestion (object storage with inline fallback)
//! - The segment poller with fail-fast and deadline handling
//! - [`GenerationService`], which ties planning, task creation, polling and
//!   concatenation together

pub mod config;
pub mod error;
pub mod ingestion;
pub mod ledger;
pub mod logging;
pub mod metrics;
pub mod poller;
pub mod service;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use config::{LedgerBackend, WorkerConfig};
pub use error::{WorkerError, WorkerResult};
pub use ingestion::{ImageIngestionResolver, IngestionError};
pub use ledger::{FileJobStore, JobLedger, JobStore, LedgerError, MemoryJobStore};
pub use logging::{JobLogger, Phase};
pub use poller::SegmentPoller;
pub use service::{
    open_ledger, GenerationService, JobPage, JobQuery, ServiceDeps, SubmitReceipt, UploadedImage,
};
