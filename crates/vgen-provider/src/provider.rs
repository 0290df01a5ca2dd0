//! Provider abstraction.

use async_trait::async_trait;
use std::path::Path;

use crate::error::ProviderResult;
use crate::types::{ProviderResponse, TaskParams, TaskPoll};

/// A remote service that renders video segments asynchronously.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Queue one segment. Transport problems are reported as
    /// [`ProviderResponse::TransientFailure`], not as errors.
    async fn create_generation_task(&self, params: &TaskParams) -> ProviderResponse;

    /// Read the current state of a task.
    async fn get_task_status(&self, task_id: &str) -> ProviderResult<TaskPoll>;

    /// Stream an artifact to `dest`, returning the bytes written.
    async fn download_artifact(&self, url: &str, dest: &Path) -> ProviderResult<u64>;
}
