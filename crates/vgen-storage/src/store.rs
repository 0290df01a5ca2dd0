//! Object store abstraction used by image ingestion.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::StorageResult;

/// Key prefix for ingested images.
pub const IMAGE_PREFIX: &str = "images";

/// Somewhere to put bytes and get back a publicly fetchable URL.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    fn name(&self) -> &str;

    /// Store `data` under `key` and return its public URL.
    async fn put(&self, data: Vec<u8>, key: &str, content_type: &str) -> StorageResult<String>;

    async fn check_connectivity(&self) -> StorageResult<()>;
}

/// Fresh key for an ingested image, `images/{uuid}{ext}`.
///
/// `extension` may be given with or without the leading dot.
pub fn image_object_key(extension: &str) -> String {
    let ext = extension.trim_start_matches('.').to_ascii_lowercase();
    if ext.is_empty() {
        format!("{}/{}", IMAGE_PREFIX, Uuid::new_v4())
    } else {
        format!("{}/{}.{}", IMAGE_PREFIX, Uuid::new_v4(), ext)
    }
}
