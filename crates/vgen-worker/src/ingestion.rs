//! Image ingestion.
//!
//! The provider fetches source images itself, so every image reference must
//! be reachable from the public internet. Local references are uploaded to
//! object storage; when that is impossible the bytes are inlined as a base64
//! data URI and the job is marked degraded.

use std::net::IpAddr;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::ImageFormat;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::{Host, Url};
use uuid::Uuid;
use vgen_models::ImageIngestionResult;
use vgen_storage::{image_object_key, ObjectStore};

use crate::metrics;

/// URL path under which locally staged images are served.
pub const LOCAL_IMAGE_PREFIX: &str = "/media/images/";

/// Extension assumed for uploads without one.
pub const DEFAULT_IMAGE_EXTENSION: &str = "jpg";

#[derive(Debug, Error)]
pub enum IngestionError {
    #[error("no object storage configured")]
    NoObjectStorage,

    #[error("upload failed: {0}")]
    UploadFailed(String),

    #[error("cannot read local image {path}: {message}")]
    LocalFileUnreadable { path: PathBuf, message: String },

    #[error("unsupported media type: {0}")]
    UnsupportedMediaType(String),

    #[error("invalid image reference: {0}")]
    InvalidReference(String),

    #[error("inline image payload is {size} bytes, limit is {limit}")]
    PayloadTooLarge { size: usize, limit: usize },
}

impl IngestionError {
    pub fn upload_failed(msg: impl Into<String>) -> Self {
        Self::UploadFailed(msg.into())
    }

    pub fn unsupported_media_type(msg: impl Into<String>) -> Self {
        Self::UnsupportedMediaType(msg.into())
    }

    pub fn invalid_reference(msg: impl Into<String>) -> Self {
        Self::InvalidReference(msg.into())
    }

    fn unreadable(path: &Path, err: impl std::fmt::Display) -> Self {
        Self::LocalFileUnreadable {
            path: path.to_path_buf(),
            message: err.to_string(),
        }
    }
}

/// MIME type for an allowed image extension.
pub fn mime_for_extension(extension: &str) -> Option<&'static str> {
    match extension.trim_start_matches('.').to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        "bmp" => Some("image/bmp"),
        _ => None,
    }
}

/// Sniff the content and return its MIME type if it is an allowed image.
fn sniff_mime(bytes: &[u8]) -> Option<&'static str> {
    match image::guess_format(bytes).ok()? {
        ImageFormat::Jpeg => Some("image/jpeg"),
        ImageFormat::Png => Some("image/png"),
        ImageFormat::Gif => Some("image/gif"),
        ImageFormat::WebP => Some("image/webp"),
        ImageFormat::Bmp => Some("image/bmp"),
        _ => None,
    }
}

fn is_local_host(url: &Url) -> bool {
    match url.host() {
        Some(Host::Domain(domain)) => {
            let domain = domain.to_ascii_lowercase();
            domain == "localhost" || domain.ends_with(".localhost")
        }
        Some(Host::Ipv4(ip)) => {
            let ip = IpAddr::V4(ip);
            ip.is_loopback() || ip.is_unspecified()
        }
        Some(Host::Ipv6(ip)) => {
            let ip = IpAddr::V6(ip);
            ip.is_loopback() || ip.is_unspecified()
        }
        None => true,
    }
}

/// A reference the resolver has to read from disk.
#[derive(Debug, PartialEq)]
enum Reference {
    Passthrough,
    Local(PathBuf),
}

/// Turns image references into something the provider can fetch.
#[derive(Clone)]
pub struct ImageIngestionResolver {
    store: Option<Arc<dyn ObjectStore>>,
    images_dir: PathBuf,
    max_inline_bytes: usize,
}

impl ImageIngestionResolver {
    pub fn new(
        store: Option<Arc<dyn ObjectStore>>,
        images_dir: impl Into<PathBuf>,
        max_inline_bytes: usize,
    ) -> Self {
        Self {
            store,
            images_dir: images_dir.into(),
            max_inline_bytes,
        }
    }

    pub fn object_store(&self) -> Option<&Arc<dyn ObjectStore>> {
        self.store.as_ref()
    }

    pub fn images_dir(&self) -> &Path {
        &self.images_dir
    }

    /// Resolve an image reference given on a request.
    pub async fn resolve(&self, reference: &str) -> Result<ImageIngestionResult, IngestionError> {
        match self.classify(reference)? {
            Reference::Passthrough => {
                debug!("Image reference is provider-reachable, passing through");
                Ok(ImageIngestionResult::passthrough(reference.trim()))
            }
            Reference::Local(path) => {
                let extension = path
                    .extension()
                    .and_then(|e| e.to_str())
                    .unwrap_or_default()
                    .to_string();
                if mime_for_extension(&extension).is_none() {
                    return Err(IngestionError::unsupported_media_type(format!(
                        "extension '{}' is not an accepted image type",
                        extension
                    )));
                }
                let bytes = tokio::fs::read(&path)
                    .await
                    .map_err(|e| IngestionError::unreadable(&path, e))?;
                self.ingest_bytes(bytes, &extension).await
            }
        }
    }

    /// Make raw image bytes provider-reachable: object storage first, inline
    /// data URI as the degraded fallback.
    pub async fn ingest_bytes(
        &self,
        bytes: Vec<u8>,
        extension: &str,
    ) -> Result<ImageIngestionResult, IngestionError> {
        let mime = validate_image(&bytes, extension)?;

        let reason = match self.upload(bytes.clone(), extension, mime).await {
            Ok(url) => return Ok(ImageIngestionResult::object_storage(url)),
            Err(e) => e.to_string(),
        };

        let encoded = BASE64.encode(&bytes);
        if encoded.len() > self.max_inline_bytes {
            return Err(IngestionError::PayloadTooLarge {
                size: encoded.len(),
                limit: self.max_inline_bytes,
            });
        }

        warn!(
            reason = %reason,
            bytes = bytes.len(),
            "Image ingestion degraded to inline encoding"
        );
        metrics::record_ingestion_degraded();
        Ok(ImageIngestionResult::inline(
            format!("data:{};base64,{}", mime, encoded),
            reason,
        ))
    }

    /// Upload to object storage and return the public URL.
    pub async fn upload(
        &self,
        bytes: Vec<u8>,
        extension: &str,
        mime: &str,
    ) -> Result<String, IngestionError> {
        let store = self.store.as_ref().ok_or(IngestionError::NoObjectStorage)?;
        let key = image_object_key(extension);
        let url = store
            .put(bytes, &key, mime)
            .await
            .map_err(|e| IngestionError::upload_failed(e.to_string()))?;
        info!(store = store.name(), key = %key, "Image uploaded to object storage");
        Ok(url)
    }

    /// Save bytes under the images directory and return the served path
    /// (`/media/images/{name}`).
    pub async fn stage_local(&self, bytes: &[u8], extension: &str) -> Result<String, IngestionError> {
        let name = format!(
            "{}.{}",
            Uuid::new_v4().simple(),
            extension.trim_start_matches('.').to_ascii_lowercase()
        );
        let path = self.images_dir.join(&name);
        tokio::fs::create_dir_all(&self.images_dir)
            .await
            .map_err(|e| IngestionError::unreadable(&self.images_dir, e))?;
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| IngestionError::unreadable(&path, e))?;
        Ok(format!("{}{}", LOCAL_IMAGE_PREFIX, name))
    }

    fn classify(&self, reference: &str) -> Result<Reference, IngestionError> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(IngestionError::invalid_reference("empty image reference"));
        }

        if let Some(rest) = reference.strip_prefix("data:") {
            if !rest.starts_with("image/") {
                return Err(IngestionError::unsupported_media_type(
                    "data URI does not carry an image",
                ));
            }
            if !rest.contains(";base64,") {
                return Err(IngestionError::invalid_reference("data URI must be base64 encoded"));
            }
            if reference.len() > self.max_inline_bytes {
                return Err(IngestionError::PayloadTooLarge {
                    size: reference.len(),
                    limit: self.max_inline_bytes,
                });
            }
            return Ok(Reference::Passthrough);
        }

        if let Some(name) = reference.strip_prefix(LOCAL_IMAGE_PREFIX) {
            return self.staged_image(name).map(Reference::Local);
        }

        match Url::parse(reference) {
            Ok(url) => match url.scheme() {
                "http" | "https" if is_local_host(&url) => {
                    match url.path().strip_prefix(LOCAL_IMAGE_PREFIX) {
                        Some(name) => self.staged_image(name).map(Reference::Local),
                        None => Err(IngestionError::invalid_reference(format!(
                            "{} is local and not served from {}",
                            reference, LOCAL_IMAGE_PREFIX
                        ))),
                    }
                }
                "http" | "https" => Ok(Reference::Passthrough),
                other => Err(IngestionError::invalid_reference(format!(
                    "unsupported scheme '{}'",
                    other
                ))),
            },
            // Only staged images are read from disk; arbitrary host paths are not.
            Err(_) => Err(IngestionError::invalid_reference(format!(
                "{} is not a URL or a path under {}",
                reference, LOCAL_IMAGE_PREFIX
            ))),
        }
    }

    /// Map a served image name back to the images directory.
    fn staged_image(&self, name: &str) -> Result<PathBuf, IngestionError> {
        let relative = Path::new(name);
        let safe = !name.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(IngestionError::invalid_reference(format!(
                "bad image name '{}'",
                name
            )));
        }
        Ok(self.images_dir.join(relative))
    }
}

/// Check extension and content; returns the MIME type of the content.
pub fn validate_image(bytes: &[u8], extension: &str) -> Result<&'static str, IngestionError> {
    if mime_for_extension(extension).is_none() {
        return Err(IngestionError::unsupported_media_type(format!(
            "extension '{}' is not an accepted image type",
            extension
        )));
    }
    if bytes.is_empty() {
        return Err(IngestionError::unsupported_media_type("image is empty"));
    }
    sniff_mime(bytes)
        .ok_or_else(|| IngestionError::unsupported_media_type("content is not a recognized image"))
}
