//! S3-compatible client implementation (Aliyun OSS, R2, MinIO, AWS).

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::Builder;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use aws_types::region::Region;
use tracing::{debug, info};
use url::Url;

use crate::error::{StorageError, StorageResult};
use crate::store::ObjectStore;

/// Configuration for the object store client.
#[derive(Debug, Clone)]
pub struct ObjectStoreConfig {
    /// S3 API endpoint, e.g. `https://oss-cn-hangzhou.aliyuncs.com`
    pub endpoint_url: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub bucket_name: String,
    pub region: String,
    /// CDN or custom domain serving the bucket publicly
    pub public_base_url: Option<String>,
}

impl ObjectStoreConfig {
    /// Create config from environment variables.
    ///
    /// Missing credentials are not fatal for the service: callers treat
    /// [`StorageError::NotConfigured`] as "no object storage".
    pub fn from_env() -> StorageResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> StorageResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let required = [
            "OSS_ENDPOINT_URL",
            "OSS_ACCESS_KEY_ID",
            "OSS_SECRET_ACCESS_KEY",
            "OSS_BUCKET_NAME",
        ];
        let missing: Vec<&str> = required.iter().copied().filter(|k| get(k).is_none()).collect();
        if !missing.is_empty() {
            return Err(StorageError::not_configured(format!(
                "{} not set",
                missing.join(", ")
            )));
        }

        Ok(Self {
            endpoint_url: get("OSS_ENDPOINT_URL").unwrap_or_default(),
            access_key_id: get("OSS_ACCESS_KEY_ID").unwrap_or_default(),
            secret_access_key: get("OSS_SECRET_ACCESS_KEY").unwrap_or_default(),
            bucket_name: get("OSS_BUCKET_NAME").unwrap_or_default(),
            region: get("OSS_REGION").unwrap_or_else(|| "us-east-1".to_string()),
            public_base_url: get("OSS_PUBLIC_BASE_URL"),
        })
    }

    /// Public URL under which `key` is reachable.
    ///
    /// Uses the public base URL when set, otherwise the virtual-hosted form
    /// `scheme://{bucket}.{endpoint host}/{key}`.
    pub fn public_url(&self, key: &str) -> String {
        let key = key.trim_start_matches('/');
        if let Some(base) = &self.public_base_url {
            return format!("{}/{}", base.trim_end_matches('/'), key);
        }

        match Url::parse(&self.endpoint_url) {
            Ok(endpoint) if endpoint.host_str().is_some() => {
                let host = endpoint.host_str().unwrap_or_default();
                let port = endpoint.port().map(|p| format!(":{}", p)).unwrap_or_default();
                format!(
                    "{}://{}.{}{}/{}",
                    endpoint.scheme(),
                    self.bucket_name,
                    host,
                    port,
                    key
                )
            }
            _ => format!(
                "{}/{}/{}",
                self.endpoint_url.trim_end_matches('/'),
                self.bucket_name,
                key
            ),
        }
    }
}

/// S3-compatible storage client.
#[derive(Clone)]
pub struct S3ObjectStore {
    client: Client,
    config: ObjectStoreConfig,
}

impl S3ObjectStore {
    /// Create a new client from configuration.
    pub fn new(config: ObjectStoreConfig) -> StorageResult<Self> {
        Url::parse(&config.endpoint_url).map_err(|e| {
            StorageError::config_error(format!("invalid endpoint {}: {}", config.endpoint_url, e))
        })?;

        let credentials = Credentials::new(
            &config.access_key_id,
            &config.secret_access_key,
            None,
            None,
            "vgen-object-store",
        );

        let sdk_config = Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(&config.endpoint_url)
            .region(Region::new(config.region.clone()))
            .credentials_provider(credentials)
            .force_path_style(false)
            .build();

        Ok(Self {
            client: Client::from_conf(sdk_config),
            config,
        })
    }

    /// Create from environment variables.
    pub fn from_env() -> StorageResult<Self> {
        Self::new(ObjectStoreConfig::from_env()?)
    }

    pub fn bucket(&self) -> &str {
        &self.config.bucket_name
    }

    /// Upload bytes under `key`.
    pub async fn upload_bytes(
        &self,
        data: Vec<u8>,
        key: &str,
        content_type: &str,
    ) -> StorageResult<()> {
        if key.is_empty() || key.starts_with('/') || key.split('/').any(|p| p == "..") {
            return Err(StorageError::invalid_key(key));
        }

        debug!("Uploading {} bytes to {}", data.len(), key);

        self.client
            .put_object()
            .bucket(&self.config.bucket_name)
            .key(key)
            .body(ByteStream::from(data))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| StorageError::upload_failed(e.to_string()))?;

        Ok(())
    }

    /// Check if an object exists.
    pub async fn exists(&self, key: &str) -> StorageResult<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.config.bucket_name)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                if e.to_string().contains("NotFound") || e.to_string().contains("NoSuchKey") {
                    Ok(false)
                } else {
                    Err(StorageError::AwsSdk(e.to_string()))
                }
            }
        }
    }

    /// Check connectivity by performing a head bucket operation.
    pub async fn check_connectivity(&self) -> StorageResult<()> {
        self.client
            .head_bucket()
            .bucket(&self.config.bucket_name)
            .send()
            .await
            .map_err(|e| StorageError::AwsSdk(format!("object storage connectivity check failed: {}", e)))?;
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    fn name(&self) -> &str {
        "s3"
    }

    async fn put(&self, data: Vec<u8>, key: &str, content_type: &str) -> StorageResult<String> {
        self.upload_bytes(data, key, content_type).await?;
        let url = self.config.public_url(key);
        info!(bucket = %self.config.bucket_name, key, "Uploaded object");
        Ok(url)
    }

    async fn check_connectivity(&self) -> StorageResult<()> {
        S3ObjectStore::check_connectivity(self).await
    }
}
