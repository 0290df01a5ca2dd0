//! Provider client configuration.

use std::time::Duration;

use crate::retry::RetryConfig;

pub const DEFAULT_BASE_URL: &str = "https://dashscope.aliyuncs.com/api/v1";

/// Configuration for the DashScope client.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// API key sent as a bearer token
    pub api_key: String,
    /// API root, without trailing slash
    pub base_url: String,
    /// Timeout for create/status calls without inline payloads
    pub timeout: Duration,
    /// Timeout for artifact downloads
    pub download_timeout: Duration,
    /// Total attempts for transient failures
    pub max_attempts: u32,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(30),
            download_timeout: Duration::from_secs(300),
            max_attempts: 3,
            retry_base_delay: Duration::from_secs(2),
            retry_max_delay: Duration::from_secs(10),
        }
    }
}

impl ProviderConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            api_key: std::env::var("DASHSCOPE_API_KEY").unwrap_or_default(),
            base_url: std::env::var("DASHSCOPE_BASE_URL")
                .map(|s| s.trim_end_matches('/').to_string())
                .unwrap_or(defaults.base_url),
            timeout: Duration::from_secs(
                std::env::var("DASHSCOPE_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
            download_timeout: Duration::from_secs(
                std::env::var("DASHSCOPE_DOWNLOAD_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(300),
            ),
            max_attempts: std::env::var("DASHSCOPE_MAX_ATTEMPTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n: &u32| *n > 0)
                .unwrap_or(3),
            ..defaults
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = api_key.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn is_configured(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    /// Request timeout for a create call carrying `body_len` bytes.
    ///
    /// Inline images make bodies large and uploads slow, so the timeout grows
    /// with the payload.
    pub fn create_timeout(&self, body_len: usize, has_inline_image: bool) -> Duration {
        if !has_inline_image {
            return self.timeout;
        }
        let floor = if body_len > 5 * 1024 * 1024 {
            Duration::from_secs(120)
        } else if body_len > 500 * 1024 {
            Duration::from_secs(90)
        } else {
            Duration::from_secs(60)
        };
        floor.max(self.timeout)
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::new("dashscope")
            .with_max_attempts(self.max_attempts)
            .with_base_delay(self.retry_base_delay)
            .with_max_delay(self.retry_max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = ProviderConfig::default();
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert!(!config.is_configured());
        assert_eq!(config.retry_config().max_attempts, 3);
    }

    #[test]
    fn test_create_timeout_scales_with_inline_payload() {
        let config = ProviderConfig::default();
        assert_eq!(config.create_timeout(10_000_000, false), Duration::from_secs(30));
        assert_eq!(config.create_timeout(1_000, true), Duration::from_secs(60));
        assert_eq!(config.create_timeout(600 * 1024, true), Duration::from_secs(90));
        assert_eq!(config.create_timeout(6 * 1024 * 1024, true), Duration::from_secs(120));
    }
}
