//! Provider client error types.

use thiserror::Error;

pub type ProviderResult<T> = Result<T, ProviderError>;

#[derive(Debug, Error)]
pub enum ProviderError {
    /// The provider refused the request; retrying will not help.
    #[error("Provider rejected request: {reason}")]
    Rejected { reason: String, code: Option<String> },

    #[error("Transient provider failure: {0}")]
    Transient(String),

    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),

    #[error("Segment download failed: {0}")]
    DownloadFailed(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ProviderError {
    pub fn rejected(reason: impl Into<String>, code: Option<String>) -> Self {
        Self::Rejected {
            reason: reason.into(),
            code,
        }
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn invalid_response(msg: impl Into<String>) -> Self {
        Self::InvalidResponse(msg.into())
    }

    pub fn download_failed(msg: impl Into<String>) -> Self {
        Self::DownloadFailed(msg.into())
    }

    pub fn not_configured(msg: impl Into<String>) -> Self {
        Self::NotConfigured(msg.into())
    }

    /// Whether a later identical call may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Transient(_) => true,
            ProviderError::Network(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            _ => false,
        }
    }

    pub fn is_rejection(&self) -> bool {
        matches!(self, ProviderError::Rejected { .. })
    }
}
