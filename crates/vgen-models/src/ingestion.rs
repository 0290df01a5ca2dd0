//! Image ingestion outcomes.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// How an image reference was made reachable by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum IngestionMethod {
    /// Uploaded to object storage, public URL handed over
    ObjectStorage,
    /// Embedded as a `data:` URI
    InlineEncoded,
    /// Already reachable, forwarded unchanged
    Passthrough,
}

impl IngestionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestionMethod::ObjectStorage => "object_storage",
            IngestionMethod::InlineEncoded => "inline_encoded",
            IngestionMethod::Passthrough => "passthrough",
        }
    }
}

impl fmt::Display for IngestionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of resolving an image reference.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageIngestionResult {
    /// Provider-consumable reference (URL or data URI)
    pub reference: String,
    pub method: IngestionMethod,
    pub success: bool,
    /// Why the preferred path was not taken
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ImageIngestionResult {
    pub fn passthrough(reference: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            method: IngestionMethod::Passthrough,
            success: true,
            error: None,
        }
    }

    pub fn object_storage(public_url: impl Into<String>) -> Self {
        Self {
            reference: public_url.into(),
            method: IngestionMethod::ObjectStorage,
            success: true,
            error: None,
        }
    }

    pub fn inline(data_uri: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            reference: data_uri.into(),
            method: IngestionMethod::InlineEncoded,
            success: true,
            error: Some(reason.into()),
        }
    }

    /// Inline payloads work but inflate every provider request.
    pub fn degraded(&self) -> bool {
        self.method == IngestionMethod::InlineEncoded
    }

    pub fn summary(&self) -> IngestionSummary {
        IngestionSummary {
            method: self.method,
            degraded: self.degraded(),
            reason: self.error.clone(),
        }
    }
}

impl fmt::Debug for ImageIngestionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reference = if self.method == IngestionMethod::InlineEncoded {
            format!("<inline {} bytes>", self.reference.len())
        } else {
            self.reference.clone()
        };
        f.debug_struct("ImageIngestionResult")
            .field("reference", &reference)
            .field("method", &self.method)
            .field("success", &self.success)
            .field("error", &self.error)
            .finish()
    }
}

/// What a job keeps about ingestion; never the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct IngestionSummary {
    pub method: IngestionMethod,
    pub degraded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inline_is_degraded() {
        let result = ImageIngestionResult::inline("data:image/png;base64,AAAA", "no object storage configured");
        assert!(result.degraded());

        let summary = result.summary();
        assert_eq!(summary.method, IngestionMethod::InlineEncoded);
        assert_eq!(summary.reason.as_deref(), Some("no object storage configured"));
    }

    #[test]
    fn test_debug_hides_payload() {
        let result = ImageIngestionResult::inline("data:image/png;base64,SECRETPAYLOAD", "x");
        assert!(!format!("{:?}", result).contains("SECRETPAYLOAD"));
    }

    #[test]
    fn test_passthrough_not_degraded() {
        assert!(!ImageIngestionResult::passthrough("https://cdn.example.com/a.png").degraded());
        assert!(!ImageIngestionResult::object_storage("https://b.oss/images/x.png").degraded());
    }
}
