//! Model-level error types.

use thiserror::Error;

/// A request parameter the active model cannot honor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported {field}: {message}")]
pub struct UnsupportedParameterError {
    /// Offending request field
    pub field: &'static str,
    /// Human-readable explanation
    pub message: String,
}

impl UnsupportedParameterError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}
