//! Retry utilities with exponential backoff.
//!
//! Only the remote task client retries. Everything above it treats a
//! returned error as final for the current attempt.

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Base delay for exponential backoff (doubles each attempt).
    pub base_delay: Duration,
    /// Maximum delay between attempts.
    pub max_delay: Duration,
    /// Operation name for logging.
    pub operation_name: String,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(10),
            operation_name: "operation".to_string(),
        }
    }
}

impl RetryConfig {
    /// Create a new retry config with the given operation name.
    pub fn new(operation_name: impl Into<String>) -> Self {
        Self {
            operation_name: operation_name.into(),
            ..Default::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn named(&self, operation_name: impl Into<String>) -> Self {
        Self {
            operation_name: operation_name.into(),
            ..self.clone()
        }
    }

    /// `base * 2^attempt`, capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Execute an async operation, retrying errors that `should_retry` accepts.
///
/// The last error is returned once attempts run out or on the first error
/// that is not retryable.
pub async fn retry_async<F, Fut, T, E, R>(
    config: &RetryConfig,
    operation: F,
    should_retry: R,
) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    R: Fn(&E) -> bool,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0u32;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt + 1 < max_attempts && should_retry(&e) => {
                let delay = config.delay_for_attempt(attempt);
                attempt += 1;
                warn!(
                    operation = %config.operation_name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retryable failure, backing off"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                debug!(
                    operation = %config.operation_name,
                    attempts = attempt + 1,
                    "Giving up: {}",
                    e
                );
                return Err(e);
            }
        }
    }
}

/// State tracker for repeated operations that may fail intermittently.
///
/// Background loops (like segment polling) use it to suppress log spam
/// after repeated failures.
#[derive(Debug, Default)]
pub struct FailureTracker {
    consecutive_failures: u32,
    max_logged_failures: u32,
    suppressed: bool,
}

impl FailureTracker {
    pub fn new(max_logged_failures: u32) -> Self {
        Self {
            consecutive_failures: 0,
            max_logged_failures,
            suppressed: false,
        }
    }

    /// Record a successful operation (resets failure count).
    pub fn record_success(&mut self) {
        if self.consecutive_failures > 0 && self.suppressed {
            debug!(
                "Operation recovered after {} consecutive failures",
                self.consecutive_failures
            );
        }
        self.consecutive_failures = 0;
        self.suppressed = false;
    }

    /// Record a failed operation.
    ///
    /// Returns `true` if this failure should be logged (not suppressed).
    pub fn record_failure(&mut self) -> bool {
        self.consecutive_failures += 1;

        if self.consecutive_failures <= self.max_logged_failures {
            true
        } else if self.consecutive_failures == self.max_logged_failures + 1 {
            self.suppressed = true;
            warn!(
                "Suppressing further failure logs after {} consecutive failures",
                self.max_logged_failures
            );
            false
        } else {
            false
        }
    }

    pub fn failure_count(&self) -> u32 {
        self.consecutive_failures
    }
}
