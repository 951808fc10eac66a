//! Error types and retry logic
//!
//! Every fallible library operation returns [`SyncError`]. Stale writes are
//! deliberately absent: losing the admission rule is a normal outcome, not
//! an error (see [`crate::state::Admission`]).

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::sleep;

/// Result type for sync operations.
pub type Result<T, E = SyncError> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum SyncError {
    /// A candidate document that is not a well-formed state object.
    #[error("malformed input: {0}")]
    MalformedInput(String),

    /// The persistence backend could not read or write.
    #[error("{backend} store failed: {message}")]
    Persistence {
        backend: &'static str,
        message: String,
    },

    /// Socket, stream or fetch failure.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    pub fn persistence(backend: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Persistence {
            backend,
            message: err.to_string(),
        }
    }

    pub fn transport(err: impl std::fmt::Display) -> Self {
        Self::Transport(err.to_string())
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            SyncError::MalformedInput(_) | SyncError::Serialization(_) => {
                ErrorCategory::MalformedInput
            }
            SyncError::Persistence { .. } | SyncError::Io(_) => ErrorCategory::Persistence,
            SyncError::Transport(_) => ErrorCategory::Transport,
            SyncError::Config(_) => ErrorCategory::Configuration,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }
}

/// Categorized error kinds for handling decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Rejected input (not retryable)
    MalformedInput,

    /// Storage read/write failure (retryable)
    Persistence,

    /// Connectivity failure (retryable)
    Transport,

    /// Configuration errors (not retryable)
    Configuration,
}

impl ErrorCategory {
    /// Check if this error category is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorCategory::Persistence | ErrorCategory::Transport)
    }
}

/// Retry policy configuration
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts; `None` retries forever
    pub max_attempts: Option<u32>,

    /// Delay before the first retry
    pub initial_delay: Duration,

    /// Exponential backoff multiplier (1.0 keeps the delay fixed)
    pub backoff_multiplier: f64,

    /// Maximum delay between retries
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: Some(3),
            initial_delay: Duration::from_millis(250),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Create a no-retry policy
    pub fn no_retry() -> Self {
        Self {
            max_attempts: Some(1),
            ..Default::default()
        }
    }

    /// Retry forever with the same delay every time (transport reconnects)
    pub fn reconnect(delay: Duration) -> Self {
        Self {
            max_attempts: None,
            initial_delay: delay,
            backoff_multiplier: 1.0,
            max_delay: delay,
        }
    }

    /// Delay to wait before retry number `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }

    fn exhausted(&self, attempts: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempts >= max)
    }
}

/// Execute with retry logic. Only retryable errors are retried.
pub async fn with_retry<F, Fut, T>(policy: &RetryPolicy, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempts = 0;

    loop {
        attempts += 1;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(err) if !err.is_retryable() || policy.exhausted(attempts) => return Err(err),
            Err(err) => {
                let delay = policy.delay_for_attempt(attempts);
                tracing::warn!(attempt = attempts, ?delay, "operation failed, retrying: {err}");
                sleep(delay).await;
            }
        }
    }
}
