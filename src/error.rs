use std::time::Duration;
use thiserror::Error;

/// Error categorization shared by every resilience component
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors (permanent failures)
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // I/O errors (potentially transient)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors (usually permanent)
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    // Caller errors (permanent - don't retry)
    #[error("Invalid input: {field} - {reason}")]
    InvalidInput { field: String, reason: String },

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    // Dependency errors (transient - should retry)
    #[error("Service temporarily unavailable: {service} - {reason}")]
    ServiceUnavailable { service: String, reason: String },

    #[error("Timeout error: operation timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    // Circuit breaker errors
    #[error("Circuit breaker open for service: {service} (retry in {retry_after:?})")]
    CircuitBreakerOpen {
        service: String,
        retry_after: Duration,
    },

    // Resource guard errors
    #[error("Resource exhausted: {}", warnings.join("; "))]
    ResourceExhausted { warnings: Vec<String> },

    // General service error
    #[error("Service error: {0}")]
    Service(String),
}

/// Error categorization for retry strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Permanent errors - should not retry
    Permanent,
    /// Transient errors - safe to retry
    Transient,
    /// Circuit breaker triggered - stop retrying until the cooldown passes
    CircuitBreaker,
    /// Host resources are short - back off at the orchestration level
    ResourceExhausted,
}

impl Error {
    /// Categorize error for retry logic
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::Config(_)
            | Self::Serde(_)
            | Self::InvalidInput { .. }
            | Self::NotFound { .. } => ErrorCategory::Permanent,

            Self::CircuitBreakerOpen { .. } => ErrorCategory::CircuitBreaker,

            Self::ResourceExhausted { .. } => ErrorCategory::ResourceExhausted,

            Self::Io(_)
            | Self::ServiceUnavailable { .. }
            | Self::Timeout { .. }
            | Self::Service(_) => ErrorCategory::Transient,
        }
    }

    /// Check if error is retryable
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self.category(), ErrorCategory::Transient)
    }

    /// Estimated wait before the failing dependency may be tried again
    #[must_use]
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::CircuitBreakerOpen { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
