//! # Error Taxonomy
//!
//! Errors are split along the retry boundaries the dispatcher cares about:
//!
//! - [`ExecutionError`]: a single downstream invocation failed. Carries enough
//!   shape (network / timeout / HTTP status / validation) for the retryability
//!   predicate and circuit-breaker accounting to classify it.
//! - [`StorageError`]: the durable store misbehaved. Always fatal to the
//!   caller: silently losing track of scheduled work is worse than a visible
//!   crash. The one deliberate exception is the idempotency check, which fails
//!   open at its call site.
//! - [`CoreError`]: the library-level error type combining the above with
//!   configuration and lookup failures.

use std::time::Duration;

/// Failure of one downstream invocation (provider call, webhook re-POST).
#[derive(Debug, Clone, thiserror::Error)]
pub enum ExecutionError {
    /// Connection refused, DNS failure, broken pipe and friends.
    #[error("network error: {0}")]
    Network(String),

    /// The call exceeded its configured deadline.
    #[error("operation timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    /// Downstream returned an HTTP status outside 2xx.
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// The request itself is malformed; retrying can never succeed.
    #[error("validation error: {0}")]
    Validation(String),

    /// Anything a provider reported that does not fit the shapes above.
    #[error("provider error: {0}")]
    Provider(String),
}

impl ExecutionError {
    /// Retryability per the delivery taxonomy: network errors, timeouts,
    /// 429 and 5xx are transient; validation and the remaining 4xx
    /// (401/403 included) are permanent.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout { .. } => true,
            Self::Http { status, .. } => *status == 429 || *status >= 500,
            Self::Validation(_) => false,
            Self::Provider(_) => true,
        }
    }

    /// HTTP status code, when the failure carried one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Durable-store failure. Propagated, never absorbed (see module docs).
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        StorageError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

/// Top-level error type for queue, DLQ, orchestrator and webhook operations.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("task {0} not found")]
    TaskNotFound(uuid::Uuid),

    #[error("dead letter entry {0} not found")]
    DeadLetterNotFound(uuid::Uuid),

    #[error("invalid state transition: {0}")]
    InvalidTransition(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_and_timeout_are_retryable() {
        assert!(ExecutionError::Network("connection refused".into()).is_retryable());
        assert!(ExecutionError::Timeout {
            timeout: Duration::from_secs(30)
        }
        .is_retryable());
    }

    #[test]
    fn rate_limit_and_server_errors_are_retryable() {
        for status in [429, 500, 502, 503] {
            let err = ExecutionError::Http {
                status,
                message: "downstream unhappy".into(),
            };
            assert!(err.is_retryable(), "status {status} should be retryable");
        }
    }

    #[test]
    fn auth_and_validation_failures_are_permanent() {
        for status in [400, 401, 403, 404, 422] {
            let err = ExecutionError::Http {
                status,
                message: "rejected".into(),
            };
            assert!(!err.is_retryable(), "status {status} should not retry");
        }
        assert!(!ExecutionError::Validation("missing phone".into()).is_retryable());
    }
}
