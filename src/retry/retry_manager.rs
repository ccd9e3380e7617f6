//! # Retry Manager
//!
//! Wraps one async invocation with an in-process retry loop. Non-retryable
//! failures and the final attempt return the original error, so callers must
//! see the real cause, never a wrapper.

use std::future::Future;
use tracing::{debug, warn};

use crate::error::ExecutionError;
use crate::retry::backoff::BackoffConfig;

fn default_retry_predicate(err: &ExecutionError) -> bool {
    err.is_retryable()
}

/// Policy for one retried invocation.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total number of attempts, including the first.
    pub max_retries: u32,
    pub backoff: BackoffConfig,
    /// Decides whether a given failure is worth another attempt.
    pub retry_on: fn(&ExecutionError) -> bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: BackoffConfig::default(),
            retry_on: default_retry_predicate,
        }
    }
}

impl RetryConfig {
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }
}

/// Stateless retry executor; all state lives in the loop of a single call.
#[derive(Debug, Clone, Default)]
pub struct RetryManager;

impl RetryManager {
    pub fn new() -> Self {
        Self
    }

    /// Run `operation` up to `config.max_retries` times. The closure receives
    /// the 1-based attempt number. Sleeps the backoff delay between attempts.
    pub async fn execute<T, F, Fut>(
        &self,
        config: &RetryConfig,
        mut operation: F,
    ) -> Result<T, ExecutionError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ExecutionError>>,
    {
        let attempts = config.max_retries.max(1);
        let mut last_error: Option<ExecutionError> = None;

        for attempt in 1..=attempts {
            match operation(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => {
                    let retryable = (config.retry_on)(&err);
                    if !retryable || attempt == attempts {
                        if !retryable {
                            debug!(attempt, error = %err, "non-retryable failure, surfacing");
                        } else {
                            warn!(attempt, error = %err, "retries exhausted");
                        }
                        return Err(err);
                    }

                    let delay = config.backoff.delay(attempt);
                    debug!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient failure, backing off before retry"
                    );
                    last_error = Some(err);
                    tokio::time::sleep(delay).await;
                }
            }
        }

        // The loop always returns from its final iteration; this is
        // unreachable but keeps the compiler satisfied without a panic.
        Err(last_error.unwrap_or_else(|| ExecutionError::Provider("retry loop exhausted".into())))
    }
}
