//! # Circuit Breaker
//!
//! Classic three-state breaker: CLOSED (normal), OPEN (failing fast),
//! HALF_OPEN (probing recovery). The fast-fail path returns the distinct
//! [`CircuitBreakerError::CircuitOpen`] variant so callers can branch to a
//! fallback without the rejection counting as a downstream failure.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::events::{EventPublisher, CIRCUIT_OPENED};
use crate::models::CircuitStateRecord;
use crate::resilience::config::CircuitBreakerConfig;
use crate::storage::CircuitStateStore;

/// Circuit breaker states representing the current operational mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CircuitState {
    /// Normal operation, all calls are allowed through.
    Closed = 0,
    /// Failure mode, all calls fail fast without executing.
    Open = 1,
    /// Testing recovery, limited calls allowed through.
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            0 => CircuitState::Closed,
            2 => CircuitState::HalfOpen,
            // Default to the safest state
            _ => CircuitState::Open,
        }
    }
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

/// Errors that can occur during circuit breaker operation.
#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    /// Circuit is open; the wrapped operation was never invoked.
    #[error("circuit breaker is open for {operation}")]
    CircuitOpen { operation: String },

    /// The wrapped operation ran and failed; the failure was recorded.
    #[error("operation failed: {0}")]
    OperationFailed(E),
}

impl<E> CircuitBreakerError<E> {
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }
}

#[derive(Debug, Default, Clone)]
struct Counters {
    consecutive_failures: u64,
    half_open_successes: u64,
    total_failures: u64,
    total_successes: u64,
}

/// Per-operation-key breaker with atomic state management.
pub struct CircuitBreaker {
    operation: String,
    state: AtomicU8,
    config: CircuitBreakerConfig,
    counters: Mutex<Counters>,
    opened_at: Mutex<Option<(Instant, DateTime<Utc>)>>,
    publisher: EventPublisher,
    snapshot_store: Option<Arc<dyn CircuitStateStore>>,
}

impl CircuitBreaker {
    pub fn new(
        operation: String,
        config: CircuitBreakerConfig,
        publisher: EventPublisher,
        snapshot_store: Option<Arc<dyn CircuitStateStore>>,
    ) -> Self {
        info!(
            operation = %operation,
            failure_threshold = config.failure_threshold,
            success_threshold = config.success_threshold,
            probe_timeout_secs = config.probe_timeout.as_secs(),
            reset_timeout_secs = config.reset_timeout.as_secs(),
            "circuit breaker initialized"
        );
        Self {
            operation,
            state: AtomicU8::new(CircuitState::Closed as u8),
            config,
            counters: Mutex::new(Counters::default()),
            opened_at: Mutex::new(None),
            publisher,
            snapshot_store,
        }
    }

    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::Acquire))
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Execute an operation under circuit protection.
    pub async fn call<F, T, E, Fut>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.should_allow_call().await {
            debug!(operation = %self.operation, "circuit open, failing fast");
            return Err(CircuitBreakerError::CircuitOpen {
                operation: self.operation.clone(),
            });
        }

        let result = operation().await;
        match &result {
            Ok(_) => self.record_success().await,
            Err(_) => self.record_failure().await,
        }
        result.map_err(CircuitBreakerError::OperationFailed)
    }

    async fn should_allow_call(&self) -> bool {
        match self.state() {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let opened_at = self.opened_at.lock().await;
                match *opened_at {
                    Some((instant, _)) => {
                        let elapsed = instant.elapsed();
                        // Either window elapsing permits the probe; see
                        // CircuitBreakerConfig for why both exist.
                        if elapsed >= self.config.probe_timeout
                            || elapsed >= self.config.reset_timeout
                        {
                            drop(opened_at);
                            self.transition_to_half_open().await;
                            true
                        } else {
                            false
                        }
                    }
                    None => {
                        warn!(operation = %self.operation, "circuit open without timestamp");
                        true
                    }
                }
            }
            CircuitState::HalfOpen => {
                let counters = self.counters.lock().await;
                counters.half_open_successes < self.config.success_threshold as u64
            }
        }
    }

    async fn record_success(&self) {
        let mut counters = self.counters.lock().await;
        counters.total_successes += 1;

        match self.state() {
            CircuitState::Closed => {
                counters.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                counters.half_open_successes += 1;
                if counters.half_open_successes >= self.config.success_threshold as u64 {
                    drop(counters);
                    self.transition_to_closed().await;
                }
            }
            CircuitState::Open => {
                warn!(operation = %self.operation, "success recorded while circuit open");
            }
        }
    }

    async fn record_failure(&self) {
        let mut counters = self.counters.lock().await;
        counters.total_failures += 1;

        match self.state() {
            CircuitState::Closed => {
                counters.consecutive_failures += 1;
                if counters.consecutive_failures >= self.config.failure_threshold as u64 {
                    drop(counters);
                    self.transition_to_open().await;
                }
            }
            CircuitState::HalfOpen => {
                // Any failure while probing reopens immediately
                counters.half_open_successes = 0;
                drop(counters);
                self.transition_to_open().await;
            }
            CircuitState::Open => {}
        }
    }

    async fn transition_to_closed(&self) {
        self.state
            .store(CircuitState::Closed as u8, Ordering::Release);
        {
            let mut counters = self.counters.lock().await;
            counters.consecutive_failures = 0;
            counters.half_open_successes = 0;
        }
        *self.opened_at.lock().await = None;

        info!(operation = %self.operation, "circuit breaker closed (recovered)");
        self.persist_snapshot().await;
    }

    async fn transition_to_open(&self) {
        self.state.store(CircuitState::Open as u8, Ordering::Release);
        *self.opened_at.lock().await = Some((Instant::now(), Utc::now()));
        {
            let mut counters = self.counters.lock().await;
            counters.half_open_successes = 0;
        }

        error!(
            operation = %self.operation,
            failure_threshold = self.config.failure_threshold,
            "circuit breaker opened (failing fast)"
        );

        // Fire-and-forget: the notifier decides whether a human hears about it
        self.publisher.publish(
            CIRCUIT_OPENED,
            serde_json::json!({
                "operation": self.operation,
                "failure_threshold": self.config.failure_threshold,
            }),
        );
        self.persist_snapshot().await;
    }

    async fn transition_to_half_open(&self) {
        self.state
            .store(CircuitState::HalfOpen as u8, Ordering::Release);
        {
            let mut counters = self.counters.lock().await;
            counters.consecutive_failures = 0;
            counters.half_open_successes = 0;
        }

        info!(
            operation = %self.operation,
            success_threshold = self.config.success_threshold,
            "circuit breaker half-open (testing recovery)"
        );
        self.persist_snapshot().await;
    }

    /// Current state as a persistable record.
    pub async fn snapshot(&self) -> CircuitStateRecord {
        let counters = self.counters.lock().await;
        let opened_at = self.opened_at.lock().await;
        CircuitStateRecord {
            operation: self.operation.clone(),
            state: self.state().as_str().to_string(),
            failure_count: counters.total_failures,
            success_count: counters.total_successes,
            opened_at: opened_at.map(|(_, utc)| utc),
            updated_at: Utc::now(),
        }
    }

    // Best-effort: snapshot persistence must never affect circuit behavior
    async fn persist_snapshot(&self) {
        if let Some(store) = &self.snapshot_store {
            let record = self.snapshot().await;
            if let Err(err) = store.save(&record).await {
                warn!(
                    operation = %self.operation,
                    error = %err,
                    "failed to persist circuit state snapshot"
                );
            }
        }
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("operation", &self.operation)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::sleep;

    fn breaker(config: CircuitBreakerConfig) -> CircuitBreaker {
        CircuitBreaker::new("test".to_string(), config, EventPublisher::new(16), None)
    }

    #[tokio::test]
    async fn normal_operation_stays_closed() {
        let circuit = breaker(CircuitBreakerConfig::default());
        assert_eq!(circuit.state(), CircuitState::Closed);

        let result = circuit.call(|| async { Ok::<_, String>("success") }).await;
        assert!(result.is_ok());
        assert_eq!(circuit.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn five_consecutive_failures_open_the_circuit() {
        let circuit = breaker(CircuitBreakerConfig::default());

        for i in 1..=4 {
            let _ = circuit.call(|| async { Err::<(), _>("boom") }).await;
            assert_eq!(circuit.state(), CircuitState::Closed, "after failure {i}");
        }
        let _ = circuit.call(|| async { Err::<(), _>("boom") }).await;
        assert_eq!(circuit.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn open_circuit_fails_fast_without_invoking_operation() {
        let config = CircuitBreakerConfig {
            failure_threshold: 1,
            probe_timeout: Duration::from_secs(60),
            reset_timeout: Duration::from_secs(600),
            ..Default::default()
        };
        let circuit = breaker(config);
        let _ = circuit.call(|| async { Err::<(), _>("boom") }).await;
        assert_eq!(circuit.state(), CircuitState::Open);

        let invoked = std::sync::atomic::AtomicBool::new(false);
        let result = circuit
            .call(|| {
                invoked.store(true, Ordering::SeqCst);
                async { Ok::<_, String>(()) }
            })
            .await;
        assert!(matches!(
            result,
            Err(CircuitBreakerError::CircuitOpen { .. })
        ));
        assert!(!invoked.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn success_resets_consecutive_failure_count() {
        let circuit = breaker(CircuitBreakerConfig::default());
        for _ in 0..4 {
            let _ = circuit.call(|| async { Err::<(), _>("boom") }).await;
        }
        let _ = circuit.call(|| async { Ok::<_, String>(()) }).await;
        // Four more failures shouldn't trip the five-failure threshold
        for _ in 0..4 {
            let _ = circuit.call(|| async { Err::<(), _>("boom") }).await;
        }
        assert_eq!(circuit.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn two_successes_after_half_open_close_the_circuit() {
        let config = CircuitBreakerConfig {
            failure_threshold: 1,
            success_threshold: 2,
            probe_timeout: Duration::from_millis(20),
            reset_timeout: Duration::from_secs(600),
        };
        let circuit = breaker(config);
        let _ = circuit.call(|| async { Err::<(), _>("boom") }).await;
        assert_eq!(circuit.state(), CircuitState::Open);

        sleep(Duration::from_millis(30)).await;

        let _ = circuit.call(|| async { Ok::<_, String>(()) }).await;
        assert_eq!(circuit.state(), CircuitState::HalfOpen);
        let _ = circuit.call(|| async { Ok::<_, String>(()) }).await;
        assert_eq!(circuit.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn half_open_failure_reopens_immediately() {
        let config = CircuitBreakerConfig {
            failure_threshold: 1,
            success_threshold: 2,
            probe_timeout: Duration::from_millis(20),
            reset_timeout: Duration::from_secs(600),
        };
        let circuit = breaker(config);
        let _ = circuit.call(|| async { Err::<(), _>("boom") }).await;
        sleep(Duration::from_millis(30)).await;

        let _ = circuit.call(|| async { Err::<(), _>("still broken") }).await;
        assert_eq!(circuit.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn shorter_of_the_two_windows_permits_recovery() {
        // reset_timeout shorter than probe_timeout: recovery follows it
        let config = CircuitBreakerConfig {
            failure_threshold: 1,
            success_threshold: 1,
            probe_timeout: Duration::from_secs(600),
            reset_timeout: Duration::from_millis(20),
        };
        let circuit = breaker(config);
        let _ = circuit.call(|| async { Err::<(), _>("boom") }).await;
        assert_eq!(circuit.state(), CircuitState::Open);

        sleep(Duration::from_millis(30)).await;
        let result = circuit.call(|| async { Ok::<_, String>(()) }).await;
        assert!(result.is_ok());
        assert_eq!(circuit.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn opening_publishes_a_domain_event() {
        let publisher = EventPublisher::new(16);
        let mut rx = publisher.subscribe();
        let circuit = CircuitBreaker::new(
            "sms".to_string(),
            CircuitBreakerConfig {
                failure_threshold: 1,
                ..Default::default()
            },
            publisher,
            None,
        );

        let _ = circuit.call(|| async { Err::<(), _>("boom") }).await;

        let event = rx.recv().await.unwrap();
        assert_eq!(event.name, CIRCUIT_OPENED);
        assert_eq!(event.context["operation"], "sms");
    }
}
