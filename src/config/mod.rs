//! # Configuration
//!
//! Serde-typed configuration for every tunable the delivery core exposes:
//! dispatcher cadence, retry budgets, backoff shapes, circuit thresholds,
//! idempotency windows and DLQ retention. Defaults carry the canonical
//! production values, so an empty config file is a valid deployment.
//!
//! Loading is environment-aware YAML (see [`loader`]): a base file merged
//! with an optional per-environment overlay, validated after deserialization.

pub mod loader;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::error::CoreError;
use crate::retry::{BackoffConfig, RetryConfig};

pub use loader::ConfigLoader;

/// Root configuration for the delivery core.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub dispatcher: DispatcherConfig,
    pub queue: QueueConfig,
    pub retry: RetrySettings,
    pub circuit_breaker: CircuitBreakerSettings,
    pub idempotency: IdempotencyConfig,
    pub dead_letter: DeadLetterConfig,
    pub webhook: WebhookConfig,
}

impl CoreConfig {
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.dispatcher.batch_size == 0 {
            return Err(CoreError::Configuration(
                "dispatcher.batch_size must be positive".into(),
            ));
        }
        if self.dispatcher.worker_count == 0 {
            return Err(CoreError::Configuration(
                "dispatcher.worker_count must be positive".into(),
            ));
        }
        if self.queue.default_max_attempts <= 0 {
            return Err(CoreError::Configuration(
                "queue.default_max_attempts must be positive".into(),
            ));
        }
        if self.retry.multiplier < 1.0 {
            return Err(CoreError::Configuration(
                "retry.multiplier must be at least 1.0".into(),
            ));
        }
        if self.circuit_breaker.failure_threshold == 0
            || self.circuit_breaker.success_threshold == 0
        {
            return Err(CoreError::Configuration(
                "circuit breaker thresholds must be positive".into(),
            ));
        }
        if self.dead_letter.retention_days <= 0 {
            return Err(CoreError::Configuration(
                "dead_letter.retention_days must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Dispatcher cadence and per-tick resource bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Milliseconds between dispatch ticks.
    pub tick_interval_ms: u64,
    /// Maximum tasks claimed per tick.
    pub batch_size: usize,
    /// Bounded concurrency: tasks in flight at once within a tick.
    pub worker_count: usize,
    /// Deadline for one downstream call, seconds.
    pub execution_timeout_seconds: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 5_000,
            batch_size: 10,
            worker_count: 4,
            execution_timeout_seconds: 30,
        }
    }
}

impl DispatcherConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn execution_timeout(&self) -> Duration {
        Duration::from_secs(self.execution_timeout_seconds)
    }
}

/// Exponential backoff shape in config-file units.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffSettings {
    pub base_seconds: u64,
    pub max_seconds: u64,
    pub multiplier: f64,
    pub jitter: bool,
}

impl Default for BackoffSettings {
    fn default() -> Self {
        // Task-level reschedule shape: minute-scale, capped at 30 minutes
        Self {
            base_seconds: 60,
            max_seconds: 30 * 60,
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl BackoffSettings {
    pub fn to_backoff(self) -> BackoffConfig {
        BackoffConfig {
            base: Duration::from_secs(self.base_seconds),
            max: Duration::from_secs(self.max_seconds),
            multiplier: self.multiplier,
            jitter: self.jitter,
        }
    }
}

/// Durable-queue policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Retry budget for a task unless the caller overrides it.
    pub default_max_attempts: i32,
    /// Backoff shape for rescheduling a failed task.
    pub reschedule_backoff: BackoffSettings,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            default_max_attempts: 5,
            reschedule_backoff: BackoffSettings::default(),
        }
    }
}

/// In-process retry-loop policy for a single downstream call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    pub jitter: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetrySettings {
    pub fn to_retry_config(&self) -> RetryConfig {
        RetryConfig::default()
            .with_max_retries(self.max_retries)
            .with_backoff(BackoffConfig {
                base: Duration::from_millis(self.base_delay_ms),
                max: Duration::from_millis(self.max_delay_ms),
                multiplier: self.multiplier,
                jitter: self.jitter,
            })
    }
}

/// Circuit breaker thresholds, with optional per-operation overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    /// Short OPEN→HALF_OPEN window, seconds.
    pub probe_timeout_seconds: u64,
    /// Long OPEN→HALF_OPEN window, seconds. Recovery triggers on whichever
    /// window elapses first; both are kept as named values on purpose.
    pub reset_timeout_seconds: u64,
    /// Per-operation-key overrides of the four fields above.
    pub overrides: HashMap<String, CircuitBreakerSettingsOverride>,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            probe_timeout_seconds: 30,
            reset_timeout_seconds: 300,
            overrides: HashMap::new(),
        }
    }
}

/// Partial override; unset fields fall back to the defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerSettingsOverride {
    pub failure_threshold: Option<u32>,
    pub success_threshold: Option<u32>,
    pub probe_timeout_seconds: Option<u64>,
    pub reset_timeout_seconds: Option<u64>,
}

impl CircuitBreakerSettings {
    pub fn to_config(&self) -> crate::resilience::CircuitBreakerConfig {
        crate::resilience::CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            success_threshold: self.success_threshold,
            probe_timeout: Duration::from_secs(self.probe_timeout_seconds),
            reset_timeout: Duration::from_secs(self.reset_timeout_seconds),
        }
    }

    /// Fully-resolved per-operation configs for the breaker manager.
    pub fn resolved_overrides(
        &self,
    ) -> HashMap<String, crate::resilience::CircuitBreakerConfig> {
        let base = self.to_config();
        self.overrides
            .iter()
            .map(|(op, o)| {
                (
                    op.clone(),
                    crate::resilience::CircuitBreakerConfig {
                        failure_threshold: o.failure_threshold.unwrap_or(base.failure_threshold),
                        success_threshold: o.success_threshold.unwrap_or(base.success_threshold),
                        probe_timeout: o
                            .probe_timeout_seconds
                            .map(Duration::from_secs)
                            .unwrap_or(base.probe_timeout),
                        reset_timeout: o
                            .reset_timeout_seconds
                            .map(Duration::from_secs)
                            .unwrap_or(base.reset_timeout),
                    },
                )
            })
            .collect()
    }
}

/// Per-operation dedup windows. The window should roughly bound the time a
/// human or system might legitimately double-submit the same action.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdempotencyConfig {
    pub default_window_seconds: u64,
    pub windows_seconds: HashMap<String, u64>,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        let mut windows_seconds = HashMap::new();
        windows_seconds.insert("booking".to_string(), 300);
        windows_seconds.insert("call".to_string(), 120);
        windows_seconds.insert("sms".to_string(), 60);
        windows_seconds.insert("reminder".to_string(), 60);
        windows_seconds.insert("lead_import".to_string(), 30);
        Self {
            default_window_seconds: 60,
            windows_seconds,
        }
    }
}

impl IdempotencyConfig {
    pub fn window_for(&self, operation: &str) -> chrono::Duration {
        let seconds = self
            .windows_seconds
            .get(operation)
            .copied()
            .unwrap_or(self.default_window_seconds);
        chrono::Duration::seconds(seconds as i64)
    }
}

/// DLQ alerting and retention.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeadLetterConfig {
    /// Operation types whose dead-lettering pages a human.
    pub critical_operations: Vec<String>,
    /// Resolved entries older than this are eligible for cleanup.
    pub retention_days: i64,
}

impl Default for DeadLetterConfig {
    fn default() -> Self {
        Self {
            critical_operations: vec![
                "booking".to_string(),
                "reminder".to_string(),
                "webhook_replay".to_string(),
            ],
            retention_days: 90,
        }
    }
}

impl DeadLetterConfig {
    pub fn is_critical(&self, operation_type: &str) -> bool {
        self.critical_operations
            .iter()
            .any(|op| op == operation_type)
    }
}

/// Webhook redelivery policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    pub max_attempts: i32,
    pub backoff: BackoffSettings,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: BackoffSettings {
                base_seconds: 5 * 60,
                max_seconds: 60 * 60,
                multiplier: 2.0,
                jitter: true,
            },
        }
    }
}
