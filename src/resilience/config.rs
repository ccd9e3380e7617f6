use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Thresholds and cooldowns for one circuit breaker.
///
/// Two independent OPEN→HALF_OPEN windows are kept on purpose:
/// `probe_timeout` (short) and `reset_timeout` (long). A recovery probe is
/// allowed once *either* has elapsed since the circuit opened, so observed
/// recovery latency depends on when the next call happens to arrive. The
/// source system defined both without stating which should win; they are
/// preserved as separate named values rather than silently unified.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures in CLOSED before the circuit opens.
    pub failure_threshold: u32,
    /// Consecutive successes in HALF_OPEN before the circuit closes.
    pub success_threshold: u32,
    /// Short recovery window.
    pub probe_timeout: Duration,
    /// Long recovery window.
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            probe_timeout: Duration::from_secs(30),
            reset_timeout: Duration::from_secs(300),
        }
    }
}

impl CircuitBreakerConfig {
    /// The window that actually gates recovery: whichever elapses first.
    pub fn effective_recovery_window(&self) -> Duration {
        self.probe_timeout.min(self.reset_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shorter_window_gates_recovery() {
        let config = CircuitBreakerConfig::default();
        assert_eq!(config.effective_recovery_window(), config.probe_timeout);

        let inverted = CircuitBreakerConfig {
            probe_timeout: Duration::from_secs(600),
            reset_timeout: Duration::from_secs(60),
            ..Default::default()
        };
        assert_eq!(
            inverted.effective_recovery_window(),
            Duration::from_secs(60)
        );
    }
}
