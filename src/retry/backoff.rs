//! # Backoff
//!
//! Pure exponential delay computation:
//! `delay(attempt) = min(base * multiplier^(attempt-1), max)`, optionally
//! scaled by a uniform jitter factor in `[0.5, 1.0]` to break up synchronized
//! retry storms across tenants. Deterministic given a seeded RNG, which is
//! what makes it independently unit-testable.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Shape of an exponential backoff curve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Delay for the first retry.
    pub base: Duration,
    /// Upper bound on any computed delay.
    pub max: Duration,
    /// Growth factor per attempt.
    pub multiplier: f64,
    /// Scale each delay by a uniform factor in [0.5, 1.0].
    pub jitter: bool,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        // Generic in-process retry shape: 1s, 2s, 4s ... capped at 30s.
        Self {
            base: Duration::from_secs(1),
            max: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl BackoffConfig {
    /// Task-level reschedule shape: minute-scale, capped at 30 minutes.
    pub fn task_reschedule() -> Self {
        Self {
            base: Duration::from_secs(60),
            max: Duration::from_secs(30 * 60),
            multiplier: 2.0,
            jitter: true,
        }
    }

    /// Webhook replay shape: 5 minutes base, capped at 60 minutes.
    pub fn webhook_replay() -> Self {
        Self {
            base: Duration::from_secs(5 * 60),
            max: Duration::from_secs(60 * 60),
            multiplier: 2.0,
            jitter: true,
        }
    }

    /// Delay before retry number `attempt` (1-based; 0 is treated as 1).
    /// Jitter, when enabled, draws from the thread-local RNG.
    pub fn delay(&self, attempt: u32) -> Duration {
        if self.jitter {
            let mut rng = fastrand::Rng::new();
            self.delay_with_rng(attempt, &mut rng)
        } else {
            self.raw_delay(attempt)
        }
    }

    /// Jittered delay using the supplied RNG; seed it for determinism.
    pub fn delay_with_rng(&self, attempt: u32, rng: &mut fastrand::Rng) -> Duration {
        let raw = self.raw_delay(attempt);
        if self.jitter {
            let factor = 0.5 + rng.f64() * 0.5;
            raw.mul_f64(factor)
        } else {
            raw
        }
    }

    /// The un-jittered curve.
    pub fn raw_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.max(1) - 1;
        // powi saturates to inf for large exponents; min() brings it back
        let grown = self.base.as_secs_f64() * self.multiplier.powi(exponent as i32);
        let capped = grown.min(self.max.as_secs_f64());
        Duration::from_secs_f64(capped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn generic_curve_doubles_and_caps() {
        let cfg = BackoffConfig {
            jitter: false,
            ..Default::default()
        };
        assert_eq!(cfg.raw_delay(1), Duration::from_secs(1));
        assert_eq!(cfg.raw_delay(2), Duration::from_secs(2));
        assert_eq!(cfg.raw_delay(3), Duration::from_secs(4));
        assert_eq!(cfg.raw_delay(6), Duration::from_secs(30));
        assert_eq!(cfg.raw_delay(20), Duration::from_secs(30));
    }

    #[test]
    fn attempt_zero_is_treated_as_first_attempt() {
        let cfg = BackoffConfig::default();
        assert_eq!(cfg.raw_delay(0), cfg.raw_delay(1));
    }

    #[test]
    fn webhook_shape_matches_replay_policy() {
        let cfg = BackoffConfig::webhook_replay();
        assert_eq!(cfg.raw_delay(1), Duration::from_secs(300));
        assert_eq!(cfg.raw_delay(2), Duration::from_secs(600));
        assert_eq!(cfg.raw_delay(4), Duration::from_secs(2400));
        assert_eq!(cfg.raw_delay(5), Duration::from_secs(3600));
        assert_eq!(cfg.raw_delay(9), Duration::from_secs(3600));
    }

    #[test]
    fn jitter_is_deterministic_under_a_fixed_seed() {
        let cfg = BackoffConfig::default();
        let mut a = fastrand::Rng::with_seed(42);
        let mut b = fastrand::Rng::with_seed(42);
        for attempt in 1..=6 {
            assert_eq!(cfg.delay_with_rng(attempt, &mut a), cfg.delay_with_rng(attempt, &mut b));
        }
    }

    #[test]
    fn jitter_stays_within_half_to_full_range() {
        let cfg = BackoffConfig::default();
        let mut rng = fastrand::Rng::with_seed(7);
        for attempt in 1..=10 {
            let raw = cfg.raw_delay(attempt);
            let jittered = cfg.delay_with_rng(attempt, &mut rng);
            assert!(jittered >= raw.mul_f64(0.5));
            assert!(jittered <= raw);
        }
    }

    proptest! {
        #[test]
        fn monotone_and_capped(attempt in 1u32..64, base_ms in 1u64..10_000, cap_ms in 1u64..10_000_000) {
            let cfg = BackoffConfig {
                base: Duration::from_millis(base_ms),
                max: Duration::from_millis(cap_ms.max(base_ms)),
                multiplier: 2.0,
                jitter: false,
            };
            prop_assert!(cfg.raw_delay(attempt) <= cfg.raw_delay(attempt + 1));
            prop_assert!(cfg.raw_delay(attempt) <= cfg.max);
        }
    }
}
