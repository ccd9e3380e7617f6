//! # Resilience Module
//!
//! Per-dependency health gates that stop calling a failing provider for a
//! cooldown period. One [`CircuitBreaker`] per operation key, created lazily
//! by the [`CircuitBreakerManager`]; breaker state is process-local with
//! best-effort snapshots to the shared store so other dispatcher instances
//! can observe health.
//!
//! Note the dual recovery windows in [`CircuitBreakerConfig`]: the source
//! system defined both a short probe timeout and a longer reset timeout, and
//! recovery triggers on whichever elapses first. Both are preserved as named
//! configuration; see the config docs for the resulting latency race.

pub mod circuit_breaker;
pub mod config;
pub mod manager;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerError, CircuitState};
pub use config::CircuitBreakerConfig;
pub use manager::CircuitBreakerManager;
