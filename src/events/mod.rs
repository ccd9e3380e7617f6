//! # Domain Events
//!
//! State machines emit named events instead of calling the alert sink
//! directly; the [`notifier::AlertNotifier`] subscribes and decides what
//! reaches a human. Publishing is fire-and-forget relative to every state
//! transition: a missing subscriber or a failing alert sender never changes
//! circuit, task or DLQ state.

pub mod notifier;
pub mod publisher;

pub use notifier::AlertNotifier;
pub use publisher::{EventPublisher, PublishedEvent};

/// Circuit breaker tripped CLOSED→OPEN for an operation key.
pub const CIRCUIT_OPENED: &str = "circuit_breaker.opened";
/// A durable task exhausted its retry budget and was dead-lettered.
pub const TASK_EXHAUSTED: &str = "task.exhausted";
/// A dead-letter entry was created for a critical operation type.
pub const DLQ_CRITICAL_ENTRY: &str = "dlq.critical_entry";
/// A webhook replay task ran out of redelivery attempts.
pub const WEBHOOK_REPLAY_EXHAUSTED: &str = "webhook.replay_exhausted";
