//! # Durable Priority Queue & Dispatcher
//!
//! [`task_queue::PriorityTaskQueue`] owns the durable schedule of deferred
//! work and every task state transition; [`dispatcher::Dispatcher`] is the
//! periodic worker that claims due batches and pushes each task through the
//! idempotency → circuit breaker → retry pipeline.

pub mod dispatcher;
pub mod task_queue;

pub use dispatcher::{
    AllowAllGuard, DispatchGuard, Dispatcher, GuardVerdict, OutboundExecutor, TaskExecutor,
    TickSummary,
};
pub use task_queue::{FailOutcome, PriorityTaskQueue, QueuePolicy};
