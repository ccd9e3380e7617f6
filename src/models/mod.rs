//! # Data Model Layer
//!
//! Owned records persisted by the delivery core: durable [`task::Task`]s,
//! terminal [`dead_letter::DeadLetterEntry`]s, time-windowed
//! [`idempotency::IdempotencyRecord`]s and per-operation
//! [`circuit::CircuitStateRecord`] snapshots.
//!
//! Models are plain serde structs mutated only through the transitions the
//! owning component defines; the storage layer never invents state.

pub mod circuit;
pub mod dead_letter;
pub mod idempotency;
pub mod task;

pub use circuit::CircuitStateRecord;
pub use dead_letter::{AttemptError, DeadLetterEntry, DeadLetterFilter};
pub use idempotency::IdempotencyRecord;
pub use task::{NewTask, Task, TaskPriority, TaskStatus, TaskType};
