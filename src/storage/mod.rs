//! # Storage Layer
//!
//! Trait seams over the durable store so the delivery core runs identically
//! against the in-memory single-instance default and a transactional database.
//! The only mutual-exclusion point the core requires is the atomic
//! pending→processing claim in [`TaskStore::claim_due`]; everything else is
//! plain conditional updates.
//!
//! Storage failures surface to the caller (see [`crate::error`]); the
//! idempotency guard is the one component that deliberately fails open.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StorageError;
use crate::models::{
    AttemptError, CircuitStateRecord, DeadLetterEntry, DeadLetterFilter, IdempotencyRecord, Task,
};

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

/// Durable task schedule. Tasks are never deleted, only terminal-stated.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn insert(&self, task: Task) -> Result<(), StorageError>;

    async fn get(&self, id: Uuid) -> Result<Option<Task>, StorageError>;

    /// Atomically claim up to `limit` due pending tasks, transitioning each to
    /// `processing`. Ordering: priority rank ascending, then `scheduled_for`
    /// ascending (FIFO within a priority band). Two concurrent callers must
    /// never receive the same task; a lost race yields fewer rows, which is
    /// not an error.
    async fn claim_due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Task>, StorageError>;

    /// processing→completed. Returns the task; completing an
    /// already-completed task is a no-op.
    async fn mark_completed(&self, id: Uuid) -> Result<Option<Task>, StorageError>;

    /// Record a failed attempt and put the task back on the schedule:
    /// attempt_count+1, append to error history, status→pending. Applies
    /// only while the task is `processing`; `None` means the task is missing
    /// or has already left that state (cancelled mid-flight, for instance)
    /// and nothing was changed.
    async fn reschedule(
        &self,
        id: Uuid,
        next_run: DateTime<Utc>,
        error: AttemptError,
    ) -> Result<Option<Task>, StorageError>;

    /// Return a claimed task to `pending` without consuming an attempt
    /// (used when the circuit was open and no downstream call was made).
    /// Conditional on `processing` like [`TaskStore::reschedule`].
    async fn release(&self, id: Uuid, next_run: DateTime<Utc>)
        -> Result<Option<Task>, StorageError>;

    /// Terminal failure: append the final error and set status→failed.
    /// Conditional on `processing` like [`TaskStore::reschedule`].
    async fn mark_failed(
        &self,
        id: Uuid,
        error: AttemptError,
    ) -> Result<Option<Task>, StorageError>;

    /// Bulk pending→cancelled for every task of the (tenant, subject) pair,
    /// regardless of task type. Returns the number of tasks cancelled.
    async fn cancel_pending(
        &self,
        tenant_id: &str,
        subject_key: &str,
    ) -> Result<u64, StorageError>;

    /// Single-task pending/processing→cancelled, used by the dispatch-time
    /// guard re-check. No-op when the task is already terminal.
    async fn cancel(&self, id: Uuid) -> Result<Option<Task>, StorageError>;

    /// Pending tasks for one (tenant, subject) pair, any type.
    async fn pending_for_subject(
        &self,
        tenant_id: &str,
        subject_key: &str,
    ) -> Result<Vec<Task>, StorageError>;
}

/// Terminal store for exhausted work.
#[async_trait]
pub trait DeadLetterStore: Send + Sync {
    async fn insert(&self, entry: DeadLetterEntry) -> Result<(), StorageError>;

    async fn get(&self, id: Uuid) -> Result<Option<DeadLetterEntry>, StorageError>;

    async fn update(&self, entry: &DeadLetterEntry) -> Result<(), StorageError>;

    async fn list(&self, filter: &DeadLetterFilter) -> Result<Vec<DeadLetterEntry>, StorageError>;

    /// Delete entries resolved before the cutoff. Unresolved entries are
    /// retained indefinitely. Returns the number deleted.
    async fn delete_resolved_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StorageError>;
}

/// Time-windowed duplicate-detection records.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    async fn find(
        &self,
        tenant_id: &str,
        request_key: &str,
    ) -> Result<Option<IdempotencyRecord>, StorageError>;

    async fn upsert(
        &self,
        tenant_id: &str,
        request_key: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError>;
}

/// Best-effort circuit state snapshots, keyed by operation name.
#[async_trait]
pub trait CircuitStateStore: Send + Sync {
    async fn save(&self, record: &CircuitStateRecord) -> Result<(), StorageError>;

    async fn load(&self, operation: &str) -> Result<Option<CircuitStateRecord>, StorageError>;

    async fn load_all(&self) -> Result<Vec<CircuitStateRecord>, StorageError>;
}
