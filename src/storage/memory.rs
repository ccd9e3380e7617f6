//! In-memory store: the single-instance default used by tests, local runs
//! and deployments that do not need horizontal dispatcher scaling.
//!
//! All task mutations for one store go through a single `RwLock` write guard,
//! which is what makes `claim_due` atomic here: the select-and-flip happens
//! under one exclusive lock, so concurrent claimers see disjoint sets.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::StorageError;
use crate::models::{
    AttemptError, CircuitStateRecord, DeadLetterEntry, DeadLetterFilter, IdempotencyRecord, Task,
    TaskStatus,
};
use crate::storage::{CircuitStateStore, DeadLetterStore, IdempotencyStore, TaskStore};

/// Shared in-memory backing for every store trait.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tasks: RwLock<HashMap<Uuid, Task>>,
    dead_letters: RwLock<HashMap<Uuid, DeadLetterEntry>>,
    idempotency: RwLock<HashMap<(String, String), IdempotencyRecord>>,
    circuits: RwLock<HashMap<String, CircuitStateRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every task, unordered. Test and diagnostics helper.
    pub fn all_tasks(&self) -> Vec<Task> {
        self.tasks.read().values().cloned().collect()
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn insert(&self, task: Task) -> Result<(), StorageError> {
        self.tasks.write().insert(task.id, task);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Task>, StorageError> {
        Ok(self.tasks.read().get(&id).cloned())
    }

    async fn claim_due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Task>, StorageError> {
        let mut tasks = self.tasks.write();

        let mut due: Vec<Uuid> = tasks
            .values()
            .filter(|t| t.status == TaskStatus::Pending && t.scheduled_for <= now)
            .map(|t| t.id)
            .collect();
        due.sort_by_key(|id| {
            let t = &tasks[id];
            (t.priority, t.scheduled_for, t.id)
        });
        due.truncate(limit);

        let mut claimed = Vec::with_capacity(due.len());
        for id in due {
            if let Some(task) = tasks.get_mut(&id) {
                task.status = TaskStatus::Processing;
                task.updated_at = now;
                claimed.push(task.clone());
            }
        }
        Ok(claimed)
    }

    async fn mark_completed(&self, id: Uuid) -> Result<Option<Task>, StorageError> {
        let mut tasks = self.tasks.write();
        Ok(tasks.get_mut(&id).map(|task| {
            if task.status != TaskStatus::Completed {
                task.status = TaskStatus::Completed;
                task.updated_at = Utc::now();
            }
            task.clone()
        }))
    }

    async fn reschedule(
        &self,
        id: Uuid,
        next_run: DateTime<Utc>,
        error: AttemptError,
    ) -> Result<Option<Task>, StorageError> {
        let mut tasks = self.tasks.write();
        Ok(tasks
            .get_mut(&id)
            .filter(|task| task.status == TaskStatus::Processing)
            .map(|task| {
                task.attempt_count += 1;
                task.error_history.push(error);
                task.scheduled_for = next_run;
                task.status = TaskStatus::Pending;
                task.updated_at = Utc::now();
                task.clone()
            }))
    }

    async fn release(
        &self,
        id: Uuid,
        next_run: DateTime<Utc>,
    ) -> Result<Option<Task>, StorageError> {
        let mut tasks = self.tasks.write();
        Ok(tasks
            .get_mut(&id)
            .filter(|task| task.status == TaskStatus::Processing)
            .map(|task| {
                task.scheduled_for = next_run;
                task.status = TaskStatus::Pending;
                task.updated_at = Utc::now();
                task.clone()
            }))
    }

    async fn mark_failed(
        &self,
        id: Uuid,
        error: AttemptError,
    ) -> Result<Option<Task>, StorageError> {
        let mut tasks = self.tasks.write();
        Ok(tasks
            .get_mut(&id)
            .filter(|task| task.status == TaskStatus::Processing)
            .map(|task| {
                task.error_history.push(error);
                task.status = TaskStatus::Failed;
                task.updated_at = Utc::now();
                task.clone()
            }))
    }

    async fn cancel_pending(
        &self,
        tenant_id: &str,
        subject_key: &str,
    ) -> Result<u64, StorageError> {
        let mut tasks = self.tasks.write();
        let mut cancelled = 0;
        for task in tasks.values_mut() {
            if task.status == TaskStatus::Pending
                && task.tenant_id == tenant_id
                && task.subject_key == subject_key
            {
                task.status = TaskStatus::Cancelled;
                task.updated_at = Utc::now();
                cancelled += 1;
            }
        }
        Ok(cancelled)
    }

    async fn cancel(&self, id: Uuid) -> Result<Option<Task>, StorageError> {
        let mut tasks = self.tasks.write();
        Ok(tasks.get_mut(&id).map(|task| {
            if !task.status.is_terminal() {
                task.status = TaskStatus::Cancelled;
                task.updated_at = Utc::now();
            }
            task.clone()
        }))
    }

    async fn pending_for_subject(
        &self,
        tenant_id: &str,
        subject_key: &str,
    ) -> Result<Vec<Task>, StorageError> {
        Ok(self
            .tasks
            .read()
            .values()
            .filter(|t| {
                t.status == TaskStatus::Pending
                    && t.tenant_id == tenant_id
                    && t.subject_key == subject_key
            })
            .cloned()
            .collect())
    }
}

#[async_trait]
impl DeadLetterStore for MemoryStore {
    async fn insert(&self, entry: DeadLetterEntry) -> Result<(), StorageError> {
        self.dead_letters.write().insert(entry.id, entry);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<DeadLetterEntry>, StorageError> {
        Ok(self.dead_letters.read().get(&id).cloned())
    }

    async fn update(&self, entry: &DeadLetterEntry) -> Result<(), StorageError> {
        self.dead_letters.write().insert(entry.id, entry.clone());
        Ok(())
    }

    async fn list(&self, filter: &DeadLetterFilter) -> Result<Vec<DeadLetterEntry>, StorageError> {
        let entries = self.dead_letters.read();
        let mut matching: Vec<DeadLetterEntry> = entries
            .values()
            .filter(|e| {
                filter
                    .tenant_id
                    .as_deref()
                    .is_none_or(|t| e.tenant_id == t)
                    && filter
                        .operation_type
                        .as_deref()
                        .is_none_or(|op| e.operation_type == op)
                    && filter.resolved.is_none_or(|r| e.is_resolved() == r)
            })
            .cloned()
            .collect();
        matching.sort_by_key(|e| std::cmp::Reverse(e.created_at));
        Ok(matching
            .into_iter()
            .skip(filter.offset)
            .take(filter.effective_limit())
            .collect())
    }

    async fn delete_resolved_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StorageError> {
        let mut entries = self.dead_letters.write();
        let before = entries.len();
        entries.retain(|_, e| !matches!(e.resolved_at, Some(at) if at < cutoff));
        Ok((before - entries.len()) as u64)
    }
}

#[async_trait]
impl IdempotencyStore for MemoryStore {
    async fn find(
        &self,
        tenant_id: &str,
        request_key: &str,
    ) -> Result<Option<IdempotencyRecord>, StorageError> {
        Ok(self
            .idempotency
            .read()
            .get(&(tenant_id.to_string(), request_key.to_string()))
            .cloned())
    }

    async fn upsert(
        &self,
        tenant_id: &str,
        request_key: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        self.idempotency.write().insert(
            (tenant_id.to_string(), request_key.to_string()),
            IdempotencyRecord {
                tenant_id: tenant_id.to_string(),
                request_key: request_key.to_string(),
                created_at: at,
            },
        );
        Ok(())
    }
}

#[async_trait]
impl CircuitStateStore for MemoryStore {
    async fn save(&self, record: &CircuitStateRecord) -> Result<(), StorageError> {
        self.circuits
            .write()
            .insert(record.operation.clone(), record.clone());
        Ok(())
    }

    async fn load(&self, operation: &str) -> Result<Option<CircuitStateRecord>, StorageError> {
        Ok(self.circuits.read().get(operation).cloned())
    }

    async fn load_all(&self) -> Result<Vec<CircuitStateRecord>, StorageError> {
        Ok(self.circuits.read().values().cloned().collect())
    }
}
