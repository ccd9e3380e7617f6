//! Postgres-backed store for multi-instance deployments.
//!
//! The claim uses a `FOR UPDATE SKIP LOCKED` subselect so concurrent
//! dispatcher processes select disjoint rows without any distributed lock.
//! Queries are runtime-checked (`sqlx::query_as` with bind parameters), which
//! keeps this crate buildable without a live database.
//!
//! Expected schema (managed by the host application's migrations):
//!
//! ```sql
//! CREATE TABLE outreach_tasks (
//!   id UUID PRIMARY KEY,
//!   tenant_id TEXT NOT NULL,
//!   subject_key TEXT NOT NULL,
//!   task_type TEXT NOT NULL,
//!   payload JSONB NOT NULL,
//!   priority INT NOT NULL,
//!   scheduled_for TIMESTAMPTZ NOT NULL,
//!   status TEXT NOT NULL,
//!   attempt_count INT NOT NULL,
//!   max_attempts INT NOT NULL,
//!   error_history JSONB NOT NULL DEFAULT '[]',
//!   created_at TIMESTAMPTZ NOT NULL,
//!   updated_at TIMESTAMPTZ NOT NULL
//! );
//! CREATE INDEX ON outreach_tasks (status, scheduled_for, priority);
//! CREATE INDEX ON outreach_tasks (tenant_id, subject_key, status);
//!
//! CREATE TABLE outreach_dead_letters (
//!   id UUID PRIMARY KEY,
//!   task_id UUID NOT NULL,
//!   tenant_id TEXT NOT NULL,
//!   subject_key TEXT NOT NULL,
//!   operation_type TEXT NOT NULL,
//!   payload JSONB NOT NULL,
//!   error_history JSONB NOT NULL DEFAULT '[]',
//!   failure_reason TEXT NOT NULL,
//!   attempt_count INT NOT NULL,
//!   max_attempts INT NOT NULL,
//!   created_at TIMESTAMPTZ NOT NULL,
//!   resolved_at TIMESTAMPTZ,
//!   resolution_notes TEXT
//! );
//!
//! CREATE TABLE outreach_idempotency_records (
//!   tenant_id TEXT NOT NULL,
//!   request_key TEXT NOT NULL,
//!   created_at TIMESTAMPTZ NOT NULL,
//!   PRIMARY KEY (tenant_id, request_key)
//! );
//!
//! CREATE TABLE outreach_circuit_states (
//!   operation TEXT PRIMARY KEY,
//!   state TEXT NOT NULL,
//!   failure_count BIGINT NOT NULL,
//!   success_count BIGINT NOT NULL,
//!   opened_at TIMESTAMPTZ,
//!   updated_at TIMESTAMPTZ NOT NULL
//! );
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::StorageError;
use crate::models::{
    AttemptError, CircuitStateRecord, DeadLetterEntry, DeadLetterFilter, IdempotencyRecord, Task,
    TaskStatus, TaskType,
};
use crate::storage::{CircuitStateStore, DeadLetterStore, IdempotencyStore, TaskStore};

const TASK_COLUMNS: &str = "id, tenant_id, subject_key, task_type, payload, priority, \
     scheduled_for, status, attempt_count, max_attempts, error_history, created_at, updated_at";

const DLQ_COLUMNS: &str = "id, task_id, tenant_id, subject_key, operation_type, payload, \
     error_history, failure_reason, attempt_count, max_attempts, created_at, resolved_at, \
     resolution_notes";

/// Store implementation over a shared `PgPool`.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[derive(sqlx::FromRow)]
struct TaskRow {
    id: Uuid,
    tenant_id: String,
    subject_key: String,
    task_type: String,
    payload: serde_json::Value,
    priority: i32,
    scheduled_for: DateTime<Utc>,
    status: String,
    attempt_count: i32,
    max_attempts: i32,
    error_history: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TaskRow {
    fn into_task(self) -> Result<Task, StorageError> {
        let task_type: TaskType = self
            .task_type
            .parse()
            .map_err(StorageError::Serialization)?;
        let status = parse_status(&self.status)?;
        let error_history: Vec<AttemptError> = serde_json::from_value(self.error_history)?;
        Ok(Task {
            id: self.id,
            tenant_id: self.tenant_id,
            subject_key: self.subject_key,
            task_type,
            payload: self.payload,
            priority: self.priority,
            scheduled_for: self.scheduled_for,
            status,
            attempt_count: self.attempt_count,
            max_attempts: self.max_attempts,
            error_history,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

fn parse_status(s: &str) -> Result<TaskStatus, StorageError> {
    match s {
        "pending" => Ok(TaskStatus::Pending),
        "processing" => Ok(TaskStatus::Processing),
        "completed" => Ok(TaskStatus::Completed),
        "failed" => Ok(TaskStatus::Failed),
        "cancelled" => Ok(TaskStatus::Cancelled),
        other => Err(StorageError::Serialization(format!(
            "unknown task status: {other}"
        ))),
    }
}

fn history_json(history: &[AttemptError]) -> Result<serde_json::Value, StorageError> {
    serde_json::to_value(history).map_err(Into::into)
}

#[async_trait]
impl TaskStore for PostgresStore {
    async fn insert(&self, task: Task) -> Result<(), StorageError> {
        let query = format!(
            "INSERT INTO outreach_tasks ({TASK_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)"
        );
        sqlx::query(&query)
            .bind(task.id)
            .bind(&task.tenant_id)
            .bind(&task.subject_key)
            .bind(task.task_type.as_str())
            .bind(&task.payload)
            .bind(task.priority)
            .bind(task.scheduled_for)
            .bind(task.status.as_str())
            .bind(task.attempt_count)
            .bind(task.max_attempts)
            .bind(history_json(&task.error_history)?)
            .bind(task.created_at)
            .bind(task.updated_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Task>, StorageError> {
        let query = format!("SELECT {TASK_COLUMNS} FROM outreach_tasks WHERE id = $1");
        let row = sqlx::query_as::<_, TaskRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(TaskRow::into_task).transpose()
    }

    async fn claim_due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Task>, StorageError> {
        let query = format!(
            "UPDATE outreach_tasks SET status = 'processing', updated_at = $1 \
             WHERE id IN ( \
                 SELECT id FROM outreach_tasks \
                 WHERE status = 'pending' AND scheduled_for <= $1 \
                 ORDER BY priority ASC, scheduled_for ASC \
                 LIMIT $2 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING {TASK_COLUMNS}"
        );
        let rows = sqlx::query_as::<_, TaskRow>(&query)
            .bind(now)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(TaskRow::into_task).collect()
    }

    async fn mark_completed(&self, id: Uuid) -> Result<Option<Task>, StorageError> {
        let query = format!(
            "UPDATE outreach_tasks \
             SET status = 'completed', updated_at = NOW() \
             WHERE id = $1 AND status <> 'completed' \
             RETURNING {TASK_COLUMNS}"
        );
        let row = sqlx::query_as::<_, TaskRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(row.into_task()?)),
            // Conditional update matched nothing: either missing or already
            // completed. Re-read to keep completion idempotent.
            None => TaskStore::get(self, id).await,
        }
    }

    async fn reschedule(
        &self,
        id: Uuid,
        next_run: DateTime<Utc>,
        error: AttemptError,
    ) -> Result<Option<Task>, StorageError> {
        let query = format!(
            "UPDATE outreach_tasks \
             SET attempt_count = attempt_count + 1, \
                 error_history = error_history || $2::jsonb, \
                 scheduled_for = $3, status = 'pending', updated_at = NOW() \
             WHERE id = $1 AND status = 'processing' \
             RETURNING {TASK_COLUMNS}"
        );
        let row = sqlx::query_as::<_, TaskRow>(&query)
            .bind(id)
            .bind(serde_json::to_value(vec![error])?)
            .bind(next_run)
            .fetch_optional(&self.pool)
            .await?;
        row.map(TaskRow::into_task).transpose()
    }

    async fn release(
        &self,
        id: Uuid,
        next_run: DateTime<Utc>,
    ) -> Result<Option<Task>, StorageError> {
        let query = format!(
            "UPDATE outreach_tasks \
             SET scheduled_for = $2, status = 'pending', updated_at = NOW() \
             WHERE id = $1 AND status = 'processing' \
             RETURNING {TASK_COLUMNS}"
        );
        let row = sqlx::query_as::<_, TaskRow>(&query)
            .bind(id)
            .bind(next_run)
            .fetch_optional(&self.pool)
            .await?;
        row.map(TaskRow::into_task).transpose()
    }

    async fn mark_failed(
        &self,
        id: Uuid,
        error: AttemptError,
    ) -> Result<Option<Task>, StorageError> {
        let query = format!(
            "UPDATE outreach_tasks \
             SET error_history = error_history || $2::jsonb, \
                 status = 'failed', updated_at = NOW() \
             WHERE id = $1 AND status = 'processing' \
             RETURNING {TASK_COLUMNS}"
        );
        let row = sqlx::query_as::<_, TaskRow>(&query)
            .bind(id)
            .bind(serde_json::to_value(vec![error])?)
            .fetch_optional(&self.pool)
            .await?;
        row.map(TaskRow::into_task).transpose()
    }

    async fn cancel_pending(
        &self,
        tenant_id: &str,
        subject_key: &str,
    ) -> Result<u64, StorageError> {
        let result = sqlx::query(
            "UPDATE outreach_tasks SET status = 'cancelled', updated_at = NOW() \
             WHERE tenant_id = $1 AND subject_key = $2 AND status = 'pending'",
        )
        .bind(tenant_id)
        .bind(subject_key)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn cancel(&self, id: Uuid) -> Result<Option<Task>, StorageError> {
        let query = format!(
            "UPDATE outreach_tasks SET status = 'cancelled', updated_at = NOW() \
             WHERE id = $1 AND status IN ('pending', 'processing') \
             RETURNING {TASK_COLUMNS}"
        );
        let row = sqlx::query_as::<_, TaskRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(row.into_task()?)),
            None => TaskStore::get(self, id).await,
        }
    }

    async fn pending_for_subject(
        &self,
        tenant_id: &str,
        subject_key: &str,
    ) -> Result<Vec<Task>, StorageError> {
        let query = format!(
            "SELECT {TASK_COLUMNS} FROM outreach_tasks \
             WHERE tenant_id = $1 AND subject_key = $2 AND status = 'pending' \
             ORDER BY scheduled_for ASC"
        );
        let rows = sqlx::query_as::<_, TaskRow>(&query)
            .bind(tenant_id)
            .bind(subject_key)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(TaskRow::into_task).collect()
    }
}

#[derive(sqlx::FromRow)]
struct DeadLetterRow {
    id: Uuid,
    task_id: Uuid,
    tenant_id: String,
    subject_key: String,
    operation_type: String,
    payload: serde_json::Value,
    error_history: serde_json::Value,
    failure_reason: String,
    attempt_count: i32,
    max_attempts: i32,
    created_at: DateTime<Utc>,
    resolved_at: Option<DateTime<Utc>>,
    resolution_notes: Option<String>,
}

impl DeadLetterRow {
    fn into_entry(self) -> Result<DeadLetterEntry, StorageError> {
        let error_history: Vec<AttemptError> = serde_json::from_value(self.error_history)?;
        Ok(DeadLetterEntry {
            id: self.id,
            task_id: self.task_id,
            tenant_id: self.tenant_id,
            subject_key: self.subject_key,
            operation_type: self.operation_type,
            payload: self.payload,
            error_history,
            failure_reason: self.failure_reason,
            attempt_count: self.attempt_count,
            max_attempts: self.max_attempts,
            created_at: self.created_at,
            resolved_at: self.resolved_at,
            resolution_notes: self.resolution_notes,
        })
    }
}

#[async_trait]
impl DeadLetterStore for PostgresStore {
    async fn insert(&self, entry: DeadLetterEntry) -> Result<(), StorageError> {
        let query = format!(
            "INSERT INTO outreach_dead_letters ({DLQ_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)"
        );
        sqlx::query(&query)
            .bind(entry.id)
            .bind(entry.task_id)
            .bind(&entry.tenant_id)
            .bind(&entry.subject_key)
            .bind(&entry.operation_type)
            .bind(&entry.payload)
            .bind(history_json(&entry.error_history)?)
            .bind(&entry.failure_reason)
            .bind(entry.attempt_count)
            .bind(entry.max_attempts)
            .bind(entry.created_at)
            .bind(entry.resolved_at)
            .bind(&entry.resolution_notes)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<DeadLetterEntry>, StorageError> {
        let query = format!("SELECT {DLQ_COLUMNS} FROM outreach_dead_letters WHERE id = $1");
        let row = sqlx::query_as::<_, DeadLetterRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(DeadLetterRow::into_entry).transpose()
    }

    async fn update(&self, entry: &DeadLetterEntry) -> Result<(), StorageError> {
        sqlx::query(
            "UPDATE outreach_dead_letters \
             SET error_history = $2, resolved_at = $3, resolution_notes = $4 \
             WHERE id = $1",
        )
        .bind(entry.id)
        .bind(history_json(&entry.error_history)?)
        .bind(entry.resolved_at)
        .bind(&entry.resolution_notes)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list(&self, filter: &DeadLetterFilter) -> Result<Vec<DeadLetterEntry>, StorageError> {
        let query = format!(
            "SELECT {DLQ_COLUMNS} FROM outreach_dead_letters \
             WHERE ($1::text IS NULL OR tenant_id = $1) \
               AND ($2::text IS NULL OR operation_type = $2) \
               AND ($3::bool IS NULL OR (resolved_at IS NOT NULL) = $3) \
             ORDER BY created_at DESC \
             OFFSET $4 LIMIT $5"
        );
        let rows = sqlx::query_as::<_, DeadLetterRow>(&query)
            .bind(&filter.tenant_id)
            .bind(&filter.operation_type)
            .bind(filter.resolved)
            .bind(filter.offset as i64)
            .bind(filter.effective_limit() as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(DeadLetterRow::into_entry).collect()
    }

    async fn delete_resolved_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StorageError> {
        let result = sqlx::query(
            "DELETE FROM outreach_dead_letters \
             WHERE resolved_at IS NOT NULL AND resolved_at < $1",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[derive(sqlx::FromRow)]
struct IdempotencyRow {
    tenant_id: String,
    request_key: String,
    created_at: DateTime<Utc>,
}

#[async_trait]
impl IdempotencyStore for PostgresStore {
    async fn find(
        &self,
        tenant_id: &str,
        request_key: &str,
    ) -> Result<Option<IdempotencyRecord>, StorageError> {
        let row = sqlx::query_as::<_, IdempotencyRow>(
            "SELECT tenant_id, request_key, created_at \
             FROM outreach_idempotency_records \
             WHERE tenant_id = $1 AND request_key = $2",
        )
        .bind(tenant_id)
        .bind(request_key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| IdempotencyRecord {
            tenant_id: r.tenant_id,
            request_key: r.request_key,
            created_at: r.created_at,
        }))
    }

    async fn upsert(
        &self,
        tenant_id: &str,
        request_key: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO outreach_idempotency_records (tenant_id, request_key, created_at) \
             VALUES ($1, $2, $3) \
             ON CONFLICT (tenant_id, request_key) DO UPDATE SET created_at = EXCLUDED.created_at",
        )
        .bind(tenant_id)
        .bind(request_key)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct CircuitRow {
    operation: String,
    state: String,
    failure_count: i64,
    success_count: i64,
    opened_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

impl From<CircuitRow> for CircuitStateRecord {
    fn from(row: CircuitRow) -> Self {
        CircuitStateRecord {
            operation: row.operation,
            state: row.state,
            failure_count: row.failure_count.max(0) as u64,
            success_count: row.success_count.max(0) as u64,
            opened_at: row.opened_at,
            updated_at: row.updated_at,
        }
    }
}

#[async_trait]
impl CircuitStateStore for PostgresStore {
    async fn save(&self, record: &CircuitStateRecord) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO outreach_circuit_states \
                 (operation, state, failure_count, success_count, opened_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (operation) DO UPDATE SET \
                 state = EXCLUDED.state, \
                 failure_count = EXCLUDED.failure_count, \
                 success_count = EXCLUDED.success_count, \
                 opened_at = EXCLUDED.opened_at, \
                 updated_at = EXCLUDED.updated_at",
        )
        .bind(&record.operation)
        .bind(&record.state)
        .bind(record.failure_count as i64)
        .bind(record.success_count as i64)
        .bind(record.opened_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load(&self, operation: &str) -> Result<Option<CircuitStateRecord>, StorageError> {
        let row = sqlx::query_as::<_, CircuitRow>(
            "SELECT operation, state, failure_count, success_count, opened_at, updated_at \
             FROM outreach_circuit_states WHERE operation = $1",
        )
        .bind(operation)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn load_all(&self) -> Result<Vec<CircuitStateRecord>, StorageError> {
        let rows = sqlx::query_as::<_, CircuitRow>(
            "SELECT operation, state, failure_count, success_count, opened_at, updated_at \
             FROM outreach_circuit_states ORDER BY operation",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }
}
