//! # Priority Task Queue
//!
//! Durable, claimable, prioritized schedule of future work. All task state
//! transitions go through here:
//!
//! ```text
//! pending ──claim──▶ processing ──complete──▶ completed
//!    ▲                   │
//!    │  retryable fail   │  exhausted / non-retryable fail
//!    └───(backoff)───────┴──▶ failed ──▶ DeadLetterSink
//!
//! pending ──cancel_pending──▶ cancelled
//! ```
//!
//! Claim races between dispatcher instances are silent (the loser just gets
//! fewer rows); storage errors on any transition are fatal to the caller.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::dlq::DeadLetterSink;
use crate::error::{CoreError, ExecutionError, Result};
use crate::events::{EventPublisher, TASK_EXHAUSTED, WEBHOOK_REPLAY_EXHAUSTED};
use crate::models::{AttemptError, NewTask, Task, TaskStatus, TaskType};
use crate::retry::BackoffConfig;
use crate::storage::TaskStore;

/// Retry budget and reschedule shapes, resolved from configuration.
#[derive(Debug, Clone)]
pub struct QueuePolicy {
    pub default_max_attempts: i32,
    /// Reschedule shape for most task types.
    pub reschedule_backoff: BackoffConfig,
    /// Webhook replays back off on a longer, minutes-scale curve.
    pub webhook_backoff: BackoffConfig,
}

impl Default for QueuePolicy {
    fn default() -> Self {
        Self {
            default_max_attempts: 5,
            reschedule_backoff: BackoffConfig::task_reschedule(),
            webhook_backoff: BackoffConfig::webhook_replay(),
        }
    }
}

impl QueuePolicy {
    fn backoff_for(&self, task_type: TaskType) -> &BackoffConfig {
        match task_type {
            TaskType::WebhookReplay => &self.webhook_backoff,
            _ => &self.reschedule_backoff,
        }
    }
}

/// What `fail` decided to do with the task.
#[derive(Debug, Clone, PartialEq)]
pub enum FailOutcome {
    /// Transient failure with budget left: back on the schedule.
    Rescheduled { next_run: DateTime<Utc> },
    /// Retries exhausted or non-retryable: terminal, dead-lettered.
    DeadLettered { dlq_id: Uuid },
    /// The task left `processing` before the failure landed (cancelled
    /// mid-flight). Nothing was changed; the existing state stands.
    Superseded,
}

pub struct PriorityTaskQueue {
    store: Arc<dyn TaskStore>,
    dlq: Arc<DeadLetterSink>,
    publisher: EventPublisher,
    policy: QueuePolicy,
}

impl PriorityTaskQueue {
    pub fn new(
        store: Arc<dyn TaskStore>,
        dlq: Arc<DeadLetterSink>,
        publisher: EventPublisher,
        policy: QueuePolicy,
    ) -> Self {
        Self {
            store,
            dlq,
            publisher,
            policy,
        }
    }

    /// Persist a new task. `scheduled_for` defaults to now, the retry budget
    /// to the configured default.
    #[instrument(skip(self, new_task), fields(tenant_id = %new_task.tenant_id, task_type = new_task.task_type.as_str()))]
    pub async fn enqueue(&self, new_task: NewTask) -> Result<Task> {
        let now = Utc::now();
        let task = Task {
            id: Uuid::new_v4(),
            tenant_id: new_task.tenant_id,
            subject_key: new_task.subject_key,
            task_type: new_task.task_type,
            payload: new_task.payload,
            priority: new_task.priority.rank(),
            scheduled_for: new_task.scheduled_for.unwrap_or(now),
            status: TaskStatus::Pending,
            attempt_count: 0,
            max_attempts: new_task
                .max_attempts
                .unwrap_or(self.policy.default_max_attempts),
            error_history: Vec::new(),
            created_at: now,
            updated_at: now,
        };

        self.store.insert(task.clone()).await?;
        debug!(
            task_id = %task.id,
            priority = task.priority,
            scheduled_for = %task.scheduled_for,
            "task enqueued"
        );
        Ok(task)
    }

    /// Claim up to `limit` due tasks, atomically flipping each to
    /// `processing`. Ordering and race semantics live in the store.
    pub async fn claim_due(&self, limit: usize) -> Result<Vec<Task>> {
        let claimed = self.store.claim_due(Utc::now(), limit).await?;
        if !claimed.is_empty() {
            debug!(claimed = claimed.len(), "claimed due tasks");
        }
        Ok(claimed)
    }

    /// processing→completed. Idempotent: completing a completed task is a
    /// no-op.
    pub async fn complete(&self, task_id: Uuid) -> Result<()> {
        self.store
            .mark_completed(task_id)
            .await?
            .ok_or(CoreError::TaskNotFound(task_id))?;
        debug!(task_id = %task_id, "task completed");
        Ok(())
    }

    /// Record an execution failure and decide the task's fate: reschedule
    /// with backoff while the error is retryable and budget remains,
    /// otherwise terminal-state it and hand it to the dead-letter sink.
    #[instrument(skip(self, error), fields(task_id = %task_id))]
    pub async fn fail(&self, task_id: Uuid, error: &ExecutionError) -> Result<FailOutcome> {
        let task = self
            .store
            .get(task_id)
            .await?
            .ok_or(CoreError::TaskNotFound(task_id))?;

        let retryable = error.is_retryable();
        if retryable && task.attempts_remaining() {
            // Durable attempt numbers are 1-based for the backoff curve
            let attempt = (task.attempt_count + 1) as u32;
            let delay = self.policy.backoff_for(task.task_type).delay(attempt);
            let next_run = Utc::now()
                + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::seconds(60));

            let rescheduled = self
                .store
                .reschedule(task_id, next_run, AttemptError::now(error.to_string()))
                .await?;
            if rescheduled.is_none() {
                // The task left `processing` under us (cancelled mid-flight,
                // most likely). Its terminal state wins over the late failure.
                debug!(task_id = %task_id, "task no longer processing, failure dropped");
                return Ok(FailOutcome::Superseded);
            }

            info!(
                attempt,
                max_attempts = task.max_attempts,
                next_run = %next_run,
                error = %error,
                "task rescheduled with backoff"
            );
            return Ok(FailOutcome::Rescheduled { next_run });
        }

        let reason = if retryable {
            format!("retries exhausted after {} attempts", task.attempt_count)
        } else {
            format!("non-retryable failure: {error}")
        };

        let Some(failed) = self
            .store
            .mark_failed(task_id, AttemptError::now(error.to_string()))
            .await?
        else {
            debug!(task_id = %task_id, "task no longer processing, failure dropped");
            return Ok(FailOutcome::Superseded);
        };

        // The DLQ entry must exist the moment the task is `failed`
        let dlq_id = self.dlq.move_to_dlq(&failed, &reason).await?;

        self.publisher.publish(
            TASK_EXHAUSTED,
            serde_json::json!({
                "task_id": failed.id,
                "tenant_id": failed.tenant_id,
                "operation_type": failed.task_type.as_str(),
                "attempt_count": failed.attempt_count,
                "reason": reason,
            }),
        );
        if failed.task_type == TaskType::WebhookReplay {
            self.publisher.publish(
                WEBHOOK_REPLAY_EXHAUSTED,
                serde_json::json!({
                    "task_id": failed.id,
                    "tenant_id": failed.tenant_id,
                    "attempt_count": failed.attempt_count,
                }),
            );
        }

        warn!(dlq_id = %dlq_id, reason = %reason, "task dead-lettered");
        Ok(FailOutcome::DeadLettered { dlq_id })
    }

    /// Put a claimed task back on the schedule without consuming an attempt.
    /// Used when the circuit was open: no downstream call was made, so the
    /// rejection must not count against the task's budget.
    pub async fn release_for_circuit_open(&self, task_id: Uuid) -> Result<DateTime<Utc>> {
        let task = self
            .store
            .get(task_id)
            .await?
            .ok_or(CoreError::TaskNotFound(task_id))?;

        let delay = self
            .policy
            .backoff_for(task.task_type)
            .delay((task.attempt_count + 1) as u32);
        let next_run =
            Utc::now() + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::seconds(60));

        if self.store.release(task_id, next_run).await?.is_none() {
            debug!(task_id = %task_id, "task no longer processing, release skipped");
            return Ok(next_run);
        }
        debug!(task_id = %task_id, next_run = %next_run, "task released, circuit open");
        Ok(next_run)
    }

    /// Bulk pending→cancelled for every task of a (tenant, subject) pair.
    pub async fn cancel_pending(&self, tenant_id: &str, subject_key: &str) -> Result<u64> {
        let cancelled = self.store.cancel_pending(tenant_id, subject_key).await?;
        if cancelled > 0 {
            info!(tenant_id, subject_key, cancelled, "cancelled pending tasks");
        }
        Ok(cancelled)
    }

    /// Cancel a single claimed task (dispatch-time guard failure).
    pub async fn cancel(&self, task_id: Uuid) -> Result<()> {
        self.store
            .cancel(task_id)
            .await?
            .ok_or(CoreError::TaskNotFound(task_id))?;
        Ok(())
    }

    pub async fn get(&self, task_id: Uuid) -> Result<Option<Task>> {
        self.store.get(task_id).await.map_err(Into::into)
    }

    pub async fn pending_for_subject(
        &self,
        tenant_id: &str,
        subject_key: &str,
    ) -> Result<Vec<Task>> {
        self.store
            .pending_for_subject(tenant_id, subject_key)
            .await
            .map_err(Into::into)
    }
}
