//! # Dead Letter Sink
//!
//! Terminal store for tasks that exhausted automatic retries. Entries only
//! leave via operator action (`retry`, `resolve`) or the retention cleanup of
//! long-resolved entries. An operator retry re-invokes the operation exactly
//! once, outside the scheduler, and never re-enters the task queue
//! automatically.

use chrono::{Duration, Utc};
use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::DeadLetterConfig;
use crate::error::{CoreError, ExecutionError, Result};
use crate::events::{EventPublisher, DLQ_CRITICAL_ENTRY};
use crate::models::{AttemptError, DeadLetterEntry, DeadLetterFilter, Task};
use crate::storage::DeadLetterStore;

/// Result of an operator-triggered retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome {
    /// The operation succeeded; the entry is now resolved.
    Resolved,
    /// The operation failed again; the error was appended and the entry is
    /// still unresolved.
    StillFailing(String),
}

pub struct DeadLetterSink {
    store: Arc<dyn DeadLetterStore>,
    publisher: EventPublisher,
    config: DeadLetterConfig,
}

impl DeadLetterSink {
    pub fn new(
        store: Arc<dyn DeadLetterStore>,
        publisher: EventPublisher,
        config: DeadLetterConfig,
    ) -> Self {
        Self {
            store,
            publisher,
            config,
        }
    }

    /// Persist a terminal record for a failed task. Critical operation types
    /// additionally raise a human-facing event.
    pub async fn move_to_dlq(&self, task: &Task, failure_reason: &str) -> Result<Uuid> {
        let entry = DeadLetterEntry {
            id: Uuid::new_v4(),
            task_id: task.id,
            tenant_id: task.tenant_id.clone(),
            subject_key: task.subject_key.clone(),
            operation_type: task.task_type.as_str().to_string(),
            payload: task.payload.clone(),
            error_history: task.error_history.clone(),
            failure_reason: failure_reason.to_string(),
            attempt_count: task.attempt_count,
            max_attempts: task.max_attempts,
            created_at: Utc::now(),
            resolved_at: None,
            resolution_notes: None,
        };
        let dlq_id = entry.id;

        // Storage failure here is fatal: losing the terminal record would
        // silently drop work.
        self.store.insert(entry).await.map_err(CoreError::from)?;

        warn!(
            task_id = %task.id,
            tenant_id = %task.tenant_id,
            operation = task.task_type.as_str(),
            attempt_count = task.attempt_count,
            reason = failure_reason,
            "task moved to dead letter queue"
        );

        if self.config.is_critical(task.task_type.as_str()) {
            self.publisher.publish(
                DLQ_CRITICAL_ENTRY,
                serde_json::json!({
                    "dlq_id": dlq_id,
                    "task_id": task.id,
                    "tenant_id": task.tenant_id,
                    "operation_type": task.task_type.as_str(),
                    "failure_reason": failure_reason,
                    "attempt_count": task.attempt_count,
                }),
            );
        }

        Ok(dlq_id)
    }

    pub async fn list(&self, filter: &DeadLetterFilter) -> Result<Vec<DeadLetterEntry>> {
        self.store.list(filter).await.map_err(Into::into)
    }

    pub async fn get(&self, dlq_id: Uuid) -> Result<Option<DeadLetterEntry>> {
        self.store.get(dlq_id).await.map_err(Into::into)
    }

    /// Re-invoke the original operation exactly once. The closure receives
    /// the entry's payload snapshot.
    pub async fn retry<F, Fut>(&self, dlq_id: Uuid, operation: F) -> Result<RetryOutcome>
    where
        F: FnOnce(DeadLetterEntry) -> Fut,
        Fut: Future<Output = std::result::Result<(), ExecutionError>>,
    {
        let mut entry = self
            .store
            .get(dlq_id)
            .await?
            .ok_or(CoreError::DeadLetterNotFound(dlq_id))?;

        match operation(entry.clone()).await {
            Ok(()) => {
                entry.resolved_at = Some(Utc::now());
                entry.resolution_notes = Some("manually retried and succeeded".to_string());
                self.store.update(&entry).await?;
                info!(dlq_id = %dlq_id, "manual DLQ retry succeeded");
                Ok(RetryOutcome::Resolved)
            }
            Err(err) => {
                let message = err.to_string();
                entry
                    .error_history
                    .push(AttemptError::now(format!("manual retry: {message}")));
                self.store.update(&entry).await?;
                warn!(dlq_id = %dlq_id, error = %message, "manual DLQ retry failed");
                Ok(RetryOutcome::StillFailing(message))
            }
        }
    }

    /// Mark handled without retrying.
    pub async fn resolve(&self, dlq_id: Uuid, notes: &str) -> Result<()> {
        let mut entry = self
            .store
            .get(dlq_id)
            .await?
            .ok_or(CoreError::DeadLetterNotFound(dlq_id))?;
        entry.resolved_at = Some(Utc::now());
        entry.resolution_notes = Some(notes.to_string());
        self.store.update(&entry).await?;
        info!(dlq_id = %dlq_id, "DLQ entry resolved");
        Ok(())
    }

    /// Delete entries resolved longer ago than the retention period.
    /// Entries never resolved are retained indefinitely.
    pub async fn cleanup(&self) -> Result<u64> {
        let cutoff = Utc::now() - Duration::days(self.config.retention_days);
        let deleted = self.store.delete_resolved_before(cutoff).await?;
        if deleted > 0 {
            info!(deleted, "cleaned up resolved DLQ entries");
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{TaskStatus, TaskType};
    use crate::storage::MemoryStore;

    fn failed_task() -> Task {
        Task {
            id: Uuid::new_v4(),
            tenant_id: "t1".into(),
            subject_key: "+447700900001".into(),
            task_type: TaskType::Booking,
            payload: serde_json::json!({"slot": "2026-09-01T10:00:00Z"}),
            priority: 1,
            scheduled_for: Utc::now(),
            status: TaskStatus::Failed,
            attempt_count: 5,
            max_attempts: 5,
            error_history: vec![AttemptError::now("HTTP 503: unavailable")],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn sink_with(store: Arc<MemoryStore>, publisher: EventPublisher) -> DeadLetterSink {
        DeadLetterSink::new(store, publisher, DeadLetterConfig::default())
    }

    #[tokio::test]
    async fn move_to_dlq_snapshots_the_task() {
        let store = Arc::new(MemoryStore::new());
        let sink = sink_with(store.clone(), EventPublisher::new(16));
        let task = failed_task();

        let dlq_id = sink.move_to_dlq(&task, "retries exhausted").await.unwrap();
        let entry = sink.get(dlq_id).await.unwrap().unwrap();
        assert_eq!(entry.task_id, task.id);
        assert_eq!(entry.operation_type, "booking");
        assert_eq!(entry.error_history.len(), 1);
        assert!(!entry.is_resolved());
    }

    #[tokio::test]
    async fn critical_operation_raises_event() {
        let publisher = EventPublisher::new(16);
        let mut rx = publisher.subscribe();
        let sink = sink_with(Arc::new(MemoryStore::new()), publisher);

        sink.move_to_dlq(&failed_task(), "retries exhausted")
            .await
            .unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.name, DLQ_CRITICAL_ENTRY);
        assert_eq!(event.context["operation_type"], "booking");
    }

    #[tokio::test]
    async fn non_critical_operation_stays_quiet() {
        let publisher = EventPublisher::new(16);
        let mut rx = publisher.subscribe();
        let sink = sink_with(Arc::new(MemoryStore::new()), publisher);

        let mut task = failed_task();
        task.task_type = TaskType::Sms;
        sink.move_to_dlq(&task, "retries exhausted").await.unwrap();

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn successful_manual_retry_resolves_the_entry() {
        let sink = sink_with(Arc::new(MemoryStore::new()), EventPublisher::new(16));
        let dlq_id = sink
            .move_to_dlq(&failed_task(), "retries exhausted")
            .await
            .unwrap();

        let outcome = sink.retry(dlq_id, |_entry| async { Ok(()) }).await.unwrap();
        assert_eq!(outcome, RetryOutcome::Resolved);

        let entry = sink.get(dlq_id).await.unwrap().unwrap();
        assert!(entry.is_resolved());
        assert_eq!(
            entry.resolution_notes.as_deref(),
            Some("manually retried and succeeded")
        );
    }

    #[tokio::test]
    async fn failed_manual_retry_appends_error_and_stays_unresolved() {
        let sink = sink_with(Arc::new(MemoryStore::new()), EventPublisher::new(16));
        let dlq_id = sink
            .move_to_dlq(&failed_task(), "retries exhausted")
            .await
            .unwrap();

        let outcome = sink
            .retry(dlq_id, |_entry| async {
                Err(ExecutionError::Http {
                    status: 503,
                    message: "still down".into(),
                })
            })
            .await
            .unwrap();
        assert!(matches!(outcome, RetryOutcome::StillFailing(_)));

        let entry = sink.get(dlq_id).await.unwrap().unwrap();
        assert!(!entry.is_resolved());
        assert_eq!(entry.error_history.len(), 2);
    }

    #[tokio::test]
    async fn cleanup_only_touches_long_resolved_entries() {
        let store = Arc::new(MemoryStore::new());
        let sink = sink_with(store.clone(), EventPublisher::new(16));

        let resolved_old = sink
            .move_to_dlq(&failed_task(), "retries exhausted")
            .await
            .unwrap();
        let unresolved = sink
            .move_to_dlq(&failed_task(), "retries exhausted")
            .await
            .unwrap();

        // Backdate the resolved entry past the retention window
        let mut entry = sink.get(resolved_old).await.unwrap().unwrap();
        entry.resolved_at = Some(Utc::now() - Duration::days(91));
        crate::storage::DeadLetterStore::update(&*store, &entry)
            .await
            .unwrap();

        assert_eq!(sink.cleanup().await.unwrap(), 1);
        assert!(sink.get(resolved_old).await.unwrap().is_none());
        assert!(sink.get(unresolved).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn retry_of_unknown_entry_is_an_error() {
        let sink = sink_with(Arc::new(MemoryStore::new()), EventPublisher::new(16));
        let result = sink.retry(Uuid::new_v4(), |_e| async { Ok(()) }).await;
        assert!(matches!(result, Err(CoreError::DeadLetterNotFound(_))));
    }
}
