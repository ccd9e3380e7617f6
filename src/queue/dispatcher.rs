//! # Dispatcher
//!
//! Time-driven worker that claims batches of due tasks and executes each one
//! under the full protection pipeline:
//!
//! 1. dispatch-time guard re-check (follow-up steps only),
//! 2. idempotency check: a duplicate marks the task completed, skipped,
//! 3. circuit breaker for the task's operation key,
//! 4. in-process retry loop with an explicit per-call timeout.
//!
//! Batches run with bounded concurrency so a provider outage cannot fan out
//! into unbounded in-flight calls. Several dispatcher processes may run
//! concurrently; the atomic claim is the only mutual-exclusion point.
//! Cancellation is cooperative: a task already claimed finishes on its own.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::config::DispatcherConfig;
use crate::error::{ExecutionError, Result};
use crate::idempotency::IdempotencyGuard;
use crate::models::{Task, TaskType};
use crate::queue::task_queue::{FailOutcome, PriorityTaskQueue};
use crate::resilience::{CircuitBreakerError, CircuitBreakerManager};
use crate::retry::{RetryConfig, RetryManager};
use crate::services::{Channel, MessageSender, WebhookPoster};

/// Executes one claimed task against the outside world.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, task: &Task) -> std::result::Result<(), ExecutionError>;
}

/// Dispatch-time veto for tasks whose preconditions may have changed while
/// they sat on the schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardVerdict {
    Proceed,
    /// Cancel this task and every remaining pending task for its subject.
    CancelRemaining { reason: String },
}

#[async_trait]
pub trait DispatchGuard: Send + Sync {
    async fn inspect(&self, task: &Task) -> Result<GuardVerdict>;
}

/// Per-tick accounting, mostly for logs and tests.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickSummary {
    pub claimed: usize,
    pub completed: usize,
    pub rescheduled: usize,
    pub dead_lettered: usize,
    pub cancelled: usize,
    pub skipped_duplicate: usize,
    pub circuit_open: usize,
}

enum TaskOutcome {
    Completed,
    Rescheduled,
    DeadLettered,
    Cancelled,
    SkippedDuplicate,
    CircuitOpen,
}

pub struct Dispatcher {
    queue: Arc<PriorityTaskQueue>,
    executor: Arc<dyn TaskExecutor>,
    guard: Arc<dyn DispatchGuard>,
    idempotency: Arc<IdempotencyGuard>,
    breakers: Arc<CircuitBreakerManager>,
    retry: RetryManager,
    retry_config: RetryConfig,
    config: DispatcherConfig,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        queue: Arc<PriorityTaskQueue>,
        executor: Arc<dyn TaskExecutor>,
        guard: Arc<dyn DispatchGuard>,
        idempotency: Arc<IdempotencyGuard>,
        breakers: Arc<CircuitBreakerManager>,
        retry_config: RetryConfig,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            queue,
            executor,
            guard,
            idempotency,
            breakers,
            retry: RetryManager::new(),
            retry_config,
            config,
        }
    }

    /// Run the periodic dispatch loop until the handle is aborted.
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        let tick = self.config.tick_interval();
        info!(
            tick_ms = tick.as_millis() as u64,
            batch_size = self.config.batch_size,
            worker_count = self.config.worker_count,
            "dispatcher started"
        );
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if let Err(err) = self.run_once().await {
                    // Storage errors surface here; the loop keeps ticking but
                    // the failure is loud.
                    error!(error = %err, "dispatch tick failed");
                }
            }
        })
    }

    /// Claim one batch and process it with bounded concurrency.
    pub async fn run_once(&self) -> Result<TickSummary> {
        let claimed = self.queue.claim_due(self.config.batch_size).await?;
        let mut summary = TickSummary {
            claimed: claimed.len(),
            ..Default::default()
        };
        if claimed.is_empty() {
            return Ok(summary);
        }

        let results: Vec<Result<TaskOutcome>> = stream::iter(claimed)
            .map(|task| self.process_task(task))
            .buffer_unordered(self.config.worker_count.max(1))
            .collect()
            .await;

        let mut first_error = None;
        for result in results {
            match result {
                Ok(TaskOutcome::Completed) => summary.completed += 1,
                Ok(TaskOutcome::Rescheduled) => summary.rescheduled += 1,
                Ok(TaskOutcome::DeadLettered) => summary.dead_lettered += 1,
                Ok(TaskOutcome::Cancelled) => summary.cancelled += 1,
                Ok(TaskOutcome::SkippedDuplicate) => summary.skipped_duplicate += 1,
                Ok(TaskOutcome::CircuitOpen) => summary.circuit_open += 1,
                Err(err) => {
                    error!(error = %err, "task processing hit a storage failure");
                    first_error.get_or_insert(err);
                }
            }
        }

        debug!(?summary, "dispatch tick finished");
        match first_error {
            Some(err) => Err(err),
            None => Ok(summary),
        }
    }

    #[instrument(skip(self, task), fields(task_id = %task.id, task_type = task.task_type.as_str()))]
    async fn process_task(&self, task: Task) -> Result<TaskOutcome> {
        // Preconditions may have changed while the task sat on the schedule
        if let GuardVerdict::CancelRemaining { reason } = self.guard.inspect(&task).await? {
            info!(reason = %reason, "dispatch guard cancelled task and remaining steps");
            self.queue.cancel(task.id).await?;
            self.queue
                .cancel_pending(&task.tenant_id, &task.subject_key)
                .await?;
            return Ok(TaskOutcome::Cancelled);
        }

        let operation = task.task_type.operation_key();
        let request_key = IdempotencyGuard::request_key(&task.tenant_id, operation, &task.payload);
        let window = self.idempotency.window_for(operation);
        let check = self
            .idempotency
            .check(&task.tenant_id, &request_key, window)
            .await;
        if check.duplicate {
            info!(
                request_key = %request_key,
                original_age_secs = check.original_age.map(|a| a.num_seconds()).unwrap_or(0),
                "duplicate request, skipping execution"
            );
            self.queue.complete(task.id).await?;
            return Ok(TaskOutcome::SkippedDuplicate);
        }

        let breaker = self.breakers.breaker_for(operation);
        let timeout = self.config.execution_timeout();
        let executor = &self.executor;
        let task_ref = &task;

        let result = breaker
            .call(|| {
                self.retry.execute(&self.retry_config, move |_attempt| {
                    let executor = executor.clone();
                    async move {
                        match tokio::time::timeout(timeout, executor.execute(task_ref)).await {
                            Ok(result) => result,
                            Err(_) => Err(ExecutionError::Timeout { timeout }),
                        }
                    }
                })
            })
            .await;

        match result {
            Ok(()) => {
                // Record before completing so a crash in between reports
                // duplicate rather than re-sending
                if let Err(err) = self.idempotency.record(&task.tenant_id, &request_key).await {
                    warn!(error = %err, "failed to record idempotency key");
                }
                self.queue.complete(task.id).await?;
                Ok(TaskOutcome::Completed)
            }
            Err(CircuitBreakerError::CircuitOpen { operation }) => {
                // No downstream call was made; no attempt is consumed
                warn!(operation = %operation, "circuit open, releasing task");
                self.queue.release_for_circuit_open(task.id).await?;
                Ok(TaskOutcome::CircuitOpen)
            }
            Err(CircuitBreakerError::OperationFailed(err)) => {
                match self.queue.fail(task.id, &err).await? {
                    FailOutcome::Rescheduled { .. } => Ok(TaskOutcome::Rescheduled),
                    FailOutcome::DeadLettered { .. } => Ok(TaskOutcome::DeadLettered),
                    FailOutcome::Superseded => Ok(TaskOutcome::Cancelled),
                }
            }
        }
    }
}

/// Guard that always allows dispatch; for deployments without follow-up
/// sequences or for tests.
pub struct AllowAllGuard;

#[async_trait]
impl DispatchGuard for AllowAllGuard {
    async fn inspect(&self, _task: &Task) -> Result<GuardVerdict> {
        Ok(GuardVerdict::Proceed)
    }
}

/// Default executor: routes message channels to the [`MessageSender`]
/// collaborator and webhook replays to the [`WebhookPoster`].
pub struct OutboundExecutor {
    message_sender: Arc<dyn MessageSender>,
    webhook_poster: Arc<dyn WebhookPoster>,
}

impl OutboundExecutor {
    pub fn new(
        message_sender: Arc<dyn MessageSender>,
        webhook_poster: Arc<dyn WebhookPoster>,
    ) -> Self {
        Self {
            message_sender,
            webhook_poster,
        }
    }

    fn channel_for(task: &Task) -> Channel {
        match task.task_type {
            TaskType::Call => Channel::Call,
            TaskType::Sms => Channel::Sms,
            TaskType::Email => Channel::Email,
            // Booking confirmations and reminders carry their channel in the
            // payload, defaulting to SMS
            _ => match task.payload.get("channel").and_then(|c| c.as_str()) {
                Some("call") => Channel::Call,
                Some("email") => Channel::Email,
                _ => Channel::Sms,
            },
        }
    }
}

#[async_trait]
impl TaskExecutor for OutboundExecutor {
    async fn execute(&self, task: &Task) -> std::result::Result<(), ExecutionError> {
        match task.task_type {
            TaskType::WebhookReplay => {
                let endpoint = task
                    .payload
                    .get("endpoint")
                    .and_then(|e| e.as_str())
                    .ok_or_else(|| {
                        ExecutionError::Validation("webhook replay payload missing endpoint".into())
                    })?;
                let body = task
                    .payload
                    .get("payload")
                    .cloned()
                    .unwrap_or(serde_json::Value::Null);
                let headers: std::collections::HashMap<String, String> = task
                    .payload
                    .get("headers")
                    .and_then(|h| serde_json::from_value(h.clone()).ok())
                    .unwrap_or_default();
                self.webhook_poster.post(endpoint, &body, &headers).await
            }
            _ => {
                let to = task
                    .payload
                    .get("to")
                    .and_then(|t| t.as_str())
                    .unwrap_or(&task.subject_key);
                let content = task
                    .payload
                    .get("message")
                    .and_then(|m| m.as_str())
                    .unwrap_or_default();
                self.message_sender
                    .send_message(Self::channel_for(task), to, content)
                    .await
                    .map(|_receipt| ())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DeadLetterConfig, IdempotencyConfig};
    use crate::dlq::DeadLetterSink;
    use crate::events::EventPublisher;
    use crate::models::{NewTask, TaskStatus, TaskType};
    use crate::queue::task_queue::QueuePolicy;
    use crate::resilience::CircuitBreakerConfig;
    use crate::retry::BackoffConfig;
    use crate::storage::MemoryStore;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Fails the first `failures` invocations, then succeeds.
    struct FlakyExecutor {
        failures: u32,
        error: fn() -> ExecutionError,
        calls: AtomicU32,
    }

    impl FlakyExecutor {
        fn new(failures: u32, error: fn() -> ExecutionError) -> Self {
            Self {
                failures,
                error,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl TaskExecutor for FlakyExecutor {
        async fn execute(&self, _task: &Task) -> std::result::Result<(), ExecutionError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err((self.error)())
            } else {
                Ok(())
            }
        }
    }

    struct CancelGuard;

    #[async_trait]
    impl DispatchGuard for CancelGuard {
        async fn inspect(&self, _task: &Task) -> Result<GuardVerdict> {
            Ok(GuardVerdict::CancelRemaining {
                reason: "lead opted out".into(),
            })
        }
    }

    fn fast_backoff() -> BackoffConfig {
        BackoffConfig {
            base: Duration::from_millis(1),
            max: Duration::from_millis(5),
            multiplier: 2.0,
            jitter: false,
        }
    }

    struct Harness {
        dispatcher: Dispatcher,
        queue: Arc<PriorityTaskQueue>,
    }

    fn harness(executor: Arc<dyn TaskExecutor>, guard: Arc<dyn DispatchGuard>) -> Harness {
        harness_with_breaker(executor, guard, CircuitBreakerConfig::default())
    }

    fn harness_with_breaker(
        executor: Arc<dyn TaskExecutor>,
        guard: Arc<dyn DispatchGuard>,
        breaker_config: CircuitBreakerConfig,
    ) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let publisher = EventPublisher::default();
        let dlq = Arc::new(DeadLetterSink::new(
            store.clone(),
            publisher.clone(),
            DeadLetterConfig::default(),
        ));
        let queue = Arc::new(PriorityTaskQueue::new(
            store.clone(),
            dlq,
            publisher.clone(),
            QueuePolicy::default(),
        ));
        let idempotency = Arc::new(IdempotencyGuard::new(
            store.clone(),
            IdempotencyConfig::default(),
        ));
        let breakers = Arc::new(CircuitBreakerManager::new(
            breaker_config,
            HashMap::new(),
            publisher,
            None,
        ));
        let dispatcher = Dispatcher::new(
            queue.clone(),
            executor,
            guard,
            idempotency,
            breakers,
            RetryConfig::default().with_backoff(fast_backoff()),
            DispatcherConfig::default(),
        );
        Harness { dispatcher, queue }
    }

    fn sms_task(tenant: &str, phone: &str) -> NewTask {
        NewTask::new(
            tenant,
            phone,
            TaskType::Sms,
            json!({"to": phone, "message": "hi"}),
        )
    }

    #[tokio::test]
    async fn successful_task_is_completed() {
        let h = harness(
            Arc::new(FlakyExecutor::new(0, || ExecutionError::Network("".into()))),
            Arc::new(AllowAllGuard),
        );
        let task = h
            .queue
            .enqueue(sms_task("tenant-a", "+15550001111"))
            .await
            .unwrap();

        let summary = h.dispatcher.run_once().await.unwrap();
        assert_eq!(summary.claimed, 1);
        assert_eq!(summary.completed, 1);

        let stored = h.queue.get(task.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn duplicate_payload_is_skipped_without_execution() {
        let executor = Arc::new(FlakyExecutor::new(0, || ExecutionError::Network("".into())));
        let h = harness(executor.clone(), Arc::new(AllowAllGuard));

        h.queue
            .enqueue(sms_task("tenant-a", "+15550001111"))
            .await
            .unwrap();
        h.dispatcher.run_once().await.unwrap();
        assert_eq!(executor.calls.load(Ordering::SeqCst), 1);

        // Same tenant, operation, and payload within the window
        let dup = h
            .queue
            .enqueue(sms_task("tenant-a", "+15550001111"))
            .await
            .unwrap();
        let summary = h.dispatcher.run_once().await.unwrap();
        assert_eq!(summary.skipped_duplicate, 1);
        assert_eq!(executor.calls.load(Ordering::SeqCst), 1);

        let stored = h.queue.get(dup.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn transient_failures_are_retried_in_process() {
        let executor = Arc::new(FlakyExecutor::new(2, || {
            ExecutionError::Http {
                status: 503,
                message: "unavailable".into(),
            }
        }));
        let h = harness(executor.clone(), Arc::new(AllowAllGuard));
        let task = h
            .queue
            .enqueue(sms_task("tenant-a", "+15550001111"))
            .await
            .unwrap();

        let summary = h.dispatcher.run_once().await.unwrap();
        assert_eq!(summary.completed, 1);
        assert_eq!(executor.calls.load(Ordering::SeqCst), 3);

        let stored = h.queue.get(task.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Completed);
        // In-process retries do not consume queue attempts
        assert_eq!(stored.attempt_count, 0);
    }

    #[tokio::test]
    async fn exhausted_transient_failure_is_rescheduled() {
        let executor = Arc::new(FlakyExecutor::new(u32::MAX, || {
            ExecutionError::Http {
                status: 503,
                message: "unavailable".into(),
            }
        }));
        let h = harness(executor, Arc::new(AllowAllGuard));
        let task = h
            .queue
            .enqueue(sms_task("tenant-a", "+15550001111"))
            .await
            .unwrap();

        let summary = h.dispatcher.run_once().await.unwrap();
        assert_eq!(summary.rescheduled, 1);

        let stored = h.queue.get(task.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Pending);
        assert_eq!(stored.attempt_count, 1);
        assert!(stored.scheduled_for > chrono::Utc::now());
    }

    #[tokio::test]
    async fn non_retryable_failure_goes_straight_to_dead_letter() {
        let executor = Arc::new(FlakyExecutor::new(u32::MAX, || {
            ExecutionError::Http {
                status: 401,
                message: "bad credentials".into(),
            }
        }));
        let h = harness(executor.clone(), Arc::new(AllowAllGuard));
        let task = h
            .queue
            .enqueue(sms_task("tenant-a", "+15550001111"))
            .await
            .unwrap();

        let summary = h.dispatcher.run_once().await.unwrap();
        assert_eq!(summary.dead_lettered, 1);
        // Retry loop surfaced the error without a second call
        assert_eq!(executor.calls.load(Ordering::SeqCst), 1);

        let stored = h.queue.get(task.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Failed);
        assert_eq!(stored.attempt_count, 0);
    }

    #[tokio::test]
    async fn open_circuit_releases_task_without_consuming_attempts() {
        let executor = Arc::new(FlakyExecutor::new(u32::MAX, || {
            ExecutionError::Network("connection refused".into())
        }));
        let breaker_config = CircuitBreakerConfig {
            failure_threshold: 1,
            ..CircuitBreakerConfig::default()
        };
        let h = harness_with_breaker(executor, Arc::new(AllowAllGuard), breaker_config);

        // First task trips the breaker (its own failure is rescheduled)
        h.queue
            .enqueue(sms_task("tenant-a", "+15550001111"))
            .await
            .unwrap();
        h.dispatcher.run_once().await.unwrap();

        let second = h
            .queue
            .enqueue(sms_task("tenant-a", "+15550002222"))
            .await
            .unwrap();
        let summary = h.dispatcher.run_once().await.unwrap();
        assert_eq!(summary.circuit_open, 1);

        let stored = h.queue.get(second.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Pending);
        assert_eq!(stored.attempt_count, 0);
        assert!(stored.error_history.is_empty());
    }

    #[tokio::test]
    async fn guard_cancellation_stops_the_whole_sequence() {
        let executor = Arc::new(FlakyExecutor::new(0, || ExecutionError::Network("".into())));
        let h = harness(executor.clone(), Arc::new(CancelGuard));

        let due = h
            .queue
            .enqueue(sms_task("tenant-a", "+15550001111"))
            .await
            .unwrap();
        let later = h
            .queue
            .enqueue(
                sms_task("tenant-a", "+15550001111")
                    .with_scheduled_for(chrono::Utc::now() + chrono::Duration::hours(1)),
            )
            .await
            .unwrap();

        let summary = h.dispatcher.run_once().await.unwrap();
        assert_eq!(summary.cancelled, 1);
        assert_eq!(executor.calls.load(Ordering::SeqCst), 0);

        let first = h.queue.get(due.id).await.unwrap().unwrap();
        let second = h.queue.get(later.id).await.unwrap().unwrap();
        assert_eq!(first.status, TaskStatus::Cancelled);
        assert_eq!(second.status, TaskStatus::Cancelled);
    }

    #[tokio::test]
    async fn outbound_executor_routes_webhook_replays_to_the_poster() {
        struct RecordingPoster {
            calls: parking_lot::Mutex<Vec<(String, serde_json::Value)>>,
        }

        #[async_trait]
        impl WebhookPoster for RecordingPoster {
            async fn post(
                &self,
                endpoint: &str,
                payload: &serde_json::Value,
                _headers: &std::collections::HashMap<String, String>,
            ) -> std::result::Result<(), ExecutionError> {
                self.calls
                    .lock()
                    .push((endpoint.to_string(), payload.clone()));
                Ok(())
            }
        }

        struct NoopSender;

        #[async_trait]
        impl MessageSender for NoopSender {
            async fn send_message(
                &self,
                _channel: Channel,
                _to: &str,
                _content: &str,
            ) -> std::result::Result<crate::services::ProviderReceipt, ExecutionError> {
                Ok(crate::services::ProviderReceipt { provider_id: None })
            }
        }

        let poster = Arc::new(RecordingPoster {
            calls: parking_lot::Mutex::new(Vec::new()),
        });
        let executor = OutboundExecutor::new(Arc::new(NoopSender), poster.clone());

        let task = Task {
            id: uuid::Uuid::new_v4(),
            tenant_id: "tenant-a".into(),
            subject_key: "evt-1".into(),
            task_type: TaskType::WebhookReplay,
            payload: json!({
                "endpoint": "https://crm.example.com/hooks/booked",
                "payload": {"event": "appointment.booked"},
                "headers": {"x-signature": "abc"}
            }),
            priority: 5,
            scheduled_for: chrono::Utc::now(),
            status: TaskStatus::Processing,
            attempt_count: 0,
            max_attempts: 5,
            error_history: Vec::new(),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        };

        executor.execute(&task).await.unwrap();
        let calls = poster.calls.lock();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "https://crm.example.com/hooks/booked");
        assert_eq!(calls[0].1["event"], "appointment.booked");
    }
}
