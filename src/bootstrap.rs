//! # System Wiring
//!
//! [`CoreSystem`] assembles the whole delivery core from a [`CoreConfig`],
//! a set of stores, and the outward-facing collaborators. Everything is
//! injected through constructors; nothing here reaches for a global. A
//! process embedding the core builds one `CoreSystem` and calls
//! [`CoreSystem::start`].

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::CoreConfig;
use crate::dlq::DeadLetterSink;
use crate::error::{CoreError, Result};
use crate::events::{AlertNotifier, EventPublisher};
use crate::followup::{FollowUpGuard, FollowUpOrchestrator};
use crate::idempotency::IdempotencyGuard;
use crate::queue::{Dispatcher, OutboundExecutor, PriorityTaskQueue, QueuePolicy, TaskExecutor};
use crate::resilience::CircuitBreakerManager;
use crate::storage::{
    CircuitStateStore, DeadLetterStore, IdempotencyStore, MemoryStore, TaskStore,
};
use crate::services::{AlertSender, LeadStatusProvider, MessageSender, WebhookPoster};
use crate::webhook::WebhookRedeliverer;

/// Implementations of the four outward-facing seams.
#[derive(Clone)]
pub struct Collaborators {
    pub message_sender: Arc<dyn MessageSender>,
    pub lead_status: Arc<dyn LeadStatusProvider>,
    pub alert_sender: Arc<dyn AlertSender>,
    pub webhook_poster: Arc<dyn WebhookPoster>,
}

/// Store implementations, one per concern. [`Stores::in_memory`] backs all
/// four with a single [`MemoryStore`].
#[derive(Clone)]
pub struct Stores {
    pub tasks: Arc<dyn TaskStore>,
    pub dead_letters: Arc<dyn DeadLetterStore>,
    pub idempotency: Arc<dyn IdempotencyStore>,
    pub circuit_states: Arc<dyn CircuitStateStore>,
}

impl Stores {
    pub fn in_memory() -> Self {
        let store = Arc::new(MemoryStore::new());
        Self {
            tasks: store.clone(),
            dead_letters: store.clone(),
            idempotency: store.clone(),
            circuit_states: store,
        }
    }
}

/// Join handles for the background loops; aborting them stops the system.
pub struct SystemHandles {
    pub dispatcher: JoinHandle<()>,
    pub notifier: JoinHandle<()>,
}

pub struct CoreSystem {
    pub events: EventPublisher,
    pub queue: Arc<PriorityTaskQueue>,
    pub dead_letters: Arc<DeadLetterSink>,
    pub breakers: Arc<CircuitBreakerManager>,
    pub follow_ups: Arc<FollowUpOrchestrator>,
    pub webhooks: Arc<WebhookRedeliverer>,
    dispatcher: Arc<Dispatcher>,
    notifier: Option<AlertNotifier>,
}

impl CoreSystem {
    pub fn new(config: CoreConfig, stores: Stores, collaborators: Collaborators) -> Self {
        let events = EventPublisher::default();

        // The notifier must subscribe before any state machine publishes,
        // so it is built here and spawned in start().
        let notifier = AlertNotifier::new(events.clone(), collaborators.alert_sender.clone());

        let dead_letters = Arc::new(DeadLetterSink::new(
            stores.dead_letters.clone(),
            events.clone(),
            config.dead_letter.clone(),
        ));

        let policy = QueuePolicy {
            default_max_attempts: config.queue.default_max_attempts,
            reschedule_backoff: config.queue.reschedule_backoff.to_backoff(),
            webhook_backoff: config.webhook.backoff.to_backoff(),
        };
        let queue = Arc::new(PriorityTaskQueue::new(
            stores.tasks.clone(),
            dead_letters.clone(),
            events.clone(),
            policy,
        ));

        let idempotency = Arc::new(IdempotencyGuard::new(
            stores.idempotency.clone(),
            config.idempotency.clone(),
        ));

        let breakers = Arc::new(CircuitBreakerManager::new(
            config.circuit_breaker.to_config(),
            config.circuit_breaker.resolved_overrides(),
            events.clone(),
            Some(stores.circuit_states.clone()),
        ));

        let follow_ups = Arc::new(FollowUpOrchestrator::new(
            queue.clone(),
            collaborators.lead_status.clone(),
        ));
        let webhooks = Arc::new(WebhookRedeliverer::new(
            queue.clone(),
            config.webhook.clone(),
        ));

        let executor: Arc<dyn TaskExecutor> = Arc::new(OutboundExecutor::new(
            collaborators.message_sender.clone(),
            collaborators.webhook_poster.clone(),
        ));
        let guard = Arc::new(FollowUpGuard::new(collaborators.lead_status));
        let dispatcher = Arc::new(Dispatcher::new(
            queue.clone(),
            executor,
            guard,
            idempotency,
            breakers.clone(),
            config.retry.to_retry_config(),
            config.dispatcher.clone(),
        ));

        Self {
            events,
            queue,
            dead_letters,
            breakers,
            follow_ups,
            webhooks,
            dispatcher,
            notifier: Some(notifier),
        }
    }

    /// Spawn the dispatcher loop and alert notifier. Fails if the system
    /// was already started.
    pub fn start(&mut self) -> Result<SystemHandles> {
        let notifier = self.notifier.take().ok_or_else(|| {
            CoreError::InvalidTransition("core system already started".into())
        })?;
        info!("delivery core starting");
        Ok(SystemHandles {
            dispatcher: self.dispatcher.clone().start(),
            notifier: notifier.spawn(),
        })
    }

    /// The dispatcher, for embedders that drive ticks themselves (tests,
    /// cron-style runners).
    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        self.dispatcher.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::followup::CallOutcome;
    use crate::followup::LeadContext;
    use crate::models::TaskStatus;
    use crate::services::LogAlertSender;
    use async_trait::async_trait;
    use crate::error::ExecutionError;
    use crate::services::{Channel, ProviderReceipt};
    use std::collections::HashMap;

    struct OkSender;

    #[async_trait]
    impl MessageSender for OkSender {
        async fn send_message(
            &self,
            _channel: Channel,
            _to: &str,
            _content: &str,
        ) -> std::result::Result<ProviderReceipt, ExecutionError> {
            Ok(ProviderReceipt { provider_id: None })
        }
    }

    struct NoLead;

    #[async_trait]
    impl LeadStatusProvider for NoLead {
        async fn is_opted_out(&self, _phone: &str) -> std::result::Result<bool, ExecutionError> {
            Ok(false)
        }

        async fn has_future_booking(
            &self,
            _tenant_id: &str,
            _phone: &str,
        ) -> std::result::Result<bool, ExecutionError> {
            Ok(false)
        }
    }

    struct NoPost;

    #[async_trait]
    impl WebhookPoster for NoPost {
        async fn post(
            &self,
            _endpoint: &str,
            _payload: &serde_json::Value,
            _headers: &HashMap<String, String>,
        ) -> std::result::Result<(), ExecutionError> {
            Ok(())
        }
    }

    fn collaborators() -> Collaborators {
        Collaborators {
            message_sender: Arc::new(OkSender),
            lead_status: Arc::new(NoLead),
            alert_sender: Arc::new(LogAlertSender),
            webhook_poster: Arc::new(NoPost),
        }
    }

    #[tokio::test]
    async fn wired_system_runs_a_follow_up_step_end_to_end() {
        let system = CoreSystem::new(
            CoreConfig::default(),
            Stores::in_memory(),
            collaborators(),
        );

        // Materialize a sequence, pull its first step forward, and tick once
        let tasks = system
            .follow_ups
            .trigger(
                "tenant-a",
                "+15550001111",
                CallOutcome::InterestedNoBooking,
                &LeadContext::default(),
            )
            .await
            .unwrap();
        assert_eq!(tasks.len(), 3);

        // Nothing is due yet, so a tick claims nothing
        let summary = system.dispatcher().run_once().await.unwrap();
        assert_eq!(summary.claimed, 0);
    }

    #[tokio::test]
    async fn start_spawns_and_second_start_is_rejected() {
        let mut system = CoreSystem::new(
            CoreConfig::default(),
            Stores::in_memory(),
            collaborators(),
        );
        let handles = system.start().unwrap();
        handles.dispatcher.abort();
        handles.notifier.abort();

        let second = system.start();
        assert!(matches!(second, Err(CoreError::InvalidTransition(_))));
    }

    #[tokio::test]
    async fn webhook_replay_flows_through_the_shared_queue() {
        let system = CoreSystem::new(
            CoreConfig::default(),
            Stores::in_memory(),
            collaborators(),
        );
        let task = system
            .webhooks
            .replay_webhook(
                "tenant-a",
                "https://internal.example.com/hooks/booked",
                serde_json::json!({}),
                HashMap::new(),
            )
            .await
            .unwrap();
        let stored = system.queue.get(task.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Pending);
    }
}
