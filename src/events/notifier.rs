//! # Alert Notifier
//!
//! Subscribes to domain events and forwards the ones a human should see to
//! the injected [`AlertSender`]. Keeping alerting out of the state machines
//! means a broken pager can never wedge a circuit, task or DLQ transition.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::events::{
    EventPublisher, PublishedEvent, CIRCUIT_OPENED, DLQ_CRITICAL_ENTRY, TASK_EXHAUSTED,
    WEBHOOK_REPLAY_EXHAUSTED,
};
use crate::services::{AlertSender, AlertSeverity};

/// Event-to-alert bridge. Spawn it once at bootstrap.
pub struct AlertNotifier {
    publisher: EventPublisher,
    sender: Arc<dyn AlertSender>,
}

impl AlertNotifier {
    pub fn new(publisher: EventPublisher, sender: Arc<dyn AlertSender>) -> Self {
        Self { publisher, sender }
    }

    /// Consume events until the publisher is dropped.
    pub fn spawn(self) -> JoinHandle<()> {
        let mut rx = self.publisher.subscribe();
        let sender = self.sender;
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => Self::handle(&*sender, event).await,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "alert notifier lagged behind event stream");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    async fn handle(sender: &dyn AlertSender, event: PublishedEvent) {
        let (message, severity) = match event.name.as_str() {
            CIRCUIT_OPENED => (
                format!(
                    "Circuit breaker opened for operation '{}'",
                    event.context["operation"].as_str().unwrap_or("unknown")
                ),
                AlertSeverity::Critical,
            ),
            DLQ_CRITICAL_ENTRY => (
                format!(
                    "Critical operation '{}' dead-lettered for tenant '{}': {}",
                    event.context["operation_type"].as_str().unwrap_or("unknown"),
                    event.context["tenant_id"].as_str().unwrap_or("unknown"),
                    event.context["failure_reason"].as_str().unwrap_or(""),
                ),
                AlertSeverity::Critical,
            ),
            WEBHOOK_REPLAY_EXHAUSTED => (
                format!(
                    "Webhook replay exhausted after {} attempts for tenant '{}'",
                    event.context["attempt_count"].as_u64().unwrap_or(0),
                    event.context["tenant_id"].as_str().unwrap_or("unknown"),
                ),
                AlertSeverity::Warning,
            ),
            TASK_EXHAUSTED => {
                // Non-critical exhaustion is visible in the DLQ; log only.
                debug!(context = %event.context, "task exhausted");
                return;
            }
            _ => return,
        };

        let mut metadata = HashMap::new();
        if let serde_json::Value::Object(map) = event.context {
            metadata.extend(map);
        }

        // Alert delivery is best-effort; a failure is logged and dropped.
        if let Err(err) = sender
            .send_alert(&message, severity, metadata)
            .await
        {
            warn!(error = %err, "failed to deliver alert");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingAlertSender {
        alerts: Mutex<Vec<(String, &'static str)>>,
    }

    #[async_trait]
    impl AlertSender for RecordingAlertSender {
        async fn send_alert(
            &self,
            message: &str,
            severity: AlertSeverity,
            _metadata: HashMap<String, serde_json::Value>,
        ) -> Result<(), crate::error::ExecutionError> {
            self.alerts
                .lock()
                .push((message.to_string(), severity.as_str()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn circuit_open_event_becomes_a_critical_alert() {
        let publisher = EventPublisher::new(8);
        let sender = Arc::new(RecordingAlertSender::default());
        let handle = AlertNotifier::new(publisher.clone(), sender.clone()).spawn();

        publisher.publish(CIRCUIT_OPENED, serde_json::json!({"operation": "sms"}));

        // Give the notifier task a moment to drain the channel.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        drop(publisher);
        let _ = handle.await;

        let alerts = sender.alerts.lock();
        assert_eq!(alerts.len(), 1);
        assert!(alerts[0].0.contains("sms"));
        assert_eq!(alerts[0].1, "critical");
    }

    #[tokio::test]
    async fn failing_alert_sender_never_panics_the_notifier() {
        struct FailingSender;

        #[async_trait]
        impl AlertSender for FailingSender {
            async fn send_alert(
                &self,
                _message: &str,
                _severity: AlertSeverity,
                _metadata: HashMap<String, serde_json::Value>,
            ) -> Result<(), crate::error::ExecutionError> {
                Err(crate::error::ExecutionError::Network("pager down".into()))
            }
        }

        let publisher = EventPublisher::new(8);
        let handle = AlertNotifier::new(publisher.clone(), Arc::new(FailingSender)).spawn();

        publisher.publish(
            DLQ_CRITICAL_ENTRY,
            serde_json::json!({"operation_type": "booking", "tenant_id": "t1"}),
        );
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        drop(publisher);
        assert!(handle.await.is_ok());
    }
}
