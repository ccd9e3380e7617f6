use serde_json::Value;
use tokio::sync::broadcast;

/// Broadcast publisher for delivery-core lifecycle events.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<PublishedEvent>,
}

/// Event that has been published.
#[derive(Debug, Clone)]
pub struct PublishedEvent {
    pub name: String,
    pub context: Value,
    pub published_at: chrono::DateTime<chrono::Utc>,
}

impl EventPublisher {
    /// Create a new event publisher with the specified channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event with the given name and context.
    ///
    /// A broadcast send fails only when there are no subscribers, which is
    /// acceptable here: events must never gate the state transition that
    /// emitted them.
    pub fn publish(&self, event_name: impl Into<String>, context: Value) {
        let event = PublishedEvent {
            name: event_name.into(),
            context,
            published_at: chrono::Utc::now(),
        };
        let _ = self.sender.send(event);
    }

    /// Subscribe to events.
    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.sender.subscribe()
    }

    /// Number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_without_subscribers_is_a_no_op() {
        let publisher = EventPublisher::new(8);
        publisher.publish("task.exhausted", serde_json::json!({"task_id": "abc"}));
        assert_eq!(publisher.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let publisher = EventPublisher::new(8);
        let mut rx = publisher.subscribe();
        publisher.publish("circuit_breaker.opened", serde_json::json!({"operation": "sms"}));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.name, "circuit_breaker.opened");
        assert_eq!(event.context["operation"], "sms");
    }
}
