//! # Webhook Redelivery
//!
//! When processing an accepted inbound webhook fails downstream, the original
//! delivery is already acknowledged to the sender, so the replay burden is
//! ours. [`WebhookRedeliverer`] captures the internal target endpoint plus
//! the original payload and headers as a `webhook_replay` queue task; the
//! dispatcher's [`OutboundExecutor`](crate::queue::OutboundExecutor) re-POSTs
//! it and the standard retry, circuit-breaker, and dead-letter machinery
//! applies. Replays use a slower backoff curve than ordinary tasks since the
//! failure is usually on our side of the fence.

use chrono::Utc;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument};

use crate::config::WebhookConfig;
use crate::error::Result;
use crate::models::{NewTask, Task, TaskType};
use crate::queue::PriorityTaskQueue;

pub struct WebhookRedeliverer {
    queue: Arc<PriorityTaskQueue>,
    config: WebhookConfig,
}

impl WebhookRedeliverer {
    pub fn new(queue: Arc<PriorityTaskQueue>, config: WebhookConfig) -> Self {
        Self { queue, config }
    }

    /// Schedule a replay of a failed webhook delivery. The first attempt is
    /// deferred by the backoff base rather than run immediately; whatever
    /// broke the original processing rarely heals in seconds.
    #[instrument(skip(self, payload, headers), fields(tenant_id, endpoint))]
    pub async fn replay_webhook(
        &self,
        tenant_id: &str,
        endpoint: &str,
        payload: serde_json::Value,
        headers: HashMap<String, String>,
    ) -> Result<Task> {
        let backoff = self.config.backoff.to_backoff();
        let first_run = Utc::now()
            + chrono::Duration::from_std(backoff.base)
                .unwrap_or_else(|_| chrono::Duration::seconds(300));

        let task = self
            .queue
            .enqueue(
                NewTask::new(
                    tenant_id,
                    endpoint,
                    TaskType::WebhookReplay,
                    json!({
                        "endpoint": endpoint,
                        "payload": payload,
                        "headers": headers,
                    }),
                )
                .with_scheduled_for(first_run)
                .with_max_attempts(self.config.max_attempts),
            )
            .await?;

        info!(
            tenant_id,
            endpoint,
            task_id = %task.id,
            scheduled_for = %task.scheduled_for,
            "webhook replay scheduled"
        );
        Ok(task)
    }
}
