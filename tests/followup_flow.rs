//! Follow-up campaign behavior through a wired [`CoreSystem`]: guard
//! re-checks at dispatch time and cooperative cancellation.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use outreach_core::bootstrap::{Collaborators, CoreSystem, Stores};
use outreach_core::config::CoreConfig;
use outreach_core::error::ExecutionError;
use outreach_core::followup::{CallOutcome, LeadContext};
use outreach_core::models::{NewTask, TaskStatus, TaskType};
use outreach_core::services::{
    Channel, LeadStatusProvider, LogAlertSender, MessageSender, ProviderReceipt, WebhookPoster,
};

struct ToggleLeads {
    opted_out: AtomicBool,
}

#[async_trait]
impl LeadStatusProvider for ToggleLeads {
    async fn is_opted_out(&self, _phone: &str) -> Result<bool, ExecutionError> {
        Ok(self.opted_out.load(Ordering::SeqCst))
    }

    async fn has_future_booking(
        &self,
        _tenant_id: &str,
        _phone: &str,
    ) -> Result<bool, ExecutionError> {
        Ok(false)
    }
}

struct CountingSender {
    calls: AtomicU32,
}

#[async_trait]
impl MessageSender for CountingSender {
    async fn send_message(
        &self,
        _channel: Channel,
        _to: &str,
        _content: &str,
    ) -> Result<ProviderReceipt, ExecutionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ProviderReceipt { provider_id: None })
    }
}

struct NoopPoster;

#[async_trait]
impl WebhookPoster for NoopPoster {
    async fn post(
        &self,
        _endpoint: &str,
        _payload: &serde_json::Value,
        _headers: &HashMap<String, String>,
    ) -> Result<(), ExecutionError> {
        Ok(())
    }
}

fn build() -> (CoreSystem, Arc<ToggleLeads>, Arc<CountingSender>) {
    let leads = Arc::new(ToggleLeads {
        opted_out: AtomicBool::new(false),
    });
    let sender = Arc::new(CountingSender {
        calls: AtomicU32::new(0),
    });
    let system = CoreSystem::new(
        CoreConfig::default(),
        Stores::in_memory(),
        Collaborators {
            message_sender: sender.clone(),
            lead_status: leads.clone(),
            alert_sender: Arc::new(LogAlertSender),
            webhook_poster: Arc::new(NoopPoster),
        },
    );
    (system, leads, sender)
}

/// A follow-up step payload as the orchestrator would materialize it, but
/// scheduled for right now so a tick picks it up.
fn due_follow_up_step(phone: &str) -> NewTask {
    NewTask::new(
        "tenant-a",
        phone,
        TaskType::Sms,
        serde_json::json!({
            "to": phone,
            "message": "checking in!",
            "follow_up": {"outcome": "no_answer", "sequence": "no_answer", "step": 0},
        }),
    )
}

#[tokio::test]
async fn opt_out_during_the_delay_cancels_the_step_and_the_rest_of_the_sequence() {
    let (system, leads, sender) = build();

    let due = system
        .queue
        .enqueue(due_follow_up_step("+15550001111"))
        .await
        .unwrap();
    let later = system
        .queue
        .enqueue(
            due_follow_up_step("+15550001111")
                .with_scheduled_for(chrono::Utc::now() + chrono::Duration::hours(24)),
        )
        .await
        .unwrap();

    // Lead opts out while the steps sit on the schedule
    leads.opted_out.store(true, Ordering::SeqCst);

    let summary = system.dispatcher().run_once().await.unwrap();
    assert_eq!(summary.cancelled, 1);
    assert_eq!(sender.calls.load(Ordering::SeqCst), 0);

    let first = system.queue.get(due.id).await.unwrap().unwrap();
    let second = system.queue.get(later.id).await.unwrap().unwrap();
    assert_eq!(first.status, TaskStatus::Cancelled);
    assert_eq!(second.status, TaskStatus::Cancelled);
}

#[tokio::test]
async fn ordinary_tasks_are_unaffected_by_lead_guards() {
    let (system, leads, sender) = build();
    leads.opted_out.store(true, Ordering::SeqCst);

    // No follow-up marker: a booking confirmation must still go out
    let task = system
        .queue
        .enqueue(NewTask::new(
            "tenant-a",
            "+15550001111",
            TaskType::Sms,
            serde_json::json!({"to": "+15550001111", "message": "your receipt"}),
        ))
        .await
        .unwrap();

    let summary = system.dispatcher().run_once().await.unwrap();
    assert_eq!(summary.completed, 1);
    assert_eq!(sender.calls.load(Ordering::SeqCst), 1);
    let stored = system.queue.get(task.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Completed);
}

#[tokio::test]
async fn booking_event_cancels_pending_steps_but_not_completed_ones() {
    let (system, _leads, _sender) = build();

    let tasks = system
        .follow_ups
        .trigger(
            "tenant-a",
            "+15550001111",
            CallOutcome::NoAnswer,
            &LeadContext::default(),
        )
        .await
        .unwrap();
    assert_eq!(tasks.len(), 4);

    // Simulate the first step having already run
    system.queue.complete(tasks[0].id).await.unwrap();

    let cancelled = system
        .follow_ups
        .cancel_for_lead("tenant-a", "+15550001111")
        .await
        .unwrap();
    assert_eq!(cancelled, 3);

    let first = system.queue.get(tasks[0].id).await.unwrap().unwrap();
    assert_eq!(first.status, TaskStatus::Completed);
    for task in &tasks[1..] {
        let stored = system.queue.get(task.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Cancelled);
    }
}
