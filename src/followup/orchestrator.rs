//! Sequence trigger, materialization, and dispatch-time guard re-check.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use super::sequences::sequence_for;
use super::CallOutcome;
use crate::error::Result;
use crate::models::{NewTask, Task};
use crate::queue::{DispatchGuard, GuardVerdict, PriorityTaskQueue};
use crate::services::LeadStatusProvider;

/// Variables available to sequence templates. Anything left `None` renders as
/// a generic default instead of a literal `{placeholder}`.
#[derive(Debug, Clone, Default)]
pub struct LeadContext {
    pub name: Option<String>,
    pub business_name: Option<String>,
    pub service: Option<String>,
    pub business_phone: Option<String>,
    pub booking_link: Option<String>,
    pub benefits: Vec<String>,
}

impl LeadContext {
    fn render(&self, template: &str) -> String {
        let benefit = |i: usize, fallback: &str| {
            self.benefits
                .get(i)
                .map(String::as_str)
                .unwrap_or(fallback)
                .to_string()
        };
        template
            .replace("{name}", self.name.as_deref().unwrap_or("there"))
            .replace(
                "{businessName}",
                self.business_name.as_deref().unwrap_or("our team"),
            )
            .replace(
                "{service}",
                self.service.as_deref().unwrap_or("your appointment"),
            )
            .replace(
                "{businessPhone}",
                self.business_phone.as_deref().unwrap_or("our main line"),
            )
            .replace(
                "{bookingLink}",
                self.booking_link.as_deref().unwrap_or("our booking page"),
            )
            .replace("{benefit1}", &benefit(0, "great service"))
            .replace("{benefit2}", &benefit(1, "flexible scheduling"))
            .replace("{benefit3}", &benefit(2, "fair pricing"))
    }
}

pub struct FollowUpOrchestrator {
    queue: Arc<PriorityTaskQueue>,
    leads: Arc<dyn LeadStatusProvider>,
}

impl FollowUpOrchestrator {
    pub fn new(queue: Arc<PriorityTaskQueue>, leads: Arc<dyn LeadStatusProvider>) -> Self {
        Self { queue, leads }
    }

    /// Map a call outcome to its sequence and enqueue every step, scheduled
    /// from now. Returns the created tasks; an empty vec means the trigger
    /// was skipped by a guard or an already-active sequence, which is normal.
    #[instrument(skip(self, context), fields(tenant_id, lead_phone, outcome = outcome.as_str()))]
    pub async fn trigger(
        &self,
        tenant_id: &str,
        lead_phone: &str,
        outcome: CallOutcome,
        context: &LeadContext,
    ) -> Result<Vec<Task>> {
        if self.guard_blocks(tenant_id, lead_phone).await {
            info!(tenant_id, lead_phone, "follow-up skipped by pre-flight guard");
            return Ok(Vec::new());
        }

        // An active sequence makes a re-trigger a no-op rather than stacking
        // a second overlapping sequence onto the same lead.
        let pending = self.queue.pending_for_subject(tenant_id, lead_phone).await?;
        if pending.iter().any(|t| t.follow_up_outcome().is_some()) {
            info!(
                tenant_id,
                lead_phone, "follow-up already active, trigger skipped"
            );
            return Ok(Vec::new());
        }

        let sequence = sequence_for(outcome);
        let start = Utc::now();
        let mut tasks = Vec::with_capacity(sequence.steps.len());
        for (index, step) in sequence.steps.iter().enumerate() {
            let delay = ChronoDuration::from_std(step.delay)
                .unwrap_or_else(|_| ChronoDuration::seconds(0));
            let payload = json!({
                "to": lead_phone,
                "message": context.render(step.template),
                "follow_up": {
                    "outcome": outcome.as_str(),
                    "sequence": sequence.name,
                    "step": index,
                    "next_action": step.next_action,
                },
            });
            let task = self
                .queue
                .enqueue(
                    NewTask::new(tenant_id, lead_phone, step.channel, payload)
                        .with_scheduled_for(start + delay),
                )
                .await?;
            tasks.push(task);
        }

        info!(
            tenant_id,
            lead_phone,
            sequence = sequence.name,
            steps = tasks.len(),
            "follow-up sequence scheduled"
        );
        Ok(tasks)
    }

    /// Cancel every not-yet-dispatched step for a lead, across sequences.
    /// Steps already claimed by a dispatcher finish on their own.
    pub async fn cancel_for_lead(&self, tenant_id: &str, lead_phone: &str) -> Result<u64> {
        self.queue.cancel_pending(tenant_id, lead_phone).await
    }

    async fn guard_blocks(&self, tenant_id: &str, lead_phone: &str) -> bool {
        match self.leads.is_opted_out(lead_phone).await {
            Ok(true) => return true,
            Ok(false) => {}
            Err(err) => {
                warn!(error = %err, "opt-out check failed, allowing follow-up");
            }
        }
        match self.leads.has_future_booking(tenant_id, lead_phone).await {
            Ok(true) => true,
            Ok(false) => false,
            Err(err) => {
                warn!(error = %err, "booking check failed, allowing follow-up");
                false
            }
        }
    }
}

/// Dispatch-time re-check of the pre-flight guards. Lead state may have
/// changed while a step sat on the schedule; a guard failing now cancels this
/// step and every remaining one instead of executing first.
pub struct FollowUpGuard {
    leads: Arc<dyn LeadStatusProvider>,
}

impl FollowUpGuard {
    pub fn new(leads: Arc<dyn LeadStatusProvider>) -> Self {
        Self { leads }
    }
}

#[async_trait]
impl DispatchGuard for FollowUpGuard {
    async fn inspect(&self, task: &Task) -> Result<GuardVerdict> {
        if task.follow_up_outcome().is_none() {
            return Ok(GuardVerdict::Proceed);
        }

        match self.leads.is_opted_out(&task.subject_key).await {
            Ok(true) => {
                return Ok(GuardVerdict::CancelRemaining {
                    reason: "lead opted out".into(),
                })
            }
            Ok(false) => {}
            Err(err) => {
                warn!(error = %err, "opt-out re-check failed, allowing dispatch");
            }
        }

        match self
            .leads
            .has_future_booking(&task.tenant_id, &task.subject_key)
            .await
        {
            Ok(true) => Ok(GuardVerdict::CancelRemaining {
                reason: "lead already booked".into(),
            }),
            Ok(false) => Ok(GuardVerdict::Proceed),
            Err(err) => {
                warn!(error = %err, "booking re-check failed, allowing dispatch");
                Ok(GuardVerdict::Proceed)
            }
        }
    }
}
