//! # Task Model
//!
//! A task is one unit of deferred, durable, side-effecting work: an AI call,
//! an SMS, an email or a webhook replay. Tasks carry their own retry budget
//! and schedule and are mutated only through the transitions
//! [`crate::queue::PriorityTaskQueue`] defines. Rows are never deleted; a task
//! that will never run again is terminal-stated (`completed`, `failed`,
//! `cancelled`) so the audit trail stays append-only.
//!
//! ## Invariant
//!
//! `attempt_count <= max_attempts` while status is `pending` or `processing`.
//! The transition that would break it instead moves the task to `failed` and
//! hands it to the dead-letter sink.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::dead_letter::AttemptError;

/// Lifecycle states of a durable task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting for its `scheduled_for` time.
    Pending,
    /// Claimed by exactly one dispatcher worker.
    Processing,
    /// Executed successfully.
    Completed,
    /// Retries exhausted or non-retryable failure; a DLQ entry exists.
    Failed,
    /// Withdrawn before dispatch (opt-out, booking, operator action).
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// The outbound channel or replay kind a task executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Call,
    Sms,
    Email,
    WebhookReplay,
    Booking,
    Reminder,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Call => "call",
            Self::Sms => "sms",
            Self::Email => "email",
            Self::WebhookReplay => "webhook_replay",
            Self::Booking => "booking",
            Self::Reminder => "reminder",
        }
    }

    /// Operation key used for circuit breakers and idempotency windows.
    pub fn operation_key(&self) -> &'static str {
        self.as_str()
    }
}

impl std::str::FromStr for TaskType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "call" => Ok(Self::Call),
            "sms" => Ok(Self::Sms),
            "email" => Ok(Self::Email),
            "webhook_replay" => Ok(Self::WebhookReplay),
            "booking" => Ok(Self::Booking),
            "reminder" => Ok(Self::Reminder),
            other => Err(format!("unknown task type: {other}")),
        }
    }
}

/// Urgency bands with canonical ranks; lower rank dispatches first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    High,
    Normal,
    Low,
}

impl TaskPriority {
    /// Canonical rank: high=1, normal=5, low=10.
    pub fn rank(&self) -> i32 {
        match self {
            Self::High => 1,
            Self::Normal => 5,
            Self::Low => 10,
        }
    }
}

impl Default for TaskPriority {
    fn default() -> Self {
        Self::Normal
    }
}

/// A durable unit of deferred work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub tenant_id: String,
    /// Correlation key for the affected subject, e.g. the lead phone number.
    pub subject_key: String,
    pub task_type: TaskType,
    /// Opaque execution payload; the queue never inspects it beyond markers.
    pub payload: serde_json::Value,
    /// Priority rank (lower = more urgent).
    pub priority: i32,
    pub scheduled_for: DateTime<Utc>,
    pub status: TaskStatus,
    pub attempt_count: i32,
    pub max_attempts: i32,
    /// Ordered record of every failed attempt, oldest first.
    pub error_history: Vec<AttemptError>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn attempts_remaining(&self) -> bool {
        self.attempt_count < self.max_attempts
    }

    pub fn last_error(&self) -> Option<&AttemptError> {
        self.error_history.last()
    }

    /// Marker the follow-up orchestrator stamps on sequence steps so the
    /// dispatcher knows to re-check opt-out/booking guards before executing.
    pub fn follow_up_outcome(&self) -> Option<&str> {
        self.payload
            .get("follow_up")
            .and_then(|f| f.get("outcome"))
            .and_then(|o| o.as_str())
    }
}

/// Fields a caller supplies when enqueuing; the queue fills in the rest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTask {
    pub tenant_id: String,
    pub subject_key: String,
    pub task_type: TaskType,
    pub payload: serde_json::Value,
    #[serde(default)]
    pub priority: TaskPriority,
    /// Defaults to now when absent.
    pub scheduled_for: Option<DateTime<Utc>>,
    /// Defaults to the queue-configured retry budget when absent.
    pub max_attempts: Option<i32>,
}

impl NewTask {
    pub fn new(
        tenant_id: impl Into<String>,
        subject_key: impl Into<String>,
        task_type: TaskType,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            subject_key: subject_key.into(),
            task_type,
            payload,
            priority: TaskPriority::Normal,
            scheduled_for: None,
            max_attempts: None,
        }
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_scheduled_for(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_for = Some(at);
        self
    }

    pub fn with_max_attempts(mut self, max: i32) -> Self {
        self.max_attempts = Some(max);
        self
    }
}
