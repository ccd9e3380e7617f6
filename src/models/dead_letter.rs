//! # Dead Letter Model
//!
//! Terminal record for work that exhausted its automatic retry budget or hit
//! a non-retryable failure. Entries are created only by the queue's failed
//! transition, mutated only by operator retry/resolve, and cleaned up only
//! after they have been resolved for the retention period.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One failed attempt: when it happened and what the downstream said.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptError {
    pub at: DateTime<Utc>,
    pub message: String,
}

impl AttemptError {
    pub fn now(message: impl Into<String>) -> Self {
        Self {
            at: Utc::now(),
            message: message.into(),
        }
    }
}

/// Durable quarantine record referencing the task that failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub id: Uuid,
    pub task_id: Uuid,
    pub tenant_id: String,
    pub subject_key: String,
    /// Task type string at time of failure, e.g. `sms` or `webhook_replay`.
    pub operation_type: String,
    /// Payload snapshot so an operator retry does not depend on the task row.
    pub payload: serde_json::Value,
    /// Ordered error history copied from the task, oldest first. Operator
    /// retry failures are appended here as well.
    pub error_history: Vec<AttemptError>,
    pub failure_reason: String,
    pub attempt_count: i32,
    pub max_attempts: i32,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolution_notes: Option<String>,
}

impl DeadLetterEntry {
    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }
}

/// Filters for listing dead-letter entries. All fields are optional and
/// combined with AND; pagination is offset-based.
#[derive(Debug, Clone, Default)]
pub struct DeadLetterFilter {
    pub tenant_id: Option<String>,
    pub operation_type: Option<String>,
    pub resolved: Option<bool>,
    pub offset: usize,
    pub limit: usize,
}

impl DeadLetterFilter {
    pub fn effective_limit(&self) -> usize {
        if self.limit == 0 {
            50
        } else {
            self.limit
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_limit_falls_back_to_default_page_size() {
        let filter = DeadLetterFilter::default();
        assert_eq!(filter.effective_limit(), 50);

        let filter = DeadLetterFilter {
            limit: 10,
            ..Default::default()
        };
        assert_eq!(filter.effective_limit(), 10);
    }
}
