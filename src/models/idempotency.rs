//! Idempotency record: one row per (tenant, request key), upserted on every
//! sighting. A match younger than the operation's window marks a duplicate.
//! There are no relationships to other entities; the record is purely
//! time-windowed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub tenant_id: String,
    /// Truncated hex hash of tenant ∥ operation ∥ canonicalized payload.
    pub request_key: String,
    pub created_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.created_at
    }
}
