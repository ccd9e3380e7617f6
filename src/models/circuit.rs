//! Circuit state snapshot, keyed by operation name. Created lazily on first
//! use of an operation key and persisted best-effort so a shared store can
//! expose breaker health across dispatcher instances.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitStateRecord {
    /// Operation key the breaker guards, e.g. `sms` or `webhook_replay`.
    pub operation: String,
    /// `closed`, `open` or `half_open`.
    pub state: String,
    pub failure_count: u64,
    pub success_count: u64,
    pub opened_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}
