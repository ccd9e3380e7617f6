//! # Idempotency Guard
//!
//! Dedup check over (tenant, operation, request content). The request key is
//! a truncated hex hash of `tenant ∥ operation ∥ canonicalize(payload)`;
//! collisions within one tenant+operation+window are an accepted risk and not
//! guarded against further.
//!
//! The check fails OPEN on storage errors: an idempotency lookup must never
//! block a real request because of an infrastructure hiccup.

use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::IdempotencyConfig;
use crate::storage::IdempotencyStore;

/// Result of a duplicate check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DuplicateCheck {
    pub duplicate: bool,
    /// Age of the original request when a duplicate was detected.
    pub original_age: Option<Duration>,
}

impl DuplicateCheck {
    fn not_duplicate() -> Self {
        Self {
            duplicate: false,
            original_age: None,
        }
    }
}

pub struct IdempotencyGuard {
    store: Arc<dyn IdempotencyStore>,
    config: IdempotencyConfig,
}

impl IdempotencyGuard {
    pub fn new(store: Arc<dyn IdempotencyStore>, config: IdempotencyConfig) -> Self {
        Self { store, config }
    }

    /// Deterministic request key: 16 hex chars over tenant, operation and the
    /// canonicalized (key-sorted) JSON payload.
    pub fn request_key(tenant_id: &str, operation: &str, payload: &serde_json::Value) -> String {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        tenant_id.hash(&mut hasher);
        operation.hash(&mut hasher);
        canonicalize(payload).hash(&mut hasher);
        format!("{:016x}", hasher.finish())
    }

    /// Dedup window for an operation, from configuration.
    pub fn window_for(&self, operation: &str) -> Duration {
        self.config.window_for(operation)
    }

    /// Is a request with this key a duplicate within the window?
    pub async fn check(
        &self,
        tenant_id: &str,
        request_key: &str,
        window: Duration,
    ) -> DuplicateCheck {
        match self.store.find(tenant_id, request_key).await {
            Ok(Some(record)) => {
                let age = record.age(Utc::now());
                if age <= window && age >= Duration::zero() {
                    debug!(
                        tenant_id,
                        request_key,
                        age_secs = age.num_seconds(),
                        "duplicate request detected"
                    );
                    DuplicateCheck {
                        duplicate: true,
                        original_age: Some(age),
                    }
                } else {
                    DuplicateCheck::not_duplicate()
                }
            }
            Ok(None) => DuplicateCheck::not_duplicate(),
            Err(err) => {
                // Fail open: report not-duplicate and let the request through
                warn!(
                    tenant_id,
                    request_key,
                    error = %err,
                    "idempotency check failed, failing open"
                );
                DuplicateCheck::not_duplicate()
            }
        }
    }

    /// Record that a request with this key was just executed.
    pub async fn record(
        &self,
        tenant_id: &str,
        request_key: &str,
    ) -> Result<(), crate::error::StorageError> {
        self.store.upsert(tenant_id, request_key, Utc::now()).await
    }
}

/// Stable string form of a JSON value: object keys sorted, no whitespace.
fn canonicalize(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let fields: Vec<String> = keys
                .into_iter()
                .map(|k| {
                    format!(
                        "{}:{}",
                        serde_json::to_string(k).unwrap_or_default(),
                        canonicalize(&map[k])
                    )
                })
                .collect();
            format!("{{{}}}", fields.join(","))
        }
        serde_json::Value::Array(items) => {
            let fields: Vec<String> = items.iter().map(canonicalize).collect();
            format!("[{}]", fields.join(","))
        }
        other => other.to_string(),
    }
}
