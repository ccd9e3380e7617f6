//! Keyed registry of circuit breakers, created lazily on first use of an
//! operation name and shared across dispatcher workers.

use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;

use crate::events::EventPublisher;
use crate::models::CircuitStateRecord;
use crate::resilience::{CircuitBreaker, CircuitBreakerConfig};
use crate::storage::CircuitStateStore;

pub struct CircuitBreakerManager {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    default_config: CircuitBreakerConfig,
    /// Per-operation threshold/cooldown overrides, keyed by operation name.
    overrides: HashMap<String, CircuitBreakerConfig>,
    publisher: EventPublisher,
    snapshot_store: Option<Arc<dyn CircuitStateStore>>,
}

impl CircuitBreakerManager {
    pub fn new(
        default_config: CircuitBreakerConfig,
        overrides: HashMap<String, CircuitBreakerConfig>,
        publisher: EventPublisher,
        snapshot_store: Option<Arc<dyn CircuitStateStore>>,
    ) -> Self {
        Self {
            breakers: DashMap::new(),
            default_config,
            overrides,
            publisher,
            snapshot_store,
        }
    }

    /// Breaker for the given operation key, creating it on first use.
    pub fn breaker_for(&self, operation: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(operation.to_string())
            .or_insert_with(|| {
                let config = self
                    .overrides
                    .get(operation)
                    .copied()
                    .unwrap_or(self.default_config);
                Arc::new(CircuitBreaker::new(
                    operation.to_string(),
                    config,
                    self.publisher.clone(),
                    self.snapshot_store.clone(),
                ))
            })
            .clone()
    }

    /// Snapshot every known breaker, for diagnostics endpoints.
    pub async fn snapshots(&self) -> Vec<CircuitStateRecord> {
        let breakers: Vec<Arc<CircuitBreaker>> =
            self.breakers.iter().map(|e| e.value().clone()).collect();
        let mut records = Vec::with_capacity(breakers.len());
        for breaker in breakers {
            records.push(breaker.snapshot().await);
        }
        records.sort_by(|a, b| a.operation.cmp(&b.operation));
        records
    }
}
