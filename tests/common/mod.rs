//! Shared utilities for integration tests.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use upstream_guard::config::{Backoff, CircuitBreakerConfig, RetryConfig};
use upstream_guard::resilience::circuit_breaker::now_ms;
use upstream_guard::resilience::{CircuitData, CircuitState, CircuitStore, InMemoryCircuitStore};

/// Counts invocations of a scripted operation. Clones share the count.
#[allow(dead_code)]
#[derive(Clone, Default)]
pub struct CallCounter(Arc<AtomicU32>);

#[allow(dead_code)]
impl CallCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one invocation and return its 1-based number.
    pub fn hit(&self) -> u32 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn count(&self) -> u32 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Retry config without jitter.
#[allow(dead_code)]
pub fn retry_config(max_attempts: u32, backoff: Backoff, base_delay_ms: u64) -> RetryConfig {
    RetryConfig {
        enabled: true,
        max_attempts,
        backoff,
        base_delay_ms,
        max_delay_ms: 60_000,
        max_jitter_ms: 0,
    }
}

#[allow(dead_code)]
pub fn breaker_config(failure_threshold: u32, success_threshold: u32, reset_timeout_ms: u64) -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        enabled: true,
        failure_threshold,
        success_threshold,
        reset_timeout_ms,
    }
}

/// Put `name` in the open state with its reset deadline already behind us.
#[allow(dead_code)]
pub async fn expire_open(store: &InMemoryCircuitStore, name: &str, reset_timeout_ms: u64) {
    let mut data = store.get(name).await.unwrap().unwrap_or_default();
    data.state = CircuitState::Open;
    data.last_failure_at = now_ms().saturating_sub(reset_timeout_ms + 1_000);
    store.set(name, data).await.unwrap();
}

#[allow(dead_code)]
pub async fn state_of(store: &InMemoryCircuitStore, name: &str) -> CircuitData {
    store.get(name).await.unwrap().unwrap_or_default()
}
