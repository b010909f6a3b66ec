//! Circuit breaker for dependency protection.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: dependency assumed down, calls fail fast
//! - Half-Open: trial calls probe whether the dependency recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: failures >= failure_threshold
//! Open → Half-Open: first call after last_failure_at + reset_timeout
//! Half-Open → Closed: successes >= success_threshold
//! Half-Open → Open: any failure
//! ```
//!
//! # Design Decisions
//! - Per-name circuit; state lives in a pluggable `CircuitStore`
//! - No background timer: Open → Half-Open happens lazily on the next call
//! - One read and one write per call; see `store` for the concurrency caveat
//! - A failure caused by the caller cancelling says nothing about the
//!   dependency and is not recorded
//! - Store failures never fail the call: a failed read counts as a fresh
//!   closed circuit, a failed write is logged

use std::future::Future;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio_util::sync::CancellationToken;

use crate::config::CircuitBreakerConfig;
use crate::errors::ClassifiedError;
use crate::observability::metrics;
use crate::resilience::store::{CircuitData, CircuitState, CircuitStore, InMemoryCircuitStore, StoreError};
use crate::resilience::Hook;

/// A circuit moved between states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    pub circuit: String,
    pub from: CircuitState,
    pub to: CircuitState,
    pub failures: u32,
    pub successes: u32,
}

/// A call through the circuit failed.
#[derive(Debug, Clone)]
pub struct CallFailure {
    pub circuit: String,
    pub state: CircuitState,
    pub failures: u32,
    pub error: ClassifiedError,
}

/// A call through the circuit succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSuccess {
    pub circuit: String,
    pub state: CircuitState,
    /// Half-open successes so far.
    pub successes: u32,
    pub success_threshold: u32,
}

/// Which errors count against the circuit.
pub type FailurePredicate = Arc<dyn Fn(&ClassifiedError) -> bool + Send + Sync>;

/// Circuit breaker for one named dependency.
#[derive(Clone)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    store: Arc<dyn CircuitStore>,
    is_failure: FailurePredicate,
    on_state_change: Option<Hook<StateChange>>,
    on_failure: Option<Hook<CallFailure>>,
    on_success: Option<Hook<CallSuccess>>,
}

impl CircuitBreaker {
    /// Breaker with its own in-memory store.
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self::with_store(name, config, Arc::new(InMemoryCircuitStore::new()))
    }

    pub fn with_store(name: impl Into<String>, config: CircuitBreakerConfig, store: Arc<dyn CircuitStore>) -> Self {
        Self {
            name: name.into(),
            config,
            store,
            is_failure: Arc::new(|_| true),
            on_state_change: None,
            on_failure: None,
            on_success: None,
        }
    }

    /// Only errors matching `predicate` count as failures. Others leave the
    /// counters untouched.
    pub fn with_failure_predicate<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&ClassifiedError) -> bool + Send + Sync + 'static,
    {
        self.is_failure = Arc::new(predicate);
        self
    }

    pub fn on_state_change<H>(mut self, hook: H) -> Self
    where
        H: Fn(&StateChange) + Send + Sync + 'static,
    {
        self.on_state_change = Some(Arc::new(hook));
        self
    }

    pub fn on_failure<H>(mut self, hook: H) -> Self
    where
        H: Fn(&CallFailure) + Send + Sync + 'static,
    {
        self.on_failure = Some(Arc::new(hook));
        self
    }

    pub fn on_success<H>(mut self, hook: H) -> Self
    where
        H: Fn(&CallSuccess) + Send + Sync + 'static,
    {
        self.on_success = Some(Arc::new(hook));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current stored state; a circuit never used reads as closed.
    pub async fn snapshot(&self) -> CircuitData {
        self.load().await
    }

    /// Force the circuit closed.
    pub async fn reset(&self) -> Result<(), StoreError> {
        self.store.set(&self.name, CircuitData::default()).await?;
        metrics::record_circuit_state(&self.name, CircuitState::Closed);
        tracing::info!(circuit = %self.name, "Circuit reset");
        Ok(())
    }

    /// Run `op` through the circuit.
    pub async fn call<F, Fut, T>(&self, op: F) -> Result<T, ClassifiedError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ClassifiedError>>,
    {
        self.call_with_parent(None, op).await
    }

    /// Like `call`; a failure returned after `parent` was cancelled leaves
    /// the circuit untouched.
    pub async fn call_with_parent<F, Fut, T>(
        &self,
        parent: Option<&CancellationToken>,
        op: F,
    ) -> Result<T, ClassifiedError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ClassifiedError>>,
    {
        let mut data = self.load().await;

        if data.state == CircuitState::Open {
            let reset_at = data.last_failure_at.saturating_add(self.config.reset_timeout_ms);
            if now_ms() < reset_at {
                tracing::debug!(circuit = %self.name, reset_at, "Circuit open, failing fast");
                metrics::record_circuit_rejected(&self.name);
                return Err(ClassifiedError::circuit_open(&self.name, reset_at));
            }
            self.transition(&mut data, CircuitState::HalfOpen);
        }

        let result = op().await;
        if result.is_err() && parent.is_some_and(CancellationToken::is_cancelled) {
            tracing::debug!(circuit = %self.name, "Call cancelled by caller, outcome not recorded");
            return result;
        }

        match &result {
            Ok(_) => self.record_success(&mut data),
            Err(err) if (self.is_failure)(err) => self.record_failure(&mut data, err),
            Err(_) => {}
        }

        self.save(data).await;
        result
    }

    fn record_success(&self, data: &mut CircuitData) {
        match data.state {
            CircuitState::Closed => data.failures = 0,
            CircuitState::HalfOpen => data.successes = data.successes.saturating_add(1),
            CircuitState::Open => {}
        }

        if let Some(hook) = &self.on_success {
            hook(&CallSuccess {
                circuit: self.name.clone(),
                state: data.state,
                successes: data.successes,
                success_threshold: self.config.success_threshold,
            });
        }

        if data.state == CircuitState::HalfOpen && data.successes >= self.config.success_threshold {
            self.transition(data, CircuitState::Closed);
        }
    }

    fn record_failure(&self, data: &mut CircuitData, err: &ClassifiedError) {
        data.failures = data.failures.saturating_add(1);
        data.last_failure_at = now_ms();

        tracing::debug!(
            circuit = %self.name,
            state = %data.state,
            failures = data.failures,
            code = %err.code(),
            "Call failed"
        );
        if let Some(hook) = &self.on_failure {
            hook(&CallFailure {
                circuit: self.name.clone(),
                state: data.state,
                failures: data.failures,
                error: err.clone(),
            });
        }

        let trips = match data.state {
            CircuitState::Closed => data.failures >= self.config.failure_threshold,
            CircuitState::HalfOpen => true,
            CircuitState::Open => false,
        };
        if trips {
            self.transition(data, CircuitState::Open);
        }
    }

    fn transition(&self, data: &mut CircuitData, to: CircuitState) {
        let from = data.state;
        data.state = to;
        match to {
            CircuitState::Closed => {
                data.failures = 0;
                data.successes = 0;
            }
            CircuitState::Open | CircuitState::HalfOpen => data.successes = 0,
        }

        if to == CircuitState::Open {
            tracing::warn!(circuit = %self.name, from = %from, failures = data.failures, "Circuit opened");
        } else {
            tracing::info!(circuit = %self.name, from = %from, to = %to, "Circuit state changed");
        }
        metrics::record_circuit_transition(&self.name, from, to);

        if let Some(hook) = &self.on_state_change {
            hook(&StateChange {
                circuit: self.name.clone(),
                from,
                to,
                failures: data.failures,
                successes: data.successes,
            });
        }
    }

    async fn load(&self) -> CircuitData {
        match self.store.get(&self.name).await {
            Ok(data) => data.unwrap_or_default(),
            Err(e) => {
                tracing::warn!(circuit = %self.name, error = %e, "Circuit store read failed, assuming closed");
                CircuitData::default()
            }
        }
    }

    async fn save(&self, data: CircuitData) {
        if let Err(e) = self.store.set(&self.name, data).await {
            tracing::warn!(circuit = %self.name, error = %e, "Circuit store write failed");
        }
    }
}

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    fn config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            enabled: true,
            failure_threshold: 3,
            success_threshold: 2,
            reset_timeout_ms: 60_000,
        }
    }

    async fn fail(breaker: &CircuitBreaker) -> ClassifiedError {
        breaker
            .call(|| async { Err::<(), _>(ClassifiedError::network("down")) })
            .await
            .unwrap_err()
    }

    async fn succeed(breaker: &CircuitBreaker) {
        breaker
            .call(|| async { Ok::<_, ClassifiedError>(()) })
            .await
            .unwrap();
    }

    /// Open circuit whose reset deadline already passed.
    async fn expired_open(store: &InMemoryCircuitStore, name: &str) {
        store
            .set(
                name,
                CircuitData {
                    state: CircuitState::Open,
                    failures: 3,
                    successes: 0,
                    last_failure_at: now_ms() - 120_000,
                },
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_opens_after_threshold() {
        let breaker = CircuitBreaker::new("api", config());
        fail(&breaker).await;
        fail(&breaker).await;
        assert_eq!(breaker.snapshot().await.state, CircuitState::Closed);
        fail(&breaker).await;

        let data = breaker.snapshot().await;
        assert_eq!(data.state, CircuitState::Open);
        assert_eq!(data.failures, 3);
    }

    #[tokio::test]
    async fn test_success_resets_failures_when_closed() {
        let breaker = CircuitBreaker::new("api", config());
        fail(&breaker).await;
        fail(&breaker).await;
        succeed(&breaker).await;
        fail(&breaker).await;
        assert_eq!(breaker.snapshot().await.state, CircuitState::Closed);
        assert_eq!(breaker.snapshot().await.failures, 1);
    }

    #[tokio::test]
    async fn test_open_circuit_fails_fast_without_calling() {
        let breaker = CircuitBreaker::new("api", config());
        for _ in 0..3 {
            fail(&breaker).await;
        }

        let calls = AtomicU32::new(0);
        let err = breaker
            .call(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ClassifiedError>(())
            })
            .await
            .unwrap_err();

        assert!(err.is_circuit_open());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        match err.kind() {
            crate::errors::ErrorKind::CircuitOpen { circuit, reset_at_ms } => {
                assert_eq!(circuit, "api");
                let data = breaker.snapshot().await;
                assert_eq!(*reset_at_ms, data.last_failure_at + 60_000);
            }
            other => panic!("unexpected kind {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_half_open_recovers_after_successes() {
        let store = InMemoryCircuitStore::new();
        expired_open(&store, "api").await;
        let breaker = CircuitBreaker::with_store("api", config(), Arc::new(store.clone()));

        succeed(&breaker).await;
        let data = breaker.snapshot().await;
        assert_eq!(data.state, CircuitState::HalfOpen);
        assert_eq!(data.successes, 1);

        succeed(&breaker).await;
        let data = breaker.snapshot().await;
        assert_eq!(data.state, CircuitState::Closed);
        assert_eq!(data.failures, 0);
        assert_eq!(data.successes, 0);
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens() {
        let store = InMemoryCircuitStore::new();
        expired_open(&store, "api").await;
        let breaker = CircuitBreaker::with_store("api", config(), Arc::new(store.clone()));

        succeed(&breaker).await;
        let before = now_ms();
        fail(&breaker).await;

        let data = breaker.snapshot().await;
        assert_eq!(data.state, CircuitState::Open);
        assert_eq!(data.successes, 0);
        assert!(data.last_failure_at >= before);
    }

    #[tokio::test]
    async fn test_hooks_fire() {
        let changes = Arc::new(Mutex::new(Vec::new()));
        let failures = Arc::new(AtomicU32::new(0));
        let successes = Arc::new(AtomicU32::new(0));
        let (c, f, s) = (changes.clone(), failures.clone(), successes.clone());

        let store = InMemoryCircuitStore::new();
        let breaker = CircuitBreaker::with_store("api", config(), Arc::new(store.clone()))
            .on_state_change(move |change| c.lock().unwrap().push((change.from, change.to)))
            .on_failure(move |_| {
                f.fetch_add(1, Ordering::SeqCst);
            })
            .on_success(move |_| {
                s.fetch_add(1, Ordering::SeqCst);
            });

        succeed(&breaker).await;
        for _ in 0..3 {
            fail(&breaker).await;
        }
        expired_open(&store, "api").await;
        succeed(&breaker).await;
        succeed(&breaker).await;

        assert_eq!(failures.load(Ordering::SeqCst), 3);
        assert_eq!(successes.load(Ordering::SeqCst), 3);
        assert_eq!(
            *changes.lock().unwrap(),
            vec![
                (CircuitState::Closed, CircuitState::Open),
                (CircuitState::Open, CircuitState::HalfOpen),
                (CircuitState::HalfOpen, CircuitState::Closed),
            ]
        );
    }

    #[tokio::test]
    async fn test_ignored_errors_do_not_count() {
        let breaker = CircuitBreaker::new("api", config()).with_failure_predicate(|err| err.layer() != crate::errors::Layer::Domain);
        for _ in 0..5 {
            let _ = breaker
                .call(|| async { Err::<(), _>(ClassifiedError::not_found("missing")) })
                .await;
        }
        assert_eq!(breaker.snapshot().await, CircuitData::default());
    }

    #[tokio::test]
    async fn test_reset_after_short_timeout() {
        let breaker = CircuitBreaker::new(
            "api",
            CircuitBreakerConfig {
                failure_threshold: 1,
                reset_timeout_ms: 30,
                ..config()
            },
        );
        fail(&breaker).await;
        assert!(fail(&breaker).await.is_circuit_open());

        tokio::time::sleep(Duration::from_millis(50)).await;
        succeed(&breaker).await;
        assert_eq!(breaker.snapshot().await.state, CircuitState::HalfOpen);
    }

    #[tokio::test]
    async fn test_cancelled_failure_is_not_recorded() {
        let store = InMemoryCircuitStore::new();
        let breaker = CircuitBreaker::with_store(
            "api",
            CircuitBreakerConfig {
                failure_threshold: 1,
                ..config()
            },
            Arc::new(store.clone()),
        );
        let token = CancellationToken::new();

        let err = breaker
            .call_with_parent(Some(&token), || async {
                token.cancel();
                Err::<(), _>(ClassifiedError::timeout(Duration::from_millis(10), true))
            })
            .await
            .unwrap_err();

        assert!(err.is_timeout());
        assert!(store.get("api").await.unwrap().is_none());
        succeed(&breaker).await;
    }

    #[tokio::test]
    async fn test_manual_reset() {
        let breaker = CircuitBreaker::new("api", config());
        for _ in 0..3 {
            fail(&breaker).await;
        }
        breaker.reset().await.unwrap();
        assert_eq!(breaker.snapshot().await, CircuitData::default());
    }

    struct BrokenStore;

    #[async_trait]
    impl CircuitStore for BrokenStore {
        async fn get(&self, _name: &str) -> Result<Option<CircuitData>, StoreError> {
            Err(StoreError::Unavailable("redis down".into()))
        }

        async fn set(&self, _name: &str, _data: CircuitData) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("redis down".into()))
        }
    }

    #[tokio::test]
    async fn test_store_failure_does_not_fail_calls() {
        let breaker = CircuitBreaker::with_store("api", config(), Arc::new(BrokenStore));
        succeed(&breaker).await;
        assert_eq!(fail(&breaker).await.code(), "NETWORK_ERROR");
    }
}
