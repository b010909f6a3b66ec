//! Composed resilience for one dependency.
//!
//! # Design Decisions
//! - Order is fixed: breaker outside, then retry, then a deadline per attempt
//! - The breaker sees one outcome per logical call, after retries are spent
//! - A disabled layer is skipped entirely
//! - Cancelling the caller's token ends the call: no new attempt starts,
//!   backoff is cut short and the breaker does not count it

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::GuardConfig;
use crate::errors::ClassifiedError;
use crate::resilience::{CircuitBreaker, CircuitStore, Retry, Timeout};

/// Breaker, retry and timeout wrapped around each call.
#[derive(Clone)]
pub struct ResilienceStack {
    name: String,
    timeout: Option<Timeout>,
    retry: Retry,
    breaker: Option<CircuitBreaker>,
}

impl ResilienceStack {
    pub fn new(
        name: impl Into<String>,
        timeout: Option<Timeout>,
        retry: Retry,
        breaker: Option<CircuitBreaker>,
    ) -> Self {
        Self {
            name: name.into(),
            timeout,
            retry,
            breaker,
        }
    }

    /// Build every enabled layer from `config`. The breaker keeps its state in `store`.
    pub fn from_config(config: &GuardConfig, store: Arc<dyn CircuitStore>) -> Self {
        let name = config.upstream.name.clone();
        let timeout = config
            .timeout
            .enabled
            .then(|| Timeout::from_config(&config.timeout));
        let breaker = config
            .circuit_breaker
            .enabled
            .then(|| CircuitBreaker::with_store(name.clone(), config.circuit_breaker.clone(), store));

        tracing::debug!(
            upstream = %name,
            timeout = timeout.is_some(),
            retry_attempts = config.retry.max_attempts,
            breaker = breaker.is_some(),
            "Built resilience stack"
        );

        Self::new(name, timeout, Retry::new(config.retry.clone()), breaker)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn timeout(&self) -> Option<&Timeout> {
        self.timeout.as_ref()
    }

    pub fn retry(&self) -> &Retry {
        &self.retry
    }

    pub fn breaker(&self) -> Option<&CircuitBreaker> {
        self.breaker.as_ref()
    }

    /// Run `op` through every layer. `op` is invoked once per attempt with
    /// a token cancelled when that attempt's deadline passes.
    pub async fn call<F, Fut, T>(&self, op: F) -> Result<T, ClassifiedError>
    where
        F: Fn(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, ClassifiedError>>,
    {
        self.call_with_parent(None, op).await
    }

    /// Like `call`; cancelling `parent` aborts the current attempt.
    pub async fn call_with_parent<F, Fut, T>(
        &self,
        parent: Option<&CancellationToken>,
        op: F,
    ) -> Result<T, ClassifiedError>
    where
        F: Fn(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, ClassifiedError>>,
    {
        if parent.is_some_and(CancellationToken::is_cancelled) {
            tracing::debug!(upstream = %self.name, "Caller cancelled before the call started");
            return Err(self.cancelled());
        }

        let op = &op;
        let timeout = self.timeout.as_ref();
        let attempt = move || async move {
            match timeout {
                Some(timeout) => timeout.call_with_parent(parent, op).await,
                None => {
                    let token = parent.map_or_else(CancellationToken::new, CancellationToken::child_token);
                    op(token).await
                }
            }
        };
        let retry = &self.retry;
        let retried = move || retry.call_until(parent, attempt);

        match &self.breaker {
            Some(breaker) => breaker.call_with_parent(parent, retried).await,
            None => retried().await,
        }
    }

    fn cancelled(&self) -> ClassifiedError {
        match &self.timeout {
            Some(timeout) => timeout.expired(),
            None => ClassifiedError::timeout(Duration::ZERO, false),
        }
    }
}
