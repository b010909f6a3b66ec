//! Retry logic.
//!
//! # Responsibilities
//! - Re-run a failed call up to `max_attempts` times
//! - Decide per failure whether another attempt is worth it
//! - Wait a jittered backoff delay between attempts
//!
//! # Design Decisions
//! - Non-retryable failures return at once and consume no attempts
//! - The final failure is returned unchanged, never wrapped
//! - Delays suspend only the calling task
//! - A cancelled caller gets the last failure back at once: no further
//!   attempts, no remaining backoff

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::config::RetryConfig;
use crate::errors::{ClassifiedError, ErrorKind};
use crate::observability::metrics;
use crate::resilience::backoff::calculate_backoff;
use crate::resilience::Hook;

/// Decides whether a failure of attempt `n` deserves another attempt.
pub type RetryPredicate = Arc<dyn Fn(&ClassifiedError, u32) -> bool + Send + Sync>;

/// Retry on timeouts, connectivity failures and upstream 5xx.
pub fn is_retryable(err: &ClassifiedError, _attempt: u32) -> bool {
    match err.kind() {
        ErrorKind::Timeout { .. } | ErrorKind::Network => true,
        _ => err.upstream_status().is_some_and(|status| status >= 500),
    }
}

/// A retry about to be scheduled.
#[derive(Debug, Clone)]
pub struct RetryAttempt {
    /// The attempt that just failed.
    pub attempt: u32,
    pub delay: Duration,
    pub error: ClassifiedError,
}

/// Every attempt was used.
#[derive(Debug, Clone)]
pub struct RetryExhausted {
    pub attempts: u32,
    pub elapsed: Duration,
    pub error: ClassifiedError,
}

/// Retry wrapper.
#[derive(Clone)]
pub struct Retry {
    config: RetryConfig,
    predicate: RetryPredicate,
    on_retry: Option<Hook<RetryAttempt>>,
    on_exhausted: Option<Hook<RetryExhausted>>,
}

impl Retry {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            predicate: Arc::new(is_retryable),
            on_retry: None,
            on_exhausted: None,
        }
    }

    pub fn with_predicate<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&ClassifiedError, u32) -> bool + Send + Sync + 'static,
    {
        self.predicate = Arc::new(predicate);
        self
    }

    pub fn on_retry<H>(mut self, hook: H) -> Self
    where
        H: Fn(&RetryAttempt) + Send + Sync + 'static,
    {
        self.on_retry = Some(Arc::new(hook));
        self
    }

    pub fn on_exhausted<H>(mut self, hook: H) -> Self
    where
        H: Fn(&RetryExhausted) + Send + Sync + 'static,
    {
        self.on_exhausted = Some(Arc::new(hook));
        self
    }

    /// Attempts allowed per call; 1 when retries are disabled.
    pub fn max_attempts(&self) -> u32 {
        if self.config.enabled {
            self.config.max_attempts.max(1)
        } else {
            1
        }
    }

    /// Run `op` until it succeeds, fails for good, or runs out of attempts.
    pub async fn call<F, Fut, T>(&self, op: F) -> Result<T, ClassifiedError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ClassifiedError>>,
    {
        self.call_until(None, op).await
    }

    /// Like `call`, but stops retrying once `cancel` fires.
    pub async fn call_until<F, Fut, T>(
        &self,
        cancel: Option<&CancellationToken>,
        mut op: F,
    ) -> Result<T, ClassifiedError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ClassifiedError>>,
    {
        let max_attempts = self.max_attempts();
        let started = Instant::now();
        let mut attempt = 1;

        loop {
            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if cancel.is_some_and(CancellationToken::is_cancelled) {
                tracing::debug!(attempt, code = %err.code(), "Caller cancelled, not retrying");
                return Err(err);
            }

            if attempt >= max_attempts {
                let elapsed = started.elapsed();
                if max_attempts > 1 {
                    tracing::warn!(
                        attempts = attempt,
                        elapsed_ms = elapsed.as_millis() as u64,
                        code = %err.code(),
                        "Retries exhausted"
                    );
                    metrics::record_retries_exhausted();
                }
                if let Some(hook) = &self.on_exhausted {
                    hook(&RetryExhausted {
                        attempts: attempt,
                        elapsed,
                        error: err.clone(),
                    });
                }
                return Err(err);
            }

            if !(self.predicate)(&err, attempt) {
                tracing::debug!(attempt, code = %err.code(), "Failure is not retryable");
                return Err(err);
            }

            let next = attempt + 1;
            let delay = calculate_backoff(
                self.config.backoff,
                next,
                self.config.base_delay_ms,
                self.config.max_delay_ms,
                self.config.max_jitter_ms,
            );
            tracing::info!(attempt, delay = ?delay, code = %err.code(), "Retrying after failure");
            metrics::record_retry(next);
            if let Some(hook) = &self.on_retry {
                hook(&RetryAttempt {
                    attempt,
                    delay,
                    error: err.clone(),
                });
            }

            match cancel {
                Some(token) => tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = token.cancelled() => {
                        tracing::debug!(attempt, "Caller cancelled during backoff");
                        return Err(err);
                    }
                },
                None => tokio::time::sleep(delay).await,
            }
            attempt = next;
        }
    }
}

impl Default for Retry {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Backoff;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    fn quick(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            enabled: true,
            max_attempts,
            backoff: Backoff::Fixed,
            base_delay_ms: 1,
            max_delay_ms: 10,
            max_jitter_ms: 0,
        }
    }

    #[test]
    fn test_default_predicate() {
        assert!(is_retryable(&ClassifiedError::timeout(Duration::from_secs(1), false), 1));
        assert!(is_retryable(&ClassifiedError::network("reset"), 1));
        assert!(is_retryable(&ClassifiedError::upstream_http(503, "down"), 1));
        assert!(!is_retryable(&ClassifiedError::upstream_http(429, "slow"), 1));
        assert!(!is_retryable(&ClassifiedError::not_found("gone"), 1));
        assert!(!is_retryable(&ClassifiedError::circuit_open("db", 0), 1));
        assert!(!is_retryable(&ClassifiedError::unexpected("boom"), 1));
    }

    #[tokio::test]
    async fn test_always_failing_uses_every_attempt() {
        let calls = AtomicU32::new(0);
        let exhausted = Arc::new(Mutex::new(None));
        let seen = exhausted.clone();
        let retry = Retry::new(quick(3)).on_exhausted(move |e| {
            *seen.lock().unwrap() = Some(e.attempts);
        });

        let result: Result<(), _> = retry
            .call(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ClassifiedError::upstream_http(502, "bad gateway"))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(*exhausted.lock().unwrap(), Some(3));
    }

    #[tokio::test]
    async fn test_non_retryable_runs_once() {
        let calls = AtomicU32::new(0);
        let exhausted = Arc::new(AtomicU32::new(0));
        let counter = exhausted.clone();
        let retry = Retry::new(quick(3)).on_exhausted(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let err = retry
            .call(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(ClassifiedError::not_found("missing"))
            })
            .await
            .unwrap_err();

        assert_eq!(err.code(), "NOT_FOUND");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(exhausted.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_recovers_on_later_attempt() {
        let calls = AtomicU32::new(0);
        let retry = Retry::new(quick(5));

        let value = retry
            .call(|| async {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(ClassifiedError::network("reset"))
                } else {
                    Ok(n)
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 3);
    }

    #[tokio::test]
    async fn test_retry_hook_sees_delays() {
        let delays = Arc::new(Mutex::new(Vec::new()));
        let seen = delays.clone();
        let config = RetryConfig {
            backoff: Backoff::Linear,
            base_delay_ms: 5,
            ..quick(3)
        };
        let retry = Retry::new(config).on_retry(move |r| {
            seen.lock().unwrap().push((r.attempt, r.delay));
        });

        let _ = retry
            .call(|| async { Err::<(), _>(ClassifiedError::network("down")) })
            .await;

        assert_eq!(
            *delays.lock().unwrap(),
            vec![(1, Duration::from_millis(10)), (2, Duration::from_millis(10))]
        );
    }

    #[tokio::test]
    async fn test_custom_predicate() {
        let calls = AtomicU32::new(0);
        let retry = Retry::new(quick(4)).with_predicate(|err, _| err.code() == "CONFLICT");

        let _ = retry
            .call(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(ClassifiedError::conflict("busy"))
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_cancelled_caller_is_not_retried() {
        let calls = AtomicU32::new(0);
        let token = CancellationToken::new();
        let exhausted = Arc::new(AtomicU32::new(0));
        let counter = exhausted.clone();
        let retry = Retry::new(quick(5)).on_exhausted(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let err = retry
            .call_until(Some(&token), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                token.cancel();
                Err::<(), _>(ClassifiedError::network("reset"))
            })
            .await
            .unwrap_err();

        assert_eq!(err.code(), "NETWORK_ERROR");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(exhausted.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancel_cuts_backoff_short() {
        let calls = AtomicU32::new(0);
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            trigger.cancel();
        });
        let retry = Retry::new(RetryConfig {
            base_delay_ms: 5_000,
            max_delay_ms: 10_000,
            ..quick(3)
        });
        let started = Instant::now();

        let err = retry
            .call_until(Some(&token), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(ClassifiedError::upstream_http(503, "down"))
            })
            .await
            .unwrap_err();

        assert_eq!(err.upstream_status(), Some(503));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_disabled_means_single_attempt() {
        let calls = AtomicU32::new(0);
        let retry = Retry::new(RetryConfig {
            enabled: false,
            ..quick(3)
        });

        let _ = retry
            .call(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(ClassifiedError::network("down"))
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
