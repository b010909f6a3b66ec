//! Timeout enforcement.
//!
//! # Responsibilities
//! - Wrap a call with a wall-clock deadline
//! - Cancel the call when the deadline or the caller's token fires
//! - Report expiry as a `TIMEOUT` error carrying the configured duration
//!
//! # Design Decisions
//! - The operation receives a child `CancellationToken`; cancelling the
//!   caller's token cancels it too, so either source aborts the call
//! - On expiry the in-flight future is dropped. Work it handed off elsewhere
//!   (spawned tasks, threads) keeps running unless it watches the token.
//! - The deadline timer lives in this call's frame and is dropped on every
//!   exit path

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::TimeoutConfig;
use crate::errors::ClassifiedError;
use crate::observability::metrics;

/// Deadline wrapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeout {
    duration: Duration,
    retryable: bool,
}

impl Timeout {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            retryable: true,
        }
    }

    pub fn from_config(config: &TimeoutConfig) -> Self {
        Self {
            duration: config.duration(),
            retryable: config.retryable,
        }
    }

    /// Mark timeouts from this wrapper as not worth retrying.
    pub fn non_retryable(mut self) -> Self {
        self.retryable = false;
        self
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub async fn call<F, Fut, T>(&self, op: F) -> Result<T, ClassifiedError>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, ClassifiedError>>,
    {
        self.call_with_parent(None, op).await
    }

    /// Like `call`, also aborting when `parent` is cancelled.
    pub async fn call_with_parent<F, Fut, T>(
        &self,
        parent: Option<&CancellationToken>,
        op: F,
    ) -> Result<T, ClassifiedError>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, ClassifiedError>>,
    {
        let token = match parent {
            Some(parent) => parent.child_token(),
            None => CancellationToken::new(),
        };
        if token.is_cancelled() {
            tracing::debug!("Caller cancelled before the operation started");
            return Err(self.expired());
        }

        let operation = op(token.clone());
        tokio::pin!(operation);
        let deadline = tokio::time::sleep(self.duration);
        tokio::pin!(deadline);

        tokio::select! {
            biased;
            outcome = &mut operation => match outcome {
                // The operation noticed the cancellation before we did.
                Err(_) if token.is_cancelled() => Err(self.expired()),
                other => other,
            },
            _ = &mut deadline => {
                token.cancel();
                tracing::warn!(timeout_ms = self.duration.as_millis() as u64, "Operation timed out, cancelling");
                metrics::record_timeout();
                Err(self.expired())
            }
            _ = token.cancelled() => {
                tracing::debug!("Operation cancelled by caller");
                Err(self.expired())
            }
        }
    }

    pub(crate) fn expired(&self) -> ClassifiedError {
        ClassifiedError::timeout(self.duration, self.retryable)
    }
}

impl Default for Timeout {
    fn default() -> Self {
        Self::from_config(&TimeoutConfig::default())
    }
}
