//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Call to a dependency:
//!     → circuit_breaker.rs (fail fast while open, count outcomes)
//!     → retries.rs (re-run retryable failures with backoff)
//!     → timeouts.rs (deadline per attempt, cancels on expiry)
//!     → operation
//! ```
//!
//! # Design Decisions
//! - Each wrapper works on its own; `stack.rs` composes them in the order above
//! - Every wrapper takes and returns `Result<T, ClassifiedError>`
//! - Circuit state goes through the `CircuitStore` trait so deployments can
//!   share it across processes
//! - Hooks are synchronous callbacks; they must not block

use std::sync::Arc;

pub mod backoff;
pub mod circuit_breaker;
pub mod retries;
pub mod stack;
pub mod store;
pub mod timeouts;

/// Observer invoked with an event payload.
pub type Hook<E> = Arc<dyn Fn(&E) + Send + Sync>;

pub use circuit_breaker::{CallFailure, CallSuccess, CircuitBreaker, StateChange};
pub use retries::{is_retryable, Retry, RetryAttempt, RetryExhausted};
pub use stack::ResilienceStack;
pub use store::{CircuitData, CircuitState, CircuitStore, InMemoryCircuitStore, StoreError};
pub use timeouts::Timeout;
