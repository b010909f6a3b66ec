//! Failure handling for calls to remote dependencies.
//!
//! # Architecture Overview
//!
//! ```text
//!     caller ──▶ resilience::ResilienceStack ──▶ dependency
//!                  breaker → retry → timeout
//!                         │
//!                         ▼ failure (any shape)
//!                 errors::classify ──▶ ClassifiedError
//!                         │
//!                         ▼
//!                 policy::resolve_policy ──▶ Policy (report, alert, expose, level)
//!                         │
//!                         ▼
//!                 transport::TransportMapper ──▶ TransportError (status, code, message)
//! ```

// Error pipeline
pub mod errors;
pub mod policy;
pub mod transport;

// Call protection
pub mod resilience;

// Cross-cutting concerns
pub mod config;
pub mod observability;

pub use config::GuardConfig;
pub use errors::{classify, ClassifiedError, ErrorKind, IntoClassified, Layer, UpstreamMode};
pub use policy::{resolve_policy, LogLevel, Policy};
pub use resilience::{CircuitBreaker, CircuitStore, InMemoryCircuitStore, ResilienceStack, Retry, Timeout};
pub use transport::{to_transport, TransportError, TransportMapper};
