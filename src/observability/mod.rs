//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Classifier / policy / wrappers produce:
//!     → logging.rs (structured log events at the policy's level)
//!     → metrics.rs (failure, retry, timeout and circuit counters)
//!
//! Consumers:
//!     → Log aggregation (stdout)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Structured fields (code, layer, circuit) for machine parsing
//! - Metrics go through the `metrics` facade; without an installed
//!   recorder every call is a no-op
//! - Callback hooks on the wrappers are separate from this module and
//!   are meant for callers' own monitoring

pub mod logging;
pub mod metrics;
