//! Wire-safe error representation.
//!
//! # Data Flow
//! ```text
//! ClassifiedError + Policy
//!     → mapper (status precedence, message filtering)
//!     → TransportError
//!     → response.rs (JSON body for HTTP adapters)
//! ```
//!
//! # Design Decisions
//! - The only thing that crosses the trust boundary is a `TransportError`
//! - Message and `meta` are copied only when the policy exposes the error;
//!   otherwise a fixed generic message is used
//! - Status precedence is an exhaustive match over the error kind

pub mod registry;
pub mod response;

use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::config::TransportConfig;
use crate::errors::{classify, normalize_code, ClassifiedError, ErrorKind, IntoClassified, Layer, UpstreamMode};
use crate::observability::logging::report_failure;
use crate::observability::metrics;
use crate::policy::{resolve_policy, Policy};

pub use registry::StatusRegistry;

/// Message sent to callers when the policy does not expose the error.
pub const GENERIC_MESSAGE: &str = "An internal error occurred";

/// The error as a caller sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportError {
    pub code: String,
    pub status: u16,
    pub message: String,
    #[serde(skip)]
    pub expose: bool,
    pub layer: Layer,
    pub retryable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
}

/// Maps classified errors to transport errors.
#[derive(Debug, Clone, Default)]
pub struct TransportMapper {
    registry: StatusRegistry,
}

impl TransportMapper {
    pub fn new(registry: StatusRegistry) -> Self {
        Self { registry }
    }

    pub fn from_config(config: &TransportConfig) -> Self {
        Self::new(StatusRegistry::with_overrides(&config.domain_status))
    }

    pub fn registry(&self) -> &StatusRegistry {
        &self.registry
    }

    /// Pure mapping of an error and its policy.
    pub fn map(&self, err: &ClassifiedError, policy: &Policy) -> TransportError {
        let expose = policy.should_expose;
        TransportError {
            code: normalize_code(err.code()),
            status: self.status_for(err),
            message: if expose {
                err.message().to_string()
            } else {
                GENERIC_MESSAGE.to_string()
            },
            expose,
            layer: err.layer(),
            retryable: err.retryable(),
            meta: if expose { err.meta().cloned() } else { None },
        }
    }

    /// Classify, resolve policy, log, and map in one step.
    pub fn handle<F: IntoClassified>(&self, failure: F) -> TransportError {
        let err = classify(failure);
        let policy = resolve_policy(&err);
        report_failure(&err, &policy);
        metrics::record_failure(err.code(), err.layer().as_str());
        self.map(&err, &policy)
    }

    fn status_for(&self, err: &ClassifiedError) -> u16 {
        match err.kind() {
            ErrorKind::Validation => 422,
            ErrorKind::Domain => self.registry.status_for(err.code()),
            ErrorKind::UpstreamResponse {
                status,
                mode: UpstreamMode::Proxy,
                ..
            } => *status,
            ErrorKind::UpstreamResponse {
                status,
                mode: UpstreamMode::Integration,
                ..
            } => {
                // A 4xx from a dependency means we broke its contract.
                if *status >= 500 {
                    503
                } else {
                    502
                }
            }
            ErrorKind::Network => 502,
            ErrorKind::CircuitOpen { .. } => 503,
            ErrorKind::Timeout { retryable, .. } => {
                if *retryable {
                    503
                } else {
                    504
                }
            }
            // 429 must be checked before the generic rule or throttling
            // reads as a contract violation.
            ErrorKind::UpstreamHttp { status: 429 } => 429,
            ErrorKind::UpstreamHttp { .. } => 502,
            ErrorKind::Unexpected => 500,
        }
    }
}

fn default_mapper() -> &'static TransportMapper {
    static MAPPER: OnceLock<TransportMapper> = OnceLock::new();
    MAPPER.get_or_init(TransportMapper::default)
}

/// Map with the default status registry.
pub fn to_transport(err: &ClassifiedError, policy: &Policy) -> TransportError {
    default_mapper().map(err, policy)
}
