//! Operational policy for classified failures.
//!
//! # Responsibilities
//! - Decide log level, reporting, alerting and exposure for a failure
//!
//! # Design Decisions
//! - Pure function of the error; no state, no configuration
//! - Ordered rules, first match wins
//! - Domain failures are expected and exposed; infrastructure and
//!   application failures are incidents and stay behind the trust boundary

use serde::{Deserialize, Serialize};

use crate::errors::{ClassifiedError, ErrorKind, Layer, UpstreamMode};

/// Severity at which a failure is logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// What to do about a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    pub should_report: bool,
    pub should_alert: bool,
    pub should_expose: bool,
    pub log_level: LogLevel,
}

impl Policy {
    const fn new(should_report: bool, should_alert: bool, should_expose: bool, log_level: LogLevel) -> Self {
        Self {
            should_report,
            should_alert,
            should_expose,
            log_level,
        }
    }
}

/// Resolve the policy for a failure.
pub fn resolve_policy(err: &ClassifiedError) -> Policy {
    match err.kind() {
        ErrorKind::Validation => Policy::new(false, false, true, LogLevel::Info),
        ErrorKind::UpstreamResponse {
            status,
            mode: UpstreamMode::Proxy,
            ..
        } => {
            let level = if *status >= 500 { LogLevel::Warn } else { LogLevel::Info };
            Policy::new(false, false, true, level)
        }
        ErrorKind::UpstreamResponse {
            status,
            mode: UpstreamMode::Integration,
            ..
        } => Policy::new(true, *status >= 500, false, LogLevel::Error),
        _ => match err.layer() {
            Layer::Domain => Policy::new(false, false, true, LogLevel::Warn),
            Layer::Infrastructure => Policy::new(true, !err.retryable(), false, LogLevel::Error),
            Layer::Application => Policy::new(true, true, false, LogLevel::Error),
        },
    }
}
