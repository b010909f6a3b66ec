//! Structured logging.
//!
//! # Responsibilities
//! - Initialize logging subsystem
//! - Log classified failures at the level their policy asks for
//!
//! # Design Decisions
//! - Uses tracing crate for structured logging
//! - `RUST_LOG` overrides the configured level
//! - Internal detail and cause are logged, never returned to callers

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, util::TryInitError, EnvFilter};

use crate::config::ObservabilityConfig;
use crate::errors::ClassifiedError;
use crate::policy::{LogLevel, Policy};

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(config: &ObservabilityConfig) -> Result<(), TryInitError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("upstream_guard={}", config.log_level)));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
}

macro_rules! failure_event {
    ($level:ident, $err:expr, $policy:expr) => {
        tracing::$level!(
            code = %$err.code(),
            layer = %$err.layer(),
            retryable = $err.retryable(),
            report = $policy.should_report,
            alert = $policy.should_alert,
            status = ?$err.upstream_status(),
            detail = ?$err.detail(),
            cause = ?$err.cause().map(|c| c.to_string()),
            "{}",
            $err.message()
        )
    };
}

/// Emit one event for a failure at the policy's log level.
pub fn report_failure(err: &ClassifiedError, policy: &Policy) {
    match policy.log_level {
        LogLevel::Info => failure_event!(info, err, policy),
        LogLevel::Warn => failure_event!(warn, err, policy),
        LogLevel::Error => failure_event!(error, err, policy),
    }
}
