//! Typed, attributed errors.

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable machine tokens for the built-in families.
pub mod codes {
    pub const VALIDATION: &str = "VALIDATION_ERROR";
    pub const DOMAIN: &str = "DOMAIN_ERROR";
    pub const NOT_FOUND: &str = "NOT_FOUND";
    pub const CONFLICT: &str = "CONFLICT";
    pub const UNAUTHORIZED: &str = "UNAUTHORIZED";
    pub const FORBIDDEN: &str = "FORBIDDEN";
    pub const UPSTREAM_RESPONSE: &str = "UPSTREAM_ERROR";
    pub const UPSTREAM_HTTP: &str = "UPSTREAM_HTTP_ERROR";
    pub const NETWORK: &str = "NETWORK_ERROR";
    pub const TIMEOUT: &str = "TIMEOUT";
    pub const CIRCUIT_OPEN: &str = "CIRCUIT_OPEN";
    pub const UNEXPECTED: &str = "UNEXPECTED_ERROR";
}

/// Where a failure originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layer {
    /// Expected business-rule violation.
    Domain,
    /// Failure in an external dependency.
    Infrastructure,
    /// Unexpected fault in our own code.
    Application,
}

impl Layer {
    pub fn as_str(&self) -> &'static str {
        match self {
            Layer::Domain => "domain",
            Layer::Infrastructure => "infrastructure",
            Layer::Application => "application",
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How an upstream dependency's responses relate to our callers.
///
/// In `Proxy` mode we forward a dependency transparently, so its status is
/// the caller's status. In `Integration` mode the dependency is an
/// implementation detail and its failures are ours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpstreamMode {
    Proxy,
    #[default]
    Integration,
}

/// Field-level validation detail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldViolation {
    pub field: String,
    pub message: String,
}

impl FieldViolation {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// The closed set of failure families.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caller input failed validation.
    Validation,
    /// Any other business-rule violation; the code selects the status.
    Domain,
    /// A dependency answered with a non-success status.
    UpstreamResponse {
        service: String,
        status: u16,
        mode: UpstreamMode,
    },
    /// A generic HTTP failure from a dependency.
    UpstreamHttp { status: u16 },
    /// Connectivity failure below HTTP (DNS, refused, reset, aborted).
    Network,
    /// The call did not finish before its deadline.
    Timeout { after: Duration, retryable: bool },
    /// The circuit protecting a dependency is open.
    CircuitOpen { circuit: String, reset_at_ms: u64 },
    /// Anything we could not recognize.
    Unexpected,
}

impl ErrorKind {
    pub fn layer(&self) -> Layer {
        match self {
            ErrorKind::Validation | ErrorKind::Domain => Layer::Domain,
            ErrorKind::UpstreamResponse { .. }
            | ErrorKind::UpstreamHttp { .. }
            | ErrorKind::Network
            | ErrorKind::Timeout { .. }
            | ErrorKind::CircuitOpen { .. } => Layer::Infrastructure,
            ErrorKind::Unexpected => Layer::Application,
        }
    }

    pub fn retryable(&self) -> bool {
        match self {
            ErrorKind::Validation | ErrorKind::Domain | ErrorKind::Unexpected => false,
            ErrorKind::CircuitOpen { .. } => false,
            ErrorKind::Network => true,
            ErrorKind::Timeout { retryable, .. } => *retryable,
            ErrorKind::UpstreamResponse { status, .. } | ErrorKind::UpstreamHttp { status } => {
                is_retryable_status(*status)
            }
        }
    }

    pub fn operational(&self) -> bool {
        self.layer() != Layer::Application
    }
}

fn is_retryable_status(status: u16) -> bool {
    status >= 500 || status == 429
}

/// A failure with a stable code and fixed attributes.
///
/// Fields are private: the code is fixed at construction and the
/// layer/retryable/operational attributes always follow the kind.
#[derive(Debug, Clone, Error)]
#[error("[{code}] {message}")]
pub struct ClassifiedError {
    kind: ErrorKind,
    code: String,
    message: String,
    detail: Option<String>,
    meta: Option<serde_json::Value>,
    #[source]
    cause: Option<Arc<dyn StdError + Send + Sync + 'static>>,
}

impl ClassifiedError {
    fn from_parts(kind: ErrorKind, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: code.into(),
            message: message.into(),
            detail: None,
            meta: None,
            cause: None,
        }
    }

    /// Domain error with a caller-chosen code (normalized to an uppercase token).
    pub fn domain(code: &str, message: impl Into<String>) -> Self {
        Self::from_parts(ErrorKind::Domain, normalize_code(code), message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::domain(codes::NOT_FOUND, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::domain(codes::CONFLICT, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::domain(codes::UNAUTHORIZED, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::domain(codes::FORBIDDEN, message)
    }

    /// Validation failure; field detail travels as `meta.fields`.
    pub fn validation(message: impl Into<String>, fields: Vec<FieldViolation>) -> Self {
        let mut err = Self::from_parts(ErrorKind::Validation, codes::VALIDATION, message);
        if !fields.is_empty() {
            err.meta = Some(serde_json::json!({ "fields": fields }));
        }
        err
    }

    /// A dependency answered with `status`.
    pub fn upstream_response(service: impl Into<String>, status: u16, mode: UpstreamMode) -> Self {
        let service = service.into();
        let message = format!("{} responded with status {}", service, status);
        Self::from_parts(
            ErrorKind::UpstreamResponse {
                service,
                status,
                mode,
            },
            codes::UPSTREAM_RESPONSE,
            message,
        )
    }

    pub fn upstream_http(status: u16, message: impl Into<String>) -> Self {
        Self::from_parts(ErrorKind::UpstreamHttp { status }, codes::UPSTREAM_HTTP, message)
    }

    /// Connectivity failure. `detail` keeps the transport's own text.
    pub fn network(detail: impl Into<String>) -> Self {
        Self::from_parts(ErrorKind::Network, codes::NETWORK, "Network request failed").with_detail(detail)
    }

    pub fn timeout(after: Duration, retryable: bool) -> Self {
        let message = format!("Operation timed out after {}ms", after.as_millis());
        Self::from_parts(ErrorKind::Timeout { after, retryable }, codes::TIMEOUT, message)
    }

    pub fn circuit_open(circuit: impl Into<String>, reset_at_ms: u64) -> Self {
        let circuit = circuit.into();
        let message = format!("Circuit '{}' is open", circuit);
        Self::from_parts(
            ErrorKind::CircuitOpen {
                circuit,
                reset_at_ms,
            },
            codes::CIRCUIT_OPEN,
            message,
        )
    }

    /// Unrecognized failure. The original text is kept only as `detail`.
    pub fn unexpected(detail: impl Into<String>) -> Self {
        Self::from_parts(ErrorKind::Unexpected, codes::UNEXPECTED, "Unexpected failure").with_detail(detail)
    }

    pub fn with_cause(mut self, cause: Arc<dyn StdError + Send + Sync + 'static>) -> Self {
        self.cause = Some(cause);
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Attach structured detail. Only crosses the trust boundary when the
    /// policy exposes the error.
    pub fn with_meta(mut self, meta: serde_json::Value) -> Self {
        self.meta = Some(meta);
        self
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Internal diagnostic text, never exposed.
    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    pub fn meta(&self) -> Option<&serde_json::Value> {
        self.meta.as_ref()
    }

    pub fn cause(&self) -> Option<&Arc<dyn StdError + Send + Sync + 'static>> {
        self.cause.as_ref()
    }

    pub fn layer(&self) -> Layer {
        self.kind.layer()
    }

    pub fn retryable(&self) -> bool {
        self.kind.retryable()
    }

    pub fn operational(&self) -> bool {
        self.kind.operational()
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.kind, ErrorKind::Timeout { .. })
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self.kind, ErrorKind::CircuitOpen { .. })
    }

    /// Upstream HTTP status carried by the error, if any.
    pub fn upstream_status(&self) -> Option<u16> {
        match &self.kind {
            ErrorKind::UpstreamResponse { status, .. } | ErrorKind::UpstreamHttp { status } => Some(*status),
            _ => None,
        }
    }
}

impl PartialEq for ClassifiedError {
    fn eq(&self, other: &Self) -> bool {
        let same_cause = match (&self.cause, &other.cause) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        };
        same_cause
            && self.kind == other.kind
            && self.code == other.code
            && self.message == other.message
            && self.detail == other.detail
            && self.meta == other.meta
    }
}

/// Normalize a code to an uppercase `A-Z0-9_` token.
pub fn normalize_code(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.trim().chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_uppercase());
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    let token = out.trim_matches('_');
    if token.is_empty() {
        codes::DOMAIN.to_string()
    } else {
        token.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn every_family() -> Vec<ClassifiedError> {
        vec![
            ClassifiedError::validation("bad input", vec![FieldViolation::new("email", "required")]),
            ClassifiedError::not_found("X not found"),
            ClassifiedError::domain("insufficient-funds", "balance too low"),
            ClassifiedError::upstream_response("billing", 503, UpstreamMode::Integration),
            ClassifiedError::upstream_response("billing", 404, UpstreamMode::Proxy),
            ClassifiedError::upstream_http(429, "slow down"),
            ClassifiedError::upstream_http(400, "bad contract"),
            ClassifiedError::network("connection refused"),
            ClassifiedError::timeout(Duration::from_millis(50), true),
            ClassifiedError::timeout(Duration::from_millis(50), false),
            ClassifiedError::circuit_open("billing", 1_000),
            ClassifiedError::unexpected("boom"),
        ]
    }

    #[test]
    fn test_family_defaults() {
        for err in every_family() {
            match err.layer() {
                Layer::Domain => {
                    assert!(!err.retryable(), "{} should not be retryable", err.code());
                    assert!(err.operational());
                }
                Layer::Infrastructure => assert!(err.operational()),
                Layer::Application => {
                    assert!(!err.retryable());
                    assert!(!err.operational());
                }
            }
        }
    }

    #[test]
    fn test_infrastructure_retryable_varies_by_kind() {
        assert!(ClassifiedError::network("reset").retryable());
        assert!(ClassifiedError::upstream_http(502, "x").retryable());
        assert!(ClassifiedError::upstream_http(429, "x").retryable());
        assert!(!ClassifiedError::upstream_http(400, "x").retryable());
        assert!(!ClassifiedError::circuit_open("db", 0).retryable());
        assert!(!ClassifiedError::timeout(Duration::from_secs(1), false).retryable());
    }

    #[test]
    fn test_normalize_code() {
        assert_eq!(normalize_code("not-found"), "NOT_FOUND");
        assert_eq!(normalize_code("  Already exists "), "ALREADY_EXISTS");
        assert_eq!(normalize_code("rate..limited"), "RATE_LIMITED");
        assert_eq!(normalize_code("--"), codes::DOMAIN);
    }

    #[test]
    fn test_validation_meta_holds_fields() {
        let err = ClassifiedError::validation("invalid", vec![FieldViolation::new("name", "too short")]);
        let meta = err.meta().unwrap();
        assert_eq!(meta["fields"][0]["field"], "name");

        let bare = ClassifiedError::validation("invalid", vec![]);
        assert!(bare.meta().is_none());
    }

    #[test]
    fn test_unexpected_keeps_detail_out_of_message() {
        let err = ClassifiedError::unexpected("password=hunter2");
        assert!(!err.message().contains("hunter2"));
        assert_eq!(err.detail(), Some("password=hunter2"));
    }

    #[test]
    fn test_display_and_source() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = ClassifiedError::network("refused").with_cause(Arc::new(io));
        assert_eq!(err.to_string(), "[NETWORK_ERROR] Network request failed");
        assert_eq!(err.source().map(|e| e.to_string()).as_deref(), Some("refused"));

        let plain = ClassifiedError::not_found("X not found");
        assert_eq!(plain.to_string(), "[NOT_FOUND] X not found");
        assert!(plain.source().is_none());
    }

    #[test]
    fn test_equality_compares_cause_identity() {
        let cause: Arc<dyn StdError + Send + Sync> =
            Arc::new(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe"));
        let a = ClassifiedError::network("pipe").with_cause(cause.clone());
        let b = a.clone();
        let c = ClassifiedError::network("pipe")
            .with_cause(Arc::new(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe")));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
