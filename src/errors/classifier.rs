//! Failure classification.
//!
//! # Responsibilities
//! - Turn any failure value into a `ClassifiedError`
//! - Recognize low-level connectivity failures (DNS, refused, reset, abort)
//! - Keep the original failure as an opaque cause
//!
//! # Design Decisions
//! - Already classified errors pass through untouched (idempotent)
//! - The whole `source()` chain is inspected, not just the outer error
//! - Unrecognized text is stored as internal detail, never as the message

use std::error::Error as StdError;
use std::io;
use std::sync::Arc;

use crate::errors::taxonomy::ClassifiedError;

/// Text fragments that identify a connectivity failure, lowercase.
const TRANSPORT_SIGNATURES: &[&str] = &[
    "econnrefused",
    "econnreset",
    "econnaborted",
    "enotfound",
    "eai_again",
    "etimedout",
    "epipe",
    "socket hang up",
    "connection refused",
    "connection reset",
    "connection aborted",
    "broken pipe",
    "dns error",
    "failed to lookup address",
    "aborterror",
    "network error",
];

/// Anything that can be classified.
pub trait IntoClassified {
    fn into_classified(self) -> ClassifiedError;
}

/// Classify a failure. Never fails.
pub fn classify<F: IntoClassified>(failure: F) -> ClassifiedError {
    failure.into_classified()
}

impl IntoClassified for ClassifiedError {
    fn into_classified(self) -> ClassifiedError {
        self
    }
}

impl IntoClassified for io::Error {
    fn into_classified(self) -> ClassifiedError {
        classify_source(Arc::new(self))
    }
}

impl IntoClassified for reqwest::Error {
    fn into_classified(self) -> ClassifiedError {
        classify_source(Arc::new(self))
    }
}

impl IntoClassified for Box<dyn StdError + Send + Sync + 'static> {
    fn into_classified(self) -> ClassifiedError {
        match self.downcast::<ClassifiedError>() {
            Ok(classified) => *classified,
            Err(other) => classify_source(Arc::from(other)),
        }
    }
}

impl IntoClassified for Arc<dyn StdError + Send + Sync + 'static> {
    fn into_classified(self) -> ClassifiedError {
        classify_source(self)
    }
}

impl IntoClassified for String {
    fn into_classified(self) -> ClassifiedError {
        classify_text(self)
    }
}

impl IntoClassified for &str {
    fn into_classified(self) -> ClassifiedError {
        classify_text(self.to_string())
    }
}

impl IntoClassified for serde_json::Value {
    fn into_classified(self) -> ClassifiedError {
        match &self {
            serde_json::Value::Null => ClassifiedError::unexpected("null"),
            serde_json::Value::String(text) => classify_text(text.clone()),
            serde_json::Value::Object(map) => {
                let signature = ["code", "name", "message"]
                    .iter()
                    .filter_map(|key| map.get(*key).and_then(|v| v.as_str()))
                    .any(has_transport_signature);
                if signature {
                    ClassifiedError::network(self.to_string())
                } else {
                    ClassifiedError::unexpected(self.to_string())
                }
            }
            other => ClassifiedError::unexpected(other.to_string()),
        }
    }
}

fn classify_source(err: Arc<dyn StdError + Send + Sync + 'static>) -> ClassifiedError {
    if let Some(classified) = err.downcast_ref::<ClassifiedError>() {
        return classified.clone();
    }
    let text = err.to_string();
    if is_connectivity_failure(err.as_ref()) {
        ClassifiedError::network(text).with_cause(err)
    } else {
        ClassifiedError::unexpected(text).with_cause(err)
    }
}

fn classify_text(text: String) -> ClassifiedError {
    if has_transport_signature(&text) {
        ClassifiedError::network(text)
    } else {
        ClassifiedError::unexpected(text)
    }
}

fn is_connectivity_failure(err: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(io_err) = e.downcast_ref::<io::Error>() {
            if is_connectivity_kind(io_err.kind()) {
                return true;
            }
        }
        if let Some(http_err) = e.downcast_ref::<reqwest::Error>() {
            if http_err.is_connect() || http_err.is_timeout() {
                return true;
            }
        }
        if has_transport_signature(&e.to_string()) {
            return true;
        }
        current = e.source();
    }
    false
}

fn is_connectivity_kind(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::AddrNotAvailable
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::TimedOut
            | io::ErrorKind::UnexpectedEof
    )
}

fn has_transport_signature(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    TRANSPORT_SIGNATURES.iter().any(|sig| lower.contains(sig))
}
