//! Error taxonomy subsystem.
//!
//! # Data Flow
//! ```text
//! Remote call fails with anything (io::Error, reqwest::Error, string, JSON value)
//!     → classifier.rs (recognize connectivity signatures)
//!     → taxonomy.rs (ClassifiedError: code, layer, retryable, operational)
//!     → policy::resolve_policy
//!     → transport::to_transport
//! ```
//!
//! # Design Decisions
//! - Closed `ErrorKind` enum; layer/retryable/operational are computed from
//!   the variant, never stored, so a family cannot drift from its defaults
//! - Classification is infallible and idempotent
//! - The original failure is kept as `cause` for diagnostics and is never
//!   serialized

pub mod classifier;
pub mod taxonomy;

pub use classifier::{classify, IntoClassified};
pub use taxonomy::{codes, normalize_code, ClassifiedError, ErrorKind, FieldViolation, Layer, UpstreamMode};
