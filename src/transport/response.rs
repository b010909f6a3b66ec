//! HTTP rendering of transport errors.
//!
//! # Responsibilities
//! - Render a `TransportError` as a JSON response with its status
//!
//! # Design Decisions
//! - Only the serialized `TransportError` is written; nothing else from the
//!   original failure is reachable here
//! - Statuses outside the valid HTTP range fall back to 502

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use crate::transport::TransportError;

impl TransportError {
    pub fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(self.status).unwrap_or(StatusCode::BAD_GATEWAY)
    }
}

impl IntoResponse for TransportError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(self)).into_response()
    }
}
