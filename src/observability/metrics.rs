//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define guard metrics (failures, retries, timeouts, circuit state)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `guard_failures_total` (counter): classified failures by code, layer
//! - `guard_retries_total` (counter): scheduled retries by attempt
//! - `guard_retries_exhausted_total` (counter): calls that used every attempt
//! - `guard_timeouts_total` (counter): deadlines that fired
//! - `guard_circuit_transitions_total` (counter): by circuit, from, to
//! - `guard_circuit_rejected_total` (counter): fast-failed calls by circuit
//! - `guard_circuit_state` (gauge): 0=closed, 1=half-open, 2=open

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::resilience::store::CircuitState;

/// Install the Prometheus recorder with an HTTP listener.
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_failure(code: &str, layer: &'static str) {
    counter!("guard_failures_total", "code" => code.to_string(), "layer" => layer).increment(1);
}

pub fn record_retry(attempt: u32) {
    counter!("guard_retries_total", "attempt" => attempt.to_string()).increment(1);
}

pub fn record_retries_exhausted() {
    counter!("guard_retries_exhausted_total").increment(1);
}

pub fn record_timeout() {
    counter!("guard_timeouts_total").increment(1);
}

pub fn record_circuit_transition(circuit: &str, from: CircuitState, to: CircuitState) {
    counter!(
        "guard_circuit_transitions_total",
        "circuit" => circuit.to_string(),
        "from" => from.as_str(),
        "to" => to.as_str()
    )
    .increment(1);
    record_circuit_state(circuit, to);
}

pub fn record_circuit_state(circuit: &str, state: CircuitState) {
    let value = match state {
        CircuitState::Closed => 0.0,
        CircuitState::HalfOpen => 1.0,
        CircuitState::Open => 2.0,
    };
    gauge!("guard_circuit_state", "circuit" => circuit.to_string()).set(value);
}

pub fn record_circuit_rejected(circuit: &str) {
    counter!("guard_circuit_rejected_total", "circuit" => circuit.to_string()).increment(1);
}
