//! Metrics collection and exposition.
//!
//! # Metrics
//! - `circuit_calls_total` (counter): guarded calls by service, outcome
//! - `circuit_rejections_total` (counter): calls short-circuited by an open breaker
//! - `circuit_transitions_total` (counter): state changes by service, from, to
//! - `circuit_state` (gauge): 0=closed, 1=half-open, 2=open
//! - `cache_lookups_total` (counter): lookups by category, result
//! - `cache_hit_rate` (gauge): process-wide hit rate
//! - `store_errors_total` (counter): store failures by component, operation
//! - `store_degraded` (gauge): 1 while a component runs on local state
//!
//! # Design Decisions
//! - Recording is a no-op until an exporter is installed
//! - Labels stay low-cardinality: service names and categories only

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::resilience::CircuitState;

/// Install the Prometheus exporter with its own HTTP listener.
///
/// Must be called from within a tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Prometheus metrics exporter listening");
    Ok(())
}

/// Record the outcome of a guarded call ("success", "failure", "timeout", "cancelled").
pub fn record_call(service: &str, outcome: &'static str) {
    counter!("circuit_calls_total", "service" => service.to_string(), "outcome" => outcome)
        .increment(1);
}

/// Record a call rejected without invoking the operation.
pub fn record_rejection(service: &str) {
    counter!("circuit_rejections_total", "service" => service.to_string()).increment(1);
}

/// Record a state transition and update the state gauge.
pub fn record_transition(service: &str, from: CircuitState, to: CircuitState) {
    counter!(
        "circuit_transitions_total",
        "service" => service.to_string(),
        "from" => from.as_str(),
        "to" => to.as_str()
    )
    .increment(1);
    record_circuit_state(service, to);
}

/// Publish the current state of a circuit.
pub fn record_circuit_state(service: &str, state: CircuitState) {
    gauge!("circuit_state", "service" => service.to_string()).set(state.gauge_value());
}

/// Record a cache lookup for a category ("raw" for direct key access).
pub fn record_cache_lookup(category: &'static str, hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    counter!("cache_lookups_total", "category" => category, "result" => result).increment(1);
}

/// Publish the process-wide cache hit rate.
pub fn record_cache_hit_rate(rate: f64) {
    gauge!("cache_hit_rate").set(rate);
}

/// Record a failed store operation.
pub fn record_store_error(component: &'static str, operation: &'static str) {
    counter!("store_errors_total", "component" => component, "operation" => operation)
        .increment(1);
}

/// Record whether a component is running on local state only.
pub fn record_store_degraded(component: &'static str, degraded: bool) {
    gauge!("store_degraded", "component" => component).set(if degraded { 1.0 } else { 0.0 });
}
