//! Prometheus metrics for the execution bridge.
//!
//! All recorders are cheap no-ops until [`init_metrics`] installs the
//! exporter, so services call them unconditionally.
//!
//! # Example
//!
//! ```ignore
//! use execution_bridge::observability::{init_metrics, MetricsConfig};
//!
//! init_metrics(&MetricsConfig::default())?;
//! record_broker_call("submit", "ok", 0.042);
//! ```

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::domain::broker_session::SessionStatus;
use crate::domain::order_intent::IntentState;
use crate::domain::reconciliation::ReconcileTrigger;

/// Configuration for the metrics exporter.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Address to bind the metrics HTTP listener.
    pub listen_addr: SocketAddr,
    /// Histogram buckets for broker call latency (in seconds).
    pub latency_buckets: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 9090),
            // 1ms to 10s
            latency_buckets: vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0],
        }
    }
}

impl MetricsConfig {
    /// Create a new metrics configuration with custom address.
    #[must_use]
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            listen_addr: addr,
            ..Default::default()
        }
    }
}

/// Error type for metrics operations.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// Failed to configure metrics exporter.
    #[error("metrics configuration error: {0}")]
    Configuration(String),
    /// Failed to install metrics exporter.
    #[error("metrics installation error: {0}")]
    Installation(String),
}

/// Initialize the Prometheus metrics exporter.
///
/// This starts an HTTP listener that exposes metrics at `/metrics`.
///
/// # Errors
///
/// Returns an error if the exporter fails to start (e.g., port already in use).
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    PrometheusBuilder::new()
        .with_http_listener(config.listen_addr)
        .set_buckets(&config.latency_buckets)
        .map_err(|e| MetricsError::Configuration(e.to_string()))?
        .install()
        .map_err(|e| MetricsError::Installation(e.to_string()))?;

    tracing::info!(addr = %config.listen_addr, "Prometheus metrics exporter started");

    Ok(())
}

// ============================================================================
// Intent Lifecycle
// ============================================================================

/// Record a persisted intent state transition.
pub fn record_intent_transition(to: IntentState) {
    counter!("bridge_intent_transitions_total", "to" => to.as_str()).increment(1);
}

/// Record the outcome of an inbound alert.
///
/// # Arguments
///
/// * `outcome` - One of `accepted`, `duplicate`, `rejected`, `unauthorized`
pub fn record_alert(outcome: &'static str) {
    counter!("bridge_alerts_total", "outcome" => outcome).increment(1);
}

// ============================================================================
// Broker Session
// ============================================================================

/// Record a broker call and its latency.
///
/// # Arguments
///
/// * `op` - Operation name (e.g., "submit", "cancel", "query_order")
/// * `outcome` - `ok`, `error`, `timeout` or `unavailable`
/// * `latency_seconds` - Wall time of the call in seconds
pub fn record_broker_call(op: &'static str, outcome: &'static str, latency_seconds: f64) {
    counter!("bridge_broker_calls_total", "op" => op, "outcome" => outcome).increment(1);
    histogram!("bridge_broker_call_seconds", "op" => op).record(latency_seconds);
}

/// Update the session status gauge.
pub fn record_session_status(status: SessionStatus) {
    gauge!("bridge_session_status").set(status.gauge_value());
}

/// Record an order update dropped because the consumer fell behind.
pub fn record_update_dropped() {
    counter!("bridge_updates_dropped_total").increment(1);
}

// ============================================================================
// Reconciliation
// ============================================================================

/// Record a completed reconciliation pass.
pub fn record_reconciliation_pass(trigger: ReconcileTrigger) {
    counter!("bridge_reconciliation_passes_total", "trigger" => trigger.as_str()).increment(1);
}

/// Record mismatches resolved by a reconciliation pass.
pub fn record_reconciliation_mismatch(count: usize) {
    counter!("bridge_reconciliation_mismatches_total").increment(count as u64);
}

/// Update the orphan order gauge.
pub fn record_orphan_orders(count: usize) {
    gauge!("bridge_orphan_orders").set(count as f64);
}
