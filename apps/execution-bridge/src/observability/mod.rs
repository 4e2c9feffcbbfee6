//! Observability module for metrics and logging.
//!
//! Prometheus counters and gauges for the intent lifecycle, the broker
//! session and reconciliation, plus tracing subscriber setup.

mod logging;
mod metrics;

pub use logging::{LogFormat, init_logging};
pub use metrics::{
    MetricsConfig, MetricsError, init_metrics, record_alert, record_broker_call,
    record_intent_transition, record_orphan_orders, record_reconciliation_mismatch,
    record_reconciliation_pass, record_session_status, record_update_dropped,
};
