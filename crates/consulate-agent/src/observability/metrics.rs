//! Prometheus Metrics
//!
//! Metrics tracked:
//! - `consulate_heartbeats_total` - keep-alive attempts by result
//! - `consulate_check_updates_total` - named check updates by state and result
//! - `consulate_lock_attempts_total` - lock acquisitions by result
//! - `consulate_backend_reconnects_total` - backend handles rebuilt
//! - `consulate_registrations_total` - service registrations written

use metrics::{counter, describe_counter};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// State containing the Prometheus handle for metrics export
#[derive(Clone)]
pub struct MetricsState {
    pub prometheus_handle: PrometheusHandle,
}

/// Install the Prometheus recorder and describe every metric.
pub fn init_metrics() -> Result<MetricsState, Box<dyn std::error::Error + Send + Sync>> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    register_metric_descriptions();

    Ok(MetricsState {
        prometheus_handle: handle,
    })
}

fn register_metric_descriptions() {
    describe_counter!(
        "consulate_heartbeats_total",
        "Total number of service keep-alive attempts"
    );
    describe_counter!(
        "consulate_check_updates_total",
        "Total number of named check state updates"
    );
    describe_counter!(
        "consulate_lock_attempts_total",
        "Total number of distributed lock acquisition attempts"
    );
    describe_counter!(
        "consulate_backend_reconnects_total",
        "Total number of times the backend client was rebuilt"
    );
    describe_counter!(
        "consulate_registrations_total",
        "Total number of service registrations written"
    );
}

pub fn record_heartbeat(result: &str) {
    counter!("consulate_heartbeats_total", "result" => result.to_string()).increment(1);
}

pub fn record_check_update(state: &str, result: &str) {
    counter!(
        "consulate_check_updates_total",
        "state" => state.to_string(),
        "result" => result.to_string()
    )
    .increment(1);
}

pub fn record_lock_attempt(result: &str) {
    counter!("consulate_lock_attempts_total", "result" => result.to_string()).increment(1);
}

pub fn record_backend_reconnect() {
    counter!("consulate_backend_reconnects_total").increment(1);
}

pub fn record_registration() {
    counter!("consulate_registrations_total").increment(1);
}
