//! Metrics collection and exposition.
//!
//! # Metrics
//! - `mcp_health_probe_total` (counter): probes by server, path, outcome
//! - `mcp_health_probe_duration_seconds` (histogram): probe latency incl. retries
//! - `mcp_health_circuit_state` (gauge): 0=closed, 1=half-open, 2=open
//! - `mcp_health_circuit_transitions_total` (counter): transitions by target state
//! - `mcp_health_fleet_*` (gauges): mirror of `FleetMetrics`
//!
//! # Design Decisions
//! - Recording is a no-op until `init_metrics` installs the exporter
//! - Labels are server name, path and outcome; nothing unbounded beyond servers

use std::net::SocketAddr;
use std::time::Duration;
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::health::types::TrafficPath;
use crate::resilience::circuit_breaker::CircuitState;
use crate::resilience::registry::FleetMetrics;

/// Install the Prometheus recorder and its scrape listener on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_probe(server: &str, path: TrafficPath, outcome: &'static str, elapsed: Duration) {
    ::metrics::counter!(
        "mcp_health_probe_total",
        "server" => server.to_string(),
        "path" => path.as_str(),
        "outcome" => outcome
    )
    .increment(1);
    ::metrics::histogram!(
        "mcp_health_probe_duration_seconds",
        "server" => server.to_string(),
        "path" => path.as_str()
    )
    .record(elapsed.as_secs_f64());
}

pub fn record_circuit_state(server: &str, path: TrafficPath, state: CircuitState) {
    ::metrics::gauge!(
        "mcp_health_circuit_state",
        "server" => server.to_string(),
        "path" => path.as_str()
    )
    .set(state.as_gauge());
}

pub fn record_transition(server: &str, path: TrafficPath, to: CircuitState) {
    ::metrics::counter!(
        "mcp_health_circuit_transitions_total",
        "server" => server.to_string(),
        "path" => path.as_str(),
        "to" => to.as_str()
    )
    .increment(1);
}

pub fn record_fleet(fleet: &FleetMetrics) {
    ::metrics::gauge!("mcp_health_fleet_servers").set(fleet.total_servers as f64);
    ::metrics::gauge!("mcp_health_fleet_open_circuits", "path" => "rpc").set(fleet.rpc_open_circuits as f64);
    ::metrics::gauge!("mcp_health_fleet_open_circuits", "path" => "http").set(fleet.http_open_circuits as f64);
    ::metrics::gauge!("mcp_health_fleet_half_open_circuits", "path" => "rpc")
        .set(fleet.rpc_half_open_circuits as f64);
    ::metrics::gauge!("mcp_health_fleet_half_open_circuits", "path" => "http")
        .set(fleet.http_half_open_circuits as f64);
    ::metrics::gauge!("mcp_health_fleet_both_paths_available").set(fleet.servers_both_paths_available as f64);
    ::metrics::gauge!("mcp_health_fleet_no_path_available").set(fleet.servers_no_path_available as f64);
    ::metrics::gauge!("mcp_health_fleet_all_paths_disabled").set(fleet.servers_all_paths_disabled as f64);
    ::metrics::gauge!("mcp_health_fleet_availability_rate", "path" => "rpc").set(fleet.rpc_availability_rate);
    ::metrics::gauge!("mcp_health_fleet_availability_rate", "path" => "http").set(fleet.http_availability_rate);
}
