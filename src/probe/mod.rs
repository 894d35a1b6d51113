//! Path probes.
//!
//! # Data Flow
//! ```text
//! ServerConfig → RpcProbe::probe  → RpcProbeResult  → validate_tools    ─┐
//!              → HttpProbe::probe → HttpProbeResult → validate_response ─┴→ ProbeOutcome
//! ```
//!
//! # Design Decisions
//! - Probes never mutate breaker state; they only produce evidence
//! - Auth headers are fetched once per probe, not per retry
//! - Every attempt carries its own timeout

use std::time::Duration;

pub mod http;
pub mod outcome;
pub mod rpc;

pub use http::{extract_metrics, validate_response, HttpProbe, HttpProbeError, HttpProbeResult, HttpValidationResult};
pub use outcome::ProbeOutcome;
pub use rpc::{validate_tools, RpcProbe, RpcProbeResult, RpcProbeStatus, RpcValidationResult};

pub(crate) const USER_AGENT: &str = concat!("mcp-health-monitor/", env!("CARGO_PKG_VERSION"));

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-attempt timeout from configured seconds. Invalid values fall back to 10s.
pub(crate) fn probe_timeout(secs: f64) -> Duration {
    if secs > 0.0 {
        Duration::try_from_secs_f64(secs).unwrap_or(DEFAULT_TIMEOUT)
    } else {
        DEFAULT_TIMEOUT
    }
}

/// Short operator-facing description of a reqwest failure.
pub(crate) fn describe_transport_error(error: &reqwest::Error, timeout: Duration) -> String {
    if error.is_timeout() {
        format!("request timed out after {:.1}s", timeout.as_secs_f64())
    } else if error.is_connect() {
        format!("connection failed: {}", error)
    } else if error.is_builder() {
        format!("invalid request: {}", error)
    } else {
        error.to_string()
    }
}
