//! Dual-path health data model.

use std::collections::BTreeSet;
use std::fmt;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::probe::http::{HttpProbeResult, HttpValidationResult};
use crate::probe::outcome::ProbeOutcome;
use crate::probe::rpc::{RpcProbeResult, RpcValidationResult};

/// One of the two independent ways of reaching a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrafficPath {
    /// Tool-discovery RPC path (MCP).
    Rpc,
    /// Plain HTTP health path (REST).
    Http,
}

impl TrafficPath {
    pub const ALL: [TrafficPath; 2] = [TrafficPath::Rpc, TrafficPath::Http];

    pub fn as_str(&self) -> &'static str {
        match self {
            TrafficPath::Rpc => "rpc",
            TrafficPath::Http => "http",
        }
    }
}

impl fmt::Display for TrafficPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Combined verdict for a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Member of an available-paths set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AvailablePath {
    Rpc,
    Http,
    Both,
    None,
}

impl From<TrafficPath> for AvailablePath {
    fn from(path: TrafficPath) -> Self {
        match path {
            TrafficPath::Rpc => AvailablePath::Rpc,
            TrafficPath::Http => AvailablePath::Http,
        }
    }
}

/// Set of paths usable for routing, ⊆ {rpc, http, both, none}.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AvailablePaths(BTreeSet<AvailablePath>);

impl AvailablePaths {
    /// The empty set.
    pub fn empty() -> Self {
        Self(BTreeSet::new())
    }

    /// `{none}`, the aggregator's explicit "nothing usable" marker.
    pub fn none() -> Self {
        Self(BTreeSet::from([AvailablePath::None]))
    }

    /// Build from per-path usability. `both` is added only when asked for and
    /// both individual paths are present.
    pub fn from_flags(rpc: bool, http: bool, include_both: bool) -> Self {
        let mut set = BTreeSet::new();
        if rpc {
            set.insert(AvailablePath::Rpc);
        }
        if http {
            set.insert(AvailablePath::Http);
        }
        if rpc && http && include_both {
            set.insert(AvailablePath::Both);
        }
        Self(set)
    }

    pub fn contains(&self, path: AvailablePath) -> bool {
        self.0.contains(&path)
    }

    pub fn allows(&self, path: TrafficPath) -> bool {
        self.contains(path.into())
    }

    /// True when no routable path is present (`{}` or `{none}`).
    pub fn is_unavailable(&self) -> bool {
        !self.allows(TrafficPath::Rpc) && !self.allows(TrafficPath::Http)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AvailablePath> {
        self.0.iter()
    }
}

impl FromIterator<AvailablePath> for AvailablePaths {
    fn from_iter<I: IntoIterator<Item = AvailablePath>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// One path's share of a dual check: the classified outcome plus whatever
/// raw probe data and validation were obtained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathReport<P, V> {
    pub outcome: ProbeOutcome,
    pub probe: Option<P>,
    pub validation: Option<V>,
}

impl<P, V> PathReport<P, V> {
    /// A report carrying only an outcome, with no probe data.
    pub fn from_outcome(outcome: ProbeOutcome) -> Self {
        Self {
            outcome,
            probe: None,
            validation: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }
}

pub type RpcPathReport = PathReport<RpcProbeResult, RpcValidationResult>;
pub type HttpPathReport = PathReport<HttpProbeResult, HttpValidationResult>;

/// Outcome of one aggregation cycle for one server.
///
/// `rpc`/`http` are `None` when that path is disabled in configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DualHealthCheckResult {
    pub server_name: String,
    pub timestamp: DateTime<Utc>,
    pub overall_status: HealthStatus,
    pub overall_success: bool,
    pub rpc: Option<RpcPathReport>,
    pub http: Option<HttpPathReport>,
    pub available_paths: AvailablePaths,
    pub error: Option<String>,
}

impl DualHealthCheckResult {
    /// Fold two path reports into a combined verdict.
    pub fn combine(
        server_name: impl Into<String>,
        timestamp: DateTime<Utc>,
        rpc: Option<RpcPathReport>,
        http: Option<HttpPathReport>,
    ) -> Self {
        let rpc_ok = rpc.as_ref().map(PathReport::is_success);
        let http_ok = http.as_ref().map(PathReport::is_success);

        let (overall_status, available_paths, error) = match (rpc_ok, http_ok) {
            (None, None) => (
                HealthStatus::Unhealthy,
                AvailablePaths::none(),
                Some("all probe paths are disabled".to_string()),
            ),
            (Some(true), Some(true)) => (
                HealthStatus::Healthy,
                AvailablePaths::from_flags(true, true, true),
                None,
            ),
            (Some(true), None) => (HealthStatus::Healthy, AvailablePaths::from_flags(true, false, false), None),
            (None, Some(true)) => (HealthStatus::Healthy, AvailablePaths::from_flags(false, true, false), None),
            (Some(true), Some(false)) => (
                HealthStatus::Degraded,
                AvailablePaths::from_flags(true, false, false),
                None,
            ),
            (Some(false), Some(true)) => (
                HealthStatus::Degraded,
                AvailablePaths::from_flags(false, true, false),
                None,
            ),
            _ => (HealthStatus::Unhealthy, AvailablePaths::none(), None),
        };

        Self {
            server_name: server_name.into(),
            timestamp,
            overall_success: overall_status != HealthStatus::Unhealthy,
            overall_status,
            rpc,
            http,
            available_paths,
            error,
        }
    }

    /// An UNHEALTHY result standing in for a check that could not complete.
    /// Each enabled path is reported as a transport failure.
    pub fn synthetic_failure(
        server_name: impl Into<String>,
        timestamp: DateTime<Utc>,
        rpc_enabled: bool,
        http_enabled: bool,
        message: impl Into<String>,
    ) -> Self {
        let message = message.into();
        let failure = || ProbeOutcome::TransportError {
            message: message.clone(),
        };
        let mut result = Self::combine(
            server_name,
            timestamp,
            rpc_enabled.then(|| PathReport::from_outcome(failure())),
            http_enabled.then(|| PathReport::from_outcome(failure())),
        );
        result.error = Some(message);
        result
    }

    /// The path's outcome, `None` when the path is disabled.
    pub fn outcome(&self, path: TrafficPath) -> Option<&ProbeOutcome> {
        match path {
            TrafficPath::Rpc => self.rpc.as_ref().map(|r| &r.outcome),
            TrafficPath::Http => self.http.as_ref().map(|r| &r.outcome),
        }
    }
}
