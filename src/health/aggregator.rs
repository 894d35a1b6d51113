//! Dual-path aggregation.
//!
//! # Responsibilities
//! - Run the RPC and HTTP probes for one server concurrently
//! - Classify each path into a [`ProbeOutcome`]
//! - Fan out across the fleet with a bounded worker pool

use std::any::Any;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio::task::JoinSet;

use crate::auth::AuthProvider;
use crate::config::schema::{RetryConfig, ServerConfig};
use crate::health::types::{DualHealthCheckResult, HttpPathReport, PathReport, RpcPathReport, TrafficPath};
use crate::observability::metrics;
use crate::probe::http::{validate_response, HttpProbe, HttpProbeError};
use crate::probe::outcome::ProbeOutcome;
use crate::probe::rpc::{validate_tools, RpcProbe, RpcProbeStatus};
use crate::probe::USER_AGENT;
use crate::resilience::clock::{Clock, SystemClock};

/// Runs both probes for a server and folds them into one verdict.
#[derive(Clone)]
pub struct DualPathChecker {
    rpc: RpcProbe,
    http: HttpProbe,
    clock: Arc<dyn Clock>,
}

impl DualPathChecker {
    /// Both probes share one connection pool.
    pub fn new(auth: Arc<dyn AuthProvider>, retry: RetryConfig) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_default();
        Self {
            rpc: RpcProbe::with_client(client.clone(), Arc::clone(&auth), retry.clone()),
            http: HttpProbe::with_client(client, auth, retry),
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the timestamp source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Check one server on every enabled path.
    pub async fn check_server(&self, server: &ServerConfig) -> DualHealthCheckResult {
        let (rpc, http) = tokio::join!(self.check_rpc(server), self.check_http(server));
        let result = DualHealthCheckResult::combine(&server.name, self.clock.now(), rpc, http);

        for path in TrafficPath::ALL {
            if let Some(reason) = result.outcome(path).and_then(ProbeOutcome::reason) {
                tracing::warn!(
                    server = %server.name,
                    path = %path,
                    reason = %reason,
                    "Health probe failed"
                );
            }
        }
        tracing::debug!(
            server = %server.name,
            status = ?result.overall_status,
            "Dual health check complete"
        );
        result
    }

    async fn check_rpc(&self, server: &ServerConfig) -> Option<RpcPathReport> {
        if !server.rpc.enabled {
            return None;
        }
        if server.rpc.endpoint.is_none() {
            return Some(PathReport::from_outcome(ProbeOutcome::ConfigurationError {
                message: "RPC path enabled without an endpoint".to_string(),
            }));
        }

        let start = Instant::now();
        let probe = self.rpc.probe(server).await;
        let validation = validate_tools(&probe, &server.rpc.expected_tools);

        let outcome = match &probe.status {
            RpcProbeStatus::ConnectionError { message } => ProbeOutcome::TransportError {
                message: message.clone(),
            },
            RpcProbeStatus::RpcError { code, message } => ProbeOutcome::ProtocolError {
                code: Some(*code),
                message: message.clone(),
            },
            RpcProbeStatus::Success { .. } if !validation.is_valid => ProbeOutcome::ValidationFailure {
                errors: validation.validation_errors.clone(),
            },
            RpcProbeStatus::Success { .. } => ProbeOutcome::Success,
        };
        metrics::record_probe(&server.name, TrafficPath::Rpc, outcome.label(), start.elapsed());

        Some(PathReport {
            outcome,
            probe: Some(probe),
            validation: Some(validation),
        })
    }

    async fn check_http(&self, server: &ServerConfig) -> Option<HttpPathReport> {
        if !server.http.enabled {
            return None;
        }

        let start = Instant::now();
        let report = match self.http.probe(server).await {
            Ok(probe) => {
                let validation = validate_response(&probe);
                let outcome = if !validation.http_status_valid {
                    ProbeOutcome::ProtocolError {
                        code: Some(i64::from(probe.status_code)),
                        message: format!("HTTP status {}", probe.status_code),
                    }
                } else if !validation.is_valid {
                    ProbeOutcome::ValidationFailure {
                        errors: validation.validation_errors.clone(),
                    }
                } else {
                    ProbeOutcome::Success
                };
                PathReport {
                    outcome,
                    probe: Some(probe),
                    validation: Some(validation),
                }
            }
            Err(HttpProbeError::MissingEndpoint(_)) => {
                return Some(PathReport::from_outcome(ProbeOutcome::ConfigurationError {
                    message: "HTTP path enabled without an endpoint".to_string(),
                }));
            }
            Err(e) => PathReport::from_outcome(ProbeOutcome::TransportError {
                message: e.to_string(),
            }),
        };
        metrics::record_probe(&server.name, TrafficPath::Http, report.outcome.label(), start.elapsed());

        Some(report)
    }

    /// Check every server with at most `max_concurrent` checks in flight.
    ///
    /// Results keep input order. A check that panics becomes an UNHEALTHY
    /// result carrying the panic text instead of aborting the batch.
    pub async fn check_fleet(
        self: &Arc<Self>,
        servers: &[ServerConfig],
        max_concurrent: usize,
    ) -> Vec<DualHealthCheckResult> {
        if servers.is_empty() {
            return Vec::new();
        }
        let worker_count = max_concurrent.clamp(1, servers.len());
        let queue: Arc<Mutex<VecDeque<(usize, ServerConfig)>>> =
            Arc::new(Mutex::new(servers.iter().cloned().enumerate().collect()));

        let mut workers = JoinSet::new();
        for _ in 0..worker_count {
            let queue = Arc::clone(&queue);
            let checker = Arc::clone(self);
            workers.spawn(async move {
                let mut done = Vec::new();
                loop {
                    let next = queue.lock().unwrap_or_else(PoisonError::into_inner).pop_front();
                    let Some((index, server)) = next else {
                        break;
                    };
                    let result = Arc::clone(&checker).check_isolated(server).await;
                    done.push((index, result));
                }
                done
            });
        }

        let mut slots: Vec<Option<DualHealthCheckResult>> = vec![None; servers.len()];
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(done) => {
                    for (index, result) in done {
                        slots[index] = Some(result);
                    }
                }
                Err(e) => tracing::error!(error = %e, "Fleet check worker failed"),
            }
        }

        slots
            .into_iter()
            .zip(servers)
            .map(|(slot, server)| {
                slot.unwrap_or_else(|| self.failure_for(server, "health check did not complete".to_string()))
            })
            .collect()
    }

    /// Run one check in its own task so a panic stays contained.
    async fn check_isolated(self: Arc<Self>, server: ServerConfig) -> DualHealthCheckResult {
        let checker = Arc::clone(&self);
        let task_server = server.clone();
        let handle = tokio::spawn(async move { checker.check_server(&task_server).await });
        match handle.await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(server = %server.name, error = %e, "Health check task failed");
                let reason = if e.is_panic() {
                    panic_message(e.into_panic())
                } else {
                    e.to_string()
                };
                self.failure_for(&server, format!("health check task failed: {}", reason))
            }
        }
    }

    fn failure_for(&self, server: &ServerConfig, message: String) -> DualHealthCheckResult {
        DualHealthCheckResult::synthetic_failure(
            &server.name,
            self.clock.now(),
            server.rpc.enabled,
            server.http.enabled,
            message,
        )
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|msg| msg.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "panic with non-string payload".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crate::auth::{AuthError, AuthHeaders, NoAuth};
    use crate::health::types::{AvailablePaths, HealthStatus};

    /// Panics for one server, no headers for the rest.
    struct PanickingAuth(&'static str);

    #[async_trait]
    impl AuthProvider for PanickingAuth {
        async fn auth_headers(&self, server_name: &str) -> Result<AuthHeaders, AuthError> {
            if server_name == self.0 {
                panic!("credential store corrupted for {}", server_name);
            }
            Ok(AuthHeaders::new())
        }
    }

    fn offline_server(name: &str) -> ServerConfig {
        let mut server = ServerConfig::new(name, "x", "y");
        server.rpc.endpoint = None;
        server.http.enabled = false;
        server
    }

    fn checker() -> Arc<DualPathChecker> {
        Arc::new(DualPathChecker::new(Arc::new(NoAuth), RetryConfig::default()))
    }

    #[tokio::test]
    async fn test_disabled_paths_are_excluded() {
        let mut server = ServerConfig::new("svc", "http://127.0.0.1:1/rpc", "http://127.0.0.1:1/health");
        server.rpc.enabled = false;
        server.http.enabled = false;

        let result = checker().check_server(&server).await;
        assert!(result.rpc.is_none());
        assert!(result.http.is_none());
        assert_eq!(result.overall_status, HealthStatus::Unhealthy);
        assert_eq!(result.available_paths, AvailablePaths::none());
    }

    #[tokio::test]
    async fn test_missing_endpoints_are_configuration_errors() {
        let mut server = ServerConfig::new("svc", "unused", "unused");
        server.rpc.endpoint = None;
        server.http.endpoint = None;

        let result = checker().check_server(&server).await;
        assert!(matches!(
            result.outcome(TrafficPath::Rpc),
            Some(ProbeOutcome::ConfigurationError { .. })
        ));
        assert!(matches!(
            result.outcome(TrafficPath::Http),
            Some(ProbeOutcome::ConfigurationError { .. })
        ));
        assert!(result.rpc.as_ref().unwrap().probe.is_none());
    }

    #[tokio::test]
    async fn test_empty_fleet() {
        assert!(checker().check_fleet(&[], 4).await.is_empty());
    }

    #[tokio::test]
    async fn test_fleet_keeps_input_order_with_one_worker() {
        let servers: Vec<ServerConfig> = (0..5).map(|i| offline_server(&format!("svc-{}", i))).collect();

        let results = checker().check_fleet(&servers, 0).await;
        let names: Vec<&str> = results.iter().map(|r| r.server_name.as_str()).collect();
        assert_eq!(names, vec!["svc-0", "svc-1", "svc-2", "svc-3", "svc-4"]);
    }

    #[tokio::test]
    async fn test_panicking_check_becomes_unhealthy_result() {
        let mut servers: Vec<ServerConfig> = (0..4).map(|i| offline_server(&format!("svc-{}", i))).collect();
        // Auth is fetched before any I/O, so this panics without a listener.
        servers[2].rpc.endpoint = Some("http://127.0.0.1:1/mcp".into());

        let checker = Arc::new(DualPathChecker::new(
            Arc::new(PanickingAuth("svc-2")),
            RetryConfig::default(),
        ));
        let results = checker.check_fleet(&servers, 2).await;

        let names: Vec<&str> = results.iter().map(|r| r.server_name.as_str()).collect();
        assert_eq!(names, vec!["svc-0", "svc-1", "svc-2", "svc-3"]);

        let failed = &results[2];
        assert_eq!(failed.overall_status, HealthStatus::Unhealthy);
        assert!(!failed.overall_success);
        let error = failed.error.as_deref().unwrap();
        assert!(error.contains("credential store corrupted for svc-2"), "{}", error);
        assert!(matches!(
            failed.outcome(TrafficPath::Rpc),
            Some(ProbeOutcome::TransportError { .. })
        ));
        assert!(failed.outcome(TrafficPath::Http).is_none());

        for other in [&results[0], &results[1], &results[3]] {
            assert!(other.error.is_none());
            assert!(matches!(
                other.outcome(TrafficPath::Rpc),
                Some(ProbeOutcome::ConfigurationError { .. })
            ));
        }
    }
}
