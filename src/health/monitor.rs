//! Periodic fleet health monitoring.
//!
//! # Responsibilities
//! - Poll the whole fleet on an interval
//! - Feed every result into the circuit breaker registry
//! - Swap in reloaded configuration between cycles

use std::sync::Arc;
use std::time::Duration;
use arc_swap::ArcSwap;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::auth::StaticAuthProvider;
use crate::config::schema::MonitorConfig;
use crate::health::aggregator::DualPathChecker;
use crate::health::types::{DualHealthCheckResult, HealthStatus};
use crate::observability::metrics;
use crate::resilience::registry::CircuitBreakerRegistry;

/// Drives fleet checks and keeps the registry current.
pub struct HealthMonitor {
    config: ArcSwap<MonitorConfig>,
    checker: ArcSwap<DualPathChecker>,
    registry: Arc<CircuitBreakerRegistry>,
    interval_override: Option<Duration>,
}

fn build_checker(config: &MonitorConfig) -> DualPathChecker {
    let auth = Arc::new(StaticAuthProvider::from_config(config));
    DualPathChecker::new(auth, config.retries.clone())
}

impl HealthMonitor {
    /// Create a monitor whose probes use the config's `[auth]` table.
    pub fn new(config: MonitorConfig, registry: Arc<CircuitBreakerRegistry>) -> Self {
        let checker = build_checker(&config);
        Self::with_checker(config, checker, registry)
    }

    /// Create a monitor around an explicit checker.
    pub fn with_checker(
        config: MonitorConfig,
        checker: DualPathChecker,
        registry: Arc<CircuitBreakerRegistry>,
    ) -> Self {
        registry.update_config(config.circuit_breaker.clone());
        Self {
            config: ArcSwap::from_pointee(config),
            checker: ArcSwap::from_pointee(checker),
            registry,
            interval_override: None,
        }
    }

    /// Poll on a fixed interval regardless of configuration.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval_override = Some(interval);
        self
    }

    pub fn registry(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.registry
    }

    pub fn config(&self) -> Arc<MonitorConfig> {
        self.config.load_full()
    }

    /// Time between fleet checks.
    pub fn interval(&self) -> Duration {
        self.interval_override
            .unwrap_or_else(|| Duration::from_secs(self.config.load().fleet.interval_secs.max(1)))
    }

    /// Swap in a new configuration. Breaker state is kept; thresholds and
    /// probe settings take effect from the next cycle.
    pub fn apply_config(&self, config: MonitorConfig) {
        tracing::info!(
            servers = config.servers.len(),
            interval_secs = config.fleet.interval_secs,
            "Applying new configuration"
        );
        self.registry.update_config(config.circuit_breaker.clone());
        self.checker.store(Arc::new(build_checker(&config)));
        self.config.store(Arc::new(config));
    }

    /// Check the whole fleet once and feed the registry.
    pub async fn run_cycle(&self) -> Vec<DualHealthCheckResult> {
        let config = self.config.load_full();
        let checker = self.checker.load_full();

        let results = checker
            .check_fleet(&config.servers, config.fleet.max_concurrent)
            .await;
        for result in &results {
            self.registry.evaluate(&result.server_name, result);
        }

        let fleet = self.registry.get_metrics();
        metrics::record_fleet(&fleet);

        let count = |status: HealthStatus| results.iter().filter(|r| r.overall_status == status).count();
        tracing::info!(
            servers = results.len(),
            healthy = count(HealthStatus::Healthy),
            degraded = count(HealthStatus::Degraded),
            unhealthy = count(HealthStatus::Unhealthy),
            rpc_open = fleet.rpc_open_circuits,
            http_open = fleet.http_open_circuits,
            "Fleet check complete"
        );
        results
    }

    /// Poll until shutdown. Config updates are applied between cycles.
    pub async fn run(
        self: Arc<Self>,
        mut updates: mpsc::UnboundedReceiver<MonitorConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let mut period = self.interval();
        tracing::info!(interval_secs = period.as_secs_f64(), "Health monitor starting");

        let mut ticker = time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut updates_open = true;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_cycle().await;
                }
                update = updates.recv(), if updates_open => match update {
                    Some(config) => {
                        self.apply_config(config);
                        let next = self.interval();
                        if next != period {
                            period = next;
                            ticker = time::interval_at(Instant::now() + period, period);
                            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                        }
                    }
                    None => updates_open = false,
                },
                _ = shutdown.recv() => {
                    tracing::info!("Health monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{CircuitBreakerConfig, ServerConfig};
    use crate::resilience::circuit_breaker::CircuitState;

    fn unreachable_config(failure_threshold: u32) -> MonitorConfig {
        // No endpoints: every probe is a configuration failure without I/O.
        let mut server = ServerConfig::new("svc", "x", "y");
        server.rpc.endpoint = None;
        server.http.endpoint = None;
        MonitorConfig {
            servers: vec![server],
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold,
                ..CircuitBreakerConfig::default()
            },
            ..MonitorConfig::default()
        }
    }

    #[tokio::test]
    async fn test_cycles_open_circuits() {
        let registry = Arc::new(CircuitBreakerRegistry::new(CircuitBreakerConfig::default()));
        let monitor = HealthMonitor::new(unreachable_config(2), Arc::clone(&registry));

        monitor.run_cycle().await;
        assert_eq!(registry.get_state("svc").rpc_path.state, CircuitState::Closed);
        let results = monitor.run_cycle().await;
        assert_eq!(results.len(), 1);
        assert_eq!(registry.get_state("svc").rpc_path.state, CircuitState::Open);
        assert_eq!(registry.get_state("svc").http_path.state, CircuitState::Open);
    }

    #[tokio::test]
    async fn test_apply_config_updates_registry() {
        let registry = Arc::new(CircuitBreakerRegistry::new(CircuitBreakerConfig::default()));
        let monitor = HealthMonitor::new(unreachable_config(2), Arc::clone(&registry));
        assert_eq!(registry.config().failure_threshold, 2);

        let mut next = unreachable_config(7);
        next.fleet.interval_secs = 5;
        monitor.apply_config(next);
        assert_eq!(registry.config().failure_threshold, 7);
        assert_eq!(monitor.interval(), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_exits_on_shutdown() {
        let registry = Arc::new(CircuitBreakerRegistry::new(CircuitBreakerConfig::default()));
        let monitor = Arc::new(
            HealthMonitor::new(unreachable_config(3), registry).with_interval(Duration::from_secs(1)),
        );
        let (tx, _) = broadcast::channel(1);
        let (_updates_tx, updates_rx) = mpsc::unbounded_channel();

        let handle = tokio::spawn(Arc::clone(&monitor).run(updates_rx, tx.subscribe()));
        time::sleep(Duration::from_millis(2500)).await;
        tx.send(()).unwrap();
        handle.await.unwrap();

        assert_eq!(monitor.registry().get_state("svc").rpc_path.state, CircuitState::Open);
    }
}
