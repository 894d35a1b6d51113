//! MCP Health Monitor
//!
//! Probes every configured tool server over its RPC and HTTP paths, feeds
//! the results into per-path circuit breakers and keeps doing so until told
//! to stop.
//!
//! ```text
//!   config.toml ──▶ watcher ──┐
//!                             ▼
//!   ┌───────────────── HealthMonitor ─────────────────┐
//!   │  tick → DualPathChecker::check_fleet            │
//!   │           ├─ RpcProbe  (tools/list)             │
//!   │           └─ HttpProbe (GET health)             │
//!   │        → CircuitBreakerRegistry::evaluate       │
//!   └──────────────────────┬──────────────────────────┘
//!                          ▼
//!          routing queries, fleet metrics, /metrics
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use clap::Parser;
use serde::Serialize;

use mcp_health_monitor::config::load_config;
use mcp_health_monitor::config::watcher::ConfigWatcher;
use mcp_health_monitor::lifecycle::{Shutdown, SignalEvent, Signals};
use mcp_health_monitor::observability::{init_logging, metrics};
use mcp_health_monitor::resilience::{FleetMetrics, ServerStateSnapshot};
use mcp_health_monitor::{CircuitBreakerRegistry, DualHealthCheckResult, HealthMonitor};

#[derive(Parser)]
#[command(name = "mcp-health-monitor")]
#[command(about = "Dual-path health checks and circuit breaking for MCP tool servers", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "monitor.toml")]
    config: PathBuf,

    /// Run a single fleet check, print the report as JSON and exit
    #[arg(long)]
    once: bool,

    /// Override the configured polling interval
    #[arg(long)]
    interval_secs: Option<u64>,
}

/// Output of `--once`.
#[derive(Serialize)]
struct OnceReport {
    results: Vec<DualHealthCheckResult>,
    circuits: Vec<ServerStateSnapshot>,
    fleet: FleetMetrics,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    init_logging(&config.observability);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = ?cli.config,
        servers = config.servers.len(),
        "mcp-health-monitor starting"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => {
                if let Err(e) = metrics::init_metrics(addr) {
                    tracing::error!(error = %e, "Failed to start metrics exporter");
                }
            }
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let registry = Arc::new(CircuitBreakerRegistry::new(config.circuit_breaker.clone()));
    let mut monitor = HealthMonitor::new(config, Arc::clone(&registry));
    if let Some(secs) = cli.interval_secs {
        monitor = monitor.with_interval(Duration::from_secs(secs.max(1)));
    }

    if cli.once {
        let results = monitor.run_cycle().await;
        let circuits = results
            .iter()
            .map(|r| registry.get_state(&r.server_name))
            .collect();
        let report = OnceReport {
            results,
            circuits,
            fleet: registry.get_metrics(),
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let (watcher, updates) = ConfigWatcher::new(&cli.config);
    let reloader = watcher.reloader();
    // Dropping the watcher stops hot reload, so hold it until exit.
    let _watch_guard = match watcher.run() {
        Ok(guard) => Some(guard),
        Err(e) => {
            tracing::warn!(error = %e, "Config watcher unavailable, hot reload disabled");
            None
        }
    };

    let shutdown = Shutdown::new();
    let monitor_task = tokio::spawn(Arc::new(monitor).run(updates, shutdown.subscribe()));

    let mut signals = Signals::register()?;
    loop {
        match signals.recv().await {
            SignalEvent::Reload => {
                tracing::info!("SIGHUP received, reloading configuration");
                reloader.reload_logged();
            }
            SignalEvent::Shutdown(signal) => {
                tracing::info!(signal = signal, "Shutdown signal received");
                shutdown.trigger();
                break;
            }
        }
    }

    monitor_task.await?;
    tracing::info!("Shutdown complete");
    Ok(())
}
