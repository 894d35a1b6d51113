//! Circuit breaker registry.
//!
//! # Responsibilities
//! - Own one [`ServerCircuitState`] (RPC + HTTP breakers) per server
//! - Feed dual health results into the breakers
//! - Answer routing queries and fleet metrics
//!
//! # Design Decisions
//! - One lock per server, not one global lock: the map hands out
//!   `Arc<Mutex<_>>` handles and is only held long enough to clone one
//! - OPEN → HALF_OPEN is evaluated lazily on every access for that server
//! - Blocked paths fail closed; unknown servers are treated as fresh CLOSED
//! - Poisoned locks are recovered, the state inside is still consistent

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::config::schema::CircuitBreakerConfig;
use crate::health::types::{AvailablePath, AvailablePaths, DualHealthCheckResult, TrafficPath};
use crate::observability::metrics;
use crate::resilience::circuit_breaker::{
    Admission, CircuitState, PathCircuit, PathThresholds, Transition,
};
use crate::resilience::clock::{Clock, SystemClock};

/// Combined breaker label for a server. Observability only; routing is
/// decided per path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OverallCircuitState {
    /// Both paths closed.
    Closed,
    /// No path open, at least one half-open.
    Recovering,
    /// Exactly one path open.
    Degraded,
    /// Both paths open.
    BothOpen,
}

/// The pair of breakers for one server.
#[derive(Debug, Clone, Default)]
pub struct ServerCircuitState {
    rpc: PathCircuit,
    http: PathCircuit,
    all_paths_disabled: bool,
    last_evaluated_at: Option<DateTime<Utc>>,
}

impl ServerCircuitState {
    pub fn path(&self, path: TrafficPath) -> &PathCircuit {
        match path {
            TrafficPath::Rpc => &self.rpc,
            TrafficPath::Http => &self.http,
        }
    }

    fn path_mut(&mut self, path: TrafficPath) -> &mut PathCircuit {
        match path {
            TrafficPath::Rpc => &mut self.rpc,
            TrafficPath::Http => &mut self.http,
        }
    }

    fn overall_state(&self) -> OverallCircuitState {
        match (self.rpc.state(), self.http.state()) {
            (CircuitState::Open, CircuitState::Open) => OverallCircuitState::BothOpen,
            (CircuitState::Open, _) | (_, CircuitState::Open) => OverallCircuitState::Degraded,
            (CircuitState::HalfOpen, _) | (_, CircuitState::HalfOpen) => OverallCircuitState::Recovering,
            (CircuitState::Closed, CircuitState::Closed) => OverallCircuitState::Closed,
        }
    }

    fn path_admissible(&self, path: TrafficPath, config: &CircuitBreakerConfig) -> bool {
        let circuit = self.path(path);
        circuit.is_monitored() && circuit.is_admissible(&PathThresholds::for_path(config, path))
    }

    fn available_paths(&self, config: &CircuitBreakerConfig) -> AvailablePaths {
        let rpc = self.path_admissible(TrafficPath::Rpc, config);
        let http = self.path_admissible(TrafficPath::Http, config);
        let include_both = if config.require_both_paths_healthy {
            self.rpc.state() == CircuitState::Closed && self.http.state() == CircuitState::Closed
        } else {
            true
        };
        AvailablePaths::from_flags(rpc, http, include_both)
    }
}

/// Introspection view of one path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub opened_at: Option<DateTime<Utc>>,
    pub recovery_eligible_at: Option<DateTime<Utc>>,
    pub half_open_in_flight: u32,
    pub half_open_max_requests: u32,
    pub recent_failures: usize,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_transition_at: Option<DateTime<Utc>>,
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub monitored: bool,
}

impl PathSnapshot {
    fn capture(circuit: &PathCircuit, t: &PathThresholds) -> Self {
        Self {
            state: circuit.state(),
            consecutive_failures: circuit.consecutive_failures(),
            consecutive_successes: circuit.consecutive_successes(),
            opened_at: circuit.opened_at(),
            recovery_eligible_at: circuit
                .opened_at()
                .and_then(|at| at.checked_add_signed(t.recovery_timeout)),
            half_open_in_flight: circuit.half_open_in_flight(),
            half_open_max_requests: t.half_open_max_requests,
            recent_failures: circuit.recent_failure_count(),
            last_failure_at: circuit.last_failure_at(),
            last_transition_at: circuit.last_transition_at(),
            failure_threshold: t.failure_threshold,
            success_threshold: t.success_threshold,
            monitored: circuit.is_monitored(),
        }
    }
}

/// Full diagnostic snapshot of one server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerStateSnapshot {
    pub server_name: String,
    pub rpc_path: PathSnapshot,
    pub http_path: PathSnapshot,
    pub available_paths: AvailablePaths,
    pub overall_state: OverallCircuitState,
    pub all_paths_disabled: bool,
    pub last_evaluated_at: Option<DateTime<Utc>>,
}

/// Fleet-wide breaker statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FleetMetrics {
    pub total_servers: usize,
    pub rpc_open_circuits: usize,
    pub http_open_circuits: usize,
    pub rpc_half_open_circuits: usize,
    pub http_half_open_circuits: usize,
    pub servers_both_paths_available: usize,
    pub servers_no_path_available: usize,
    pub servers_all_paths_disabled: usize,
    pub rpc_availability_rate: f64,
    pub http_availability_rate: f64,
}

type SharedServerState = Arc<Mutex<ServerCircuitState>>;

fn lock(state: &Mutex<ServerCircuitState>) -> MutexGuard<'_, ServerCircuitState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Owns every server's breakers.
#[derive(Debug)]
pub struct CircuitBreakerRegistry {
    servers: DashMap<String, SharedServerState>,
    config: ArcSwap<CircuitBreakerConfig>,
    clock: Arc<dyn Clock>,
}

impl CircuitBreakerRegistry {
    /// Create a registry using the system clock.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a registry with an explicit time source.
    pub fn with_clock(config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            servers: DashMap::new(),
            config: ArcSwap::from_pointee(config),
            clock,
        }
    }

    /// Current thresholds.
    pub fn config(&self) -> Arc<CircuitBreakerConfig> {
        self.config.load_full()
    }

    /// Replace thresholds; existing breaker state is kept.
    pub fn update_config(&self, config: CircuitBreakerConfig) {
        self.config.store(Arc::new(config));
        tracing::info!("Circuit breaker configuration updated");
    }

    /// Names of every server with breaker state.
    pub fn server_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.servers.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    fn existing(&self, server_name: &str) -> Option<SharedServerState> {
        self.servers.get(server_name).map(|e| Arc::clone(e.value()))
    }

    fn get_or_create(&self, server_name: &str) -> SharedServerState {
        if let Some(state) = self.existing(server_name) {
            return state;
        }
        Arc::clone(self.servers.entry(server_name.to_string()).or_default().value())
    }

    /// Apply the lazy recovery check to both paths.
    fn refresh(
        &self,
        server_name: &str,
        state: &mut ServerCircuitState,
        config: &CircuitBreakerConfig,
        now: DateTime<Utc>,
    ) {
        for path in TrafficPath::ALL {
            let t = PathThresholds::for_path(config, path);
            if let Some(transition) = state.path_mut(path).refresh(now, &t) {
                log_transition(server_name, path, transition);
            }
        }
    }

    /// Feed one dual health result into the server's breakers.
    ///
    /// Disabled paths (absent from the result) are not fed and stop being
    /// reported as available.
    pub fn evaluate(&self, server_name: &str, result: &DualHealthCheckResult) -> OverallCircuitState {
        let config = self.config.load();
        let now = self.clock.now();
        let shared = self.get_or_create(server_name);
        let mut state = lock(&shared);

        self.refresh(server_name, &mut state, &config, now);

        for path in TrafficPath::ALL {
            let outcome = result.outcome(path);
            let t = PathThresholds::for_path(&config, path);
            let circuit = state.path_mut(path);
            circuit.set_monitored(outcome.is_some());

            let transition = match outcome {
                Some(outcome) if outcome.is_success() => circuit.record_success(now, &t),
                Some(outcome) => {
                    tracing::debug!(
                        server = %server_name,
                        path = %path,
                        outcome = outcome.label(),
                        consecutive_failures = circuit.consecutive_failures().saturating_add(1),
                        "Recording path failure"
                    );
                    circuit.record_failure(now, &t)
                }
                None => None,
            };
            if let Some(transition) = transition {
                log_transition(server_name, path, transition);
            }
            metrics::record_circuit_state(server_name, path, circuit.state());
        }

        state.all_paths_disabled = result.rpc.is_none() && result.http.is_none();
        state.last_evaluated_at = Some(now);
        state.overall_state()
    }

    /// Admit one request on `path`, taking a half-open slot when needed.
    ///
    /// The returned grant identifies the breaker cycle it was issued in;
    /// hand it back to [`complete_request`](Self::complete_request) when the
    /// request finishes.
    pub fn admit(&self, server_name: &str, path: TrafficPath) -> Option<TrafficGrant> {
        let Some(shared) = self.existing(server_name) else {
            return Some(TrafficGrant {
                path,
                generation: 0,
                trial: false,
            });
        };
        self.admit_locked(server_name, &shared, path)
    }

    fn admit_locked(
        &self,
        server_name: &str,
        shared: &SharedServerState,
        path: TrafficPath,
    ) -> Option<TrafficGrant> {
        let config = self.config.load();
        let mut state = lock(shared);
        self.refresh(server_name, &mut state, &config, self.clock.now());

        let t = PathThresholds::for_path(&config, path);
        let circuit = state.path_mut(path);
        if !circuit.is_monitored() {
            return None;
        }
        let trial = match circuit.try_admit(&t) {
            Admission::Admitted { slot } => slot,
            Admission::Rejected => return None,
        };
        if trial {
            tracing::debug!(
                server = %server_name,
                path = %path,
                in_flight = circuit.half_open_in_flight(),
                "Admitted half-open trial request"
            );
        }
        Some(TrafficGrant {
            path,
            generation: circuit.generation(),
            trial,
        })
    }

    /// Whether one request may go down `path` right now.
    ///
    /// Same admission as [`admit`](Self::admit). A half-open trial admitted
    /// here cannot be reported back, so its slot is held until the path
    /// next transitions; callers that report completion use `admit`.
    pub fn should_allow_traffic(&self, server_name: &str, path: TrafficPath) -> bool {
        self.admit(server_name, path).is_some()
    }

    /// RPC (MCP) alias of [`should_allow_traffic`](Self::should_allow_traffic).
    pub fn should_allow_mcp_traffic(&self, server_name: &str) -> bool {
        self.should_allow_traffic(server_name, TrafficPath::Rpc)
    }

    /// HTTP (REST) alias of [`should_allow_traffic`](Self::should_allow_traffic).
    pub fn should_allow_rest_traffic(&self, server_name: &str) -> bool {
        self.should_allow_traffic(server_name, TrafficPath::Http)
    }

    /// Report that an admitted request finished, freeing its half-open slot.
    ///
    /// Grants from an earlier breaker cycle are ignored.
    pub fn complete_request(&self, server_name: &str, grant: TrafficGrant) {
        if !grant.trial {
            return;
        }
        if let Some(shared) = self.existing(server_name) {
            if !lock(&shared).path_mut(grant.path).release_at(grant.generation) {
                tracing::debug!(
                    server = %server_name,
                    path = %grant.path,
                    "Ignoring completion from an earlier breaker cycle"
                );
            }
        }
    }

    /// Admit one request and return a permit that releases its slot on drop.
    pub fn acquire(&self, server_name: &str, path: TrafficPath) -> Option<TrafficPermit> {
        let Some(shared) = self.existing(server_name) else {
            return Some(TrafficPermit::unslotted(path));
        };
        let grant = self.admit_locked(server_name, &shared, path)?;
        Some(TrafficPermit {
            slot: grant.trial.then(|| (Arc::clone(&shared), grant.generation)),
            path,
        })
    }

    /// Paths currently admissible for routing. Empty when none is.
    pub fn available_paths(&self, server_name: &str) -> AvailablePaths {
        let config = self.config.load();
        match self.existing(server_name) {
            Some(shared) => {
                let mut state = lock(&shared);
                self.refresh(server_name, &mut state, &config, self.clock.now());
                state.available_paths(&config)
            }
            None => ServerCircuitState::default().available_paths(&config),
        }
    }

    /// Full diagnostic snapshot for a server.
    pub fn get_state(&self, server_name: &str) -> ServerStateSnapshot {
        let config = self.config.load();
        let shared = self.existing(server_name);
        let mut fresh = ServerCircuitState::default();
        let mut guard = shared.as_deref().map(lock);
        let state = match guard.as_deref_mut() {
            Some(state) => {
                self.refresh(server_name, state, &config, self.clock.now());
                state
            }
            None => &mut fresh,
        };

        ServerStateSnapshot {
            server_name: server_name.to_string(),
            rpc_path: PathSnapshot::capture(
                &state.rpc,
                &PathThresholds::for_path(&config, TrafficPath::Rpc),
            ),
            http_path: PathSnapshot::capture(
                &state.http,
                &PathThresholds::for_path(&config, TrafficPath::Http),
            ),
            available_paths: state.available_paths(&config),
            overall_state: state.overall_state(),
            all_paths_disabled: state.all_paths_disabled,
            last_evaluated_at: state.last_evaluated_at,
        }
    }

    /// Force both paths back to CLOSED with zeroed counters.
    pub fn reset(&self, server_name: &str) {
        let Some(shared) = self.existing(server_name) else {
            return;
        };
        let now = self.clock.now();
        let mut state = lock(&shared);
        for path in TrafficPath::ALL {
            if let Some(transition) = state.path_mut(path).reset(now) {
                log_transition(server_name, path, transition);
            }
            metrics::record_circuit_state(server_name, path, CircuitState::Closed);
        }
        tracing::info!(server = %server_name, "Circuit breakers reset");
    }

    /// Fleet-wide statistics over every known server.
    pub fn get_metrics(&self) -> FleetMetrics {
        let config = self.config.load();
        let now = self.clock.now();
        // Clone the handles first so no map shard is held while locking.
        let servers: Vec<(String, SharedServerState)> = self
            .servers
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect();

        let mut fleet = FleetMetrics {
            total_servers: servers.len(),
            ..FleetMetrics::default()
        };
        let mut rpc_available = 0usize;
        let mut http_available = 0usize;

        for (name, shared) in servers {
            let mut state = lock(&shared);
            self.refresh(&name, &mut state, &config, now);

            match state.rpc.state() {
                CircuitState::Open => fleet.rpc_open_circuits += 1,
                CircuitState::HalfOpen => fleet.rpc_half_open_circuits += 1,
                CircuitState::Closed => {}
            }
            match state.http.state() {
                CircuitState::Open => fleet.http_open_circuits += 1,
                CircuitState::HalfOpen => fleet.http_half_open_circuits += 1,
                CircuitState::Closed => {}
            }

            let paths = state.available_paths(&config);
            if paths.allows(TrafficPath::Rpc) {
                rpc_available += 1;
            }
            if paths.allows(TrafficPath::Http) {
                http_available += 1;
            }
            if paths.contains(AvailablePath::Both) {
                fleet.servers_both_paths_available += 1;
            }
            if paths.is_unavailable() {
                fleet.servers_no_path_available += 1;
            }
            if state.all_paths_disabled {
                fleet.servers_all_paths_disabled += 1;
            }
        }

        if fleet.total_servers > 0 {
            fleet.rpc_availability_rate = rpc_available as f64 / fleet.total_servers as f64;
            fleet.http_availability_rate = http_available as f64 / fleet.total_servers as f64;
        }
        fleet
    }
}

fn log_transition(server_name: &str, path: TrafficPath, transition: Transition) {
    match transition.to {
        CircuitState::Open => tracing::warn!(
            server = %server_name,
            path = %path,
            from = %transition.from,
            "Circuit opened"
        ),
        _ => tracing::info!(
            server = %server_name,
            path = %path,
            from = %transition.from,
            to = %transition.to,
            "Circuit state changed"
        ),
    }
    metrics::record_transition(server_name, path, transition.to);
}

/// Record of one admission, returned by
/// [`CircuitBreakerRegistry::admit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrafficGrant {
    pub path: TrafficPath,
    /// Breaker generation at admission.
    pub generation: u64,
    /// Whether a half-open trial slot was taken.
    pub trial: bool,
}

/// Admission to send one request down a path.
///
/// A permit taken from a half-open path holds one trial slot until dropped.
#[derive(Debug)]
pub struct TrafficPermit {
    slot: Option<(SharedServerState, u64)>,
    path: TrafficPath,
}

impl TrafficPermit {
    fn unslotted(path: TrafficPath) -> Self {
        Self { slot: None, path }
    }

    pub fn path(&self) -> TrafficPath {
        self.path
    }

    /// Whether this permit occupies a half-open trial slot.
    pub fn is_trial(&self) -> bool {
        self.slot.is_some()
    }
}

impl Drop for TrafficPermit {
    fn drop(&mut self) {
        if let Some((shared, generation)) = self.slot.take() {
            let mut state = lock(&shared);
            state.path_mut(self.path).release_at(generation);
        }
    }
}
