//! Per-path circuit breaker.
//!
//! # States
//! - Closed: traffic allowed, failures tracked
//! - Open: path assumed down, traffic blocked
//! - Half-Open: a limited number of trial requests allowed
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive failures >= failure_threshold
//! Open → Half-Open: recovery timeout elapsed (checked lazily, no timer)
//! Half-Open → Closed: consecutive successes >= success_threshold
//! Half-Open → Open: any failure (opened_at reset)
//! ```
//!
//! # Design Decisions
//! - One breaker per (server, path); the registry owns and locks them
//! - A gap longer than `timeout_seconds` between failures restarts the count
//! - Failure timestamps live in a bounded window pruned on write
//! - Counters reset on every state transition

use std::collections::VecDeque;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::schema::CircuitBreakerConfig;
use crate::health::types::TrafficPath;

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        }
    }

    /// Gauge encoding: 0 closed, 1 half-open, 2 open.
    pub fn as_gauge(&self) -> f64 {
        match self {
            CircuitState::Closed => 0.0,
            CircuitState::HalfOpen => 1.0,
            CircuitState::Open => 2.0,
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Thresholds resolved for one path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathThresholds {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub failure_timeout: Duration,
    pub recovery_timeout: Duration,
    pub half_open_max_requests: u32,
    pub history_window: Duration,
    pub max_history: usize,
}

impl PathThresholds {
    /// Resolve thresholds for `path`, applying the MCP/REST overrides.
    pub fn for_path(config: &CircuitBreakerConfig, path: TrafficPath) -> Self {
        let (failure_override, success_override) = match path {
            TrafficPath::Rpc => (config.mcp_failure_threshold, config.mcp_success_threshold),
            TrafficPath::Http => (config.rest_failure_threshold, config.rest_success_threshold),
        };
        Self {
            failure_threshold: failure_override.unwrap_or(config.failure_threshold).max(1),
            success_threshold: success_override.unwrap_or(config.success_threshold).max(1),
            failure_timeout: seconds(config.timeout_seconds),
            recovery_timeout: seconds(config.recovery_timeout_seconds),
            half_open_max_requests: config.half_open_max_requests,
            history_window: seconds(config.failure_history_window_minutes.saturating_mul(60)),
            max_history: config.max_failure_history.max(1),
        }
    }
}

fn seconds(secs: u64) -> Duration {
    // TimeDelta is bounded by i64::MAX milliseconds
    let secs = i64::try_from(secs).unwrap_or(i64::MAX).min(i64::MAX / 1_000);
    Duration::seconds(secs)
}

/// A state change, reported so the caller can log and count it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: CircuitState,
    pub to: CircuitState,
}

/// State machine for one path of one server.
#[derive(Debug, Clone, PartialEq)]
pub struct PathCircuit {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<DateTime<Utc>>,
    half_open_in_flight: u32,
    recent_failures: VecDeque<DateTime<Utc>>,
    last_failure_at: Option<DateTime<Utc>>,
    last_transition_at: Option<DateTime<Utc>>,
    /// Bumped on every transition; lets outstanding permits detect staleness.
    generation: u64,
    /// Whether the path was enabled in the last evaluated result.
    monitored: bool,
}

impl Default for PathCircuit {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            opened_at: None,
            half_open_in_flight: 0,
            recent_failures: VecDeque::new(),
            last_failure_at: None,
            last_transition_at: None,
            generation: 0,
            monitored: true,
        }
    }
}

impl PathCircuit {
    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn consecutive_successes(&self) -> u32 {
        self.consecutive_successes
    }

    pub fn opened_at(&self) -> Option<DateTime<Utc>> {
        self.opened_at
    }

    pub fn half_open_in_flight(&self) -> u32 {
        self.half_open_in_flight
    }

    pub fn recent_failure_count(&self) -> usize {
        self.recent_failures.len()
    }

    pub fn last_failure_at(&self) -> Option<DateTime<Utc>> {
        self.last_failure_at
    }

    pub fn last_transition_at(&self) -> Option<DateTime<Utc>> {
        self.last_transition_at
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_monitored(&self) -> bool {
        self.monitored
    }

    pub fn set_monitored(&mut self, monitored: bool) {
        self.monitored = monitored;
    }

    /// Lazy OPEN → HALF_OPEN once the recovery timeout has elapsed.
    pub fn refresh(&mut self, now: DateTime<Utc>, t: &PathThresholds) -> Option<Transition> {
        match (self.state, self.opened_at) {
            (CircuitState::Open, Some(opened_at)) if now - opened_at >= t.recovery_timeout => {
                Some(self.transition(CircuitState::HalfOpen, now))
            }
            _ => None,
        }
    }

    /// Feed a successful probe.
    pub fn record_success(&mut self, now: DateTime<Utc>, t: &PathThresholds) -> Option<Transition> {
        match self.state {
            CircuitState::Closed => {
                // Already closed, just ensure failures 0
                self.consecutive_failures = 0;
                None
            }
            CircuitState::HalfOpen => {
                self.consecutive_failures = 0;
                self.consecutive_successes = self.consecutive_successes.saturating_add(1);
                if self.consecutive_successes >= t.success_threshold {
                    Some(self.transition(CircuitState::Closed, now))
                } else {
                    None
                }
            }
            // Evidence while open does not shorten the recovery timeout.
            CircuitState::Open => None,
        }
    }

    /// Feed a failed probe.
    pub fn record_failure(&mut self, now: DateTime<Utc>, t: &PathThresholds) -> Option<Transition> {
        self.push_failure(now, t);
        self.consecutive_successes = 0;

        let stale = self
            .last_failure_at
            .is_some_and(|last| now - last > t.failure_timeout);
        self.last_failure_at = Some(now);

        match self.state {
            CircuitState::Closed => {
                if stale {
                    self.consecutive_failures = 0;
                }
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                if self.consecutive_failures >= t.failure_threshold {
                    Some(self.transition(CircuitState::Open, now))
                } else {
                    None
                }
            }
            CircuitState::HalfOpen => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                Some(self.transition(CircuitState::Open, now))
            }
            CircuitState::Open => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                None
            }
        }
    }

    /// Admissible right now, without consuming a half-open slot.
    pub fn is_admissible(&self, t: &PathThresholds) -> bool {
        match self.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => self.half_open_in_flight < t.half_open_max_requests,
            CircuitState::Open => false,
        }
    }

    /// Admit one request, taking a half-open slot when needed.
    /// Returns whether a slot was taken alongside the admission decision.
    pub fn try_admit(&mut self, t: &PathThresholds) -> Admission {
        match self.state {
            CircuitState::Closed => Admission::Admitted { slot: false },
            CircuitState::HalfOpen if self.half_open_in_flight < t.half_open_max_requests => {
                self.half_open_in_flight += 1;
                Admission::Admitted { slot: true }
            }
            _ => Admission::Rejected,
        }
    }

    /// Give back a half-open slot.
    pub fn release(&mut self) {
        if self.state == CircuitState::HalfOpen {
            self.half_open_in_flight = self.half_open_in_flight.saturating_sub(1);
        }
    }

    /// Give back a slot taken at `generation`. A transition since then
    /// already zeroed the count, so stale releases are ignored.
    pub fn release_at(&mut self, generation: u64) -> bool {
        if self.generation != generation {
            return false;
        }
        self.release();
        true
    }

    /// Back to a pristine CLOSED breaker.
    pub fn reset(&mut self, now: DateTime<Utc>) -> Option<Transition> {
        let from = self.state;
        let monitored = self.monitored;
        let generation = self.generation.wrapping_add(1);
        *self = Self {
            monitored,
            generation,
            last_transition_at: Some(now),
            ..Self::default()
        };
        (from != CircuitState::Closed).then_some(Transition {
            from,
            to: CircuitState::Closed,
        })
    }

    fn push_failure(&mut self, now: DateTime<Utc>, t: &PathThresholds) {
        if let Some(cutoff) = now.checked_sub_signed(t.history_window) {
            while self.recent_failures.front().is_some_and(|ts| *ts < cutoff) {
                self.recent_failures.pop_front();
            }
        }
        self.recent_failures.push_back(now);
        while self.recent_failures.len() > t.max_history {
            self.recent_failures.pop_front();
        }
    }

    fn transition(&mut self, to: CircuitState, now: DateTime<Utc>) -> Transition {
        let from = self.state;
        self.state = to;
        self.generation = self.generation.wrapping_add(1);
        self.last_transition_at = Some(now);
        self.half_open_in_flight = 0;
        self.consecutive_successes = 0;
        match to {
            CircuitState::Open => {
                self.opened_at = Some(now);
            }
            CircuitState::HalfOpen => {
                self.opened_at = None;
            }
            CircuitState::Closed => {
                self.opened_at = None;
                self.consecutive_failures = 0;
            }
        }
        Transition { from, to }
    }
}

/// Result of an admission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted { slot: bool },
    Rejected,
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted { .. })
    }
}
