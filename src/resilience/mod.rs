//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Probe attempt fails:
//!     → backoff.rs (delay before the next attempt)
//!
//! Dual health result:
//!     → registry.rs (per-server lock, lazy recovery check)
//!     → circuit_breaker.rs (one state machine per path)
//!     → routing queries / fleet metrics
//! ```
//!
//! # Design Decisions
//! - No background timers; recovery is computed from the clock on access
//! - The registry is constructed explicitly and shared by handle
//! - Blocked paths fail closed

pub mod backoff;
pub mod circuit_breaker;
pub mod clock;
pub mod registry;

pub use circuit_breaker::CircuitState;
pub use clock::{Clock, ManualClock, SystemClock};
pub use registry::{
    CircuitBreakerRegistry, FleetMetrics, OverallCircuitState, PathSnapshot, ServerStateSnapshot,
    TrafficGrant, TrafficPermit,
};
