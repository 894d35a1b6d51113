//! Dual-path health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Periodic timer (monitor.rs)
//!     → aggregator.rs: RPC probe ∥ HTTP probe per server, bounded fan-out
//!     → types.rs: DualHealthCheckResult (HEALTHY / DEGRADED / UNHEALTHY)
//!     → resilience::registry: evaluate
//! ```
//!
//! # Design Decisions
//! - A disabled path is neither success nor failure
//! - The raw verdict is evidence; routing reads breaker state
//! - One failed server never aborts the fleet check

pub mod aggregator;
pub mod monitor;
pub mod types;

pub use aggregator::DualPathChecker;
pub use monitor::HealthMonitor;
pub use types::{
    AvailablePath, AvailablePaths, DualHealthCheckResult, HealthStatus, HttpPathReport, PathReport,
    RpcPathReport, TrafficPath,
};
