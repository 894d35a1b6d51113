//! Dual-path health monitoring and circuit breaking for MCP tool servers.

pub mod auth;
pub mod config;
pub mod health;
pub mod lifecycle;
pub mod observability;
pub mod probe;
pub mod resilience;

pub use config::schema::MonitorConfig;
pub use health::{DualHealthCheckResult, DualPathChecker, HealthMonitor, TrafficPath};
pub use lifecycle::Shutdown;
pub use resilience::CircuitBreakerRegistry;
