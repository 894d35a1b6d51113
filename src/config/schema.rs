//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the monitor.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;
use serde::{Deserialize, Serialize};

/// Root configuration for the health monitor.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct MonitorConfig {
    /// Tool servers to probe.
    pub servers: Vec<ServerConfig>,

    /// Circuit breaker thresholds and policy.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Fleet polling settings.
    pub fleet: FleetCheckConfig,

    /// Probe retry settings.
    pub retries: RetryConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Named credentials referenced by `ServerConfig::auth`.
    pub auth: BTreeMap<String, AuthConfig>,
}

/// A single tool server reachable over the RPC and HTTP paths.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ServerConfig {
    /// Unique server identifier.
    pub name: String,

    /// RPC (tool discovery) path settings.
    #[serde(default)]
    pub rpc: RpcPathConfig,

    /// HTTP health path settings.
    #[serde(default)]
    pub http: HttpPathConfig,

    /// Name of an entry in the `[auth]` table.
    #[serde(default)]
    pub auth: Option<String>,
}

impl ServerConfig {
    /// Convenience constructor with both paths enabled.
    pub fn new(name: impl Into<String>, rpc_url: impl Into<String>, health_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rpc: RpcPathConfig {
                endpoint: Some(rpc_url.into()),
                ..RpcPathConfig::default()
            },
            http: HttpPathConfig {
                endpoint: Some(health_url.into()),
                ..HttpPathConfig::default()
            },
            auth: None,
        }
    }
}

/// RPC path configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RpcPathConfig {
    /// Probe this path at all.
    pub enabled: bool,

    /// RPC endpoint URL (JSON-RPC over HTTP POST).
    pub endpoint: Option<String>,

    /// Per-attempt timeout in seconds.
    pub timeout_secs: f64,

    /// Additional attempts after the first.
    pub retry_attempts: u32,

    /// Tools the server must advertise, in declaration order.
    pub expected_tools: Vec<String>,
}

impl Default for RpcPathConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: None,
            timeout_secs: 10.0,
            retry_attempts: 2,
            expected_tools: Vec::new(),
        }
    }
}

/// HTTP health path configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct HttpPathConfig {
    /// Probe this path at all.
    pub enabled: bool,

    /// Health endpoint URL.
    pub endpoint: Option<String>,

    /// Per-attempt timeout in seconds.
    pub timeout_secs: f64,

    /// Additional attempts after the first.
    pub retry_attempts: u32,
}

impl Default for HttpPathConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: None,
            timeout_secs: 10.0,
            retry_attempts: 2,
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before a path opens.
    pub failure_threshold: u32,

    /// Consecutive half-open successes before a path closes.
    pub success_threshold: u32,

    /// Gap after which earlier failures no longer count as consecutive.
    pub timeout_seconds: u64,

    /// Delay before an open path becomes half-open.
    pub recovery_timeout_seconds: u64,

    /// Concurrent trial requests admitted while half-open.
    pub half_open_max_requests: u32,

    /// Sliding window for the failure history.
    pub failure_history_window_minutes: u64,

    /// Upper bound on retained failure timestamps per path.
    pub max_failure_history: usize,

    /// Strict combined-health policy: `both` is reported only while both
    /// paths are CLOSED. A HALF_OPEN path still admits trial traffic but no
    /// longer counts towards `both`.
    pub require_both_paths_healthy: bool,

    /// RPC (MCP) path failure threshold override.
    pub mcp_failure_threshold: Option<u32>,

    /// HTTP (REST) path failure threshold override.
    pub rest_failure_threshold: Option<u32>,

    /// RPC (MCP) path success threshold override.
    pub mcp_success_threshold: Option<u32>,

    /// HTTP (REST) path success threshold override.
    pub rest_success_threshold: Option<u32>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 3,
            timeout_seconds: 60,
            recovery_timeout_seconds: 30,
            half_open_max_requests: 3,
            failure_history_window_minutes: 10,
            max_failure_history: 100,
            require_both_paths_healthy: false,
            mcp_failure_threshold: None,
            rest_failure_threshold: None,
            mcp_success_threshold: None,
            rest_success_threshold: None,
        }
    }
}

/// Fleet polling configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct FleetCheckConfig {
    /// Seconds between fleet checks.
    pub interval_secs: u64,

    /// Maximum servers probed at once.
    pub max_concurrent: usize,
}

impl Default for FleetCheckConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            max_concurrent: 10,
        }
    }
}

/// Retry configuration shared by both probes.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    /// Backoff base in seconds; attempt `n` waits `backoff_factor * 2^n`.
    pub backoff_factor: f64,

    /// Ceiling for a single backoff delay in seconds.
    pub max_backoff_secs: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            backoff_factor: 0.5,
            max_backoff_secs: 30.0,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log line format: compact, pretty or full.
    pub log_format: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "full".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// A named credential.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthConfig {
    /// `Authorization: Bearer <token>`.
    Bearer { token: String },

    /// API key sent in a custom header.
    ApiKey {
        key: String,
        #[serde(default = "default_api_key_header")]
        header: String,
    },
}

fn default_api_key_header() -> String {
    "X-API-Key".to_string()
}
