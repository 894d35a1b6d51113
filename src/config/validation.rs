//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (servers reference existing credentials)
//! - Validate value ranges (timeouts > 0, thresholds > 0)
//! - Detect duplicate server names
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: MonitorConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use thiserror::Error;
use url::Url;

use crate::config::schema::{CircuitBreakerConfig, MonitorConfig, ServerConfig};
use crate::resilience::backoff::BACKOFF_CEILING_SECS;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("duplicate server name '{0}'")]
    DuplicateServer(String),

    #[error("server '{server}': {path} path is enabled but has no endpoint")]
    MissingEndpoint { server: String, path: &'static str },

    #[error("server '{server}': invalid {path} endpoint '{url}'")]
    InvalidEndpoint { server: String, path: &'static str, url: String },

    #[error("server '{server}': {path} timeout must be positive")]
    InvalidTimeout { server: String, path: &'static str },

    #[error("server '{server}': unknown auth reference '{auth}'")]
    UnknownAuth { server: String, auth: String },

    #[error("circuit_breaker.{0} must be greater than zero")]
    ZeroThreshold(&'static str),

    #[error("fleet.{0} must be greater than zero")]
    ZeroFleetSetting(&'static str),

    #[error("retries.{0} must be between 0 and 3600 seconds")]
    InvalidBackoff(&'static str),
}

/// Validate a loaded configuration.
pub fn validate_config(config: &MonitorConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let mut seen = HashSet::new();
    for server in &config.servers {
        if !seen.insert(server.name.as_str()) {
            errors.push(ValidationError::DuplicateServer(server.name.clone()));
        }
        validate_server(server, config, &mut errors);
    }

    validate_circuit_breaker(&config.circuit_breaker, &mut errors);

    if config.fleet.max_concurrent == 0 {
        errors.push(ValidationError::ZeroFleetSetting("max_concurrent"));
    }
    if config.fleet.interval_secs == 0 {
        errors.push(ValidationError::ZeroFleetSetting("interval_secs"));
    }

    let backoff_range = 0.0..=BACKOFF_CEILING_SECS;
    if !backoff_range.contains(&config.retries.backoff_factor) {
        errors.push(ValidationError::InvalidBackoff("backoff_factor"));
    }
    if !backoff_range.contains(&config.retries.max_backoff_secs) {
        errors.push(ValidationError::InvalidBackoff("max_backoff_secs"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_server(server: &ServerConfig, config: &MonitorConfig, errors: &mut Vec<ValidationError>) {
    let paths = [
        ("rpc", server.rpc.enabled, server.rpc.endpoint.as_deref(), server.rpc.timeout_secs),
        ("http", server.http.enabled, server.http.endpoint.as_deref(), server.http.timeout_secs),
    ];

    for (path, enabled, endpoint, timeout) in paths {
        if !enabled {
            continue;
        }
        match endpoint {
            None => errors.push(ValidationError::MissingEndpoint {
                server: server.name.clone(),
                path,
            }),
            Some(url) if Url::parse(url).is_err() => errors.push(ValidationError::InvalidEndpoint {
                server: server.name.clone(),
                path,
                url: url.to_string(),
            }),
            Some(_) => {}
        }
        if !(timeout.is_finite() && timeout > 0.0) {
            errors.push(ValidationError::InvalidTimeout {
                server: server.name.clone(),
                path,
            });
        }
    }

    if let Some(auth) = &server.auth {
        if !config.auth.contains_key(auth) {
            errors.push(ValidationError::UnknownAuth {
                server: server.name.clone(),
                auth: auth.clone(),
            });
        }
    }
}

fn validate_circuit_breaker(cb: &CircuitBreakerConfig, errors: &mut Vec<ValidationError>) {
    let checks = [
        ("failure_threshold", Some(cb.failure_threshold)),
        ("success_threshold", Some(cb.success_threshold)),
        ("half_open_max_requests", Some(cb.half_open_max_requests)),
        ("mcp_failure_threshold", cb.mcp_failure_threshold),
        ("rest_failure_threshold", cb.rest_failure_threshold),
        ("mcp_success_threshold", cb.mcp_success_threshold),
        ("rest_success_threshold", cb.rest_success_threshold),
    ];
    for (name, value) in checks {
        if value == Some(0) {
            errors.push(ValidationError::ZeroThreshold(name));
        }
    }
    if cb.max_failure_history == 0 {
        errors.push(ValidationError::ZeroThreshold("max_failure_history"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::ServerConfig;

    fn valid_config() -> MonitorConfig {
        MonitorConfig {
            servers: vec![ServerConfig::new(
                "svc-a",
                "http://127.0.0.1:3000/mcp",
                "http://127.0.0.1:3000/health",
            )],
            ..MonitorConfig::default()
        }
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(validate_config(&valid_config()).is_ok());
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = valid_config();
        config.servers.push(config.servers[0].clone());
        config.servers[0].http.endpoint = None;
        config.servers[0].rpc.endpoint = Some("not a url".into());
        config.servers[0].auth = Some("missing".into());
        config.circuit_breaker.half_open_max_requests = 0;
        config.fleet.max_concurrent = 0;

        let errors = validate_config(&config).unwrap_err();
        assert!(errors.contains(&ValidationError::DuplicateServer("svc-a".into())));
        assert!(errors.contains(&ValidationError::MissingEndpoint {
            server: "svc-a".into(),
            path: "http"
        }));
        assert!(errors.iter().any(|e| matches!(e, ValidationError::InvalidEndpoint { .. })));
        assert!(errors.iter().any(|e| matches!(e, ValidationError::UnknownAuth { .. })));
        assert!(errors.contains(&ValidationError::ZeroThreshold("half_open_max_requests")));
        assert!(errors.contains(&ValidationError::ZeroFleetSetting("max_concurrent")));
    }

    #[test]
    fn test_backoff_bounds() {
        let mut config = valid_config();
        config.retries.backoff_factor = 1e20;
        config.retries.max_backoff_secs = 1e20;
        let errors = validate_config(&config).unwrap_err();
        assert!(errors.contains(&ValidationError::InvalidBackoff("backoff_factor")));
        assert!(errors.contains(&ValidationError::InvalidBackoff("max_backoff_secs")));

        config.retries.backoff_factor = f64::NAN;
        config.retries.max_backoff_secs = 3600.0;
        assert_eq!(
            validate_config(&config).unwrap_err(),
            vec![ValidationError::InvalidBackoff("backoff_factor")]
        );
    }

    #[test]
    fn test_disabled_path_needs_no_endpoint() {
        let mut config = valid_config();
        config.servers[0].http.enabled = false;
        config.servers[0].http.endpoint = None;
        assert!(validate_config(&config).is_ok());
    }
}
