//! HTTP health probe.
//!
//! GETs the server's health endpoint and inspects the JSON body for health
//! markers, error markers and embedded metrics.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use reqwest::header::{HeaderMap, ACCEPT};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::auth::{AuthError, AuthHeaders, AuthProvider};
use crate::config::schema::{RetryConfig, ServerConfig};
use crate::probe::{describe_transport_error, probe_timeout, USER_AGENT};
use crate::resilience::backoff::calculate_backoff;

/// Keys whose presence marks a body as a health report.
pub const HEALTH_INDICATORS: [&str; 5] = ["status", "health", "healthy", "state", "ok"];

/// Keys that flag an error even on a 2xx response.
pub const ERROR_INDICATORS: [&str; 4] = ["error", "errors", "failure", "failed"];

/// Accepted values of a string `status` field (case-insensitive).
pub const HEALTHY_STATUS_VALUES: [&str; 5] = ["ok", "healthy", "up", "running", "active"];

/// Metric name → accepted body keys, first match wins.
const METRIC_ALIASES: [(&str, &[&str]); 7] = [
    ("uptime", &["uptime", "uptime_seconds", "uptimeSeconds"]),
    ("memory", &["memory", "memory_usage", "memoryUsage", "mem"]),
    ("cpu", &["cpu", "cpu_usage", "cpuUsage"]),
    ("requests", &["requests", "request_count", "requestCount", "total_requests"]),
    ("errors", &["error_count", "errorCount", "error_rate", "errorRate"]),
    ("latency", &["latency", "latency_ms", "latencyMs", "avg_latency"]),
    ("connections", &["connections", "active_connections", "activeConnections"]),
];

/// Nested objects copied verbatim into the extracted metrics.
const NESTED_METRIC_KEYS: [&str; 2] = ["metrics", "stats"];

/// Failures that prevent an HTTP probe from producing a response.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum HttpProbeError {
    #[error("no HTTP health endpoint configured for server '{0}'")]
    MissingEndpoint(String),

    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),

    #[error("transport failure after {attempts} attempt(s): {message}")]
    Transport { attempts: u32, message: String },
}

/// Response of the last HTTP probe attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpProbeResult {
    pub server_name: String,
    pub url: String,
    pub status_code: u16,
    pub headers: BTreeMap<String, String>,
    /// Parsed JSON, or `{"rawResponse": <text>}` when the body was not JSON.
    pub body: Value,
    /// Whether `body` came from a JSON parse.
    pub body_is_json: bool,
    pub response_time_ms: f64,
    pub attempts: u32,
}

impl HttpProbeResult {
    pub fn is_success_status(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

/// Content checks over an HTTP health response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpValidationResult {
    pub is_valid: bool,
    pub http_status_valid: bool,
    pub response_format_valid: bool,
    pub health_indicators_present: bool,
    pub validation_errors: Vec<String>,
    pub server_metrics: Option<Map<String, Value>>,
}

/// Validate a health response.
pub fn validate_response(result: &HttpProbeResult) -> HttpValidationResult {
    let mut errors = Vec::new();

    let http_status_valid = result.is_success_status();
    if !http_status_valid {
        errors.push(format!("HTTP status {} is not 2xx", result.status_code));
    }

    if !result.body_is_json {
        errors.push("response body is not JSON".to_string());
    }

    // A wrapped raw body is still an object.
    let object = result.body.as_object();
    let response_format_valid = object.is_some();
    if !response_format_valid {
        errors.push("response body is not a JSON object".to_string());
    }

    let health_indicators_present =
        object.is_some_and(|body| HEALTH_INDICATORS.iter().any(|key| body.contains_key(*key)));
    if response_format_valid && !health_indicators_present {
        errors.push(format!(
            "no health indicator found (expected one of {})",
            HEALTH_INDICATORS.join(", ")
        ));
    }

    if let Some(body) = object {
        for key in ERROR_INDICATORS {
            if let Some(value) = body.get(key).filter(|v| is_truthy(v)) {
                errors.push(format!("error indicator '{}' present: {}", key, value));
            }
        }
        for key in ["healthy", "ok"] {
            if body.get(key) == Some(&Value::Bool(false)) {
                errors.push(format!("'{}' is false", key));
            }
        }
        if let Some(status) = body.get("status").and_then(Value::as_str) {
            let normalized = status.trim().to_ascii_lowercase();
            if !HEALTHY_STATUS_VALUES.contains(&normalized.as_str()) {
                errors.push(format!("unhealthy status '{}'", status));
            }
        }
    }

    let server_metrics = object
        .map(|_| extract_metrics(&result.body))
        .filter(|metrics| !metrics.is_empty());

    HttpValidationResult {
        is_valid: errors.is_empty(),
        http_status_valid,
        response_format_valid,
        health_indicators_present,
        validation_errors: errors,
        server_metrics,
    }
}

/// Best-effort scan of a health body for well-known metric keys.
pub fn extract_metrics(body: &Value) -> Map<String, Value> {
    let mut metrics = Map::new();
    let Some(object) = body.as_object() else {
        return metrics;
    };

    for (name, aliases) in METRIC_ALIASES {
        if let Some(value) = aliases
            .iter()
            .filter_map(|alias| object.get(*alias))
            .find(|v| !v.is_null())
        {
            metrics.insert(name.to_string(), value.clone());
        }
    }
    for key in NESTED_METRIC_KEYS {
        if let Some(nested) = object.get(key).filter(|v| v.is_object()) {
            metrics.insert(key.to_string(), nested.clone());
        }
    }
    metrics
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

fn flatten_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut flat: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        let Ok(value) = value.to_str() else {
            continue;
        };
        flat.entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }
    flat
}

struct RawResponse {
    status_code: u16,
    headers: BTreeMap<String, String>,
    body: Value,
    body_is_json: bool,
}

/// HTTP path prober.
#[derive(Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
    auth: Arc<dyn AuthProvider>,
    retry: RetryConfig,
}

impl HttpProbe {
    pub fn new(auth: Arc<dyn AuthProvider>, retry: RetryConfig) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_default();
        Self::with_client(client, auth, retry)
    }

    /// Share an existing connection pool.
    pub fn with_client(client: reqwest::Client, auth: Arc<dyn AuthProvider>, retry: RetryConfig) -> Self {
        Self { client, auth, retry }
    }

    /// Probe the server's health endpoint.
    ///
    /// A non-2xx answer is still `Ok`; only a transport failure on the final
    /// attempt (or a missing endpoint / auth failure) is an error.
    pub async fn probe(&self, server: &ServerConfig) -> Result<HttpProbeResult, HttpProbeError> {
        let url = server
            .http
            .endpoint
            .as_deref()
            .ok_or_else(|| HttpProbeError::MissingEndpoint(server.name.clone()))?;
        let headers = self.auth.auth_headers(&server.name).await?;

        let timeout = probe_timeout(server.http.timeout_secs);
        let max_attempts = server.http.retry_attempts.saturating_add(1);
        let mut attempt = 0;

        loop {
            let start = Instant::now();
            let outcome = self.send(url, &headers, timeout).await;
            let response_time_ms = start.elapsed().as_secs_f64() * 1000.0;
            attempt += 1;
            let last_attempt = attempt >= max_attempts;

            match outcome {
                Ok(raw) => {
                    let result = HttpProbeResult {
                        server_name: server.name.clone(),
                        url: url.to_string(),
                        status_code: raw.status_code,
                        headers: raw.headers,
                        body: raw.body,
                        body_is_json: raw.body_is_json,
                        response_time_ms,
                        attempts: attempt,
                    };
                    if result.is_success_status() || last_attempt {
                        return Ok(result);
                    }
                    tracing::debug!(
                        server = %server.name,
                        attempt = attempt,
                        status = result.status_code,
                        "HTTP probe got non-success status, retrying"
                    );
                }
                Err(message) if last_attempt => {
                    return Err(HttpProbeError::Transport {
                        attempts: attempt,
                        message,
                    });
                }
                Err(message) => {
                    tracing::debug!(
                        server = %server.name,
                        attempt = attempt,
                        error = %message,
                        "HTTP probe transport failure, retrying"
                    );
                }
            }

            let delay = calculate_backoff(attempt - 1, self.retry.backoff_factor, self.retry.max_backoff_secs);
            tokio::time::sleep(delay).await;
        }
    }

    async fn send(&self, url: &str, headers: &AuthHeaders, timeout: Duration) -> Result<RawResponse, String> {
        let mut request = self
            .client
            .get(url)
            .timeout(timeout)
            .header(ACCEPT, "application/json");
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request
            .send()
            .await
            .map_err(|e| describe_transport_error(&e, timeout))?;
        let status_code = response.status().as_u16();
        let headers = flatten_headers(response.headers());
        let text = response
            .text()
            .await
            .map_err(|e| describe_transport_error(&e, timeout))?;

        let (body, body_is_json) = match serde_json::from_str::<Value>(&text) {
            Ok(body) => (body, true),
            Err(_) => (json!({ "rawResponse": text }), false),
        };
        Ok(RawResponse {
            status_code,
            headers,
            body,
            body_is_json,
        })
    }
}
