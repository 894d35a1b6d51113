//! RPC (tool discovery) health probe.
//!
//! Sends a JSON-RPC `tools/list` call to the server's RPC endpoint and checks
//! the returned tool catalog against the expected tool set.
//!
//! # Classification
//! - Transport failure, timeout or unparsable body → `ConnectionError`
//! - JSON-RPC error object, non-2xx status, id mismatch → `RpcError`
//! - `result.tools` array → `Success`

use std::sync::Arc;
use std::time::{Duration, Instant};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::auth::{AuthHeaders, AuthProvider};
use crate::config::schema::{RetryConfig, ServerConfig};
use crate::probe::{describe_transport_error, probe_timeout, USER_AGENT};
use crate::resilience::backoff::calculate_backoff;

pub const TOOL_DISCOVERY_METHOD: &str = "tools/list";
pub const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC "Invalid Request", used when the response id does not match.
const INVALID_REQUEST: i64 = -32600;
/// JSON-RPC "Internal error", used when the result has no tool list.
const INTERNAL_ERROR: i64 = -32603;

/// Build the discovery call for correlation id `id`.
pub fn discovery_request(id: &str) -> Value {
    json!({
        "jsonrpc": JSONRPC_VERSION,
        "id": id,
        "method": TOOL_DISCOVERY_METHOD,
        "params": {}
    })
}

/// Exactly one of success, transport failure or protocol failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RpcProbeStatus {
    Success { tools: Vec<Value> },
    ConnectionError { message: String },
    RpcError { code: i64, message: String },
}

/// Raw outcome of one RPC probe, after retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcProbeResult {
    pub server_name: String,
    pub url: String,
    pub response_time_ms: f64,
    pub attempts: u32,
    pub status: RpcProbeStatus,
}

impl RpcProbeResult {
    /// A result for a probe that failed before any request was sent.
    pub fn connection_failure(
        server_name: impl Into<String>,
        url: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            server_name: server_name.into(),
            url: url.into(),
            response_time_ms: 0.0,
            attempts: 0,
            status: RpcProbeStatus::ConnectionError {
                message: message.into(),
            },
        }
    }

    pub fn success(&self) -> bool {
        matches!(self.status, RpcProbeStatus::Success { .. })
    }

    /// Raw tool descriptors, empty unless the call succeeded.
    pub fn tools(&self) -> &[Value] {
        match &self.status {
            RpcProbeStatus::Success { tools } => tools,
            _ => &[],
        }
    }

    /// Names of every descriptor that carries a string `name`.
    pub fn tool_names(&self) -> Vec<String> {
        self.tools()
            .iter()
            .filter_map(|tool| tool.get("name").and_then(Value::as_str))
            .map(str::to_string)
            .collect()
    }

    pub fn tools_count(&self) -> usize {
        self.tools().len()
    }

    pub fn connection_error(&self) -> Option<&str> {
        match &self.status {
            RpcProbeStatus::ConnectionError { message } => Some(message),
            _ => None,
        }
    }

    pub fn rpc_error(&self) -> Option<(i64, &str)> {
        match &self.status {
            RpcProbeStatus::RpcError { code, message } => Some((*code, message)),
            _ => None,
        }
    }
}

/// Content checks over a successful tool catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcValidationResult {
    pub is_valid: bool,
    pub tools_count: usize,
    pub expected_tools_found: Vec<String>,
    pub missing_tools: Vec<String>,
    pub tool_schemas_valid: bool,
    pub validation_errors: Vec<String>,
}

/// Validate a probe result against the expected tool names.
///
/// Valid iff the call succeeded, every expected tool is present and no tool
/// descriptor is malformed. Expected/missing lists keep `expected` order.
pub fn validate_tools(result: &RpcProbeResult, expected: &[String]) -> RpcValidationResult {
    let failure = match &result.status {
        RpcProbeStatus::Success { .. } => None,
        RpcProbeStatus::ConnectionError { message } => Some(format!("connection error: {}", message)),
        RpcProbeStatus::RpcError { code, message } => Some(format!("RPC error {}: {}", code, message)),
    };
    if let Some(reason) = failure {
        return RpcValidationResult {
            is_valid: false,
            tools_count: 0,
            expected_tools_found: Vec::new(),
            missing_tools: expected.to_vec(),
            tool_schemas_valid: false,
            validation_errors: vec![format!("tool discovery failed: {}", reason)],
        };
    }

    let mut validation_errors: Vec<String> = result
        .tools()
        .iter()
        .enumerate()
        .flat_map(|(index, tool)| tool_schema_errors(index, tool))
        .collect();
    let tool_schemas_valid = validation_errors.is_empty();

    let names = result.tool_names();
    let (expected_tools_found, missing_tools): (Vec<String>, Vec<String>) = expected
        .iter()
        .cloned()
        .partition(|tool| names.contains(tool));
    for tool in &missing_tools {
        validation_errors.push(format!("missing expected tool '{}'", tool));
    }

    RpcValidationResult {
        is_valid: tool_schemas_valid && missing_tools.is_empty(),
        tools_count: result.tools_count(),
        expected_tools_found,
        missing_tools,
        tool_schemas_valid,
        validation_errors,
    }
}

fn tool_schema_errors(index: usize, tool: &Value) -> Vec<String> {
    let Some(descriptor) = tool.as_object() else {
        return vec![format!("tool #{} is not an object", index)];
    };

    let mut errors = Vec::new();
    let label = match descriptor.get("name") {
        Some(Value::String(name)) if !name.trim().is_empty() => name.clone(),
        _ => {
            errors.push(format!("tool #{} has no valid name", index));
            format!("#{}", index)
        }
    };

    match descriptor.get("inputSchema") {
        None => {}
        Some(Value::Object(schema)) => {
            if let Some(kind) = schema.get("type") {
                if kind.as_str() != Some("object") {
                    errors.push(format!("tool '{}' inputSchema type must be \"object\"", label));
                }
            }
        }
        Some(_) => errors.push(format!("tool '{}' inputSchema is not an object", label)),
    }
    errors
}

/// Classify one discovery response.
///
/// `content_type` selects SSE framing; `status` is the HTTP status code.
pub fn parse_discovery_response(
    content_type: Option<&str>,
    status: u16,
    body: &str,
    expected_id: &str,
) -> RpcProbeStatus {
    let http_ok = (200..300).contains(&status);
    let is_event_stream = content_type.is_some_and(|ct| ct.starts_with("text/event-stream"))
        || body.trim_start().starts_with("data:")
        || body.trim_start().starts_with("event:");

    let message = if is_event_stream {
        match sse_messages(body)
            .iter()
            .filter_map(|data| serde_json::from_str::<Value>(data).ok())
            .find(|msg| msg.get("result").is_some() || msg.get("error").is_some())
        {
            Some(message) => message,
            None if !http_ok => return http_error(status),
            None => {
                return RpcProbeStatus::ConnectionError {
                    message: "event stream carried no JSON-RPC response".to_string(),
                }
            }
        }
    } else {
        match serde_json::from_str::<Value>(body) {
            Ok(message) => message,
            Err(_) if !http_ok => return http_error(status),
            Err(e) => {
                return RpcProbeStatus::ConnectionError {
                    message: format!("malformed response body: {}", e),
                }
            }
        }
    };

    if let Some(error) = message.get("error") {
        let code = error
            .get("code")
            .and_then(Value::as_i64)
            .unwrap_or(i64::from(status));
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error")
            .to_string();
        return RpcProbeStatus::RpcError { code, message };
    }

    if !http_ok {
        return http_error(status);
    }

    match message.get("id") {
        None | Some(Value::Null) => {}
        Some(Value::String(id)) if id == expected_id => {}
        Some(other) => {
            return RpcProbeStatus::RpcError {
                code: INVALID_REQUEST,
                message: format!("response id {} does not match request id {}", other, expected_id),
            }
        }
    }

    match message.pointer("/result/tools") {
        Some(Value::Array(tools)) => RpcProbeStatus::Success {
            tools: tools.clone(),
        },
        _ => RpcProbeStatus::RpcError {
            code: INTERNAL_ERROR,
            message: "result has no tools array".to_string(),
        },
    }
}

fn http_error(status: u16) -> RpcProbeStatus {
    RpcProbeStatus::RpcError {
        code: i64::from(status),
        message: format!("HTTP status {}", status),
    }
}

/// Data payloads of each event in an SSE body.
fn sse_messages(body: &str) -> Vec<String> {
    let mut messages = Vec::new();
    let mut data: Vec<&str> = Vec::new();
    for line in body.lines() {
        if line.is_empty() {
            if !data.is_empty() {
                messages.push(data.join("\n"));
                data.clear();
            }
            continue;
        }
        if let Some(rest) = line.strip_prefix("data:") {
            data.push(rest.strip_prefix(' ').unwrap_or(rest));
        }
    }
    if !data.is_empty() {
        messages.push(data.join("\n"));
    }
    messages
}

/// RPC path prober.
#[derive(Clone)]
pub struct RpcProbe {
    client: reqwest::Client,
    auth: Arc<dyn AuthProvider>,
    retry: RetryConfig,
}

impl RpcProbe {
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

    /// Probe the server's RPC path. Never fails: every failure mode is
    /// reported in the returned result.
    pub async fn probe(&self, server: &ServerConfig) -> RpcProbeResult {
        let Some(url) = server.rpc.endpoint.as_deref() else {
            return RpcProbeResult::connection_failure(&server.name, "", "no RPC endpoint configured");
        };

        // Auth failures are not retried.
        let headers = match self.auth.auth_headers(&server.name).await {
            Ok(headers) => headers,
            Err(e) => {
                return RpcProbeResult::connection_failure(
                    &server.name,
                    url,
                    format!("authentication failed: {}", e),
                )
            }
        };

        let timeout = probe_timeout(server.rpc.timeout_secs);
        let max_attempts = server.rpc.retry_attempts.saturating_add(1);
        let mut attempt = 0;

        loop {
            let id = Uuid::new_v4().to_string();
            let start = Instant::now();
            let status = self.send(url, &id, &headers, timeout).await;
            let response_time_ms = start.elapsed().as_secs_f64() * 1000.0;
            attempt += 1;

            let result = RpcProbeResult {
                server_name: server.name.clone(),
                url: url.to_string(),
                response_time_ms,
                attempts: attempt,
                status,
            };
            if result.success() || attempt >= max_attempts {
                return result;
            }

            let delay = calculate_backoff(attempt - 1, self.retry.backoff_factor, self.retry.max_backoff_secs);
            tracing::debug!(
                server = %server.name,
                attempt = attempt,
                max_attempts = max_attempts,
                delay_ms = delay.as_millis() as u64,
                status = ?result.status,
                "RPC probe failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn send(
        &self,
        url: &str,
        id: &str,
        headers: &AuthHeaders,
        timeout: Duration,
    ) -> RpcProbeStatus {
        let mut request = self
            .client
            .post(url)
            .timeout(timeout)
            .header(ACCEPT, "application/json, text/event-stream")
            .json(&discovery_request(id));
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                return RpcProbeStatus::ConnectionError {
                    message: describe_transport_error(&e, timeout),
                }
            }
        };

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);

        match response.text().await {
            Ok(body) => parse_discovery_response(content_type.as_deref(), status, &body, id),
            Err(e) => RpcProbeStatus::ConnectionError {
                message: describe_transport_error(&e, timeout),
            },
        }
    }
}
