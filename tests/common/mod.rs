//! Shared utilities for integration testing.
//!
//! Mock tool servers on raw sockets: each connection's request is read in
//! full, handed to a handler, and answered with `Connection: close`.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use mcp_health_monitor::config::schema::{RetryConfig, ServerConfig};

/// A request as seen by a mock server.
#[derive(Debug, Clone)]
pub struct MockRequest {
    pub method: String,
    pub path: String,
    /// Lower-cased header names.
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl MockRequest {
    pub fn json(&self) -> Option<Value> {
        serde_json::from_str(&self.body).ok()
    }

    /// The JSON-RPC id of the request, `null` when absent.
    pub fn rpc_id(&self) -> Value {
        self.json()
            .and_then(|v| v.get("id").cloned())
            .unwrap_or(Value::Null)
    }
}

/// What a mock server answers with.
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub status: u16,
    pub content_type: &'static str,
    pub body: String,
    pub delay: Option<Duration>,
}

impl MockResponse {
    pub fn json(status: u16, body: Value) -> Self {
        Self {
            status,
            content_type: "application/json",
            body: body.to_string(),
            delay: None,
        }
    }

    pub fn text(status: u16, body: &str) -> Self {
        Self {
            status,
            content_type: "text/plain",
            body: body.to_string(),
            delay: None,
        }
    }

    pub fn sse(message: Value) -> Self {
        Self {
            status: 200,
            content_type: "text/event-stream",
            body: format!("event: message\ndata: {}\n\n", message),
            delay: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// Handle to a running mock server.
#[derive(Clone)]
pub struct MockServer {
    pub addr: SocketAddr,
    hits: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<MockRequest>>>,
}

impl MockServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    /// Highest number of requests that were being handled at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<MockRequest> {
        self.requests.lock().unwrap().clone()
    }
}

/// Start a programmable mock server on an ephemeral port.
pub async fn start_mock_server<F>(handler: F) -> MockServer
where
    F: Fn(&MockRequest) -> MockResponse + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let server = MockServer {
        addr: listener.local_addr().unwrap(),
        hits: Arc::new(AtomicUsize::new(0)),
        in_flight: Arc::new(AtomicUsize::new(0)),
        max_in_flight: Arc::new(AtomicUsize::new(0)),
        requests: Arc::new(Mutex::new(Vec::new())),
    };
    let handler = Arc::new(handler);
    let state = server.clone();

    tokio::spawn(async move {
        loop {
            let Ok((socket, _)) = listener.accept().await else {
                break;
            };
            let handler = handler.clone();
            let state = state.clone();
            tokio::spawn(async move {
                let _ = serve(socket, handler.as_ref(), &state).await;
            });
        }
    });

    server
}

async fn serve<F>(mut socket: TcpStream, handler: &F, state: &MockServer) -> std::io::Result<()>
where
    F: Fn(&MockRequest) -> MockResponse,
{
    let Some(request) = read_request(&mut socket).await? else {
        return Ok(());
    };
    state.hits.fetch_add(1, Ordering::SeqCst);
    let now = state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    state.max_in_flight.fetch_max(now, Ordering::SeqCst);
    state.requests.lock().unwrap().push(request.clone());

    let response = handler(&request);
    if let Some(delay) = response.delay {
        tokio::time::sleep(delay).await;
    }

    let head = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        response.status,
        reason(response.status),
        response.content_type,
        response.body.len()
    );
    let result = async {
        socket.write_all(head.as_bytes()).await?;
        socket.write_all(response.body.as_bytes()).await?;
        socket.shutdown().await
    }
    .await;
    state.in_flight.fetch_sub(1, Ordering::SeqCst);
    result
}

async fn read_request(socket: &mut TcpStream) -> std::io::Result<Option<MockRequest>> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            return Ok(None);
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next().unwrap_or_default().split_whitespace();
    let method = request_line.next().unwrap_or_default().to_string();
    let path = request_line.next().unwrap_or_default().to_string();

    let headers: HashMap<String, String> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
        .collect();
    let content_length: usize = headers
        .get("content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    while buf.len() < header_end + content_length {
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    let body_end = (header_end + content_length).min(buf.len());
    let body = String::from_utf8_lossy(&buf[header_end..body_end]).to_string();

    Ok(Some(MockRequest {
        method,
        path,
        headers,
        body,
    }))
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        401 => "Unauthorized",
        404 => "Not Found",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        _ => "Status",
    }
}

/// A successful `tools/list` answer echoing the request id.
pub fn tools_response(request: &MockRequest, tools: &[&str]) -> MockResponse {
    let tools: Vec<Value> = tools
        .iter()
        .map(|name| json!({ "name": name, "inputSchema": { "type": "object" } }))
        .collect();
    MockResponse::json(
        200,
        json!({ "jsonrpc": "2.0", "id": request.rpc_id(), "result": { "tools": tools } }),
    )
}

/// A mock tool server answering `POST /mcp` with `tools` and
/// `GET /health` with `{"status": "ok"}`.
pub async fn start_healthy_server(tools: &'static [&'static str]) -> MockServer {
    start_mock_server(move |request| match request.method.as_str() {
        "POST" => tools_response(request, tools),
        _ => MockResponse::json(200, json!({ "status": "ok", "uptime": 42 })),
    })
    .await
}

/// An address nothing is listening on.
pub async fn closed_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

/// Server config pointing both paths at `server`, with fast timeouts.
pub fn server_config(name: &str, server: &MockServer) -> ServerConfig {
    let mut config = ServerConfig::new(name, server.url("/mcp"), server.url("/health"));
    config.rpc.timeout_secs = 2.0;
    config.http.timeout_secs = 2.0;
    config.rpc.retry_attempts = 0;
    config.http.retry_attempts = 0;
    config
}

/// Retries with negligible delay.
pub fn fast_retries() -> RetryConfig {
    RetryConfig {
        backoff_factor: 0.001,
        max_backoff_secs: 0.01,
    }
}
