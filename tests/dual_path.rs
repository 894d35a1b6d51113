//! Dual-path probing against mock tool servers.

mod common;

use std::sync::Arc;
use std::time::Duration;
use serde_json::json;

use common::*;
use mcp_health_monitor::auth::{NoAuth, StaticAuthProvider};
use mcp_health_monitor::config::schema::{AuthConfig, MonitorConfig};
use mcp_health_monitor::health::{AvailablePath, AvailablePaths, DualPathChecker, HealthStatus, TrafficPath};
use mcp_health_monitor::probe::ProbeOutcome;

fn checker() -> DualPathChecker {
    DualPathChecker::new(Arc::new(NoAuth), fast_retries())
}

fn paths(items: &[AvailablePath]) -> AvailablePaths {
    items.iter().copied().collect()
}

#[tokio::test]
async fn test_healthy_server_on_both_paths() {
    let server = start_healthy_server(&["search", "fetch"]).await;
    let mut config = server_config("svc", &server);
    config.rpc.expected_tools = vec!["fetch".into(), "search".into()];

    let result = checker().check_server(&config).await;

    assert_eq!(result.overall_status, HealthStatus::Healthy);
    assert!(result.overall_success);
    assert_eq!(
        result.available_paths,
        paths(&[AvailablePath::Rpc, AvailablePath::Http, AvailablePath::Both])
    );

    let rpc = result.rpc.as_ref().unwrap();
    assert_eq!(rpc.probe.as_ref().unwrap().tools_count(), 2);
    assert!(rpc.validation.as_ref().unwrap().is_valid);

    let http = result.http.as_ref().unwrap();
    let metrics = http.validation.as_ref().unwrap().server_metrics.as_ref().unwrap();
    assert_eq!(metrics["uptime"], 42);

    let requests = server.requests();
    let discovery = requests.iter().find(|r| r.method == "POST").unwrap();
    assert_eq!(discovery.path, "/mcp");
    assert_eq!(discovery.json().unwrap()["method"], "tools/list");
    let health = requests.iter().find(|r| r.method == "GET").unwrap();
    assert_eq!(health.headers.get("accept").map(String::as_str), Some("application/json"));
}

#[tokio::test]
async fn test_missing_tool_degrades_to_http() {
    let server = start_healthy_server(&["search"]).await;
    let mut config = server_config("svc", &server);
    config.rpc.expected_tools = vec!["search".into(), "summarize".into()];

    let result = checker().check_server(&config).await;

    assert_eq!(result.overall_status, HealthStatus::Degraded);
    assert_eq!(result.available_paths, paths(&[AvailablePath::Http]));
    let validation = result.rpc.as_ref().unwrap().validation.as_ref().unwrap();
    assert_eq!(validation.missing_tools, vec!["summarize".to_string()]);
    assert!(matches!(
        result.outcome(TrafficPath::Rpc),
        Some(ProbeOutcome::ValidationFailure { .. })
    ));
}

#[tokio::test]
async fn test_rpc_protocol_error_is_distinguished() {
    let server = start_mock_server(|request| match request.method.as_str() {
        "POST" => MockResponse::json(
            200,
            json!({
                "jsonrpc": "2.0",
                "id": request.rpc_id(),
                "error": { "code": -32601, "message": "Method not found" }
            }),
        ),
        _ => MockResponse::json(200, json!({ "status": "ok" })),
    })
    .await;

    let result = checker().check_server(&server_config("svc", &server)).await;

    assert_eq!(
        result.outcome(TrafficPath::Rpc),
        Some(&ProbeOutcome::ProtocolError {
            code: Some(-32601),
            message: "Method not found".into()
        })
    );
    assert_eq!(result.overall_status, HealthStatus::Degraded);
}

#[tokio::test]
async fn test_event_stream_discovery() {
    let server = start_mock_server(|request| match request.method.as_str() {
        "POST" => MockResponse::sse(json!({
            "jsonrpc": "2.0",
            "id": request.rpc_id(),
            "result": { "tools": [{ "name": "search" }] }
        })),
        _ => MockResponse::json(200, json!({ "status": "ok" })),
    })
    .await;

    let result = checker().check_server(&server_config("svc", &server)).await;
    assert_eq!(result.overall_status, HealthStatus::Healthy);
    assert_eq!(result.rpc.unwrap().probe.unwrap().tool_names(), vec!["search".to_string()]);
}

#[tokio::test]
async fn test_unreachable_server_is_unhealthy() {
    let addr = closed_addr().await;
    let config = mcp_health_monitor::config::ServerConfig::new(
        "down",
        format!("http://{}/mcp", addr),
        format!("http://{}/health", addr),
    );

    let result = DualPathChecker::new(Arc::new(NoAuth), fast_retries())
        .check_server(&config)
        .await;

    assert_eq!(result.overall_status, HealthStatus::Unhealthy);
    assert!(!result.overall_success);
    assert_eq!(result.available_paths, AvailablePaths::none());
    assert!(matches!(
        result.outcome(TrafficPath::Rpc),
        Some(ProbeOutcome::TransportError { .. })
    ));
    assert!(matches!(
        result.outcome(TrafficPath::Http),
        Some(ProbeOutcome::TransportError { .. })
    ));
    // Retries were exhausted on both paths.
    assert_eq!(result.rpc.unwrap().probe.unwrap().attempts, 3);
}

#[tokio::test]
async fn test_http_non_2xx_is_retried_then_reported() {
    let server = start_mock_server(|request| match request.method.as_str() {
        "POST" => tools_response(request, &["search"]),
        _ => MockResponse::json(503, json!({ "status": "down" })),
    })
    .await;
    let mut config = server_config("svc", &server);
    config.http.retry_attempts = 2;

    let result = checker().check_server(&config).await;

    let http = result.http.as_ref().unwrap();
    assert_eq!(http.probe.as_ref().unwrap().status_code, 503);
    assert_eq!(http.probe.as_ref().unwrap().attempts, 3);
    assert!(matches!(
        http.outcome,
        ProbeOutcome::ProtocolError { code: Some(503), .. }
    ));
    let gets = server.requests().iter().filter(|r| r.method == "GET").count();
    assert_eq!(gets, 3);
}

#[tokio::test]
async fn test_non_json_health_body_is_wrapped() {
    let server = start_mock_server(|request| match request.method.as_str() {
        "POST" => tools_response(request, &[]),
        _ => MockResponse::text(200, "OK"),
    })
    .await;

    let result = checker().check_server(&server_config("svc", &server)).await;

    let http = result.http.as_ref().unwrap();
    assert_eq!(http.probe.as_ref().unwrap().body, json!({ "rawResponse": "OK" }));
    assert!(matches!(http.outcome, ProbeOutcome::ValidationFailure { .. }));
    assert_eq!(result.overall_status, HealthStatus::Degraded);
}

#[tokio::test]
async fn test_probe_timeout_yields_transport_error() {
    let server = start_mock_server(|request| match request.method.as_str() {
        "POST" => tools_response(request, &[]).with_delay(Duration::from_secs(3)),
        _ => MockResponse::json(200, json!({ "status": "ok" })),
    })
    .await;
    let mut config = server_config("svc", &server);
    config.rpc.timeout_secs = 0.2;

    let result = checker().check_server(&config).await;

    match result.outcome(TrafficPath::Rpc) {
        Some(ProbeOutcome::TransportError { message }) => assert!(message.contains("timed out"), "{}", message),
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(result.available_paths, paths(&[AvailablePath::Http]));
}

#[tokio::test]
async fn test_auth_headers_are_injected() {
    let server = start_healthy_server(&["search"]).await;
    let mut server_cfg = server_config("svc", &server);
    server_cfg.auth = Some("main".into());
    let mut config = MonitorConfig {
        servers: vec![server_cfg.clone()],
        ..MonitorConfig::default()
    };
    config.auth.insert(
        "main".into(),
        AuthConfig::Bearer {
            token: "s3cret".into(),
        },
    );

    let checker = DualPathChecker::new(Arc::new(StaticAuthProvider::from_config(&config)), fast_retries());
    let result = checker.check_server(&server_cfg).await;

    assert_eq!(result.overall_status, HealthStatus::Healthy);
    let requests = server.requests();
    assert_eq!(requests.len(), 2);
    for request in requests {
        assert_eq!(
            request.headers.get("authorization").map(String::as_str),
            Some("Bearer s3cret")
        );
    }
}

#[tokio::test]
async fn test_fleet_check_is_bounded_and_ordered() {
    let server = start_mock_server(|request| {
        let response = match request.method.as_str() {
            "POST" => tools_response(request, &["search"]),
            _ => MockResponse::json(200, json!({ "status": "ok" })),
        };
        response.with_delay(Duration::from_millis(100))
    })
    .await;
    let configs: Vec<_> = (0..6)
        .map(|i| server_config(&format!("svc-{}", i), &server))
        .collect();

    let checker = Arc::new(checker());
    let results = checker.check_fleet(&configs, 2).await;

    let names: Vec<_> = results.iter().map(|r| r.server_name.clone()).collect();
    let expected: Vec<_> = (0..6).map(|i| format!("svc-{}", i)).collect();
    assert_eq!(names, expected);
    assert!(results.iter().all(|r| r.overall_status == HealthStatus::Healthy));
    // Two servers at a time, two paths each.
    assert!(server.max_in_flight() <= 4, "max in flight {}", server.max_in_flight());
    assert_eq!(server.hits(), 12);
}
