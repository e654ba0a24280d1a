//! End-to-end gateway tests over TCP.
//!
//! Each test starts real mock backends (identity, data, logging) and a
//! gateway on ephemeral ports, then talks to the gateway with `reqwest`.

mod common;

use std::time::Duration;

use citadel_gateway::{GatewayConfig, GatewayServer};
use common::{
    base_config, closed_port_url, error_body, identity_service, MockBackend, Reply, TestGateway,
};
use reqwest::StatusCode;
use serde_json::json;

#[tokio::test]
async fn test_rate_limit_rejects_sixth_request() {
    let auth = identity_service().await;
    let data = MockBackend::healthy().await;
    let logging = MockBackend::healthy().await;

    let mut config = base_config(&auth.url(), &data.url(), &logging.url());
    config.rate_limit.per_second = 5;
    config.audit.enabled = false;
    let gateway = TestGateway::start(config).await;

    let mut statuses = Vec::new();
    for _ in 0..6 {
        let response = gateway
            .client
            .get(gateway.url("/auth/ping"))
            .send()
            .await
            .unwrap();
        statuses.push(response.status());
    }

    let rejected: Vec<_> = statuses
        .iter()
        .filter(|s| **s == StatusCode::TOO_MANY_REQUESTS)
        .collect();
    assert_eq!(rejected.len(), 1, "statuses: {statuses:?}");
    assert_eq!(statuses[5], StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_script_in_query_blocked() {
    let auth = identity_service().await;
    let data = MockBackend::healthy().await;
    let logging = MockBackend::healthy().await;
    let gateway = TestGateway::start(base_config(&auth.url(), &data.url(), &logging.url())).await;

    let response = gateway
        .client
        .get(gateway.url("/data/items?x=%3Cscript%3E"))
        .header("authorization", "Bearer good")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let error = error_body(response).await;
    assert_eq!(error["code"], "firewall_blocked");
    assert_eq!(error["reason"], "url");

    assert_eq!(auth.hits(), 0);
    assert_eq!(data.hits(), 0);
}

#[tokio::test]
async fn test_rejected_bearer_never_reaches_backend() {
    let auth = identity_service().await;
    let data = MockBackend::healthy().await;
    let logging = MockBackend::healthy().await;
    let gateway = TestGateway::start(base_config(&auth.url(), &data.url(), &logging.url())).await;

    let response = gateway
        .client
        .get(gateway.url("/data/items"))
        .header("authorization", "Bearer bad")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response.headers().contains_key("x-request-id"));
    assert_eq!(error_body(response).await["code"], "unauthorized");
    assert_eq!(auth.hits(), 1);
    assert_eq!(data.hits(), 0);
}

#[tokio::test]
async fn test_missing_bearer_is_unauthorized() {
    let auth = identity_service().await;
    let data = MockBackend::healthy().await;
    let logging = MockBackend::healthy().await;
    let gateway = TestGateway::start(base_config(&auth.url(), &data.url(), &logging.url())).await;

    let response = gateway
        .client
        .get(gateway.url("/data/items"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(auth.hits(), 0);
    assert_eq!(data.hits(), 0);
}

#[tokio::test]
async fn test_backend_response_relayed() {
    let auth = identity_service().await;
    let data = MockBackend::start(|_| Reply::json(201, json!({"a": 1}))).await;
    let logging = MockBackend::healthy().await;
    let gateway = TestGateway::start(base_config(&auth.url(), &data.url(), &logging.url())).await;

    let response = gateway
        .client
        .post(gateway.url("/data/items?page=2&q=a%20b"))
        .header("authorization", "Bearer good")
        .header("x-authenticated-subject", "mallory")
        .json(&json!({"name": "widget"}))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    let request_id = response
        .headers()
        .get("x-request-id")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert_eq!(
        response
            .headers()
            .get("access-control-allow-origin")
            .unwrap(),
        "*"
    );
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body, json!({"a": 1}));

    let received = data.wait_for_hits(1).await;
    assert_eq!(received.len(), 1);
    let forwarded = &received[0];
    assert_eq!(forwarded.method, http::Method::POST);
    assert_eq!(forwarded.target, "/items?page=2&q=a%20b");
    assert_eq!(forwarded.json(), json!({"name": "widget"}));
    assert_eq!(forwarded.header("authorization"), Some("Bearer good"));
    assert_eq!(forwarded.header("x-authenticated-subject"), Some("alice"));
    assert_eq!(forwarded.header("x-authenticated-role"), Some("user"));
    assert_eq!(forwarded.header("x-request-id"), Some(request_id.as_str()));
}

#[tokio::test]
async fn test_unreachable_backend_is_bad_gateway_and_audited() {
    let auth = identity_service().await;
    let logging = MockBackend::start(|_| Reply::json(201, json!({"id": 1}))).await;
    let gateway =
        TestGateway::start(base_config(&auth.url(), &closed_port_url(), &logging.url())).await;

    let response = gateway
        .client
        .get(gateway.url("/data/items"))
        .header("authorization", "Bearer good")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(error_body(response).await["code"], "bad_gateway");

    let records = logging.wait_for_hits(1).await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].path(), "/logs");
    let record = records[0].json();
    assert_eq!(record["service"], "data");
    assert_eq!(record["endpoint"], "items");
    assert_eq!(record["method"], "GET");
    assert_eq!(record["response_status"], 502);
    assert_eq!(record["user_id"], "alice");
    assert_eq!(record["ip_address"], "127.0.0.1");
}

#[tokio::test]
async fn test_slow_backend_times_out() {
    let auth = identity_service().await;
    let data = MockBackend::start(|_| {
        Reply::json(200, json!({"late": true})).delayed(Duration::from_secs(3))
    })
    .await;
    let logging = MockBackend::healthy().await;

    let mut config = base_config(&auth.url(), &data.url(), &logging.url());
    config.proxy.timeout = Duration::from_millis(300);
    let gateway = TestGateway::start(config).await;

    let response = gateway
        .client
        .get(gateway.url("/data/slow"))
        .header("authorization", "Bearer good")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
}

#[tokio::test]
async fn test_auth_routes_skip_bearer_verification() {
    let auth = identity_service().await;
    let data = MockBackend::healthy().await;
    let logging = MockBackend::healthy().await;
    let gateway = TestGateway::start(base_config(&auth.url(), &data.url(), &logging.url())).await;

    let response = gateway
        .client
        .post(gateway.url("/auth/login"))
        .json(&json!({"username": "alice", "password": "secret"}))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let received = auth.wait_for_hits(1).await;
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].path(), "/login");
}

#[tokio::test]
async fn test_dynamic_token_checked() {
    let auth = identity_service().await;
    let data = MockBackend::healthy().await;
    let logging = MockBackend::healthy().await;
    let gateway = TestGateway::start(base_config(&auth.url(), &data.url(), &logging.url())).await;

    let response = gateway
        .client
        .get(gateway.url("/data/items"))
        .header("authorization", "Bearer good")
        .header("x-ztna-token", "forged")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(data.hits(), 0);

    let response = gateway
        .client
        .get(gateway.url("/data/items"))
        .header("authorization", "Bearer good")
        .header("x-ztna-token", "session")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(data.wait_for_hits(1).await.len(), 1);
}

#[tokio::test]
async fn test_unknown_service_is_not_found() {
    let auth = identity_service().await;
    let data = MockBackend::healthy().await;
    let logging = MockBackend::healthy().await;
    let gateway = TestGateway::start(base_config(&auth.url(), &data.url(), &logging.url())).await;

    let response = gateway
        .client
        .get(gateway.url("/billing/invoices"))
        .header("authorization", "Bearer good")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(error_body(response).await["code"], "route_not_found");
    assert_eq!(auth.hits(), 0);
}

#[tokio::test]
async fn test_oversized_body_rejected() {
    let auth = identity_service().await;
    let data = MockBackend::healthy().await;
    let logging = MockBackend::healthy().await;

    let mut config = base_config(&auth.url(), &data.url(), &logging.url());
    config.server.max_request_body_size = 16;
    let gateway = TestGateway::start(config).await;

    let response = gateway
        .client
        .post(gateway.url("/data/items"))
        .header("authorization", "Bearer good")
        .body("x".repeat(64))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(data.hits(), 0);
}

#[tokio::test]
async fn test_builtin_endpoints() {
    let auth = identity_service().await;
    let data = MockBackend::healthy().await;
    let logging = MockBackend::healthy().await;
    let gateway = TestGateway::start(base_config(&auth.url(), &data.url(), &logging.url())).await;

    let root: serde_json::Value = gateway
        .client
        .get(gateway.url("/"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(root["available_services"], json!(["auth", "data", "logging"]));

    let health: serde_json::Value = gateway
        .client
        .get(gateway.url("/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "healthy");
    assert_eq!(
        health["services"],
        json!({"auth": true, "data": true, "logging": true})
    );

    let services: serde_json::Value = gateway
        .client
        .get(gateway.url("/services"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(services["data"]["url"], data.url());
    assert_eq!(services["data"]["available"], true);
}

#[tokio::test]
async fn test_http_health_probe_marks_backend_down() {
    let auth = identity_service().await;
    let data = MockBackend::start(|_| Reply::text(500, "boom")).await;
    let logging = MockBackend::healthy().await;

    let config: GatewayConfig = base_config(&auth.url(), &data.url(), &logging.url());
    let server = GatewayServer::bind(config).await.unwrap();
    let addr = server.local_addr().unwrap();
    let task = tokio::spawn(server.serve_with_shutdown(std::future::pending()));

    let response = reqwest::Client::new()
        .get(format!("http://{addr}/data/items"))
        .header("authorization", "Bearer good")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(data.requests().iter().all(|r| r.path() == "/health"));
    task.abort();
}

#[tokio::test]
async fn test_cors_preflight_answered_on_service_path() {
    let auth = identity_service().await;
    let data = MockBackend::healthy().await;
    let logging = MockBackend::healthy().await;
    let gateway = TestGateway::start(base_config(&auth.url(), &data.url(), &logging.url())).await;

    let response = gateway
        .client
        .request(reqwest::Method::OPTIONS, gateway.url("/data/items"))
        .header("origin", "http://app.local")
        .header("access-control-request-method", "POST")
        .header("access-control-request-headers", "authorization, content-type")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(
        response
            .headers()
            .get("access-control-allow-origin")
            .unwrap(),
        "*"
    );
    assert!(response
        .headers()
        .contains_key("access-control-allow-methods"));
    assert_eq!(auth.hits(), 0);
    assert_eq!(data.hits(), 0);

    let response = gateway
        .client
        .request(reqwest::Method::OPTIONS, gateway.url("/data/items"))
        .header("authorization", "Bearer good")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let received = data.wait_for_hits(1).await;
    assert_eq!(received[0].method, http::Method::OPTIONS);
}
