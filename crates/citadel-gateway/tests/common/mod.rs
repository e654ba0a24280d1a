//! In-process backends for gateway integration tests.

#![allow(dead_code)]

use std::convert::Infallible;
use std::future::pending;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use citadel_gateway::{Gateway, GatewayConfig, GatewayServer, HealthProbe};
use citadel_middleware::BoxFuture;
use http::{HeaderMap, Method, Request, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::net::TcpListener;

/// A request as received by a mock backend.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: Method,
    /// Path and query.
    pub target: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Recorded {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap()
    }

    pub fn path(&self) -> &str {
        self.target.split('?').next().unwrap_or("")
    }
}

/// What a mock backend answers.
#[derive(Debug, Clone)]
pub struct Reply {
    pub status: StatusCode,
    pub content_type: &'static str,
    pub body: String,
    pub delay: Option<Duration>,
}

impl Reply {
    pub fn json(status: u16, body: Value) -> Self {
        Self {
            status: StatusCode::from_u16(status).unwrap(),
            content_type: "application/json",
            body: body.to_string(),
            delay: None,
        }
    }

    pub fn text(status: u16, body: &str) -> Self {
        Self {
            status: StatusCode::from_u16(status).unwrap(),
            content_type: "text/plain",
            body: body.to_string(),
            delay: None,
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

type Handler = Arc<dyn Fn(&Recorded) -> Reply + Send + Sync>;

/// A hyper server on `127.0.0.1:0` that records every request.
pub struct MockBackend {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<Recorded>>>,
    task: tokio::task::JoinHandle<()>,
}

impl MockBackend {
    pub async fn start(handler: impl Fn(&Recorded) -> Reply + Send + Sync + 'static) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let handler: Handler = Arc::new(handler);

        let recorded = Arc::clone(&requests);
        let task = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    continue;
                };
                let recorded = Arc::clone(&recorded);
                let handler = Arc::clone(&handler);

                tokio::spawn(async move {
                    let service = service_fn(move |req: Request<Incoming>| {
                        let recorded = Arc::clone(&recorded);
                        let handler = Arc::clone(&handler);
                        async move {
                            let (parts, body) = req.into_parts();
                            let body = body.collect().await.map(|c| c.to_bytes()).unwrap_or_default();
                            let request = Recorded {
                                method: parts.method,
                                target: parts
                                    .uri
                                    .path_and_query()
                                    .map(ToString::to_string)
                                    .unwrap_or_default(),
                                headers: parts.headers,
                                body,
                            };

                            let reply = handler(&request);
                            recorded.lock().push(request);
                            if let Some(delay) = reply.delay {
                                tokio::time::sleep(delay).await;
                            }

                            let response = http::Response::builder()
                                .status(reply.status)
                                .header("content-type", reply.content_type)
                                .body(Full::new(Bytes::from(reply.body)))
                                .unwrap();
                            Ok::<_, Infallible>(response)
                        }
                    });
                    let _ = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await;
                });
            }
        });

        Self {
            addr,
            requests,
            task,
        }
    }

    /// A backend answering `200 {"status": "healthy"}` to everything.
    pub async fn healthy() -> Self {
        Self::start(|_| Reply::json(200, serde_json::json!({"status": "healthy"}))).await
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().clone()
    }

    /// Requests other than health probes.
    pub fn hits(&self) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.path() != "/health")
            .count()
    }

    /// Wait until at least `n` non-probe requests were received.
    pub async fn wait_for_hits(&self, n: usize) -> Vec<Recorded> {
        for _ in 0..100 {
            if self.hits() >= n {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        self.requests()
            .into_iter()
            .filter(|r| r.path() != "/health")
            .collect()
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Identity service: bearer `good` and dynamic token `session` are valid.
pub async fn identity_service() -> MockBackend {
    MockBackend::start(|req| {
        let token = serde_json::from_slice::<Value>(&req.body)
            .ok()
            .and_then(|v| v["token"].as_str().map(String::from))
            .unwrap_or_default();

        match (req.path(), token.as_str()) {
            ("/verify-token", "good") => Reply::json(
                200,
                serde_json::json!({
                    "valid": true,
                    "payload": {"sub": "alice", "role": "user", "exp": 4_102_444_800_i64}
                }),
            ),
            ("/verify-dynamic-token", "session") => Reply::json(
                200,
                serde_json::json!({"valid": true, "user_id": 1, "expires_at": "2099-01-01T00:00:00"}),
            ),
            ("/verify-token" | "/verify-dynamic-token", _) => {
                Reply::json(401, serde_json::json!({"detail": "Invalid token"}))
            }
            _ => Reply::json(200, serde_json::json!({"ok": true})),
        }
    })
    .await
}

/// Health probe that reports every backend up.
pub struct AlwaysHealthy;

impl HealthProbe for AlwaysHealthy {
    fn probe<'a>(&'a self, _base_url: &'a str) -> BoxFuture<'a, bool> {
        Box::pin(async { true })
    }
}

/// URL of a local port nothing listens on.
pub fn closed_port_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}

/// Configuration listening on an ephemeral port with generous limits.
pub fn base_config(auth: &str, data: &str, logging: &str) -> GatewayConfig {
    GatewayConfig::builder()
        .listen_addr("127.0.0.1")
        .listen_port(0)
        .service("auth", auth)
        .service("data", data)
        .service("logging", logging)
        .rate_limit(1_000, 10_000)
        .build()
        .unwrap()
}

/// A running gateway.
pub struct TestGateway {
    pub addr: SocketAddr,
    pub client: reqwest::Client,
    task: tokio::task::JoinHandle<()>,
}

impl TestGateway {
    pub async fn start(config: GatewayConfig) -> Self {
        let gateway = Gateway::with_health_probe(config, Arc::new(AlwaysHealthy)).unwrap();
        Self::start_gateway(gateway).await
    }

    pub async fn start_gateway(gateway: Gateway) -> Self {
        let server = GatewayServer::bind_gateway(gateway).await.unwrap();
        let addr = server.local_addr().unwrap();
        let task = tokio::spawn(async move {
            let _ = server.serve_with_shutdown(pending()).await;
        });

        Self {
            addr,
            client: reqwest::Client::new(),
            task,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }
}

impl Drop for TestGateway {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Parse an error envelope.
pub async fn error_body(response: reqwest::Response) -> Value {
    let body: Value = response.json().await.unwrap();
    body["error"].clone()
}
