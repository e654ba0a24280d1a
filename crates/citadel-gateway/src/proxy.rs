//! Forwarding requests to backend services.
//!
//! The [`ProxyDispatcher`] sends a [`ProxyRequest`] to the resolved backend
//! and maps transport failures onto gateway rejections: a timeout becomes
//! 504, anything else (refused connection, reset, unreadable body) becomes
//! 502. Backend error bodies and transport error strings are logged, never
//! relayed. There are no retries; forwarded methods are not assumed to be
//! idempotent.

use std::time::Duration;

use bytes::Bytes;
use citadel_middleware::{Rejection, Response};
use http::{header::HeaderMap, HeaderValue, Method, StatusCode};
use http_body_util::Full;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, error};

use crate::error::{GatewayError, GatewayResult};
use crate::headers::{filter_request_headers, filter_response_headers, PropagatedHeaders};

/// Forwards requests to backends.
#[derive(Debug, Clone)]
pub struct ProxyDispatcher {
    /// HTTP client.
    client: Client,
}

impl ProxyDispatcher {
    /// Create a dispatcher with an overall per-request timeout.
    pub fn new(timeout: Duration) -> GatewayResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(100)
            .build()
            .map_err(GatewayError::Client)?;

        Ok(Self { client })
    }

    /// Forward a request.
    pub async fn forward(&self, request: ProxyRequest) -> Result<ProxyResponse, Rejection> {
        let url = request.full_url();
        let head = request.method == Method::HEAD;

        let mut headers = filter_request_headers(&request.headers);
        request.propagated.add_to_headers(&mut headers);

        let mut builder = self
            .client
            .request(request.method.clone(), &url)
            .headers(headers);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(|e| {
            error!(
                request_id = %request.propagated.request_id,
                url = %url,
                error = %e,
                "forward failed"
            );
            map_transport_error(&e)
        })?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(|e| {
            error!(
                request_id = %request.propagated.request_id,
                url = %url,
                error = %e,
                "failed to read backend body"
            );
            map_transport_error(&e)
        })?;

        debug!(url = %url, status = status.as_u16(), "backend responded");

        Ok(ProxyResponse {
            status,
            headers,
            body,
            head,
        })
    }
}

fn map_transport_error(err: &reqwest::Error) -> Rejection {
    if err.is_timeout() {
        Rejection::gateway_timeout()
    } else {
        Rejection::bad_gateway()
    }
}

/// Request to be forwarded to a backend.
#[derive(Debug)]
pub struct ProxyRequest {
    /// HTTP method.
    pub method: Method,
    /// Target URL without the query string.
    pub url: String,
    /// Original query string, appended verbatim.
    pub query: Option<String>,
    /// Request headers as received.
    pub headers: HeaderMap,
    /// Request body.
    pub body: Option<Bytes>,
    /// Headers added by the gateway.
    pub propagated: PropagatedHeaders,
}

impl ProxyRequest {
    /// Create a new proxy request.
    pub fn new(method: Method, url: impl Into<String>, request_id: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            query: None,
            headers: HeaderMap::new(),
            body: None,
            propagated: PropagatedHeaders::new(request_id),
        }
    }

    /// Set the query string.
    #[must_use]
    pub fn with_query(mut self, query: Option<&str>) -> Self {
        self.query = query.filter(|q| !q.is_empty()).map(String::from);
        self
    }

    /// Set the request headers.
    #[must_use]
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Set the request body. Empty bodies are not sent.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        let body = body.into();
        self.body = (!body.is_empty()).then_some(body);
        self
    }

    /// Set the propagated headers.
    #[must_use]
    pub fn with_propagated(mut self, propagated: PropagatedHeaders) -> Self {
        self.propagated = propagated;
        self
    }

    /// Get the request ID.
    pub fn request_id(&self) -> &str {
        &self.propagated.request_id
    }

    /// Target URL including the query string.
    pub fn full_url(&self) -> String {
        match &self.query {
            Some(query) => format!("{}?{query}", self.url),
            None => self.url.clone(),
        }
    }
}

/// Response from a backend.
#[derive(Debug)]
pub struct ProxyResponse {
    /// HTTP status code.
    pub status: StatusCode,
    /// Response headers.
    pub headers: HeaderMap,
    /// Response body.
    pub body: Bytes,
    /// Whether this answers a `HEAD` request.
    pub head: bool,
}

impl ProxyResponse {
    /// Get a header value.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Get the content type.
    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    /// Whether the body is declared as JSON.
    pub fn is_json(&self) -> bool {
        self.content_type()
            .is_some_and(|ct| ct.to_ascii_lowercase().contains("application/json"))
    }

    /// Body parsed as JSON, if declared and valid.
    pub fn body_json(&self) -> Option<Value> {
        if self.is_json() {
            serde_json::from_slice(&self.body).ok()
        } else {
            None
        }
    }

    /// Build the client-facing response.
    ///
    /// JSON bodies are parsed and re-serialized; anything that fails to
    /// parse is relayed byte for byte. `Content-Length` follows the relayed
    /// body, except for a bodiless `HEAD` answer, which keeps the backend's.
    pub fn into_response(self) -> Response {
        let body = match self.body_json().and_then(|v| serde_json::to_vec(&v).ok()) {
            Some(bytes) => Bytes::from(bytes),
            None => self.body,
        };

        let length = match self.headers.get(http::header::CONTENT_LENGTH) {
            Some(declared) if self.head && body.is_empty() => Some(declared.clone()),
            _ => HeaderValue::from_str(&body.len().to_string()).ok(),
        };

        let mut response = http::Response::new(Full::new(body));
        *response.status_mut() = self.status;
        *response.headers_mut() = filter_response_headers(&self.headers);
        if let Some(len) = length {
            response
                .headers_mut()
                .insert(http::header::CONTENT_LENGTH, len);
        }
        response
    }
}
