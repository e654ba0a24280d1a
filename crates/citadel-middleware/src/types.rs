//! Common types used throughout the pipeline.

use bytes::Bytes;
use http::{HeaderMap, Method, Uri};
use http_body_util::Full;

/// The HTTP response type produced by the pipeline.
///
/// This is a standard `http::Response` with a `Full<Bytes>` body.
pub type Response = http::Response<Full<Bytes>>;

/// Whether `method` carries a body the gateway inspects.
pub fn method_carries_body(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::PATCH)
}

/// An inbound request whose body has been read in full.
///
/// The body is captured once at ingress and shared read-only by every
/// stage and by the dispatcher, so inspecting it never prevents it from
/// being forwarded unchanged.
#[derive(Debug, Clone)]
pub struct BufferedRequest {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
}

impl BufferedRequest {
    /// Create a buffered request from its parts.
    pub fn new(method: Method, uri: Uri, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self {
            method,
            uri,
            headers,
            body: body.into(),
        }
    }

    /// Create a bodiless `GET` request, mostly useful in tests.
    pub fn get(uri: Uri) -> Self {
        Self::new(Method::GET, uri, HeaderMap::new(), Bytes::new())
    }

    /// Request method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Request URI as received.
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// Request path.
    pub fn path(&self) -> &str {
        self.uri.path()
    }

    /// Raw query string, if any.
    pub fn query(&self) -> Option<&str> {
        self.uri.query()
    }

    /// Request headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Get a header value as a string.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// The captured body.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Whether the method is one that carries a body (`POST`, `PUT`, `PATCH`).
    pub fn carries_body(&self) -> bool {
        method_carries_body(&self.method)
    }

    /// Reconstruct the absolute URL the client requested.
    ///
    /// Origin-form request targets are completed with the `Host` header.
    pub fn full_url(&self) -> String {
        if self.uri.scheme().is_some() {
            return self.uri.to_string();
        }

        let host = self.header("host").unwrap_or("localhost");
        let target = self
            .uri
            .path_and_query()
            .map_or("/", http::uri::PathAndQuery::as_str);
        format!("http://{host}{target}")
    }
}

/// Extension trait for building JSON responses.
pub trait ResponseExt {
    /// Creates a JSON response with the given status code.
    fn json(status: http::StatusCode, body: &serde_json::Value) -> Response;
}

impl ResponseExt for Response {
    fn json(status: http::StatusCode, body: &serde_json::Value) -> Response {
        let mut response = http::Response::new(Full::new(Bytes::from(body.to_string())));
        *response.status_mut() = status;
        response.headers_mut().insert(
            http::header::CONTENT_TYPE,
            http::HeaderValue::from_static("application/json"),
        );
        response
    }
}
