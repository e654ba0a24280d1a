//! Header handling for forwarded requests and relayed responses.
//!
//! Requests lose their hop-by-hop headers, `host` and `content-length`
//! (both recomputed by the client) and any client-supplied identity headers
//! before they are forwarded. The gateway then adds the request ID and, once
//! a bearer token has been verified, the authenticated identity.

use citadel_middleware::VerifiedIdentity;
use http::header::{HeaderMap, HeaderName, HeaderValue};

/// Header name for request ID.
pub static HEADER_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Header name for the verified subject.
pub static HEADER_AUTHENTICATED_SUBJECT: HeaderName =
    HeaderName::from_static("x-authenticated-subject");

/// Header name for the verified role.
pub static HEADER_AUTHENTICATED_ROLE: HeaderName = HeaderName::from_static("x-authenticated-role");

/// Hop-by-hop headers (RFC 7230 section 6.1).
pub static HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

/// Headers that are never forwarded upstream besides the hop-by-hop set.
pub static FILTERED_REQUEST_HEADERS: &[&str] = &[
    "host",
    "content-length",
    "x-authenticated-subject",
    "x-authenticated-role",
];

/// Whether a header is hop-by-hop.
pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS
        .iter()
        .any(|h| h.eq_ignore_ascii_case(name))
}

/// Check if a request header should be filtered (not forwarded).
pub fn should_filter_request_header(name: &str) -> bool {
    is_hop_by_hop(name)
        || FILTERED_REQUEST_HEADERS
            .iter()
            .any(|h| h.eq_ignore_ascii_case(name))
}

/// Filter headers for forwarding to a backend.
pub fn filter_request_headers(headers: &HeaderMap) -> HeaderMap {
    let mut filtered = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if !should_filter_request_header(name.as_str()) {
            filtered.append(name.clone(), value.clone());
        }
    }
    filtered
}

/// Filter backend response headers for relaying to the client.
pub fn filter_response_headers(headers: &HeaderMap) -> HeaderMap {
    let mut filtered = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if !is_hop_by_hop(name.as_str()) && *name != http::header::CONTENT_LENGTH {
            filtered.append(name.clone(), value.clone());
        }
    }
    filtered
}

/// Headers the gateway adds to every forwarded request.
#[derive(Debug, Clone)]
pub struct PropagatedHeaders {
    /// Request ID for correlation.
    pub request_id: String,
    /// Identity established by bearer verification.
    pub identity: Option<VerifiedIdentity>,
}

impl PropagatedHeaders {
    /// Create propagated headers for a request.
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            identity: None,
        }
    }

    /// Set the verified identity.
    #[must_use]
    pub fn with_identity(mut self, identity: Option<&VerifiedIdentity>) -> Self {
        self.identity = identity.cloned();
        self
    }

    /// Add the propagated headers to a header map.
    pub fn add_to_headers(&self, headers: &mut HeaderMap) {
        if let Ok(value) = HeaderValue::from_str(&self.request_id) {
            headers.insert(HEADER_REQUEST_ID.clone(), value);
        }

        if let Some(ref identity) = self.identity {
            if let Ok(value) = HeaderValue::from_str(&identity.subject) {
                headers.insert(HEADER_AUTHENTICATED_SUBJECT.clone(), value);
            }
            if let Ok(value) = HeaderValue::from_str(&identity.role) {
                headers.insert(HEADER_AUTHENTICATED_ROLE.clone(), value);
            }
        }
    }
}

/// Add permissive CORS headers to a response.
pub fn apply_cors(headers: &mut HeaderMap) {
    headers.insert(
        http::header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        http::header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, PUT, PATCH, DELETE, OPTIONS"),
    );
    headers.insert(
        http::header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("*"),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_filter_request_header() {
        assert!(should_filter_request_header("host"));
        assert!(should_filter_request_header("Content-Length"));
        assert!(should_filter_request_header("transfer-encoding"));
        assert!(should_filter_request_header("X-Authenticated-Role"));
        assert!(!should_filter_request_header("authorization"));
        assert!(!should_filter_request_header("content-type"));
    }

    #[test]
    fn test_filter_request_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("host", HeaderValue::from_static("gateway:8000"));
        headers.insert("content-type", HeaderValue::from_static("application/json"));
        headers.insert("authorization", HeaderValue::from_static("Bearer token"));
        headers.insert("connection", HeaderValue::from_static("keep-alive"));
        headers.insert("x-authenticated-subject", HeaderValue::from_static("root"));
        headers.append("accept", HeaderValue::from_static("text/html"));
        headers.append("accept", HeaderValue::from_static("application/json"));

        let filtered = filter_request_headers(&headers);
        assert!(filtered.contains_key("content-type"));
        assert!(filtered.contains_key("authorization"));
        assert!(!filtered.contains_key("host"));
        assert!(!filtered.contains_key("connection"));
        assert!(!filtered.contains_key("x-authenticated-subject"));
        assert_eq!(filtered.get_all("accept").iter().count(), 2);
    }

    #[test]
    fn test_filter_response_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static("application/json"));
        headers.insert("content-length", HeaderValue::from_static("7"));
        headers.insert("transfer-encoding", HeaderValue::from_static("chunked"));
        headers.insert("x-backend", HeaderValue::from_static("data"));

        let filtered = filter_response_headers(&headers);
        assert!(filtered.contains_key("content-type"));
        assert!(filtered.contains_key("x-backend"));
        assert!(!filtered.contains_key("content-length"));
        assert!(!filtered.contains_key("transfer-encoding"));
    }

    #[test]
    fn test_add_to_headers() {
        let identity = VerifiedIdentity::new("alice", "admin", 0);
        let propagated = PropagatedHeaders::new("req-1").with_identity(Some(&identity));

        let mut headers = HeaderMap::new();
        propagated.add_to_headers(&mut headers);

        assert_eq!(headers.get(&HEADER_REQUEST_ID).unwrap(), "req-1");
        assert_eq!(headers.get(&HEADER_AUTHENTICATED_SUBJECT).unwrap(), "alice");
        assert_eq!(headers.get(&HEADER_AUTHENTICATED_ROLE).unwrap(), "admin");
    }

    #[test]
    fn test_no_identity_headers_without_identity() {
        let mut headers = HeaderMap::new();
        PropagatedHeaders::new("req-2").add_to_headers(&mut headers);
        assert!(!headers.contains_key(&HEADER_AUTHENTICATED_SUBJECT));
    }

    #[test]
    fn test_apply_cors() {
        let mut headers = HeaderMap::new();
        apply_cors(&mut headers);
        assert_eq!(headers.get("access-control-allow-origin").unwrap(), "*");
    }
}
