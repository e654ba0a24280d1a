//! Rejection taxonomy for the request pipeline.
//!
//! A [`Rejection`] is the value a stage returns when a request must not
//! proceed. It carries a [`RejectionKind`], which fixes the HTTP status and
//! the machine-readable code, plus a short human-readable message. Stack
//! traces and backend error bodies never end up in a rejection.

use std::fmt;

use bytes::Bytes;
use http::{header, HeaderValue, StatusCode};
use http_body_util::Full;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::Response;

/// Category of a rejected request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectionKind {
    /// Rate limiter refused the request.
    TooManyRequests,
    /// A blocked pattern matched the URL, body or headers.
    FirewallBlocked,
    /// Missing or invalid bearer / dynamic token.
    Unauthorized,
    /// Unknown service name.
    RouteNotFound,
    /// Backend marked down, or the identity service could not be reached.
    ServiceUnavailable,
    /// Forwarded call exceeded the outbound timeout.
    GatewayTimeout,
    /// Any other forwarding transport failure.
    BadGateway,
    /// Request body exceeded the configured limit.
    PayloadTooLarge,
    /// Request body could not be read.
    BadRequest,
}

impl RejectionKind {
    /// HTTP status returned to the client.
    pub const fn status(self) -> StatusCode {
        match self {
            Self::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            Self::FirewallBlocked => StatusCode::FORBIDDEN,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::RouteNotFound => StatusCode::NOT_FOUND,
            Self::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::GatewayTimeout => StatusCode::GATEWAY_TIMEOUT,
            Self::BadGateway => StatusCode::BAD_GATEWAY,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::BadRequest => StatusCode::BAD_REQUEST,
        }
    }

    /// Machine-readable error code.
    pub const fn code(self) -> &'static str {
        match self {
            Self::TooManyRequests => "rate_limited",
            Self::FirewallBlocked => "firewall_blocked",
            Self::Unauthorized => "unauthorized",
            Self::RouteNotFound => "route_not_found",
            Self::ServiceUnavailable => "service_unavailable",
            Self::GatewayTimeout => "gateway_timeout",
            Self::BadGateway => "bad_gateway",
            Self::PayloadTooLarge => "payload_too_large",
            Self::BadRequest => "bad_request",
        }
    }
}

impl fmt::Display for RejectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// A terminal, client-visible refusal produced by a pipeline stage or by
/// the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct Rejection {
    kind: RejectionKind,
    message: String,
    reason: Option<String>,
}

impl Rejection {
    /// Create a rejection of the given kind.
    pub fn new(kind: RejectionKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            reason: None,
        }
    }

    /// Attach a short machine-readable reason (e.g. the firewall location).
    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Rate limit exceeded.
    pub fn too_many_requests() -> Self {
        Self::new(RejectionKind::TooManyRequests, "rate limit exceeded")
    }

    /// Firewall match at `location` (`url`, `body` or `headers`).
    pub fn firewall_blocked(location: &str) -> Self {
        Self::new(
            RejectionKind::FirewallBlocked,
            format!("request blocked by firewall: suspicious pattern in {location}"),
        )
        .with_reason(location)
    }

    /// Missing or invalid credential.
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(RejectionKind::Unauthorized, message)
    }

    /// Unknown service.
    pub fn route_not_found(service: &str) -> Self {
        Self::new(
            RejectionKind::RouteNotFound,
            format!("service '{service}' not found"),
        )
    }

    /// Dependency unavailable.
    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(RejectionKind::ServiceUnavailable, message)
    }

    /// Forward timed out.
    pub fn gateway_timeout() -> Self {
        Self::new(RejectionKind::GatewayTimeout, "service request timeout")
    }

    /// Forward failed.
    pub fn bad_gateway() -> Self {
        Self::new(RejectionKind::BadGateway, "upstream request failed")
    }

    /// The rejection kind.
    pub fn kind(&self) -> RejectionKind {
        self.kind
    }

    /// The human-readable message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The machine-readable reason, if any.
    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    /// HTTP status for this rejection.
    pub fn status(&self) -> StatusCode {
        self.kind.status()
    }

    /// Error envelope for this rejection.
    pub fn to_error_response(&self, request_id: &str) -> ErrorResponse {
        ErrorResponse {
            code: self.kind.code().to_string(),
            message: self.message.clone(),
            reason: self.reason.clone(),
            request_id: Some(request_id.to_string()),
        }
    }

    /// Render this rejection as a JSON response.
    pub fn into_response(self, request_id: &str) -> Response {
        let envelope = ErrorEnvelope {
            error: self.to_error_response(request_id),
        };
        let body = serde_json::to_vec(&envelope).unwrap_or_else(|_| b"{}".to_vec());

        let mut response = http::Response::new(Full::new(Bytes::from(body)));
        *response.status_mut() = self.status();
        let headers = response.headers_mut();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        if self.kind == RejectionKind::TooManyRequests {
            headers.insert(header::RETRY_AFTER, HeaderValue::from_static("1"));
        }
        response
    }
}

/// Error body returned to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Machine-readable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Machine-readable reason (e.g. firewall location).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Request ID for correlation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

/// Top-level `{"error": {...}}` wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    /// The error.
    pub error: ErrorResponse,
}

impl fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}
