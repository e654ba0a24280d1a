//! Per-request context.
//!
//! The [`GatewayContext`] carries state through the pipeline: the request
//! ID, the client identifier used for rate limiting, the route chosen by the
//! routing stage and the identity established by authentication.

use tokio::time::{Duration, Instant};
use uuid::Uuid;

use crate::identity::VerifiedIdentity;
use crate::pipeline::StageKind;

/// Backend selected for a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRoute {
    /// Logical service name (first path segment).
    pub service: String,
    /// Backend base URL.
    pub base_url: String,
    /// Remaining path after the service segment, without a leading slash.
    pub path: String,
}

impl ResolvedRoute {
    /// Create a resolved route.
    pub fn new(
        service: impl Into<String>,
        base_url: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            service: service.into(),
            base_url: base_url.into(),
            path: path.into(),
        }
    }

    /// Target URL without the query string.
    pub fn target_url(&self) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), self.path)
    }
}

/// Context that flows through the pipeline.
///
/// # Example
///
/// ```
/// use citadel_middleware::context::{GatewayContext, ResolvedRoute};
///
/// let mut ctx = GatewayContext::new("10.0.0.7");
/// ctx.set_route(ResolvedRoute::new("data", "http://data:8002", "items/1"));
///
/// assert_eq!(ctx.client_id(), "10.0.0.7");
/// assert_eq!(ctx.route().unwrap().target_url(), "http://data:8002/items/1");
/// ```
#[derive(Debug)]
pub struct GatewayContext {
    /// Unique identifier for this request.
    request_id: Uuid,

    /// Client identifier (peer address by default).
    client_id: String,

    /// Route chosen by the routing stage.
    route: Option<ResolvedRoute>,

    /// Identity established by the authentication stage.
    identity: Option<VerifiedIdentity>,

    /// Stage that stopped the pipeline, if any.
    halted_by: Option<StageKind>,

    /// When the request started processing.
    started_at: Instant,
}

impl GatewayContext {
    /// Creates a new context with a fresh request ID.
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::now_v7(),
            client_id: client_id.into(),
            route: None,
            identity: None,
            halted_by: None,
            started_at: Instant::now(),
        }
    }

    /// Returns the request ID.
    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    /// Returns the client identifier.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Overrides the client identifier (e.g. from `X-Forwarded-For`).
    pub fn set_client_id(&mut self, client_id: impl Into<String>) {
        self.client_id = client_id.into();
    }

    /// Returns the resolved route, if routing has run.
    pub fn route(&self) -> Option<&ResolvedRoute> {
        self.route.as_ref()
    }

    /// Sets the resolved route.
    ///
    /// This should only be called by the routing stage.
    pub fn set_route(&mut self, route: ResolvedRoute) {
        self.route = Some(route);
    }

    /// Returns the verified identity, if authentication has run.
    pub fn identity(&self) -> Option<&VerifiedIdentity> {
        self.identity.as_ref()
    }

    /// Sets the verified identity.
    ///
    /// This should only be called by the authentication stage.
    pub fn set_identity(&mut self, identity: VerifiedIdentity) {
        self.identity = Some(identity);
    }

    /// Stage that stopped the pipeline.
    pub fn halted_by(&self) -> Option<StageKind> {
        self.halted_by
    }

    pub(crate) fn set_halted_by(&mut self, stage: StageKind) {
        self.halted_by = Some(stage);
    }

    /// Returns when the request started processing.
    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Returns the elapsed time since the request started.
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_ids_are_unique() {
        let a = GatewayContext::new("a");
        let b = GatewayContext::new("a");
        assert_ne!(a.request_id(), b.request_id());
    }

    #[test]
    fn test_target_url_joins_cleanly() {
        let route = ResolvedRoute::new("data", "http://data:8002/", "items");
        assert_eq!(route.target_url(), "http://data:8002/items");

        let root = ResolvedRoute::new("data", "http://data:8002", "");
        assert_eq!(root.target_url(), "http://data:8002/");
    }

    #[test]
    fn test_identity_roundtrip() {
        let mut ctx = GatewayContext::new("127.0.0.1");
        assert!(ctx.identity().is_none());
        ctx.set_identity(VerifiedIdentity::new("alice", "user", 0));
        assert_eq!(ctx.identity().unwrap().subject, "alice");
    }
}
