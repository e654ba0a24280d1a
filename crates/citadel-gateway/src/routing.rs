//! Routing stage.
//!
//! Answers the gateway's own endpoints (`GET /`, `GET /health`,
//! `GET /services`) and resolves every other path of the form
//! `/{service}/{path...}` to a registered backend. An unknown service is
//! rejected with 404, a service whose cached health is down with 503.

use std::sync::Arc;

use citadel_middleware::{
    BoxFuture, BufferedRequest, GatewayContext, Rejection, ResolvedRoute, Response, ResponseExt,
    Stage, StageOutcome,
};
use http::{Method, StatusCode};
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use crate::registry::ServiceRegistry;

/// Gateway-local endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    /// `GET /`
    Root,
    /// `GET /health`
    Health,
    /// `GET /services`
    Services,
}

impl Builtin {
    /// Match a path against the builtin endpoints.
    pub fn from_path(path: &str) -> Option<Self> {
        match path {
            "/" | "" => Some(Self::Root),
            "/health" => Some(Self::Health),
            "/services" => Some(Self::Services),
            _ => None,
        }
    }
}

/// Split `/{service}/{rest}` into its parts. `rest` has no leading slash.
pub fn split_service_path(path: &str) -> Option<(&str, &str)> {
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    let (service, rest) = trimmed.split_once('/').unwrap_or((trimmed, ""));
    (!service.is_empty()).then_some((service, rest))
}

/// Resolves the target backend.
#[derive(Debug, Clone)]
pub struct ServiceRouter {
    registry: Arc<ServiceRegistry>,
}

impl ServiceRouter {
    /// Create a router over `registry`.
    pub fn new(registry: Arc<ServiceRegistry>) -> Self {
        Self { registry }
    }

    /// The underlying registry.
    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    /// Resolve a path to a backend, consulting the health cache.
    pub async fn route(&self, path: &str) -> Result<ResolvedRoute, Rejection> {
        let (service, rest) =
            split_service_path(path).ok_or_else(|| Rejection::route_not_found(""))?;

        let entry = self.registry.resolve(service)?;

        if !self.registry.is_available(service).await {
            warn!(service = service, "routing to unavailable service refused");
            return Err(Rejection::service_unavailable(format!(
                "service '{service}' is unavailable"
            )));
        }

        Ok(ResolvedRoute::new(service, entry.base_url(), rest))
    }

    /// Answer a builtin endpoint.
    pub async fn builtin(&self, builtin: Builtin) -> Response {
        let body = match builtin {
            Builtin::Root => json!({
                "message": "API Gateway",
                "version": crate::VERSION,
                "available_services": self.registry.service_names(),
                "documentation": "/docs",
            }),
            Builtin::Health => {
                let services: Map<String, Value> = self
                    .registry
                    .probe_all()
                    .await
                    .into_iter()
                    .map(|(name, healthy)| (name, Value::Bool(healthy)))
                    .collect();
                json!({
                    "status": "healthy",
                    "service": "api-gateway",
                    "services": services,
                })
            }
            Builtin::Services => {
                let services: Map<String, Value> = self
                    .registry
                    .statuses()
                    .await
                    .into_iter()
                    .map(|status| {
                        (
                            status.name,
                            json!({
                                "url": status.url,
                                "available": status.available,
                                "health": status.healthy,
                            }),
                        )
                    })
                    .collect();
                Value::Object(services)
            }
        };

        Response::json(StatusCode::OK, &body)
    }
}

impl Stage for ServiceRouter {
    fn name(&self) -> &'static str {
        "service-router"
    }

    fn check<'a>(
        &'a self,
        ctx: &'a mut GatewayContext,
        request: &'a BufferedRequest,
    ) -> BoxFuture<'a, StageOutcome> {
        Box::pin(async move {
            if request.method() == Method::GET {
                if let Some(builtin) = Builtin::from_path(request.path()) {
                    return StageOutcome::Respond(self.builtin(builtin).await);
                }
            }

            match self.route(request.path()).await {
                Ok(route) => {
                    ctx.set_route(route);
                    StageOutcome::Continue
                }
                Err(rejection) => {
                    info!(
                        path = request.path(),
                        status = rejection.status().as_u16(),
                        "route rejected"
                    );
                    StageOutcome::Reject(rejection)
                }
            }
        })
    }
}
