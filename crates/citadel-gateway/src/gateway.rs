//! Request orchestration.
//!
//! [`Gateway`] owns the shared state (rate limiter, service registry,
//! outbound clients) and runs one buffered request through the security
//! pipeline, the dispatcher and the audit trail:
//!
//! ```text
//! RateLimit → Firewall → ZeroTrust → Routing → Authentication → Dispatch → Audit
//! ```
//!
//! Every response, local or relayed, carries `x-request-id` and the
//! permissive CORS headers.

use std::net::SocketAddr;
use std::sync::Arc;

use citadel_middleware::error::ErrorEnvelope;
use citadel_middleware::pipeline::StageKind;
use citadel_middleware::stages::{
    RateLimitConfig, RateLimitStage, RateLimiter, RequestFirewall, TokenVerifier, ZeroTrustGate,
};
use citadel_middleware::{
    BufferedRequest, GatewayContext, Pipeline, Rejection, ResolvedRoute, Response, StageOutcome,
};
use http::{HeaderValue, Method, StatusCode};
use http_body_util::Full;
use serde_json::Value;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::audit::{audit_body, AuditLogger, AuditRecord};
use crate::config::GatewayConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::headers::{apply_cors, PropagatedHeaders, HEADER_REQUEST_ID};
use crate::identity::IdentityClient;
use crate::proxy::{ProxyDispatcher, ProxyRequest};
use crate::registry::{HealthProbe, HttpHealthProbe, ServiceRegistry};
use crate::routing::{Builtin, ServiceRouter};

/// The gateway.
pub struct Gateway {
    config: Arc<GatewayConfig>,
    pipeline: Pipeline,
    limiter: Arc<RateLimiter>,
    registry: Arc<ServiceRegistry>,
    proxy: ProxyDispatcher,
    audit: AuditLogger,
}

impl Gateway {
    /// Build a gateway that probes backends over HTTP.
    pub fn new(config: GatewayConfig) -> GatewayResult<Self> {
        let probe = HttpHealthProbe::new(&config.registry)?;
        Self::with_health_probe(config, Arc::new(probe))
    }

    /// Build a gateway with a custom health probe.
    pub fn with_health_probe(
        config: GatewayConfig,
        probe: Arc<dyn HealthProbe>,
    ) -> GatewayResult<Self> {
        config.validate()?;

        let identity_url = config
            .service_url(&config.identity.service)
            .ok_or_else(|| {
                GatewayError::config(format!(
                    "identity service '{}' is not configured",
                    config.identity.service
                ))
            })?;
        let identity = Arc::new(IdentityClient::new(identity_url, config.identity.timeout)?);

        let limiter = Arc::new(RateLimiter::new(RateLimitConfig {
            per_second: config.rate_limit.per_second,
            per_minute: config.rate_limit.per_minute,
        }));

        let firewall = RequestFirewall::new(&config.firewall)
            .map_err(|e| GatewayError::config(format!("invalid blocked pattern: {e}")))?;

        let registry = Arc::new(ServiceRegistry::new(
            &config.services,
            &config.registry,
            probe,
        ));

        let pipeline = Pipeline::builder()
            .rate_limit(
                RateLimitStage::new(Arc::clone(&limiter))
                    .trust_forwarded_for(config.server.trust_forwarded_for),
            )
            .firewall(firewall)
            .zero_trust(ZeroTrustGate::new(
                config.zero_trust.clone(),
                identity.clone(),
            ))
            .routing(ServiceRouter::new(Arc::clone(&registry)))
            .authentication(TokenVerifier::new(identity, config.identity.service.clone()))
            .build();

        let audit = match config.service_url(&config.audit.service) {
            Some(url) if config.audit.enabled => AuditLogger::new(&config.audit, url)?,
            _ => AuditLogger::disabled(),
        };

        let proxy = ProxyDispatcher::new(config.proxy.timeout)?;

        Ok(Self {
            config: Arc::new(config),
            pipeline,
            limiter,
            registry,
            proxy,
            audit,
        })
    }

    /// The configuration.
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// The shared rate limiter.
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// The service registry.
    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    /// The security pipeline.
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Handle one buffered request from `peer`.
    pub async fn handle(&self, request: BufferedRequest, peer: SocketAddr) -> Response {
        let mut ctx = GatewayContext::new(peer.ip().to_string());
        let request_id = ctx.request_id().to_string();

        let span = info_span!(
            "request",
            request_id = %request_id,
            method = %request.method(),
            path = %request.path(),
            peer = %peer,
        );

        let mut response = self
            .process(&mut ctx, &request, &request_id)
            .instrument(span)
            .await;
        finalize(&mut response, &request_id);
        response
    }

    /// Answer a request whose body could not be captured.
    pub fn reject_capture(&self, rejection: Rejection) -> Response {
        let request_id = Uuid::now_v7().to_string();
        warn!(
            request_id = %request_id,
            status = rejection.status().as_u16(),
            "request body rejected"
        );
        let mut response = rejection.into_response(&request_id);
        finalize(&mut response, &request_id);
        response
    }

    async fn process(
        &self,
        ctx: &mut GatewayContext,
        request: &BufferedRequest,
        request_id: &str,
    ) -> Response {
        if is_preflight(request) {
            return preflight();
        }

        match self.pipeline.run(ctx, request).await {
            StageOutcome::Continue => {}
            StageOutcome::Respond(response) => return response,
            StageOutcome::Reject(rejection) => {
                let stage = ctx.halted_by().map_or("unknown", StageKind::name);
                if rejection.status().is_server_error() {
                    warn!(stage, code = rejection.kind().code(), "request rejected");
                } else {
                    info!(stage, code = rejection.kind().code(), "request rejected");
                }
                return rejection.into_response(request_id);
            }
        }

        let Some(route) = ctx.route().cloned() else {
            return Rejection::route_not_found("").into_response(request_id);
        };

        self.dispatch(ctx, request, &route, request_id).await
    }

    async fn dispatch(
        &self,
        ctx: &GatewayContext,
        request: &BufferedRequest,
        route: &ResolvedRoute,
        request_id: &str,
    ) -> Response {
        let proxy_request =
            ProxyRequest::new(request.method().clone(), route.target_url(), request_id)
                .with_query(request.query())
                .with_headers(request.headers().clone())
                .with_body(request.body().clone())
                .with_propagated(
                    PropagatedHeaders::new(request_id).with_identity(ctx.identity()),
                );

        let (response, response_body) = match self.proxy.forward(proxy_request).await {
            Ok(relayed) => {
                let body = relayed.body_json().filter(Value::is_object);
                (relayed.into_response(), body)
            }
            Err(rejection) => {
                let envelope = ErrorEnvelope {
                    error: rejection.to_error_response(request_id),
                };
                let body = serde_json::to_value(envelope).ok();
                (rejection.into_response(request_id), body)
            }
        };

        let elapsed_ms = ctx.elapsed().as_secs_f64() * 1000.0;
        info!(
            service = %route.service,
            status = response.status().as_u16(),
            duration_ms = elapsed_ms,
            "request completed"
        );

        let mut record = AuditRecord::new(&route.service, &route.path, request.method().as_str());
        record.user_id = ctx.identity().map(|i| i.subject.clone());
        record.user_role = ctx.identity().map(|i| i.role.clone());
        record.ip_address = ctx.client_id().to_string();
        record.user_agent = request.header("user-agent").map(String::from);
        record.request_body = audit_body(request.body());
        record.response_status = response.status().as_u16();
        record.response_body = response_body;
        record.execution_time_ms = elapsed_ms;
        self.audit.record(record);

        response
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("pipeline", &self.pipeline)
            .field("registry", &self.registry)
            .field("audit", &self.audit.is_enabled())
            .finish_non_exhaustive()
    }
}

/// A CORS preflight on any path, or any `OPTIONS` on a builtin path.
///
/// Plain `OPTIONS` to a service is forwarded like any other method.
fn is_preflight(request: &BufferedRequest) -> bool {
    request.method() == Method::OPTIONS
        && (request
            .headers()
            .contains_key(http::header::ACCESS_CONTROL_REQUEST_METHOD)
            || Builtin::from_path(request.path()).is_some())
}

fn preflight() -> Response {
    let mut response = http::Response::new(Full::default());
    *response.status_mut() = StatusCode::NO_CONTENT;
    response
}

fn finalize(response: &mut Response, request_id: &str) {
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(request_id) {
        headers.insert(HEADER_REQUEST_ID.clone(), value);
    }
    apply_cors(headers);
}
