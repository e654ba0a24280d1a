//! Zero-trust gate.
//!
//! Checks the per-request dynamic token (default header `X-ZTNA-Token`)
//! against the identity service. Informational paths such as `/health` are
//! bypassed.
//!
//! Two situations are governed by a [`FailurePolicy`] instead of a hard
//! rule: the identity service being unreachable, and the token header being
//! absent. Both default to [`FailurePolicy::FailOpen`], which lets the
//! request through unverified and logs a warning. Set them to
//! [`FailurePolicy::FailClosed`] to enforce the token.

use std::sync::Arc;

use http::HeaderMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::context::GatewayContext;
use crate::error::Rejection;
use crate::identity::{DynamicSession, DynamicTokenVerdict, DynamicTokenVerifier};
use crate::middleware::{BoxFuture, Stage, StageOutcome};
use crate::types::BufferedRequest;

/// What to do when the gate cannot make a positive decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Let the request through unverified.
    #[default]
    FailOpen,
    /// Reject the request.
    FailClosed,
}

/// Zero-trust gate configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZeroTrustConfig {
    /// Whether the gate runs at all.
    pub enabled: bool,
    /// Header carrying the dynamic token.
    pub token_header: String,
    /// Paths that skip the gate (exact match).
    pub bypass_paths: Vec<String>,
    /// Policy when the identity service cannot be reached.
    pub on_unreachable: FailurePolicy,
    /// Policy when the request carries no dynamic token.
    pub on_missing_token: FailurePolicy,
}

impl Default for ZeroTrustConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            token_header: "X-ZTNA-Token".to_string(),
            bypass_paths: ["/health", "/", "/docs", "/openapi.json"]
                .into_iter()
                .map(String::from)
                .collect(),
            on_unreachable: FailurePolicy::FailOpen,
            on_missing_token: FailurePolicy::FailOpen,
        }
    }
}

/// Decision reached by the gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    /// The dynamic token was accepted.
    Verified(DynamicSession),
    /// The gate is disabled or the path is on the bypass list.
    Bypassed,
    /// Allowed without verification under a fail-open policy.
    PassUnverified,
    /// Refused.
    Rejected(Rejection),
}

/// Dynamic-token gate.
pub struct ZeroTrustGate {
    config: ZeroTrustConfig,
    verifier: Arc<dyn DynamicTokenVerifier>,
}

impl ZeroTrustGate {
    /// Create a gate that asks `verifier` about presented tokens.
    pub fn new(config: ZeroTrustConfig, verifier: Arc<dyn DynamicTokenVerifier>) -> Self {
        Self { config, verifier }
    }

    /// The gate configuration.
    pub fn config(&self) -> &ZeroTrustConfig {
        &self.config
    }

    /// Decide whether a request for `path` with `headers` may proceed.
    pub async fn evaluate(&self, path: &str, headers: &HeaderMap) -> GateDecision {
        if !self.config.enabled || self.config.bypass_paths.iter().any(|p| p == path) {
            return GateDecision::Bypassed;
        }

        let token = headers
            .get(self.config.token_header.as_str())
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|t| !t.is_empty());

        let Some(token) = token else {
            return match self.config.on_missing_token {
                FailurePolicy::FailOpen => {
                    warn!(path, "no dynamic token presented, passing unverified");
                    GateDecision::PassUnverified
                }
                FailurePolicy::FailClosed => {
                    GateDecision::Rejected(Rejection::unauthorized("dynamic token required"))
                }
            };
        };

        match self.verifier.verify_dynamic(token).await {
            DynamicTokenVerdict::Valid(session) => GateDecision::Verified(session),
            DynamicTokenVerdict::Rejected => {
                GateDecision::Rejected(Rejection::unauthorized("invalid dynamic token"))
            }
            DynamicTokenVerdict::Unreachable(error) => match self.config.on_unreachable {
                FailurePolicy::FailOpen => {
                    warn!(path, %error, "identity service unreachable, passing unverified");
                    GateDecision::PassUnverified
                }
                FailurePolicy::FailClosed => GateDecision::Rejected(
                    Rejection::service_unavailable("identity service unavailable"),
                ),
            },
        }
    }
}

impl std::fmt::Debug for ZeroTrustGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZeroTrustGate")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Stage for ZeroTrustGate {
    fn name(&self) -> &'static str {
        "zero-trust"
    }

    fn check<'a>(
        &'a self,
        ctx: &'a mut GatewayContext,
        request: &'a BufferedRequest,
    ) -> BoxFuture<'a, StageOutcome> {
        Box::pin(async move {
            match self.evaluate(request.path(), request.headers()).await {
                GateDecision::Verified(session) => {
                    debug!(user_id = ?session.user_id, "dynamic token verified");
                    StageOutcome::Continue
                }
                GateDecision::Bypassed | GateDecision::PassUnverified => StageOutcome::Continue,
                GateDecision::Rejected(rejection) => {
                    info!(client = ctx.client_id(), reason = rejection.message(), "zero-trust rejection");
                    StageOutcome::Reject(rejection)
                }
            }
        })
    }
}
