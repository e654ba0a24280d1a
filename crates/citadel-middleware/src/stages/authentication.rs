//! Bearer-token authentication stage.
//!
//! Runs after routing. Every route requires an `Authorization: Bearer`
//! credential except those of the identity service itself, which issues
//! the credentials instead of consuming them.
//!
//! A rejected credential answers 401. A verifier that cannot be reached
//! answers 503; the two are never conflated.

use std::sync::Arc;

use tracing::{debug, info};

use crate::context::GatewayContext;
use crate::error::{Rejection, RejectionKind};
use crate::identity::{BearerTokenVerifier, VerifiedIdentity};
use crate::middleware::{BoxFuture, Stage, StageOutcome};
use crate::types::BufferedRequest;

/// Authentication stage backed by a [`BearerTokenVerifier`].
pub struct TokenVerifier {
    verifier: Arc<dyn BearerTokenVerifier>,
    exempt_service: String,
}

impl TokenVerifier {
    /// Create the stage. Routes of `exempt_service` skip verification.
    pub fn new(verifier: Arc<dyn BearerTokenVerifier>, exempt_service: impl Into<String>) -> Self {
        Self {
            verifier,
            exempt_service: exempt_service.into(),
        }
    }

    /// Name of the service whose routes skip verification.
    pub fn exempt_service(&self) -> &str {
        &self.exempt_service
    }

    /// Verify the value of an `Authorization` header.
    pub async fn verify(
        &self,
        authorization: Option<&str>,
    ) -> Result<VerifiedIdentity, Rejection> {
        let header = authorization
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .ok_or_else(|| Rejection::unauthorized("authorization header missing"))?;

        let token = strip_bearer(header);
        if token.is_empty() {
            return Err(Rejection::unauthorized("authorization header missing"));
        }

        self.verifier.verify_bearer(token).await
    }
}

/// Remove a leading `Bearer ` scheme, ignoring case.
pub fn strip_bearer(header: &str) -> &str {
    const SCHEME: &str = "bearer ";
    match header.get(..SCHEME.len()) {
        Some(prefix) if prefix.eq_ignore_ascii_case(SCHEME) => header[SCHEME.len()..].trim_start(),
        _ => header,
    }
}

impl std::fmt::Debug for TokenVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenVerifier")
            .field("exempt_service", &self.exempt_service)
            .finish_non_exhaustive()
    }
}

impl Stage for TokenVerifier {
    fn name(&self) -> &'static str {
        "token-verifier"
    }

    fn check<'a>(
        &'a self,
        ctx: &'a mut GatewayContext,
        request: &'a BufferedRequest,
    ) -> BoxFuture<'a, StageOutcome> {
        Box::pin(async move {
            if ctx
                .route()
                .is_some_and(|route| route.service == self.exempt_service)
            {
                return StageOutcome::Continue;
            }

            match self.verify(request.header("authorization")).await {
                Ok(identity) => {
                    debug!(subject = %identity.subject, role = %identity.role, "bearer token verified");
                    ctx.set_identity(identity);
                    StageOutcome::Continue
                }
                Err(rejection) => {
                    if rejection.kind() == RejectionKind::ServiceUnavailable {
                        info!(reason = rejection.message(), "token verification unavailable");
                    } else {
                        info!(client = ctx.client_id(), reason = rejection.message(), "authentication failed");
                    }
                    StageOutcome::Reject(rejection)
                }
            }
        })
    }
}
