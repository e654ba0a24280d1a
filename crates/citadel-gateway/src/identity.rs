//! HTTP client for the identity service.
//!
//! Implements both verifier traits of the security stages:
//!
//! - `POST /verify-token {token}` for bearer tokens
//! - `POST /verify-dynamic-token {token}` for zero-trust dynamic tokens
//!
//! Transport failures are reported separately from rejected credentials so
//! the stages can tell "identity service down" from "token refused".

use std::time::Duration;

use citadel_middleware::identity::{DynamicSession, DynamicTokenVerdict};
use citadel_middleware::{
    BearerTokenVerifier, BoxFuture, DynamicTokenVerifier, Rejection, VerifiedIdentity,
};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{GatewayError, GatewayResult};

#[derive(Serialize)]
struct TokenPayload<'a> {
    token: &'a str,
}

#[derive(Debug, Deserialize)]
struct VerifyTokenResponse {
    valid: bool,
    #[serde(default)]
    payload: Option<VerifiedIdentity>,
}

#[derive(Debug, Deserialize)]
struct VerifyDynamicResponse {
    valid: bool,
    #[serde(default)]
    user_id: Option<i64>,
    #[serde(default)]
    expires_at: Option<String>,
}

/// Client for the identity service's verification endpoints.
#[derive(Debug, Clone)]
pub struct IdentityClient {
    client: Client,
    base_url: String,
}

impl IdentityClient {
    /// Create a client for the identity service at `base_url`.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> GatewayResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(GatewayError::Client)?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Identity service base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post_token(&self, path: &str, token: &str) -> reqwest::Result<reqwest::Response> {
        self.client
            .post(format!("{}{path}", self.base_url))
            .json(&TokenPayload { token })
            .send()
            .await
    }

    /// Verify a bearer token.
    pub async fn verify_token(&self, token: &str) -> Result<VerifiedIdentity, Rejection> {
        let response = self.post_token("/verify-token", token).await.map_err(|e| {
            warn!(error = %e, "identity service unreachable");
            Rejection::service_unavailable("identity service unavailable")
        })?;

        if response.status() != StatusCode::OK {
            debug!(status = response.status().as_u16(), "bearer token refused");
            return Err(Rejection::unauthorized("invalid or expired token"));
        }

        let body: VerifyTokenResponse = response.json().await.map_err(|e| {
            warn!(error = %e, "malformed token verification response");
            Rejection::service_unavailable("identity service returned an invalid response")
        })?;

        match body {
            VerifyTokenResponse {
                valid: true,
                payload: Some(identity),
            } => Ok(identity),
            VerifyTokenResponse { valid: false, .. } => {
                Err(Rejection::unauthorized("invalid or expired token"))
            }
            VerifyTokenResponse { payload: None, .. } => {
                warn!("token verification response without payload");
                Err(Rejection::service_unavailable(
                    "identity service returned an invalid response",
                ))
            }
        }
    }

    /// Verify a dynamic token.
    pub async fn verify_dynamic_token(&self, token: &str) -> DynamicTokenVerdict {
        let response = match self.post_token("/verify-dynamic-token", token).await {
            Ok(response) => response,
            Err(e) => return DynamicTokenVerdict::Unreachable(e.to_string()),
        };

        if response.status() != StatusCode::OK {
            return DynamicTokenVerdict::Rejected;
        }

        match response.json::<VerifyDynamicResponse>().await {
            Ok(body) if body.valid => DynamicTokenVerdict::Valid(DynamicSession {
                user_id: body.user_id,
                expires_at: body.expires_at,
            }),
            Ok(_) => DynamicTokenVerdict::Rejected,
            Err(e) => {
                debug!(error = %e, "malformed dynamic token response");
                DynamicTokenVerdict::Rejected
            }
        }
    }
}

impl BearerTokenVerifier for IdentityClient {
    fn verify_bearer<'a>(
        &'a self,
        token: &'a str,
    ) -> BoxFuture<'a, Result<VerifiedIdentity, Rejection>> {
        Box::pin(self.verify_token(token))
    }
}

impl DynamicTokenVerifier for IdentityClient {
    fn verify_dynamic<'a>(&'a self, token: &'a str) -> BoxFuture<'a, DynamicTokenVerdict> {
        Box::pin(self.verify_dynamic_token(token))
    }
}
