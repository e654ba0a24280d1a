//! Identity types and the verifier seams used by the security stages.
//!
//! The gateway never validates credentials itself; it asks the identity
//! service. These traits describe that conversation so stages can be
//! exercised without a network.

use serde::{Deserialize, Serialize};

use crate::error::Rejection;
use crate::middleware::BoxFuture;

/// Identity established from a verified bearer token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifiedIdentity {
    /// Subject (username).
    #[serde(rename = "sub")]
    pub subject: String,
    /// Role granted to the subject.
    pub role: String,
    /// Expiry as a unix timestamp in seconds.
    #[serde(rename = "exp")]
    pub expires_at: i64,
}

impl VerifiedIdentity {
    /// Create a new identity.
    pub fn new(subject: impl Into<String>, role: impl Into<String>, expires_at: i64) -> Self {
        Self {
            subject: subject.into(),
            role: role.into(),
            expires_at,
        }
    }
}

/// Session described by a valid dynamic token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DynamicSession {
    /// Owner of the session.
    pub user_id: Option<i64>,
    /// Expiry as reported by the identity service.
    pub expires_at: Option<String>,
}

/// Outcome of a dynamic-token check.
///
/// `Unreachable` is kept apart from `Rejected` so the caller can apply its
/// own policy when the identity service cannot be asked at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DynamicTokenVerdict {
    /// The identity service accepted the token.
    Valid(DynamicSession),
    /// The identity service answered with anything other than success.
    Rejected,
    /// The identity service could not be reached.
    Unreachable(String),
}

/// Verifies bearer tokens.
///
/// Implementations return [`Rejection::unauthorized`] for a rejected
/// credential and [`Rejection::service_unavailable`] when the verifier
/// itself cannot be reached; callers must not conflate the two.
pub trait BearerTokenVerifier: Send + Sync + 'static {
    /// Verify a raw token (scheme prefix already removed).
    fn verify_bearer<'a>(&'a self, token: &'a str)
        -> BoxFuture<'a, Result<VerifiedIdentity, Rejection>>;
}

/// Verifies per-request dynamic tokens.
pub trait DynamicTokenVerifier: Send + Sync + 'static {
    /// Verify a dynamic token.
    fn verify_dynamic<'a>(&'a self, token: &'a str) -> BoxFuture<'a, DynamicTokenVerdict>;
}
