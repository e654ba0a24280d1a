//! Security stages.
//!
//! This module contains the stages that do not depend on the service
//! registry. They run in a fixed order set by the [`Pipeline`] builder:
//!
//! 1. [`rate_limit`] - per-client sliding window
//! 2. [`firewall`] - blocked-pattern inspection
//! 3. [`zero_trust`] - dynamic-token gate
//! 4. routing (gateway crate)
//! 5. [`authentication`] - bearer-token verification
//!
//! [`Pipeline`]: crate::pipeline::Pipeline

pub mod authentication;
pub mod firewall;
pub mod rate_limit;
pub mod zero_trust;

// Re-export main types
pub use authentication::TokenVerifier;
pub use firewall::{FirewallConfig, Location, RequestFirewall};
pub use rate_limit::{RateLimitConfig, RateLimitStage, RateLimiter};
pub use zero_trust::{FailurePolicy, ZeroTrustConfig, ZeroTrustGate};
