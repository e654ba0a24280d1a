//! # Citadel Middleware
//!
//! Security pipeline for the Citadel API gateway.
//!
//! Every inbound request flows through a fixed sequence of stages before it
//! is forwarded to a backend. Each stage either lets the request continue or
//! produces a terminal response; the first terminal response wins and no
//! later stage runs.
//!
//! ## Pipeline Stages
//!
//! ```text
//! Request → RateLimit → Firewall → ZeroTrust → Routing → Authentication → Dispatch
//! ```
//!
//! | Stage | Component          | Rejects with            |
//! |-------|--------------------|-------------------------|
//! | 1     | Rate limit         | 429 Too Many Requests   |
//! | 2     | Request firewall   | 403 Forbidden           |
//! | 3     | Zero-trust gate    | 401 Unauthorized        |
//! | 4     | Routing            | 404 / 503               |
//! | 5     | Authentication     | 401 / 503               |
//!
//! Routing lives in the gateway crate because it owns the service registry;
//! the remaining stages are implemented here. Stages that talk to the
//! identity service do so through the [`identity::BearerTokenVerifier`] and
//! [`identity::DynamicTokenVerifier`] traits.
//!
//! ## Example
//!
//! ```
//! use citadel_middleware::pipeline::StageKind;
//!
//! let stages = StageKind::all();
//! assert_eq!(stages.len(), 5);
//! assert_eq!(stages[0].name(), "rate_limit");
//! assert_eq!(stages[4].name(), "authentication");
//! ```

#![doc(html_root_url = "https://docs.rs/citadel-middleware/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod context;
pub mod error;
pub mod identity;
pub mod middleware;
pub mod pipeline;
pub mod stages;
pub mod types;

// Re-export main types at crate root
pub use context::{GatewayContext, ResolvedRoute};
pub use error::{ErrorResponse, Rejection, RejectionKind};
pub use identity::{BearerTokenVerifier, DynamicTokenVerdict, DynamicTokenVerifier, VerifiedIdentity};
pub use middleware::{BoxFuture, Stage, StageOutcome};
pub use pipeline::{Pipeline, PipelineBuilder, StageKind};
pub use types::{BufferedRequest, Response, ResponseExt};
