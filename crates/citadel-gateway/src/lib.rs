//! Citadel Gateway - single ingress point for the Citadel services
//!
//! Every inbound request runs through the security pipeline from
//! `citadel-middleware`, is routed by the first path segment to a
//! registered backend, forwarded, and recorded in the audit trail.
//!
//! # Architecture
//!
//! ```text
//!                ┌──────────────────────────── Citadel Gateway ────────────────────────────┐
//!   client ───►  │ RateLimit → Firewall → ZeroTrust → Routing → Authentication → Dispatch  │ ───► auth / data / ...
//!                │                                        │            │            │      │
//!                │                              ServiceRegistry   IdentityClient  AuditLogger
//!                └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Endpoints
//!
//! - `GET /` - gateway information
//! - `GET /health` - live health of every backend
//! - `GET /services` - cached availability and live health per backend
//! - `{METHOD} /{service}/{path...}` - forwarded to `service`
//!
//! # Example Usage
//!
//! ```bash
//! # Run the gateway with a configuration file
//! $ citadel-gateway --config /etc/citadel/gateway.toml
//!
//! # Run with environment variable overrides
//! $ CITADEL_LISTEN_PORT=8080 \
//!   DATA_SERVICE_URL=http://localhost:8002 \
//!   citadel-gateway
//! ```

#![doc(html_root_url = "https://docs.rs/citadel-gateway/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod audit;
pub mod config;
pub mod error;
pub mod gateway;
pub mod headers;
pub mod identity;
pub mod proxy;
pub mod registry;
pub mod routing;
pub mod server;
pub mod telemetry;

pub use audit::{AuditLogger, AuditRecord};
pub use config::{GatewayConfig, GatewayConfigBuilder};
pub use error::{GatewayError, GatewayResult};
pub use gateway::Gateway;
pub use identity::IdentityClient;
pub use proxy::{ProxyDispatcher, ProxyRequest, ProxyResponse};
pub use registry::{HealthProbe, HttpHealthProbe, ServiceRegistry, ServiceStatus};
pub use routing::ServiceRouter;
pub use server::GatewayServer;

/// Gateway version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
