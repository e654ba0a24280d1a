//! Structured logging.
//!
//! JSON log lines by default, human-readable output when
//! `telemetry.json = false`. `RUST_LOG` takes precedence over the
//! configured level.
//!
//! # Example
//!
//! ```rust,ignore
//! use citadel_gateway::{config::TelemetrySettings, telemetry::init_logging};
//!
//! init_logging(&TelemetrySettings::default())?;
//! tracing::info!(service = "data", "backend marked down");
//! ```

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::TelemetrySettings;
use crate::error::{GatewayError, GatewayResult};

/// Standard log field names.
pub mod fields {
    /// Request ID field name.
    pub const REQUEST_ID: &str = "request_id";
    /// Backend service field name.
    pub const SERVICE: &str = "service";
    /// Client identifier field name.
    pub const CLIENT: &str = "client";
}

/// Builds the log filter: `RUST_LOG` if set, otherwise `level`.
pub fn build_filter(level: &str) -> GatewayResult<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(level)
            .map_err(|e| GatewayError::config(format!("invalid log level '{level}': {e}"))),
    }
}

/// Initializes the global subscriber.
///
/// Fails if the level is invalid or a subscriber is already installed.
pub fn init_logging(settings: &TelemetrySettings) -> GatewayResult<()> {
    let filter = build_filter(&settings.log_level)?;

    if settings.json {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_target(true)
            .with_filter(filter);

        tracing_subscriber::registry()
            .with(fmt_layer)
            .try_init()
            .map_err(|e| GatewayError::server(format!("logging init failed: {e}")))?;
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .pretty()
            .with_target(true)
            .with_filter(filter);

        tracing_subscriber::registry()
            .with(fmt_layer)
            .try_init()
            .map_err(|e| GatewayError::server(format!("logging init failed: {e}")))?;
    }

    Ok(())
}
