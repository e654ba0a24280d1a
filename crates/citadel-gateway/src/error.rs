//! Error types for the Citadel gateway.
//!
//! Only fatal failures live here: bad configuration, a listener that cannot
//! bind, an HTTP client that cannot be built. Request-level refusals are
//! [`citadel_middleware::Rejection`] values and never become a
//! [`GatewayError`].

use thiserror::Error;

/// Gateway startup and runtime errors.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Configuration error.
    #[error("Configuration error: {message}")]
    Config {
        /// Error message.
        message: String,
    },

    /// Listener could not bind.
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        /// Address that was requested.
        addr: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Server runtime error.
    #[error("Server error: {message}")]
    Server {
        /// Error message.
        message: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client construction error.
    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),
}

impl GatewayError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a server error.
    pub fn server(message: impl Into<String>) -> Self {
        Self::Server {
            message: message.into(),
        }
    }

    /// Get the error category for logs.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Config { .. } => "config",
            Self::Bind { .. } => "bind",
            Self::Server { .. } => "server",
            Self::Io(_) => "io",
            Self::Client(_) => "client",
        }
    }
}

/// Result type for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_constructors() {
        let err = GatewayError::config("missing field");
        assert_eq!(err.category(), "config");
        assert!(err.to_string().contains("Configuration error"));

        let err = GatewayError::server("logging init failed");
        assert_eq!(err.category(), "server");
    }

    #[test]
    fn test_bind_error_display() {
        let err = GatewayError::Bind {
            addr: "0.0.0.0:80".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert_eq!(err.category(), "bind");
        assert!(err.to_string().contains("0.0.0.0:80"));
    }

    #[test]
    fn test_from_io() {
        let err: GatewayError = std::io::Error::new(std::io::ErrorKind::Other, "boom").into();
        assert_eq!(err.category(), "io");
    }
}
