//! Configuration for the Citadel gateway.
//!
//! Configuration is read from a TOML or JSON file (by extension), then
//! overridden from the environment, then validated. Every section has
//! defaults, so an empty file is a valid configuration.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use citadel_middleware::stages::{FirewallConfig, RequestFirewall, ZeroTrustConfig};
use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, GatewayResult};

/// Gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener settings.
    pub server: ServerSettings,
    /// Rate limiting settings.
    pub rate_limit: RateLimitSettings,
    /// Firewall settings.
    pub firewall: FirewallConfig,
    /// Zero-trust gate settings.
    pub zero_trust: ZeroTrustConfig,
    /// Health cache settings.
    pub registry: RegistrySettings,
    /// Logical service name to base URL.
    pub services: ServiceTable,
    /// Identity collaborator settings.
    pub identity: IdentitySettings,
    /// Forwarding settings.
    pub proxy: ProxySettings,
    /// Audit emission settings.
    pub audit: AuditSettings,
    /// Logging settings.
    pub telemetry: TelemetrySettings,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            rate_limit: RateLimitSettings::default(),
            firewall: FirewallConfig::default(),
            zero_trust: ZeroTrustConfig::default(),
            registry: RegistrySettings::default(),
            services: default_services(),
            identity: IdentitySettings::default(),
            proxy: ProxySettings::default(),
            audit: AuditSettings::default(),
            telemetry: TelemetrySettings::default(),
        }
    }
}

impl GatewayConfig {
    /// Create a new configuration builder.
    pub fn builder() -> GatewayConfigBuilder {
        GatewayConfigBuilder::default()
    }

    /// Load configuration from a file.
    pub fn from_file(path: impl Into<PathBuf>) -> GatewayResult<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path)
            .map_err(|e| GatewayError::config(format!("failed to read config file: {e}")))?;

        let extension = path.extension().and_then(|s| s.to_str()).unwrap_or("");
        match extension {
            "toml" => toml::from_str(&content)
                .map_err(|e| GatewayError::config(format!("invalid TOML: {e}"))),
            "json" => serde_json::from_str(&content)
                .map_err(|e| GatewayError::config(format!("invalid JSON: {e}"))),
            _ => Err(GatewayError::config(format!(
                "unsupported config format: {extension}"
            ))),
        }
    }

    /// Apply environment variable overrides.
    ///
    /// Gateway settings use the `CITADEL_` prefix. Service URLs use
    /// `<NAME>_SERVICE_URL`, e.g. `AUTH_SERVICE_URL`.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup.
    #[must_use]
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(addr) = lookup("CITADEL_LISTEN_ADDR") {
            self.server.listen_addr = addr;
        }

        if let Some(port) = lookup("CITADEL_LISTEN_PORT").and_then(|p| p.parse().ok()) {
            self.server.listen_port = port;
        }

        if let Some(n) = lookup("CITADEL_RATE_LIMIT_PER_SECOND").and_then(|v| v.parse().ok()) {
            self.rate_limit.per_second = n;
        }

        if let Some(n) = lookup("CITADEL_RATE_LIMIT_PER_MINUTE").and_then(|v| v.parse().ok()) {
            self.rate_limit.per_minute = n;
        }

        if let Some(enabled) = lookup("CITADEL_ENABLE_FIREWALL").and_then(|v| parse_bool(&v)) {
            self.firewall.enabled = enabled;
        }

        if let Some(enabled) = lookup("CITADEL_ENABLE_ZERO_TRUST").and_then(|v| parse_bool(&v)) {
            self.zero_trust.enabled = enabled;
        }

        if let Some(header) = lookup("CITADEL_ZERO_TRUST_HEADER") {
            self.zero_trust.token_header = header;
        }

        if let Some(level) = lookup("CITADEL_LOG_LEVEL") {
            self.telemetry.log_level = level;
        }

        for (name, url) in &mut self.services {
            let key = format!("{}_SERVICE_URL", name.to_ascii_uppercase().replace('-', "_"));
            if let Some(value) = lookup(&key) {
                *url = value;
            }
        }

        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> GatewayResult<()> {
        if self.services.is_empty() {
            return Err(GatewayError::config("at least one service is required"));
        }

        for (name, url) in &self.services {
            if name.is_empty() || name.contains('/') {
                return Err(GatewayError::config(format!(
                    "invalid service name '{name}'"
                )));
            }
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(GatewayError::config(format!(
                    "service '{name}' url must start with http:// or https://"
                )));
            }
        }

        if !self.services.contains_key(&self.identity.service) {
            return Err(GatewayError::config(format!(
                "identity service '{}' is not a configured service",
                self.identity.service
            )));
        }

        if self.audit.enabled && !self.services.contains_key(&self.audit.service) {
            return Err(GatewayError::config(format!(
                "audit service '{}' is not a configured service",
                self.audit.service
            )));
        }

        if self.rate_limit.per_second == 0 || self.rate_limit.per_minute == 0 {
            return Err(GatewayError::config("rate limits must be non-zero"));
        }

        if self.rate_limit.idle_sweep_interval.is_zero()
            || self.registry.health_check_interval.is_zero()
        {
            return Err(GatewayError::config("intervals must be non-zero"));
        }

        if self.server.max_request_body_size == 0 {
            return Err(GatewayError::config("max_request_body_size must be non-zero"));
        }

        if self.zero_trust.token_header.parse::<http::HeaderName>().is_err() {
            return Err(GatewayError::config(format!(
                "invalid zero-trust header name '{}'",
                self.zero_trust.token_header
            )));
        }

        RequestFirewall::new(&self.firewall)
            .map_err(|e| GatewayError::config(format!("invalid blocked pattern: {e}")))?;

        Ok(())
    }

    /// Base URL of a configured service.
    pub fn service_url(&self, name: &str) -> Option<&str> {
        self.services.get(name).map(String::as_str)
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Logical service name to base URL.
pub type ServiceTable = BTreeMap<String, String>;

fn default_services() -> ServiceTable {
    [
        ("auth", "http://auth-service:8001"),
        ("data", "http://data-service:8002"),
        ("logging", "http://logging-service:8003"),
    ]
    .into_iter()
    .map(|(name, url)| (name.to_string(), url.to_string()))
    .collect()
}

/// Listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Address to bind to.
    pub listen_addr: String,
    /// Port to listen on.
    pub listen_port: u16,
    /// Maximum request body size in bytes.
    pub max_request_body_size: usize,
    /// Key rate limiting by the first `X-Forwarded-For` entry.
    pub trust_forwarded_for: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0".to_string(),
            listen_port: 8000,
            max_request_body_size: 10 * 1024 * 1024, // 10MB
            trust_forwarded_for: false,
        }
    }
}

/// Rate limiting settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    /// Requests allowed per client per second.
    pub per_second: usize,
    /// Requests allowed per client per minute.
    pub per_minute: usize,
    /// How often idle client windows are evicted.
    #[serde(with = "human_duration")]
    pub idle_sweep_interval: Duration,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            per_second: 5,
            per_minute: 100,
            idle_sweep_interval: Duration::from_secs(60),
        }
    }
}

/// Health cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrySettings {
    /// How long a probe result is trusted.
    #[serde(with = "human_duration")]
    pub health_check_interval: Duration,
    /// Timeout of a single health probe.
    #[serde(with = "human_duration")]
    pub probe_timeout: Duration,
    /// Health path appended to each base URL.
    pub health_path: String,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            health_check_interval: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(5),
            health_path: "/health".to_string(),
        }
    }
}

/// Identity collaborator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentitySettings {
    /// Name of the identity service in `[services]`. Its routes skip
    /// bearer verification.
    pub service: String,
    /// Timeout of verification calls.
    #[serde(with = "human_duration")]
    pub timeout: Duration,
}

impl Default for IdentitySettings {
    fn default() -> Self {
        Self {
            service: "auth".to_string(),
            timeout: Duration::from_secs(5),
        }
    }
}

/// Forwarding settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxySettings {
    /// Overall timeout of a forwarded request.
    #[serde(with = "human_duration")]
    pub timeout: Duration,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
        }
    }
}

/// Audit emission settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditSettings {
    /// Emit audit records.
    pub enabled: bool,
    /// Name of the logging service in `[services]`.
    pub service: String,
    /// Timeout of a single emission.
    #[serde(with = "human_duration")]
    pub timeout: Duration,
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            service: "logging".to_string(),
            timeout: Duration::from_secs(2),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetrySettings {
    /// Default log filter when `RUST_LOG` is unset.
    pub log_level: String,
    /// Emit JSON log lines.
    pub json: bool,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json: true,
        }
    }
}

/// Builder for `GatewayConfig`.
#[derive(Debug, Default)]
pub struct GatewayConfigBuilder {
    config: GatewayConfig,
}

impl GatewayConfigBuilder {
    /// Set the listen address.
    #[must_use]
    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.server.listen_addr = addr.into();
        self
    }

    /// Set the listen port.
    #[must_use]
    pub fn listen_port(mut self, port: u16) -> Self {
        self.config.server.listen_port = port;
        self
    }

    /// Register or replace a service.
    #[must_use]
    pub fn service(mut self, name: impl Into<String>, url: impl Into<String>) -> Self {
        self.config.services.insert(name.into(), url.into());
        self
    }

    /// Set both rate limits.
    #[must_use]
    pub fn rate_limit(mut self, per_second: usize, per_minute: usize) -> Self {
        self.config.rate_limit.per_second = per_second;
        self.config.rate_limit.per_minute = per_minute;
        self
    }

    /// Enable or disable the firewall.
    #[must_use]
    pub fn firewall_enabled(mut self, enabled: bool) -> Self {
        self.config.firewall.enabled = enabled;
        self
    }

    /// Replace the zero-trust settings.
    #[must_use]
    pub fn zero_trust(mut self, zero_trust: ZeroTrustConfig) -> Self {
        self.config.zero_trust = zero_trust;
        self
    }

    /// Set the health cache TTL.
    #[must_use]
    pub fn health_check_interval(mut self, interval: Duration) -> Self {
        self.config.registry.health_check_interval = interval;
        self
    }

    /// Set the forwarding timeout.
    #[must_use]
    pub fn proxy_timeout(mut self, timeout: Duration) -> Self {
        self.config.proxy.timeout = timeout;
        self
    }

    /// Enable or disable audit emission.
    #[must_use]
    pub fn audit_enabled(mut self, enabled: bool) -> Self {
        self.config.audit.enabled = enabled;
        self
    }

    /// Set the maximum request body size.
    #[must_use]
    pub fn max_request_body_size(mut self, bytes: usize) -> Self {
        self.config.server.max_request_body_size = bytes;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> GatewayResult<GatewayConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Duration (de)serialization as `"500ms"`, `"30s"`, `"5m"`, `"1h"`.
mod human_duration {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = if duration.subsec_millis() == 0 {
            format!("{}s", duration.as_secs())
        } else {
            format!("{}ms", duration.as_millis())
        };
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub(super) fn parse_duration(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        let (digits, scale): (&str, fn(u64) -> Option<Duration>) =
            if let Some(n) = s.strip_suffix("ms") {
                (n, |ms| Some(Duration::from_millis(ms)))
            } else if let Some(n) = s.strip_suffix('s') {
                (n, |secs| Some(Duration::from_secs(secs)))
            } else if let Some(n) = s.strip_suffix('m') {
                (n, |m| m.checked_mul(60).map(Duration::from_secs))
            } else if let Some(n) = s.strip_suffix('h') {
                (n, |h| h.checked_mul(3600).map(Duration::from_secs))
            } else {
                (s, |secs| Some(Duration::from_secs(secs)))
            };

        digits
            .trim()
            .parse::<u64>()
            .ok()
            .and_then(scale)
            .ok_or_else(|| format!("invalid duration '{s}'"))
    }
}
