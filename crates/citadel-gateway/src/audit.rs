//! Fire-and-forget audit trail.
//!
//! After every dispatch the gateway builds one [`AuditRecord`] and hands it
//! to the [`AuditLogger`], which posts it to the logging service's `/logs`
//! endpoint on a spawned task. Delivery is at most once; failures are logged
//! at `debug` and never reach the client.

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::config::AuditSettings;
use crate::error::{GatewayError, GatewayResult};

/// One proxied request as seen by the audit trail.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditRecord {
    /// Logical service name.
    pub service: String,
    /// Path below the service prefix.
    pub endpoint: String,
    /// HTTP method.
    pub method: String,
    /// Subject of the verified bearer token.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Role of the verified bearer token.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_role: Option<String>,
    /// Client address.
    pub ip_address: String,
    /// `User-Agent` header.
    pub user_agent: Option<String>,
    /// Request body when it is a JSON object.
    pub request_body: Option<Value>,
    /// Status returned to the client.
    pub response_status: u16,
    /// Response body when it is a JSON object.
    pub response_body: Option<Value>,
    /// Time from ingress to response, in milliseconds.
    pub execution_time_ms: f64,
    /// When the record was built.
    pub timestamp: DateTime<Utc>,
}

impl AuditRecord {
    /// Start a record for `method service/endpoint`.
    pub fn new(
        service: impl Into<String>,
        endpoint: impl Into<String>,
        method: impl Into<String>,
    ) -> Self {
        Self {
            service: service.into(),
            endpoint: endpoint.into(),
            method: method.into(),
            user_id: None,
            user_role: None,
            ip_address: String::new(),
            user_agent: None,
            request_body: None,
            response_status: 0,
            response_body: None,
            execution_time_ms: 0.0,
            timestamp: Utc::now(),
        }
    }
}

/// Parse a body for the audit trail. Only JSON objects are kept.
pub fn audit_body(body: &[u8]) -> Option<Value> {
    if body.is_empty() {
        return None;
    }
    serde_json::from_slice::<Value>(body)
        .ok()
        .filter(Value::is_object)
}

/// Ships audit records to the logging service.
#[derive(Debug, Clone)]
pub struct AuditLogger {
    client: Client,
    endpoint: Option<String>,
}

impl AuditLogger {
    /// Create a logger posting to `<logging_url>/logs`.
    ///
    /// Records are dropped when `settings.enabled` is false.
    pub fn new(settings: &AuditSettings, logging_url: &str) -> GatewayResult<Self> {
        let client = Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(GatewayError::Client)?;

        let endpoint = settings
            .enabled
            .then(|| format!("{}/logs", logging_url.trim_end_matches('/')));

        Ok(Self { client, endpoint })
    }

    /// A logger that drops every record.
    pub fn disabled() -> Self {
        Self {
            client: Client::new(),
            endpoint: None,
        }
    }

    /// Whether records are shipped.
    pub fn is_enabled(&self) -> bool {
        self.endpoint.is_some()
    }

    /// Ship a record in the background.
    ///
    /// Returns the emission task, or `None` when auditing is disabled.
    /// Callers are not expected to await it.
    pub fn record(&self, record: AuditRecord) -> Option<JoinHandle<()>> {
        let endpoint = self.endpoint.clone()?;
        let client = self.client.clone();

        Some(tokio::spawn(async move {
            match client.post(&endpoint).json(&record).send().await {
                Ok(response) if !response.status().is_success() => {
                    debug!(
                        status = response.status().as_u16(),
                        service = %record.service,
                        "audit record refused"
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    debug!(error = %e, service = %record.service, "audit delivery failed");
                }
            }
        }))
    }
}
