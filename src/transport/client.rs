//! HTTP client for the WhatsApp sidecar.
//!
//! All WhatsApp operations go through this client, which communicates
//! with the Node.js sidecar via HTTP on port 3001.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{normalize_recipient, Transport, TransportError};

/// Default port the WhatsApp sidecar listens on.
pub const DEFAULT_SIDECAR_PORT: u16 = 3001;

/// HTTP connect timeout for the reqwest client.
const CONNECT_TIMEOUT_SECS: u64 = 5;

/// HTTP request timeout for status queries and release.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Connection status from the sidecar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SidecarStatus {
    /// Whether the sidecar holds a live WhatsApp session.
    pub connected: bool,
    /// The phone number linked, if connected.
    pub phone_number: Option<String>,
}

/// Response envelope from the sidecar HTTP API.
#[derive(Deserialize)]
struct SidecarResponse<T> {
    #[allow(dead_code)]
    success: bool,
    data: Option<T>,
    error: Option<String>,
}

/// Client for the WhatsApp sidecar HTTP API.
pub struct SidecarTransport {
    client: reqwest::Client,
    base_url: String,
}

impl SidecarTransport {
    /// Create a client pointing at the given base URL.
    pub fn new(base_url: &str) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "failed to build HTTP client with timeouts, using default");
                reqwest::Client::default()
            });
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_owned(),
        }
    }

    /// Create a client connecting to `http://127.0.0.1:{port}`.
    pub fn with_port(port: u16) -> Self {
        Self::new(&format!("http://127.0.0.1:{port}"))
    }

    /// Get the current connection status from the sidecar.
    pub async fn status(&self) -> Result<SidecarStatus, TransportError> {
        let url = format!("{}/status", self.base_url);
        let resp = self.client.get(&url).send().await?;
        let body: SidecarResponse<SidecarStatus> = resp.json().await?;
        body.data.ok_or(TransportError::NotConnected)
    }

    /// Returns the base URL of the sidecar.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl Default for SidecarTransport {
    fn default() -> Self {
        Self::with_port(DEFAULT_SIDECAR_PORT)
    }
}

#[async_trait]
impl Transport for SidecarTransport {
    async fn send(&self, recipient: &str, body: &str) -> Result<(), TransportError> {
        let url = format!("{}/send", self.base_url);
        let jid = normalize_recipient(recipient);
        let payload = serde_json::json!({ "jid": jid, "text": body });
        let resp = self.client.post(&url).json(&payload).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let reason = match resp.json::<SidecarResponse<serde_json::Value>>().await {
                Ok(envelope) => envelope.error.unwrap_or_default(),
                Err(_) => String::new(),
            };
            warn!(%status, reason = %reason, "WhatsApp send rejected");
            return Err(TransportError::Rejected {
                status: status.as_u16(),
                reason,
            });
        }
        debug!(jid = %jid, "message sent via WhatsApp");
        Ok(())
    }

    async fn release(&self) -> Result<(), TransportError> {
        let url = format!("{}/release", self.base_url);
        let resp = self.client.post(&url).send().await?;
        if !resp.status().is_success() {
            return Err(TransportError::Rejected {
                status: resp.status().as_u16(),
                reason: "release refused".to_owned(),
            });
        }
        debug!("WhatsApp session released");
        Ok(())
    }
}
