//! HTTP client for the Kairo backend bridge endpoints.
//!
//! Each operation carries its own timeout: acknowledgments fail fast, inbound
//! submissions tolerate slower backend processing.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{Backend, BackendError, IncomingSubmission, OutboundMessage, MAX_ERROR_BODY_CHARS};
use crate::config::BackendConfig;

/// HTTP connect timeout for the reqwest client.
const CONNECT_TIMEOUT_SECS: u64 = 3;

/// Per-operation request timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendTimeouts {
    /// `GET /outgoing`.
    pub fetch: Duration,
    /// `POST /incoming`.
    pub incoming: Duration,
    /// `POST /ack`.
    pub ack: Duration,
}

impl Default for BackendTimeouts {
    fn default() -> Self {
        Self {
            fetch: Duration::from_secs(5),
            incoming: Duration::from_secs(10),
            ack: Duration::from_secs(3),
        }
    }
}

/// Response of `GET /outgoing`. A missing or null array means nothing is pending.
#[derive(Deserialize)]
struct OutgoingResponse {
    #[serde(default)]
    messages: Option<Vec<OutboundMessage>>,
}

/// Client for the backend's `/outgoing`, `/incoming` and `/ack` endpoints.
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
    timeouts: BackendTimeouts,
}

impl HttpBackend {
    /// Create a client for the given base URL.
    pub fn new(base_url: &str, timeouts: BackendTimeouts) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "failed to build HTTP client with timeouts, using default");
                reqwest::Client::default()
            });
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_owned(),
            timeouts,
        }
    }

    /// Create a client from the `[backend]` configuration section.
    pub fn from_config(config: &BackendConfig) -> Self {
        Self::new(&config.url, config.timeouts())
    }

    /// Returns the base URL of the backend.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn fetch_outgoing(&self) -> Result<Vec<OutboundMessage>, BackendError> {
        let resp = self
            .client
            .get(self.endpoint("outgoing"))
            .timeout(self.timeouts.fetch)
            .send()
            .await
            .map_err(|e| classify(e, "fetch_outgoing"))?;
        let resp = check_status(resp).await?;
        let body: OutgoingResponse = resp
            .json()
            .await
            .map_err(|e| classify(e, "fetch_outgoing"))?;
        let messages = body.messages.unwrap_or_default();
        debug!(count = messages.len(), "fetched outbound batch");
        Ok(messages)
    }

    async fn submit_incoming(&self, submission: &IncomingSubmission) -> Result<(), BackendError> {
        let resp = self
            .client
            .post(self.endpoint("incoming"))
            .timeout(self.timeouts.incoming)
            .json(submission)
            .send()
            .await
            .map_err(|e| classify(e, "submit_incoming"))?;
        check_status(resp).await?;
        Ok(())
    }

    async fn ack(&self, message_id: &str) -> Result<(), BackendError> {
        let body = serde_json::json!({ "message_id": message_id });
        let resp = self
            .client
            .post(self.endpoint("ack"))
            .timeout(self.timeouts.ack)
            .json(&body)
            .send()
            .await
            .map_err(|e| classify(e, "ack"))?;
        check_status(resp).await?;
        Ok(())
    }
}

fn classify(err: reqwest::Error, operation: &'static str) -> BackendError {
    if err.is_timeout() {
        BackendError::Timeout { operation }
    } else {
        BackendError::Http(err)
    }
}

/// Turn a non-2xx response into [`BackendError::Status`].
async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, BackendError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let text = resp.text().await.unwrap_or_default();
    Err(BackendError::Status {
        status: status.as_u16(),
        body: text.chars().take(MAX_ERROR_BODY_CHARS).collect(),
    })
}
