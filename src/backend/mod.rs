//! Backend collaborator: the Kairo service that owns the outbound queue.
//!
//! The bridge only ever reaches the backend with request/response calls:
//! fetch pending outbound messages, submit an inbound message, and
//! acknowledge a delivery.

pub mod client;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use client::HttpBackend;

/// Maximum number of response-body characters kept in a status error.
pub const MAX_ERROR_BODY_CHARS: usize = 256;

/// An outbound message pending delivery, as queued by the backend.
///
/// Immutable once fetched; the delivery engine only tracks its identifier.
/// Missing fields decode as empty strings so one malformed entry cannot
/// poison a whole batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Backend-assigned identifier, unique within its retention window.
    #[serde(default)]
    pub message_id: String,
    /// Transport address of the recipient.
    #[serde(rename = "user_id", default)]
    pub recipient: String,
    /// Message text.
    #[serde(rename = "message", default)]
    pub body: String,
}

impl OutboundMessage {
    /// Whether the entry carries everything needed for delivery.
    pub fn is_well_formed(&self) -> bool {
        !self.message_id.is_empty() && !self.recipient.is_empty() && !self.body.is_empty()
    }
}

/// Body of a `POST /incoming` submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IncomingSubmission {
    /// Transport address of the sender.
    pub user_id: String,
    /// Message text.
    pub message: String,
    /// Transport-assigned identifier, so the backend can deduplicate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

/// Errors from backend calls.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// Transport-level HTTP failure (connect refused, reset, bad body).
    #[error("backend request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The call did not complete within its timeout.
    #[error("backend request timed out: {operation}")]
    Timeout {
        /// Which backend operation timed out.
        operation: &'static str,
    },

    /// The backend answered with a non-success status.
    #[error("backend returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Truncated response body.
        body: String,
    },
}

/// The three backend operations the bridge depends on.
///
/// Every error is transient from the caller's point of view; implementations
/// must bound each call with a timeout.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Fetch the current batch of pending outbound messages.
    async fn fetch_outgoing(&self) -> Result<Vec<OutboundMessage>, BackendError>;

    /// Forward one inbound message to the backend.
    async fn submit_incoming(&self, submission: &IncomingSubmission) -> Result<(), BackendError>;

    /// Confirm that a message reached the transport.
    async fn ack(&self, message_id: &str) -> Result<(), BackendError>;
}
