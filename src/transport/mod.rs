//! Transport adapter: the WhatsApp session held by the sidecar process.
//!
//! The sidecar owns the WhatsApp Web session. The bridge talks to it over
//! HTTP on port 3001: `POST /send` for outbound text, `GET /status` for
//! health, `POST /release` to close the session, and long-polling on
//! `GET /events/poll` for lifecycle and inbound message events.

pub mod client;
pub mod events;

use async_trait::async_trait;
use serde::Deserialize;

pub use client::SidecarTransport;
pub use events::spawn_event_listener;

/// Suffix WhatsApp uses for individual user addresses.
pub const USER_SUFFIX: &str = "@c.us";

/// Suffix WhatsApp uses for group conversations.
pub const GROUP_SUFFIX: &str = "@g.us";

/// Sender address of status (story) broadcasts.
pub const STATUS_BROADCAST: &str = "status@broadcast";

/// Suffix shared by status updates and broadcast lists.
pub const BROADCAST_SUFFIX: &str = "@broadcast";

/// Errors from the transport adapter.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// HTTP request to the sidecar failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The sidecar refused the operation.
    #[error("sidecar rejected request ({status}): {reason}")]
    Rejected {
        /// HTTP status code returned by the sidecar.
        status: u16,
        /// Reason reported by the sidecar, if any.
        reason: String,
    },

    /// The sidecar is up but has no WhatsApp session.
    #[error("not connected to WhatsApp")]
    NotConnected,

    /// The operation did not complete within its timeout.
    #[error("transport operation timed out after {millis}ms")]
    Timeout {
        /// Timeout budget in milliseconds.
        millis: u64,
    },
}

/// A message received from WhatsApp.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InboundMessage {
    /// Address of the conversation the message arrived in.
    #[serde(rename = "jid")]
    pub sender: String,
    /// Message text.
    #[serde(rename = "text", default)]
    pub body: String,
    /// Transport-assigned message identifier.
    #[serde(default)]
    pub message_id: Option<String>,
    /// Whether the conversation is a group chat.
    #[serde(default)]
    pub is_group: bool,
    /// Whether this is a status/broadcast update.
    #[serde(default)]
    pub is_status: bool,
    /// Whether the message was sent from the linked account itself.
    #[serde(default)]
    pub from_me: bool,
}

impl InboundMessage {
    /// A plain direct message from `sender`.
    pub fn direct(sender: &str, body: &str) -> Self {
        Self {
            sender: sender.to_owned(),
            body: body.to_owned(),
            message_id: None,
            is_group: false,
            is_status: false,
            from_me: false,
        }
    }
}

/// An event emitted by the sidecar.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransportEvent {
    /// The WhatsApp session is established and can send.
    #[serde(alias = "connected")]
    Ready,
    /// The session needs pairing; the code is rendered by the sidecar.
    #[serde(rename = "qr")]
    Pairing {
        /// Raw pairing payload.
        #[serde(default)]
        code: String,
    },
    /// WhatsApp rejected the stored credentials.
    AuthFailure {
        /// Human-readable reason, if available.
        #[serde(default)]
        reason: Option<String>,
    },
    /// The session was closed by WhatsApp or the phone.
    Disconnected {
        /// Human-readable reason, if available.
        #[serde(default)]
        reason: Option<String>,
    },
    /// A non-fatal client error.
    Error {
        /// Error description.
        #[serde(default)]
        message: String,
    },
    /// A message arrived.
    Message(InboundMessage),
}

/// Operations the delivery engine and lifecycle controller need from the
/// chat transport.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `body` to `recipient`.
    async fn send(&self, recipient: &str, body: &str) -> Result<(), TransportError>;

    /// Close the session. Called once during shutdown.
    async fn release(&self) -> Result<(), TransportError>;
}

/// Turn a bare phone number into a WhatsApp user address.
///
/// Anything that is not purely digits is returned unchanged.
pub fn normalize_recipient(recipient: &str) -> String {
    let trimmed = recipient.trim();
    if !trimmed.is_empty() && trimmed.chars().all(|c| c.is_ascii_digit()) {
        format!("{trimmed}{USER_SUFFIX}")
    } else {
        trimmed.to_owned()
    }
}
