//! Incoming relay: forwards direct WhatsApp messages to the backend.
//!
//! Forwarding is a single best-effort submission. The sidecar will not
//! redeliver an event and the bridge keeps no inbound state, so a failed
//! submission is logged and dropped.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::backend::{Backend, IncomingSubmission};
use crate::transport::{InboundMessage, BROADCAST_SUFFIX, GROUP_SUFFIX};

/// What happened to one inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Submitted to the backend.
    Forwarded,
    /// Not a direct user message; dropped without contacting the backend.
    Filtered,
    /// The backend submission failed; dropped.
    Failed,
}

/// Forwards inbound transport messages to the backend.
#[derive(Clone)]
pub struct IncomingRelay {
    backend: Arc<dyn Backend>,
}

impl IncomingRelay {
    /// Create a relay submitting through `backend`.
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    /// Whether `message` is a direct user message worth forwarding.
    ///
    /// Anything from an `@broadcast` sender is dropped, status updates and
    /// broadcast lists alike. So are group chats, our own echoes and empty
    /// bodies.
    pub fn should_forward(message: &InboundMessage) -> bool {
        if message.is_status || message.sender.ends_with(BROADCAST_SUFFIX) {
            return false;
        }
        if message.is_group || message.sender.ends_with(GROUP_SUFFIX) {
            return false;
        }
        !message.from_me && !message.sender.is_empty() && !message.body.trim().is_empty()
    }

    /// Forward one message. Never retries.
    pub async fn relay(&self, message: InboundMessage) -> RelayOutcome {
        if !Self::should_forward(&message) {
            debug!(sender = %message.sender, "dropping non-direct inbound message");
            return RelayOutcome::Filtered;
        }

        let submission = IncomingSubmission {
            user_id: message.sender,
            message: message.body,
            message_id: message.message_id,
        };
        match self.backend.submit_incoming(&submission).await {
            Ok(()) => {
                info!(sender = %submission.user_id, "inbound message forwarded");
                RelayOutcome::Forwarded
            }
            Err(e) => {
                warn!(sender = %submission.user_id, error = %e, "failed to forward inbound message");
                RelayOutcome::Failed
            }
        }
    }

    /// Forward on a background task so a slow backend cannot stall event handling.
    pub fn spawn_relay(&self, message: InboundMessage) -> tokio::task::JoinHandle<RelayOutcome> {
        let relay = self.clone();
        tokio::spawn(async move { relay.relay(message).await })
    }
}
