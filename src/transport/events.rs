//! Event listener for the WhatsApp sidecar.
//!
//! Long-polls the sidecar's `/events/poll` endpoint and forwards lifecycle
//! and message events to the lifecycle controller via an mpsc channel.

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::TransportEvent;

/// Long-poll timeout for the HTTP client (seconds).
const POLL_TIMEOUT_SECS: u64 = 60;

/// Initial reconnect backoff (milliseconds).
const INITIAL_BACKOFF_MS: u64 = 1_000;

/// Maximum reconnect backoff (milliseconds).
const MAX_BACKOFF_MS: u64 = 30_000;

/// Pause after a non-success poll response (seconds).
const NON_SUCCESS_PAUSE_SECS: u64 = 5;

/// Spawn an event listener that forwards events to the given channel.
///
/// Returns immediately. The listener runs as a background Tokio task,
/// reconnects with exponential backoff on network errors, and exits once
/// the receiving side of the channel is dropped.
pub fn spawn_event_listener(
    base_url: String,
    event_tx: mpsc::Sender<TransportEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let poll_url = format!("{}/events/poll", base_url.trim_end_matches('/'));
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            info!(url = %poll_url, "connecting to WhatsApp event stream");

            match poll_events(&poll_url, &event_tx, &mut backoff_ms).await {
                Ok(()) => {
                    info!("WhatsApp event stream closed normally");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, backoff_ms, "WhatsApp event stream error, reconnecting");
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms = next_backoff(backoff_ms);
                }
            }
        }
    })
}

/// Double the backoff, capped at [`MAX_BACKOFF_MS`].
pub fn next_backoff(current_ms: u64) -> u64 {
    current_ms.saturating_mul(2).min(MAX_BACKOFF_MS)
}

/// Decode one poll response body, dropping events this bridge does not know.
pub fn decode_events(body: &[serde_json::Value]) -> Vec<TransportEvent> {
    body.iter()
        .filter_map(|raw| match serde_json::from_value::<TransportEvent>(raw.clone()) {
            Ok(event) => Some(event),
            Err(e) => {
                debug!(error = %e, "ignoring unrecognised sidecar event");
                None
            }
        })
        .collect()
}

/// Poll the sidecar for events in a loop. Returns `Err` on non-timeout
/// network errors so the caller can reconnect with backoff.
async fn poll_events(
    poll_url: &str,
    event_tx: &mpsc::Sender<TransportEvent>,
    backoff_ms: &mut u64,
) -> Result<(), reqwest::Error> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(POLL_TIMEOUT_SECS))
        .build()?;

    loop {
        match client.get(poll_url).send().await {
            Ok(resp) if resp.status().is_success() => {
                *backoff_ms = INITIAL_BACKOFF_MS;
                match resp.json::<Vec<serde_json::Value>>().await {
                    Ok(raw) => {
                        for event in decode_events(&raw) {
                            debug!(?event, "received WhatsApp event");
                            if event_tx.send(event).await.is_err() {
                                // Receiver dropped, shut down cleanly.
                                return Ok(());
                            }
                        }
                    }
                    Err(e) => warn!(error = %e, "malformed event poll body"),
                }
            }
            Ok(resp) => {
                debug!(status = %resp.status(), "event poll returned non-200");
                tokio::time::sleep(Duration::from_secs(NON_SUCCESS_PAUSE_SECS)).await;
            }
            Err(e) if e.is_timeout() => {
                // Long-poll window expired with nothing to report.
                continue;
            }
            Err(e) => return Err(e),
        }
    }
}
