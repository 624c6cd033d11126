//! Status report written to `status.json` on a fixed interval.
//!
//! Lets an external supervisor see whether the bridge is paired, whether
//! the backend is answering, and how much is sitting in quarantine.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::delivery::{deadline_after, EngineSnapshot};

/// Status report written each interval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    /// Overall status: "running", "degraded", or "pairing".
    pub status: String,
    /// Seconds since process start.
    pub uptime_secs: u64,
    /// ISO 8601 timestamp of this report.
    pub generated_at: String,
    /// Whether the last backend fetch succeeded.
    pub backend_connected: bool,
    /// Whether the WhatsApp session is ready.
    pub session_ready: bool,
    /// Messages suppressed as delivered this process.
    pub delivered: usize,
    /// Messages held in quarantine.
    pub quarantined: usize,
    /// ISO 8601 timestamp of the last completed poll cycle.
    pub last_cycle: Option<String>,
}

/// Build a report from the engine snapshot and session state.
pub fn build_report(
    snapshot: &EngineSnapshot,
    session_ready: bool,
    start_time: Instant,
) -> StatusReport {
    let status = if !session_ready {
        "pairing"
    } else if snapshot.backend_connected {
        "running"
    } else {
        "degraded"
    };
    StatusReport {
        status: status.to_owned(),
        uptime_secs: start_time.elapsed().as_secs(),
        generated_at: chrono::Utc::now().to_rfc3339(),
        backend_connected: snapshot.backend_connected,
        session_ready,
        delivered: snapshot.delivered,
        quarantined: snapshot.quarantined,
        last_cycle: snapshot.last_cycle.map(|t| t.to_rfc3339()),
    }
}

/// Write the report to disk atomically.
///
/// Writes to a temporary file first, then renames to the final path.
///
/// # Errors
///
/// Returns an error if serialization or file operations fail.
pub async fn write_report(report: &StatusReport, path: &Path) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(report).context("failed to serialize status report")?;

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .context("failed to write status temp file")?;

    tokio::fs::rename(&tmp_path, path)
        .await
        .context("failed to rename status temp file")?;

    debug!(path = %path.display(), "status report updated");
    Ok(())
}

/// Rewrite the status report every `interval` until shutdown.
pub async fn run_reporter(
    path: PathBuf,
    interval: Duration,
    snapshots: watch::Receiver<EngineSnapshot>,
    session_ready: watch::Receiver<bool>,
    mut shutdown: watch::Receiver<bool>,
    start_time: Instant,
) {
    info!(path = %path.display(), interval_secs = interval.as_secs(), "status reporter started");
    let mut next_write = tokio::time::Instant::now();

    loop {
        tokio::select! {
            biased;
            result = shutdown.changed() => {
                if result.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            () = tokio::time::sleep_until(next_write) => {
                let snapshot = snapshots.borrow().clone();
                let ready = *session_ready.borrow();
                let report = build_report(&snapshot, ready, start_time);
                if let Err(e) = write_report(&report, &path).await {
                    warn!(error = %e, "failed to write status report");
                }
                next_write = deadline_after(interval);
            }
        }
    }

    info!("status reporter stopped");
}
