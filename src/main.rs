//! Kairo bridge CLI entry point.
//!
//! Provides `start` to run the bridge and `check` to test the backend and
//! the WhatsApp sidecar once.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::{info, warn};

use kairo_bridge::backend::{Backend, HttpBackend};
use kairo_bridge::config::{self, BridgeConfig};
use kairo_bridge::delivery::DeliveryEngine;
use kairo_bridge::lifecycle::Lifecycle;
use kairo_bridge::relay::IncomingRelay;
use kairo_bridge::transport::{spawn_event_listener, SidecarTransport, Transport, TransportEvent};
use kairo_bridge::{logging, report};

/// Buffer size of the sidecar event channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Kairo bridge: relays WhatsApp conversations to the Kairo backend.
#[derive(Parser)]
#[command(name = "kairo-bridge", version, about)]
struct Cli {
    /// Path to `config.toml` (overridden by `$BRIDGE_CONFIG_PATH`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Run the bridge until a signal, fault, or scheduled restart.
    Start,
    /// Query the backend and the sidecar once and exit.
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    match cli.command {
        Command::Start => handle_start(cli.config.as_deref()).await,
        Command::Check => handle_check(cli.config.as_deref()).await,
    }
}

/// Run the bridge.
async fn handle_start(config_path: Option<&Path>) -> anyhow::Result<ExitCode> {
    let start_time = Instant::now();
    let config = BridgeConfig::load(config_path).context("failed to load configuration")?;
    let _logging_guard = logging::init_production(&config.logs_dir()?)?;

    let config_file = config::config_path(config_path)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_file.display(),
        config_found = config_file.exists(),
        backend = %config.backend.url,
        sidecar = %config.transport.sidecar_url,
        "kairo bridge starting"
    );

    let backend: Arc<dyn Backend> = Arc::new(HttpBackend::from_config(&config.backend));
    let sidecar = Arc::new(SidecarTransport::new(&config.transport.sidecar_url));
    let transport: Arc<dyn Transport> = sidecar.clone();

    let lifecycle = Lifecycle::new();
    let relay = IncomingRelay::new(Arc::clone(&backend));

    let (event_tx, mut event_rx) = mpsc::channel::<TransportEvent>(EVENT_CHANNEL_CAPACITY);
    let listener = spawn_event_listener(config.transport.sidecar_url.clone(), event_tx);

    // The sidecar may have paired before we started listening.
    match sidecar.status().await {
        Ok(status) if status.connected => {
            lifecycle.handle_event(TransportEvent::Ready, &relay);
        }
        Ok(_) => info!("waiting for WhatsApp session to become ready"),
        Err(e) => warn!(error = %e, "sidecar status request failed, waiting for events"),
    }

    let engine = DeliveryEngine::new(
        backend,
        Arc::clone(&transport),
        lifecycle.session_ready(),
        config.delivery_settings(),
    );
    let snapshots = engine.subscribe();
    let mut engine_task = tokio::spawn(engine.run(lifecycle.shutdown_signal()));

    if let Some(interval) = config.lifecycle.status_interval() {
        tokio::spawn(report::run_reporter(
            config.status_file()?,
            interval,
            snapshots,
            lifecycle.session_ready(),
            lifecycle.shutdown_signal(),
            start_time,
        ));
    }

    let cause = lifecycle
        .supervise(
            &mut event_rx,
            &relay,
            config.lifecycle.restart_interval(),
            &mut engine_task,
        )
        .await;

    listener.abort();
    let release_timeout = Duration::from_millis(config.transport.release_timeout_ms);
    lifecycle
        .release_transport(transport.as_ref(), release_timeout)
        .await;
    engine_task.abort();

    let exit_code = cause.exit_code();
    info!(%cause, exit_code, "kairo bridge stopped");
    Ok(ExitCode::from(exit_code))
}

/// Query the backend and the sidecar once.
async fn handle_check(config_path: Option<&Path>) -> anyhow::Result<ExitCode> {
    logging::init_cli();
    let config = BridgeConfig::load(config_path).context("failed to load configuration")?;

    let backend = HttpBackend::from_config(&config.backend);
    let backend_ok = match backend.fetch_outgoing().await {
        Ok(batch) => {
            println!("backend   {}  ok ({} pending)", backend.base_url(), batch.len());
            true
        }
        Err(e) => {
            println!("backend   {}  unreachable: {e}", backend.base_url());
            false
        }
    };

    let sidecar = SidecarTransport::new(&config.transport.sidecar_url);
    match sidecar.status().await {
        Ok(status) if status.connected => println!(
            "sidecar   {}  connected ({})",
            sidecar.base_url(),
            status.phone_number.as_deref().unwrap_or("unknown number")
        ),
        Ok(_) => println!("sidecar   {}  running, not paired", sidecar.base_url()),
        Err(e) => println!("sidecar   {}  unreachable: {e}", sidecar.base_url()),
    }

    Ok(if backend_ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
