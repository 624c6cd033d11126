//! Configuration loading and validation.
//!
//! Loads `config.toml` from `$BRIDGE_CONFIG_PATH`, an explicit `--config`
//! path, or `~/.kairo-bridge/config.toml`. Every field has a default, so a
//! missing file yields a working local setup.
//!
//! Precedence: env vars > config file > defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crate::backend::client::BackendTimeouts;
use crate::delivery::retry::RetryPolicy;
use crate::delivery::store::ClearPolicy;
use crate::delivery::DeliverySettings;

/// Env var naming an explicit config file path.
pub const CONFIG_PATH_ENV: &str = "BRIDGE_CONFIG_PATH";

/// Upper bound for HTTP and transport timeouts (10 minutes).
const MAX_TIMEOUT_MS: u64 = 600_000;
/// Upper bound for poll intervals (1 day).
const MAX_POLL_INTERVAL_MS: u64 = 86_400_000;
/// Upper bound for pauses between retry attempts (1 hour).
const MAX_RETRY_DELAY_MS: u64 = 3_600_000;
/// Upper bound for attempts per retry budget.
const MAX_ATTEMPTS: u64 = 100;
/// Upper bound for the quarantine clear interval (1 week).
const MAX_CLEAR_SECS: u64 = 604_800;
/// Upper bound for the stability restart interval (30 days).
const MAX_RESTART_SECS: u64 = 2_592_000;
/// Upper bound for the status report interval (1 day).
const MAX_STATUS_SECS: u64 = 86_400;

/// Top-level bridge configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Backend service endpoints and timeouts.
    pub backend: BackendConfig,
    /// WhatsApp sidecar settings.
    pub transport: TransportConfig,
    /// Delivery engine cadence and retry budgets.
    pub delivery: DeliveryConfig,
    /// Shutdown and stability restart.
    pub lifecycle: LifecycleConfig,
    /// Filesystem locations.
    pub paths: PathsConfig,
}

/// `[backend]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    /// Base URL of the backend (e.g. `http://127.0.0.1:8000`).
    #[serde(default = "default_backend_url")]
    pub url: String,

    /// Timeout for `GET /outgoing`, in milliseconds.
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,

    /// Timeout for `POST /incoming`, in milliseconds.
    #[serde(default = "default_incoming_timeout_ms")]
    pub incoming_timeout_ms: u64,

    /// Timeout for `POST /ack`, in milliseconds.
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: default_backend_url(),
            fetch_timeout_ms: default_fetch_timeout_ms(),
            incoming_timeout_ms: default_incoming_timeout_ms(),
            ack_timeout_ms: default_ack_timeout_ms(),
        }
    }
}

impl BackendConfig {
    /// Per-operation timeouts for the HTTP backend client.
    pub fn timeouts(&self) -> BackendTimeouts {
        BackendTimeouts {
            fetch: Duration::from_millis(self.fetch_timeout_ms),
            incoming: Duration::from_millis(self.incoming_timeout_ms),
            ack: Duration::from_millis(self.ack_timeout_ms),
        }
    }
}

/// `[transport]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct TransportConfig {
    /// Base URL of the WhatsApp sidecar.
    #[serde(default = "default_sidecar_url")]
    pub sidecar_url: String,

    /// Upper bound on a single transport send, in milliseconds.
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,

    /// Upper bound on releasing the session during shutdown, in milliseconds.
    #[serde(default = "default_release_timeout_ms")]
    pub release_timeout_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            sidecar_url: default_sidecar_url(),
            send_timeout_ms: default_send_timeout_ms(),
            release_timeout_ms: default_release_timeout_ms(),
        }
    }
}

/// `[delivery]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryConfig {
    /// Poll interval while the backend is reachable, in milliseconds.
    #[serde(default = "default_fast_interval_ms")]
    pub fast_interval_ms: u64,

    /// Poll interval while the backend is unreachable, in milliseconds.
    #[serde(default = "default_slow_interval_ms")]
    pub slow_interval_ms: u64,

    /// Deferral while the transport session is not ready, in milliseconds.
    #[serde(default = "default_not_ready_delay_ms")]
    pub not_ready_delay_ms: u64,

    /// Transport send attempts per message per cycle.
    #[serde(default = "default_send_attempts")]
    pub send_attempts: u32,

    /// Delay between failed send attempts, in milliseconds.
    #[serde(default = "default_send_retry_delay_ms")]
    pub send_retry_delay_ms: u64,

    /// Acknowledgment attempts after a successful send.
    #[serde(default = "default_ack_attempts")]
    pub ack_attempts: u32,

    /// Delay between failed acknowledgment attempts, in milliseconds.
    #[serde(default = "default_ack_retry_delay_ms")]
    pub ack_retry_delay_ms: u64,

    /// How often the dedup store releases quarantined entries, in seconds.
    #[serde(default = "default_quarantine_clear_secs")]
    pub quarantine_clear_secs: u64,

    /// Which entries the periodic clear releases.
    #[serde(default)]
    pub clear_policy: ClearPolicy,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            fast_interval_ms: default_fast_interval_ms(),
            slow_interval_ms: default_slow_interval_ms(),
            not_ready_delay_ms: default_not_ready_delay_ms(),
            send_attempts: default_send_attempts(),
            send_retry_delay_ms: default_send_retry_delay_ms(),
            ack_attempts: default_ack_attempts(),
            ack_retry_delay_ms: default_ack_retry_delay_ms(),
            quarantine_clear_secs: default_quarantine_clear_secs(),
            clear_policy: ClearPolicy::default(),
        }
    }
}

/// `[lifecycle]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct LifecycleConfig {
    /// Scheduled stability restart interval, in seconds. `0` disables it.
    #[serde(default = "default_restart_interval_secs")]
    pub restart_interval_secs: u64,

    /// How often the status report is rewritten, in seconds. `0` disables it.
    #[serde(default = "default_status_interval_secs")]
    pub status_interval_secs: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            restart_interval_secs: default_restart_interval_secs(),
            status_interval_secs: default_status_interval_secs(),
        }
    }
}

impl LifecycleConfig {
    /// The stability restart interval, if enabled.
    pub fn restart_interval(&self) -> Option<Duration> {
        (self.restart_interval_secs > 0).then(|| Duration::from_secs(self.restart_interval_secs))
    }

    /// The status report interval, if enabled.
    pub fn status_interval(&self) -> Option<Duration> {
        (self.status_interval_secs > 0).then(|| Duration::from_secs(self.status_interval_secs))
    }
}

/// `[paths]` section. Unset entries resolve under `~/.kairo-bridge/`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Directory for rotated JSON logs.
    pub logs_dir: Option<PathBuf>,
    /// Location of the periodically written status report.
    pub status_file: Option<PathBuf>,
}

// Default value functions for serde

fn default_backend_url() -> String {
    "http://127.0.0.1:8000".to_owned()
}
fn default_fetch_timeout_ms() -> u64 {
    5_000
}
fn default_incoming_timeout_ms() -> u64 {
    10_000
}
fn default_ack_timeout_ms() -> u64 {
    3_000
}
fn default_sidecar_url() -> String {
    "http://127.0.0.1:3001".to_owned()
}
fn default_send_timeout_ms() -> u64 {
    20_000
}
fn default_release_timeout_ms() -> u64 {
    5_000
}
fn default_fast_interval_ms() -> u64 {
    1_500
}
fn default_slow_interval_ms() -> u64 {
    10_000
}
fn default_not_ready_delay_ms() -> u64 {
    2_000
}
fn default_send_attempts() -> u32 {
    3
}
fn default_send_retry_delay_ms() -> u64 {
    2_000
}
fn default_ack_attempts() -> u32 {
    3
}
fn default_ack_retry_delay_ms() -> u64 {
    3_000
}
fn default_quarantine_clear_secs() -> u64 {
    3_600
}
fn default_restart_interval_secs() -> u64 {
    21_600
}
fn default_status_interval_secs() -> u64 {
    60
}

impl BridgeConfig {
    /// Load configuration with precedence: env vars > TOML file > defaults.
    ///
    /// `explicit` is the `--config` argument; `$BRIDGE_CONFIG_PATH` wins over it.
    /// A missing file yields defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed, or
    /// if the resulting configuration is invalid.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        Self::load_with(explicit, |key| std::env::var(key).ok())
    }

    /// Load using a custom env resolver (for testing).
    ///
    /// # Errors
    ///
    /// See [`BridgeConfig::load`].
    pub fn load_with(
        explicit: Option<&Path>,
        env: impl Fn(&str) -> Option<String>,
    ) -> anyhow::Result<Self> {
        let path = config_path_with(explicit, &env)?;
        let mut config = match std::fs::read_to_string(&path) {
            Ok(contents) => {
                tracing::info!(path = %path.display(), "loading config from file");
                Self::parse(&contents)
                    .with_context(|| format!("failed to parse config at {}", path.display()))?
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "no config file found, using defaults");
                Self::default()
            }
            Err(e) => {
                return Err(anyhow::anyhow!(
                    "failed to read config at {}: {e}",
                    path.display()
                ))
            }
        };
        config.apply_overrides(env);
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document without env overrides or validation.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not valid TOML for this schema.
    pub fn parse(contents: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Apply environment variable overrides.
    ///
    /// Takes a resolver function for testability (avoids `set_var` in tests).
    pub fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(v) = env("BRIDGE_BACKEND_URL") {
            self.backend.url = v;
        }
        if let Some(v) = env("BRIDGE_SIDECAR_URL") {
            self.transport.sidecar_url = v;
        }
        if let Some(v) = env("BRIDGE_LOG_DIR") {
            self.paths.logs_dir = Some(PathBuf::from(v));
        }
    }

    /// Check cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first invalid field.
    pub fn validate(&self) -> anyhow::Result<()> {
        url::Url::parse(&self.backend.url)
            .with_context(|| format!("invalid backend.url '{}'", self.backend.url))?;
        url::Url::parse(&self.transport.sidecar_url).with_context(|| {
            format!("invalid transport.sidecar_url '{}'", self.transport.sidecar_url)
        })?;

        let b = &self.backend;
        check_range("backend.fetch_timeout_ms", b.fetch_timeout_ms, 1, MAX_TIMEOUT_MS)?;
        check_range("backend.incoming_timeout_ms", b.incoming_timeout_ms, 1, MAX_TIMEOUT_MS)?;
        check_range("backend.ack_timeout_ms", b.ack_timeout_ms, 1, MAX_TIMEOUT_MS)?;

        let t = &self.transport;
        check_range("transport.send_timeout_ms", t.send_timeout_ms, 1, MAX_TIMEOUT_MS)?;
        check_range("transport.release_timeout_ms", t.release_timeout_ms, 1, MAX_TIMEOUT_MS)?;

        let d = &self.delivery;
        check_range("delivery.fast_interval_ms", d.fast_interval_ms, 1, MAX_POLL_INTERVAL_MS)?;
        check_range("delivery.slow_interval_ms", d.slow_interval_ms, 1, MAX_POLL_INTERVAL_MS)?;
        check_range("delivery.not_ready_delay_ms", d.not_ready_delay_ms, 1, MAX_POLL_INTERVAL_MS)?;
        check_range("delivery.send_attempts", u64::from(d.send_attempts), 1, MAX_ATTEMPTS)?;
        check_range("delivery.ack_attempts", u64::from(d.ack_attempts), 1, MAX_ATTEMPTS)?;
        check_range("delivery.send_retry_delay_ms", d.send_retry_delay_ms, 0, MAX_RETRY_DELAY_MS)?;
        check_range("delivery.ack_retry_delay_ms", d.ack_retry_delay_ms, 0, MAX_RETRY_DELAY_MS)?;
        check_range("delivery.quarantine_clear_secs", d.quarantine_clear_secs, 1, MAX_CLEAR_SECS)?;

        let l = &self.lifecycle;
        check_range("lifecycle.restart_interval_secs", l.restart_interval_secs, 0, MAX_RESTART_SECS)?;
        check_range("lifecycle.status_interval_secs", l.status_interval_secs, 0, MAX_STATUS_SECS)?;
        Ok(())
    }

    /// Engine settings derived from the `[delivery]` and `[transport]` sections.
    pub fn delivery_settings(&self) -> DeliverySettings {
        let d = &self.delivery;
        DeliverySettings {
            fast_interval: Duration::from_millis(d.fast_interval_ms),
            slow_interval: Duration::from_millis(d.slow_interval_ms),
            not_ready_delay: Duration::from_millis(d.not_ready_delay_ms),
            send_retry: RetryPolicy::new(d.send_attempts, Duration::from_millis(d.send_retry_delay_ms)),
            ack_retry: RetryPolicy::new(d.ack_attempts, Duration::from_millis(d.ack_retry_delay_ms)),
            send_timeout: Duration::from_millis(self.transport.send_timeout_ms),
            quarantine_clear_interval: Duration::from_secs(d.quarantine_clear_secs),
            clear_policy: d.clear_policy,
        }
    }

    /// Resolved logs directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the home directory cannot be determined.
    pub fn logs_dir(&self) -> anyhow::Result<PathBuf> {
        match &self.paths.logs_dir {
            Some(p) => Ok(p.clone()),
            None => Ok(config_dir()?.join("logs")),
        }
    }

    /// Resolved status report path.
    ///
    /// # Errors
    ///
    /// Returns an error if the home directory cannot be determined.
    pub fn status_file(&self) -> anyhow::Result<PathBuf> {
        match &self.paths.status_file {
            Some(p) => Ok(p.clone()),
            None => Ok(config_dir()?.join("status.json")),
        }
    }
}

/// Resolve which config file to read.
///
/// `$BRIDGE_CONFIG_PATH` wins over `explicit`, which wins over
/// `~/.kairo-bridge/config.toml`.
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn config_path(explicit: Option<&Path>) -> anyhow::Result<PathBuf> {
    config_path_with(explicit, |key| std::env::var(key).ok())
}

/// [`config_path`] with a custom env resolver (for testing).
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn config_path_with(
    explicit: Option<&Path>,
    env: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<PathBuf> {
    match env(CONFIG_PATH_ENV) {
        Some(p) => Ok(PathBuf::from(p)),
        None => match explicit {
            Some(p) => Ok(p.to_owned()),
            None => Ok(config_dir()?.join("config.toml")),
        },
    }
}

fn check_range(name: &str, value: u64, min: u64, max: u64) -> anyhow::Result<()> {
    if value < min || value > max {
        anyhow::bail!("{name} must be between {min} and {max}, got {value}");
    }
    Ok(())
}

/// Resolve the default config directory (`~/.kairo-bridge/`).
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn config_dir() -> anyhow::Result<PathBuf> {
    let home = directories::BaseDirs::new()
        .ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
    Ok(home.home_dir().join(".kairo-bridge"))
}
