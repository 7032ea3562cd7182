//! MelkoLeaf bridge: entry point.
//!
//! Presents itself on the LAN as a Nanoleaf panel, receives the color stream
//! an RGB controller sends to that panel, and forwards the color to every
//! MELK Bluetooth LE strip in range.
//!
//! # Usage
//!
//! ```text
//! melkoleaf-bridge [OPTIONS]
//!
//! Options:
//!   --config <PATH>        Config file [default: platform config dir]
//!   --bind <IP>            Address both listeners bind to
//!   --http-port <PORT>     Emulated HTTP API port [default: 16021]
//!   --stream-port <PORT>   UDP stream port [default: 60222]
//!   --mac <MAC>            Strip address; repeatable or comma-separated
//!   --scan-timeout <SECS>  Scan duration when no address is given
//!   --no-advertise         Do not publish the mDNS record
//!   --simulate             Use in-memory strips instead of Bluetooth
//!   --write-config         Save the effective configuration and exit
//! ```
//!
//! On Unix, `SIGHUP` repeats device discovery.
//!
//! # Precedence
//!
//! Config file, then `MELK_MAC_ADDRESSES`, then command-line flags (each
//! flag can also come from the `MELKOLEAF_*` variable named in `--help`).
//! `RUST_LOG` wins over the configured log level.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, reload, EnvFilter, Registry};

use melkoleaf_bridge::application::registry::LedTransport;
use melkoleaf_bridge::domain::config::{BridgeConfig, DeviceSource};
use melkoleaf_bridge::infrastructure::ble::mock::MockTransport;
use melkoleaf_bridge::infrastructure::ble::BleTransport;
use melkoleaf_bridge::infrastructure::control::BridgeController;
use melkoleaf_bridge::infrastructure::runtime::run_supervisor;
use melkoleaf_bridge::infrastructure::storage::config::config_file_path;
use melkoleaf_bridge::infrastructure::storage::{load_config, save_config, AppConfig};
use melkoleaf_core::DeviceAddress;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Nanoleaf-to-MELK LED bridge.
#[derive(Debug, Parser)]
#[command(
    name = "melkoleaf-bridge",
    about = "Drive MELK Bluetooth LED strips from a Nanoleaf-compatible RGB controller",
    version
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, env = "MELKOLEAF_CONFIG")]
    config: Option<PathBuf>,

    /// IP address both listeners bind to.
    #[arg(long, env = "MELKOLEAF_BIND")]
    bind: Option<IpAddr>,

    /// Port of the emulated HTTP API.
    #[arg(long, env = "MELKOLEAF_HTTP_PORT")]
    http_port: Option<u16>,

    /// UDP port the stream is received on.
    #[arg(long, env = "MELKOLEAF_STREAM_PORT")]
    stream_port: Option<u16>,

    /// Hardware address of a strip.  Skips scanning when given.
    #[arg(long = "mac", value_delimiter = ',')]
    macs: Vec<String>,

    /// Seconds to scan for strips when no address is configured.
    #[arg(long, env = "MELKOLEAF_SCAN_TIMEOUT")]
    scan_timeout: Option<u64>,

    /// Do not publish the mDNS advertisement.
    #[arg(long)]
    no_advertise: bool,

    /// Use in-memory strips instead of Bluetooth.
    #[arg(long, env = "MELKOLEAF_SIMULATE")]
    simulate: bool,

    /// Save the effective configuration to the config file and exit.
    #[arg(long)]
    write_config: bool,
}

impl Cli {
    /// Overrides file values with the flags that were given.
    fn apply(&self, config: &mut AppConfig) {
        if let Some(bind) = self.bind {
            config.bridge.bind_address = bind.to_string();
        }
        if let Some(port) = self.http_port {
            config.bridge.http_port = port;
        }
        if let Some(port) = self.stream_port {
            config.bridge.stream_port = port;
        }
        if !self.macs.is_empty() {
            config.apply_mac_list(&self.macs.join(","));
        }
        if let Some(secs) = self.scan_timeout {
            config.devices.scan_timeout_secs = secs;
        }
        if self.no_advertise {
            config.bridge.advertise = false;
        }
    }
}

/// Address used for the simulated strip when no address is configured.
const SIMULATED_ADDRESS: DeviceAddress = DeviceAddress::from_octets([0xBE, 0xEF, 0, 0, 0, 1]);

async fn build_transport(config: &BridgeConfig, simulate: bool) -> anyhow::Result<Arc<dyn LedTransport>> {
    if simulate {
        let addresses = match &config.devices {
            DeviceSource::Configured(addresses) => addresses.clone(),
            DeviceSource::Scan { .. } => vec![SIMULATED_ADDRESS],
        };
        info!("simulating {} strip(s)", addresses.len());
        return Ok(Arc::new(MockTransport::with_devices(&addresses)));
    }
    let transport = BleTransport::new()
        .await
        .context("Bluetooth is unavailable (use --simulate to run without it)")?;
    Ok(Arc::new(transport))
}

/// Writes `config` to `--config`, or to the default location.
fn write_config(path: Option<&Path>, config: &AppConfig) -> anyhow::Result<PathBuf> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => config_file_path().context("no config directory on this platform")?,
    };
    save_config(config, &path).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}

type LogHandle = reload::Handle<EnvFilter, Registry>;

/// Installs the subscriber before the configuration is read, at the
/// `RUST_LOG` level or `info`.
fn init_logging() -> LogHandle {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let (filter, handle) = reload::Layer::new(filter);
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();
    handle
}

/// Filter for the configured level; invalid levels fall back to `info`.
fn configured_filter(level: &str) -> EnvFilter {
    EnvFilter::try_new(level).unwrap_or_else(|e| {
        warn!("invalid log level {level:?} ({e}); using info");
        EnvFilter::new("info")
    })
}

/// Switches to the configured level unless `RUST_LOG` is set.
fn apply_log_level(handle: &LogHandle, level: &str) {
    if std::env::var_os(EnvFilter::DEFAULT_ENV).is_some() {
        return;
    }
    if let Err(e) = handle.reload(configured_filter(level)) {
        warn!("failed to apply log level {level:?}: {e}");
    }
}

#[cfg(unix)]
fn spawn_rescan_on_hangup(controller: BridgeController) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangups = match signal(SignalKind::hangup()) {
        Ok(hangups) => hangups,
        Err(e) => {
            warn!("SIGHUP rescan unavailable: {e}");
            return;
        }
    };
    tokio::spawn(async move {
        while hangups.recv().await.is_some() {
            match controller.rescan().await {
                Ok(connected) => info!("rescan finished: {connected} device(s) connected"),
                Err(e) => warn!("rescan skipped: {e}"),
            }
        }
    });
}

#[cfg(not(unix))]
fn spawn_rescan_on_hangup(_controller: BridgeController) {}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let log_handle = init_logging();

    let mut app_config = load_config(cli.config.as_deref()).context("failed to load configuration")?;
    app_config.apply_env();
    cli.apply(&mut app_config);
    apply_log_level(&log_handle, &app_config.logging.level);

    if cli.write_config {
        let path = write_config(cli.config.as_deref(), &app_config)?;
        info!("configuration written to {}", path.display());
        return Ok(());
    }

    let config = app_config
        .into_bridge_config()
        .context("invalid configuration")?;
    info!(
        "MelkoLeaf bridge starting: http={}, stream={}",
        config.http_addr(),
        config.stream_addr()
    );

    let transport = build_transport(&config, cli.simulate).await?;
    let (controller, commands) = BridgeController::new();
    spawn_rescan_on_hangup(controller.clone());

    let signal_controller = controller.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C, shutting down");
                if let Err(e) = signal_controller.shutdown() {
                    warn!("{e}");
                }
            }
            Err(e) => error!("failed to listen for Ctrl+C: {e}"),
        }
    });

    run_supervisor(Arc::new(config), transport, controller, commands).await?;

    info!("MelkoLeaf bridge stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
