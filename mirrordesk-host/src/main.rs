//! MirrorDesk host entry point.
//!
//! ```text
//! mirrordesk-host                     Mirror every attached device
//! mirrordesk-host --mode encoded      Use the device server instead of screenshots
//! mirrordesk-host --once              Poll once, report, exit
//! mirrordesk-host --config <path>     Load a custom config TOML
//! mirrordesk-host --gen-config        Write default config to stdout
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use mirrordesk_host::adb::Adb;
use mirrordesk_host::config::{CaptureMode, HostConfig};
use mirrordesk_host::device::AdbDeviceProvider;
use mirrordesk_host::launcher::{AdbImageLoopLauncher, AdbServerLauncher, CaptureLauncher};
use mirrordesk_host::reconciler::DeviceSetReconciler;
use mirrordesk_host::supervisor::Supervisor;
use mirrordesk_host::tunnel::AdbTunnel;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "mirrordesk-host", about = "MirrorDesk multi-device screen mirror host")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "mirrordesk-host.toml")]
    config: PathBuf,

    /// Capture mode, overriding the config file.
    #[arg(short, long, value_enum)]
    mode: Option<CaptureMode>,

    /// Poll devices once, print status and exit.
    #[arg(long)]
    once: bool,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // --gen-config: dump defaults and exit.
    if cli.gen_config {
        let text = toml::to_string_pretty(&HostConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    // Load config.
    let mut config = HostConfig::load(&cli.config);
    if let Some(mode) = cli.mode {
        config.stream.mode = mode;
    }

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let adb = Adb::from_config(&config.adb.path);

    info!("mirrordesk-host v{}", env!("CARGO_PKG_VERSION"));
    info!("adb: {}", adb.path().display());
    info!("mode: {}", config.stream.mode);

    let launcher: Arc<dyn CaptureLauncher> = match config.stream.mode {
        CaptureMode::Image => Arc::new(AdbImageLoopLauncher::new(adb.clone())),
        CaptureMode::Encoded => Arc::new(AdbServerLauncher::new(
            adb.clone(),
            Arc::new(AdbTunnel::new(adb.clone())),
            config.server.clone(),
            config.server_args(),
        )),
    };
    let provider = Arc::new(AdbDeviceProvider::new(
        adb,
        Duration::from_millis(config.adb.list_timeout_ms),
    ));
    let reconciler = DeviceSetReconciler::new(launcher, config.stream.clone());
    let mut supervisor = Supervisor::new(provider, reconciler, &config);

    if cli.once {
        supervisor.run_once().await?;
        return Ok(());
    }

    // Ctrl-C handler.
    let shutdown = CancellationToken::new();
    let token = shutdown.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received, shutting down");
        token.cancel();
    });

    supervisor.run(shutdown).await;

    Ok(())
}
