//! MirrorDesk device server entry point.
//!
//! ```text
//! mirrordesk-server [--socket <name>] [--w <px>] [--h <px>]
//!                   [--bitrate <bps>] [--maxfps <fps>]
//!                   [--stall-polls <n>] [--bitrate-decay <pct>]
//!                   [--bitrate-floor <pct>] [--min-bitrate <bps>]
//!                   [--encoder mediacodec|recorder]
//!                   [--encoder-cmd <program>] [--encoder-args "<template>"]
//!                   [--log <level>]
//! ```
//!
//! Unknown flags and malformed values are ignored. Logs go to stderr.

use tracing::info;
use tracing_subscriber::EnvFilter;

use mirrordesk_server::{MirrorServer, ServerConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = ServerConfig::from_args(std::env::args().skip(1));

    // Init tracing.
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    info!("mirrordesk-server v{}", env!("CARGO_PKG_VERSION"));
    info!("socket: {}", config.socket_name);
    info!("size: {}x{}", config.width, config.height);
    info!("bitrate: {}", config.bit_rate);
    info!("max fps: {}", config.max_fps);
    info!("encoder: {:?}", config.encoder);

    let server = MirrorServer::new(config);
    let stop = server.stop_handle();

    // Ctrl-C handler.
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received, shutting down");
        stop.store(false, std::sync::atomic::Ordering::SeqCst);
    });

    server.run().await?;

    Ok(())
}
