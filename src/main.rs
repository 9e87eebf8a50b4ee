//! # SN Bridge
//!
//! Forward SN protocol frames between a serial device and a UDP endpoint.
//!
//! Usage: `sn-bridge [CONFIG]` (defaults to `config/default.toml`).

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use sn_bridge::config::{Config, LoggingConfig};
use sn_bridge::serial::writer::SerialWriter;
use sn_bridge::serial::{open_port, ChannelInbound, LogRawSink, SerialBridge};
use sn_bridge::sn::framer::SnFramer;
use sn_bridge::udp::UdpTransport;

/// Config file used when none is given on the command line
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Main entry point for SN Bridge
///
/// 1. Load configuration (defaults if the default file is missing)
/// 2. Connect the UDP transport; a failure only schedules a reconnect
/// 3. Open the serial port and run the bridge until Ctrl+C or port EOF
/// 4. Close the transport
#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args().nth(1);
    let config = load_config(config_path.as_deref())?;

    let _log_guard = init_logging(&config.logging)?;

    info!("SN Bridge v{} starting...", env!("CARGO_PKG_VERSION"));

    let (inbound_tx, inbound_rx) = mpsc::channel(config.serial.write_queue_size);
    let inbound = Arc::new(ChannelInbound::new(inbound_tx));
    let transport = UdpTransport::new(config.udp.clone(), inbound.clone())?;
    if let Err(e) = transport.connect().await {
        warn!("UDP endpoint unavailable at startup: {}", e);
    }

    let port = open_port(&config.serial.port, config.serial.baud_rate)?;
    let (reader, writer) = tokio::io::split(port);

    let framer = SnFramer::new(&config.framer, transport.clone(), LogRawSink::default());
    let mut bridge = SerialBridge::new(framer, SerialWriter::new(writer), config.serial.read_buffer_size);

    info!("Bridging {} <-> {}", config.serial.port, transport.endpoint());
    info!("Press Ctrl+C to exit");

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Unable to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl+C, shutting down...");
    };

    let result = bridge.run(reader, inbound_rx, shutdown).await;

    transport.disconnect();

    let framer_stats = bridge.framer().stats();
    let transport_stats = transport.stats();
    info!(
        "Frames: {}, CRC errors: {}, timeouts: {}, sent: {}, received: {}, dropped: {}",
        framer_stats.frame_count,
        framer_stats.crc_error_count,
        framer_stats.timeout_count,
        transport_stats.frames_sent,
        transport_stats.datagrams_received,
        inbound.dropped()
    );

    result.context("serial bridge failed")
}

/// Load the given config file, or the default one if it exists
fn load_config(path: Option<&str>) -> Result<Config> {
    match path {
        Some(path) => Config::load(path).with_context(|| format!("loading {}", path)),
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
            Config::load(DEFAULT_CONFIG_PATH).with_context(|| format!("loading {}", DEFAULT_CONFIG_PATH))
        }
        None => Ok(Config::default()),
    }
}

/// Set up tracing to stdout or a daily-rolled file
///
/// `RUST_LOG` overrides the configured level.
fn init_logging(config: &LoggingConfig) -> Result<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let (writer, guard) = match &config.file {
        Some(file) => {
            let path = Path::new(file);
            let dir = path.parent().filter(|d| !d.as_os_str().is_empty()).unwrap_or(Path::new("."));
            let name = path.file_name().context("log file path has no file name")?;
            tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, name))
        }
        None => tracing_appender::non_blocking(std::io::stdout()),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(config.file.is_none())
        .init();

    Ok(guard)
}
