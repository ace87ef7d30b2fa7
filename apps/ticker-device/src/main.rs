use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use ticker_device::config::{
    DeviceConfig, DEFAULT_ACK_TIMEOUT_SECS, DEFAULT_FS_CAPACITY, DEFAULT_HTTP_ADDR,
    DEFAULT_ROTATION_SECS, DEFAULT_WS_ADDR,
};
use ticker_device::{Device, Telemetry};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Debug, Parser)]
#[command(
    name = "ticker-device",
    author,
    version,
    about = "Ticker device endpoint: web UI sync, settings and file manager"
)]
struct Cli {
    /// Address for the file manager and static assets.
    #[arg(long, env = "TICKER_DEVICE_HTTP_ADDR", default_value = DEFAULT_HTTP_ADDR)]
    http_addr: String,

    /// Address browsers open their WebSocket on.
    #[arg(long, env = "TICKER_DEVICE_WS_ADDR", default_value = DEFAULT_WS_ADDR)]
    ws_addr: String,

    /// Root of the device file system.
    #[arg(long, env = "TICKER_DEVICE_DATA_DIR", default_value = "data")]
    data_dir: PathBuf,

    /// Seconds between two monitor messages.
    #[arg(long, env = "TICKER_DEVICE_ROTATION_SECS", default_value_t = DEFAULT_ROTATION_SECS)]
    rotation_secs: u64,

    /// Seconds a pushed function call may stay unanswered.
    #[arg(long, env = "TICKER_DEVICE_ACK_TIMEOUT_SECS", default_value_t = DEFAULT_ACK_TIMEOUT_SECS)]
    ack_timeout_secs: u64,

    /// File system size reported in listings, in bytes.
    #[arg(long, env = "TICKER_DEVICE_FS_CAPACITY", default_value_t = DEFAULT_FS_CAPACITY)]
    fs_capacity: u64,
}

impl TryFrom<Cli> for DeviceConfig {
    type Error = anyhow::Error;

    fn try_from(cli: Cli) -> Result<Self, Self::Error> {
        let http_addr: SocketAddr = cli
            .http_addr
            .parse()
            .with_context(|| format!("invalid http address: {}", cli.http_addr))?;
        let ws_addr: SocketAddr = cli
            .ws_addr
            .parse()
            .with_context(|| format!("invalid websocket address: {}", cli.ws_addr))?;
        if cli.rotation_secs == 0 {
            anyhow::bail!("rotation interval must be at least one second");
        }

        Ok(DeviceConfig {
            http_addr,
            ws_addr,
            data_dir: cli.data_dir,
            rotation_interval: Duration::from_secs(cli.rotation_secs),
            ack_timeout: Duration::from_secs(cli.ack_timeout_secs),
            fs_capacity: cli.fs_capacity,
            ..DeviceConfig::default()
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let telemetry = Telemetry::init()?;
    let cli = Cli::parse();
    let config = DeviceConfig::try_from(cli)?;

    info!(
        http_addr = %config.http_addr,
        ws_addr = %config.ws_addr,
        data_dir = %config.data_dir.display(),
        "starting ticker device"
    );

    let device = Device::open(config.clone()).await?;
    let listeners = ticker_device::bind(&config).await?;

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        let _ = signal::ctrl_c().await;
        info!("shutdown signal received");
        on_signal.cancel();
    });

    ticker_device::serve(device, telemetry.metrics_handle(), listeners, shutdown).await?;
    info!("ticker device stopped");
    Ok(())
}
