use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use ticker_client::config::{ClientConfig, DEFAULT_HTTP_PORT, DEFAULT_WS_PORT};
use ticker_client::fsm::FsmClient;
use ticker_client::invoke::HttpFetcher;
use ticker_client::monitor::{MonitorHandle, VISIBLE_LINES};
use ticker_client::{SessionView, WsDialer};
use ticker_proto::fsm::format_size;
use tokio::signal;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(
    name = "ticker-client",
    author,
    version,
    about = "Headless client for the ticker web UI"
)]
struct Cli {
    /// Device host name or address.
    #[arg(long, env = "TICKER_HOST", default_value = "127.0.0.1")]
    host: String,

    #[arg(long, env = "TICKER_WS_PORT", default_value_t = DEFAULT_WS_PORT)]
    ws_port: u16,

    #[arg(long, env = "TICKER_HTTP_PORT", default_value_t = DEFAULT_HTTP_PORT)]
    http_port: u16,

    /// Where downloaded files are written.
    #[arg(long, env = "TICKER_DOWNLOAD_DIR", default_value = ".")]
    download_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Keep a live session with the device and log what changes.
    Connect,
    /// Work with the device file system.
    Fsm {
        #[command(subcommand)]
        operation: FsmCommand,
    },
}

#[derive(Debug, Subcommand)]
enum FsmCommand {
    /// List a folder.
    Ls {
        #[arg(default_value = "/")]
        folder: String,
    },
    /// Download a file.
    Get { path: String },
    /// Upload a local file into a folder.
    Put {
        file: PathBuf,
        #[arg(default_value = "/")]
        folder: String,
    },
    /// Delete a file.
    Rm { path: String },
    /// Create a folder.
    Mkdir { path: String },
    /// Delete an empty folder.
    Rmdir { path: String },
}

impl TryFrom<&Cli> for ClientConfig {
    type Error = anyhow::Error;

    fn try_from(cli: &Cli) -> Result<Self, Self::Error> {
        if cli.host.trim().is_empty() {
            bail!("device host must not be empty");
        }
        let mut config = ClientConfig::from_env();
        config.host = cli.host.trim().to_string();
        config.ws_port = cli.ws_port;
        config.http_port = cli.http_port;
        config.download_dir = cli.download_dir.clone();
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing()?;

    let cli = Cli::parse();
    let config = ClientConfig::try_from(&cli)?;

    match cli.command {
        Command::Connect => connect(config).await,
        Command::Fsm { operation } => run_fsm(config, operation).await,
    }
}

fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init()
        .context("failed to initialise tracing subscriber")
}

async fn connect(config: ClientConfig) -> Result<()> {
    info!(ws = %config.ws_url(), http = %config.http_base(), "starting ticker client");
    let fetcher = Arc::new(HttpFetcher::new(&config.http_base())?);
    let shutdown = CancellationToken::new();
    let runtime = ticker_client::start(config, WsDialer, fetcher, shutdown.clone())?;

    let logger = tokio::spawn(log_changes(
        runtime.session.subscribe(),
        runtime.monitor.clone(),
        shutdown.clone(),
    ));

    let _ = signal::ctrl_c().await;
    info!("shutdown signal received");
    shutdown.cancel();
    runtime.join().await;
    let _ = logger.await;
    Ok(())
}

async fn log_changes(
    mut view: watch::Receiver<SessionView>,
    monitor: MonitorHandle,
    shutdown: CancellationToken,
) {
    let mut lines = monitor.subscribe();
    let mut last = view.borrow().clone();
    let mut last_bottom = String::new();
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            changed = view.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = view.borrow_and_update().clone();
                report(&last, &current);
                last = current;
            }
            changed = lines.changed() => {
                if changed.is_err() {
                    break;
                }
                let surface = lines.borrow_and_update().clone();
                let bottom = surface.last().cloned().unwrap_or_default();
                let scrolled = surface.len() == VISIBLE_LINES
                    && surface[VISIBLE_LINES - 2] == last_bottom
                    && bottom.chars().count() <= 1;
                if scrolled && !last_bottom.is_empty() {
                    info!(line = %last_bottom, "monitor");
                }
                if !monitor.is_displaying() && !bottom.is_empty() && bottom != last_bottom {
                    info!(line = %bottom, "monitor");
                }
                last_bottom = bottom;
            }
        }
    }
}

fn report(before: &SessionView, after: &SessionView) {
    if before.ui.title() != after.ui.title() {
        info!(title = %after.ui.title(), "page");
    }
    if before.ui.menus() != after.ui.menus() {
        let menus: Vec<&str> = after.ui.menus().iter().map(|menu| menu.name.as_str()).collect();
        info!(menus = ?menus, "menus");
    }
    if before.status != after.status && !after.status.is_empty() {
        info!(status = %after.status, class = ?after.status_class, "message");
    }
    let popup_id = |view: &SessionView| view.popup.as_ref().map(|popup| popup.id.clone());
    if popup_id(before) != popup_id(after) {
        match &after.popup {
            Some(popup) => info!(popup = %popup.id, "popup shown"),
            None => info!("popup closed"),
        }
    }
    for alert in after.alerts.iter().skip(before.alerts.len()) {
        error!(alert = %alert, "alert");
    }
    if before.ui.location() != after.ui.location() {
        if let Some(url) = after.ui.location() {
            info!(url = %url, "redirect");
        }
    }
    if before.files != after.files {
        if let Some(files) = &after.files {
            info!(folder = %after.current_folder, entries = files.files.len(), "file list");
        }
    }
}

/// Splits `/a/b/name` into (`/a/b/`, `name`).
fn split_remote(path: &str) -> Result<(String, String)> {
    let trimmed = path.trim_end_matches('/');
    let (folder, name) = trimmed.rsplit_once('/').unwrap_or(("", trimmed));
    if name.is_empty() {
        bail!("`{path}` does not name a file or folder");
    }
    Ok((format!("{folder}/"), name.to_string()))
}

async fn run_fsm(config: ClientConfig, operation: FsmCommand) -> Result<()> {
    let fsm = FsmClient::new(&config.http_base())?;
    match operation {
        FsmCommand::Ls { folder } => {
            fsm.set_current_folder(&folder);
            let list = fsm.refresh().await?;
            for entry in &list.files {
                if entry.is_dir {
                    println!("{:>12}  {}/", format!("{} File(s)", entry.size), entry.name);
                } else {
                    println!("{:>12}  {}", format_size(entry.size), entry.name);
                }
            }
            println!(
                "FileSystem uses {} of {} ({} available)",
                format_size(list.used_space),
                format_size(list.total_space),
                format_size(list.free_space())
            );
        }
        FsmCommand::Get { path } => {
            let (folder, name) = split_remote(&path)?;
            fsm.set_current_folder(&folder);
            let local = fsm.download(&name, &config.download_dir).await?;
            info!(file = %local.display(), "downloaded");
        }
        FsmCommand::Put { file, folder } => {
            fsm.set_current_folder(&folder);
            let remote = fsm
                .upload(&file)
                .await
                .with_context(|| format!("upload of {} failed", file.display()))?;
            info!(file = %remote, "uploaded");
        }
        FsmCommand::Rm { path } => {
            let (folder, name) = split_remote(&path)?;
            fsm.set_current_folder(&folder);
            let removed = fsm.delete_file(&name).await.context("delete failed")?;
            info!(file = %removed, "deleted");
        }
        FsmCommand::Mkdir { path } => {
            let (folder, name) = split_remote(&path)?;
            fsm.set_current_folder(&folder);
            let created = fsm.create_folder(&name).await.context("create folder failed")?;
            info!(folder = %created, "created");
        }
        FsmCommand::Rmdir { path } => {
            let (folder, name) = split_remote(&path)?;
            fsm.set_current_folder(&folder);
            let removed = fsm.delete_folder(&name).await.context("delete folder failed")?;
            info!(folder = %removed, "deleted");
        }
    }
    Ok(())
}
