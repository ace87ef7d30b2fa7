use std::sync::Arc;

use anyhow::Result;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ClientConfig;
use crate::connection::{ChannelHandle, ConnectionManager, ConnectionState, Dialer};
use crate::invoke::ResourceFetcher;
use crate::monitor::{spawn_monitor, MonitorHandle};
use crate::session::{Session, SessionHandle};

/// A running client: connection supervisor, session task and monitor.
pub struct ClientRuntime {
    pub session: SessionHandle,
    pub connection: watch::Receiver<ConnectionState>,
    pub channel: ChannelHandle,
    pub monitor: MonitorHandle,
    tasks: Vec<JoinHandle<()>>,
}

impl ClientRuntime {
    /// Waits for every task to stop after the shutdown token fires.
    pub async fn join(self) {
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

pub fn start<D: Dialer>(
    config: ClientConfig,
    dialer: D,
    fetcher: Arc<dyn ResourceFetcher>,
    shutdown: CancellationToken,
) -> Result<ClientRuntime> {
    let config = Arc::new(config);
    let (frames_tx, frames_rx) = mpsc::unbounded_channel();
    let manager = ConnectionManager::new(
        config.ws_url(),
        config.reconnect_delay,
        dialer,
        frames_tx,
    );
    let channel = manager.handle();
    let connection = manager.subscribe();

    let (monitor, monitor_task) = spawn_monitor(shutdown.clone());
    let (session, handle) = Session::new(config, channel.clone(), monitor.clone(), fetcher)?;

    let tasks = vec![
        tokio::spawn(manager.run(shutdown.clone())),
        tokio::spawn(session.run(frames_rx, shutdown)),
        monitor_task,
    ];
    Ok(ClientRuntime {
        session: handle,
        connection,
        channel,
        monitor,
        tasks,
    })
}
