//! Channel lifecycle: dial the device, announce the page, pump inbound frames
//! and redial a fixed delay after every close.
//!
//! Exactly one link is live at a time. Each successful dial installs a fresh
//! sender into the shared [`ChannelHandle`] under a new generation, so a
//! sender captured before a reconnect can never write into the new link.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use thiserror::Error;
use ticker_proto::{ClientFrame, FrameError};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel is not open")]
    NotOpen,
    #[error("failed to encode frame: {0}")]
    Encode(#[from] FrameError),
}

/// Both halves of one live link, as produced by a [`Dialer`]. The link is
/// over once `inbound` yields `None`.
pub struct Link {
    pub outbound: mpsc::UnboundedSender<String>,
    pub inbound: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
pub trait Dialer: Send + Sync + 'static {
    async fn dial(&self, url: &str) -> Result<Link>;
}

/// WebSocket dialer used against a real device.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsDialer;

#[async_trait]
impl Dialer for WsDialer {
    async fn dial(&self, url: &str) -> Result<Link> {
        let (ws_stream, _) = connect_async(url).await?;
        let (tx_out, rx_out) = mpsc::unbounded_channel::<String>();
        let (tx_in, rx_in) = mpsc::unbounded_channel::<String>();
        tokio::spawn(pump_websocket(ws_stream, rx_out, tx_in));
        Ok(Link {
            outbound: tx_out,
            inbound: rx_in,
        })
    }
}

async fn pump_websocket(
    ws_stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    mut rx_out: mpsc::UnboundedReceiver<String>,
    tx_in: mpsc::UnboundedSender<String>,
) {
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let send_task = tokio::spawn(async move {
        while let Some(text) = rx_out.recv().await {
            if ws_sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    while let Some(msg) = ws_receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                if tx_in.send(text).is_err() {
                    break;
                }
            }
            Ok(Message::Binary(data)) => match String::from_utf8(data) {
                Ok(text) => {
                    if tx_in.send(text).is_err() {
                        break;
                    }
                }
                Err(err) => warn!(error = %err, "dropping non-utf8 binary frame"),
            },
            Ok(Message::Close(_)) => break,
            Err(err) => {
                debug!(error = %err, "websocket receive failed");
                break;
            }
            _ => {}
        }
    }

    send_task.abort();
    let _ = send_task.await;
}

struct ActiveLink {
    generation: u64,
    sender: mpsc::UnboundedSender<String>,
}

/// Shared handle to whichever link is currently live.
#[derive(Clone, Default)]
pub struct ChannelHandle {
    inner: Arc<RwLock<Option<ActiveLink>>>,
}

impl ChannelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn send(&self, frame: &ClientFrame) -> Result<(), ChannelError> {
        let raw = frame.encode()?;
        self.send_raw(raw)
    }

    pub fn send_raw(&self, raw: String) -> Result<(), ChannelError> {
        let guard = self.inner.read();
        let link = guard.as_ref().ok_or(ChannelError::NotOpen)?;
        link.sender.send(raw).map_err(|_| ChannelError::NotOpen)
    }

    pub fn is_open(&self) -> bool {
        self.inner
            .read()
            .as_ref()
            .is_some_and(|link| !link.sender.is_closed())
    }

    pub fn generation(&self) -> Option<u64> {
        self.inner.read().as_ref().map(|link| link.generation)
    }

    fn install(&self, generation: u64, sender: mpsc::UnboundedSender<String>) {
        *self.inner.write() = Some(ActiveLink { generation, sender });
    }

    fn retire(&self, generation: u64) {
        let mut guard = self.inner.write();
        if guard.as_ref().map(|link| link.generation) == Some(generation) {
            *guard = None;
        }
    }

    /// A handle already holding a link whose outbound half the caller reads.
    #[cfg(test)]
    pub(crate) fn attached() -> (Self, mpsc::UnboundedReceiver<String>) {
        let handle = Self::new();
        let (tx, rx) = mpsc::unbounded_channel();
        handle.install(1, tx);
        (handle, rx)
    }
}

pub struct ConnectionManager<D: Dialer> {
    url: String,
    reconnect_delay: Duration,
    dialer: Arc<D>,
    handle: ChannelHandle,
    frames: mpsc::UnboundedSender<String>,
    state: watch::Sender<ConnectionState>,
}

impl<D: Dialer> ConnectionManager<D> {
    /// `frames` receives every inbound frame, in arrival order, across all
    /// generations of the link.
    pub fn new(
        url: impl Into<String>,
        reconnect_delay: Duration,
        dialer: D,
        frames: mpsc::UnboundedSender<String>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Closed);
        Self {
            url: url.into(),
            reconnect_delay,
            dialer: Arc::new(dialer),
            handle: ChannelHandle::new(),
            frames,
            state,
        }
    }

    pub fn handle(&self) -> ChannelHandle {
        self.handle.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Dials, serves and redials until `shutdown` fires. There is no retry
    /// cap and no backoff growth.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut generation = 0u64;
        loop {
            self.state.send_replace(ConnectionState::Connecting);
            debug!(url = %self.url, "connecting");

            let dialed = tokio::select! {
                _ = shutdown.cancelled() => break,
                result = self.dialer.dial(&self.url) => result,
            };

            match dialed {
                Ok(link) => {
                    generation += 1;
                    if !self.serve(generation, link, &shutdown).await {
                        break;
                    }
                }
                Err(err) => warn!(url = %self.url, error = %err, "connect failed"),
            }

            self.state.send_replace(ConnectionState::Closed);
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.reconnect_delay) => {}
            }
        }
        self.state.send_replace(ConnectionState::Closed);
        info!("connection manager stopped");
    }

    /// Returns `false` when the manager should stop instead of redialing.
    async fn serve(&self, generation: u64, mut link: Link, shutdown: &CancellationToken) -> bool {
        self.handle.install(generation, link.outbound.clone());
        self.state.send_replace(ConnectionState::Open);
        info!(url = %self.url, generation, "channel open");

        if let Err(err) = self.handle.send(&ClientFrame::PageLoaded) {
            warn!(generation, error = %err, "failed to send pageLoaded");
        }

        let keep_running = loop {
            tokio::select! {
                _ = shutdown.cancelled() => break false,
                frame = link.inbound.recv() => match frame {
                    Some(raw) => {
                        if self.frames.send(raw).is_err() {
                            debug!("frame consumer gone; stopping");
                            break false;
                        }
                    }
                    None => break true,
                },
            }
        };

        self.handle.retire(generation);
        info!(url = %self.url, generation, "channel closed");
        keep_running
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use tokio::time::Instant;

    /// Test-side view of one dial attempt.
    pub struct DialAttempt {
        pub at: Instant,
        /// Dropping this closes the link from the device side.
        pub to_client: Option<mpsc::UnboundedSender<String>>,
        pub from_client: Option<mpsc::UnboundedReceiver<String>>,
    }

    /// Dialer that hands every attempt to the test. When `refuse` is set the
    /// attempt is recorded and then fails.
    pub struct ScriptedDialer {
        pub attempts: mpsc::UnboundedSender<DialAttempt>,
        pub refuse: bool,
    }

    #[async_trait]
    impl Dialer for ScriptedDialer {
        async fn dial(&self, _url: &str) -> Result<Link> {
            let at = Instant::now();
            if self.refuse {
                let _ = self.attempts.send(DialAttempt {
                    at,
                    to_client: None,
                    from_client: None,
                });
                anyhow::bail!("connection refused");
            }
            let (tx_out, rx_out) = mpsc::unbounded_channel();
            let (tx_in, rx_in) = mpsc::unbounded_channel();
            let _ = self.attempts.send(DialAttempt {
                at,
                to_client: Some(tx_in),
                from_client: Some(rx_out),
            });
            Ok(Link {
                outbound: tx_out,
                inbound: rx_in,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use tokio::time::Instant;

    fn manager(
        refuse: bool,
    ) -> (
        ConnectionManager<ScriptedDialer>,
        mpsc::UnboundedReceiver<DialAttempt>,
        mpsc::UnboundedReceiver<String>,
    ) {
        let (attempts_tx, attempts_rx) = mpsc::unbounded_channel();
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let manager = ConnectionManager::new(
            "ws://device:81/",
            Duration::from_secs(1),
            ScriptedDialer {
                attempts: attempts_tx,
                refuse,
            },
            frames_tx,
        );
        (manager, attempts_rx, frames_rx)
    }

    #[tokio::test(start_paused = true)]
    async fn reconnects_exactly_one_second_after_each_close() {
        let (manager, mut attempts, _frames) = manager(false);
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(manager.run(shutdown.clone()));

        // Links stay up for 0s, 0.1s and 5s before the device drops them.
        let lifetimes = [
            Duration::ZERO,
            Duration::from_millis(100),
            Duration::from_secs(5),
        ];
        let mut closed_at = None;
        for lifetime in lifetimes {
            let mut attempt = attempts.recv().await.expect("dial attempt");
            if let Some(closed) = closed_at {
                assert_eq!(attempt.at - closed, Duration::from_secs(1));
            }
            tokio::time::sleep(lifetime).await;
            attempt.to_client.take();
            closed_at = Some(Instant::now());
        }
        let last = attempts.recv().await.expect("fourth dial");
        assert_eq!(last.at - closed_at.expect("closed"), Duration::from_secs(1));

        shutdown.cancel();
        task.await.expect("manager task");
    }

    #[tokio::test(start_paused = true)]
    async fn failed_dials_retry_without_backoff() {
        let (manager, mut attempts, _frames) = manager(true);
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(manager.run(shutdown.clone()));

        let mut previous = attempts.recv().await.expect("first attempt").at;
        for _ in 0..5 {
            let next = attempts.recv().await.expect("retry").at;
            assert_eq!(next - previous, Duration::from_secs(1));
            previous = next;
        }

        shutdown.cancel();
        task.await.expect("manager task");
    }

    #[tokio::test(start_paused = true)]
    async fn announces_page_and_forwards_frames() {
        let (manager, mut attempts, mut frames) = manager(false);
        let handle = manager.handle();
        let mut state = manager.subscribe();
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(manager.run(shutdown.clone()));

        let mut attempt = attempts.recv().await.expect("dial");
        let mut from_client = attempt.from_client.take().expect("outbound half");
        assert_eq!(
            from_client.recv().await.as_deref(),
            Some(r#"{"type":"pageLoaded"}"#)
        );
        state
            .wait_for(|s| *s == ConnectionState::Open)
            .await
            .expect("open");

        let to_client = attempt.to_client.as_ref().expect("inbound half");
        to_client.send("{\"type\":\"redirect\",\"url\":\"/\"}".into()).expect("send");
        assert_eq!(
            frames.recv().await.as_deref(),
            Some("{\"type\":\"redirect\",\"url\":\"/\"}")
        );

        handle
            .send(&ClientFrame::MenuClick {
                menu: "Main Menu".into(),
                item: "Settings".into(),
            })
            .expect("send while open");
        assert!(from_client
            .recv()
            .await
            .expect("menu click")
            .contains("menuClick"));

        shutdown.cancel();
        task.await.expect("manager task");
        assert!(matches!(
            handle.send(&ClientFrame::PageLoaded),
            Err(ChannelError::NotOpen)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_sender_cannot_reach_the_new_link() {
        let (manager, mut attempts, _frames) = manager(false);
        let handle = manager.handle();
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(manager.run(shutdown.clone()));

        let mut first = attempts.recv().await.expect("first dial");
        let mut first_out = first.from_client.take().expect("outbound");
        let _ = first_out.recv().await;
        assert_eq!(handle.generation(), Some(1));
        first.to_client.take();

        let mut second = attempts.recv().await.expect("second dial");
        let mut second_out = second.from_client.take().expect("outbound");
        let _ = second_out.recv().await;
        assert_eq!(handle.generation(), Some(2));

        handle.send(&ClientFrame::PageLoaded).expect("send");
        assert!(second_out.recv().await.is_some());
        assert!(first_out.try_recv().is_err());

        shutdown.cancel();
        task.await.expect("manager task");
    }
}
