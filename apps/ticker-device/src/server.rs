use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        ConnectInfo, State, WebSocketUpgrade,
    },
    http::header,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::config::DeviceConfig;
use crate::device::Device;
use crate::fsm;
use crate::handlers;
use crate::hub::Registration;
use crate::rotation::spawn_rotation;

pub struct AppState {
    pub device: Device,
    pub metrics: PrometheusHandle,
    pub shutdown: CancellationToken,
}

/// Both listeners, bound before serving so callers can read the ports.
pub struct Listeners {
    ws: TcpListener,
    http: TcpListener,
}

impl Listeners {
    pub fn ws_addr(&self) -> Result<SocketAddr> {
        self.ws.local_addr().context("websocket listener has no address")
    }

    pub fn http_addr(&self) -> Result<SocketAddr> {
        self.http.local_addr().context("http listener has no address")
    }
}

pub async fn bind(config: &DeviceConfig) -> Result<Listeners> {
    let ws = TcpListener::bind(config.ws_addr)
        .await
        .with_context(|| format!("failed to bind websocket listener on {}", config.ws_addr))?;
    let http = TcpListener::bind(config.http_addr)
        .await
        .with_context(|| format!("failed to bind http listener on {}", config.http_addr))?;
    Ok(Listeners { ws, http })
}

pub fn ws_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(ws_handler))
        .route("/ws", get(ws_handler))
        .with_state(state)
}

pub fn http_router(state: Arc<AppState>) -> Router {
    fsm::routes()
        .route("/healthz", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .fallback(fsm::static_file)
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Serves both listeners and runs the background tasks until `shutdown`
/// fires.
pub async fn serve(
    device: Device,
    metrics: PrometheusHandle,
    listeners: Listeners,
    shutdown: CancellationToken,
) -> Result<()> {
    let config = device.config().clone();
    let recycler = device
        .tracker()
        .spawn_recycler(config.recycle_interval(), shutdown.clone());
    let rotation = spawn_rotation(device.clone(), config.rotation_interval, shutdown.clone());

    let state = Arc::new(AppState {
        device,
        metrics,
        shutdown: shutdown.clone(),
    });
    info!(
        ws_addr = %listeners.ws_addr()?,
        http_addr = %listeners.http_addr()?,
        "ticker device listening"
    );

    let ws_shutdown = shutdown.clone();
    let ws = axum::serve(
        listeners.ws,
        ws_router(state.clone()).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { ws_shutdown.cancelled().await })
    .into_future();
    let http_shutdown = shutdown.clone();
    let http = axum::serve(listeners.http, http_router(state))
        .with_graceful_shutdown(async move { http_shutdown.cancelled().await })
        .into_future();

    let served = tokio::try_join!(
        async { ws.await.context("websocket server failed") },
        async { http.await.context("http server failed") },
    );
    shutdown.cancel();
    let _ = recycler.await;
    let _ = rotation.await;
    served.map(|_| ())
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let body = state.metrics.render();
    ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body)
}

async fn ws_handler(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state, peer))
}

async fn handle_connection(socket: WebSocket, state: Arc<AppState>, peer: SocketAddr) {
    if let Err(err) = run_connection(socket, state, peer).await {
        warn!("connection ended with error: {err:?}");
    }
}

async fn run_connection(socket: WebSocket, state: Arc<AppState>, peer: SocketAddr) -> Result<()> {
    let device = &state.device;
    let (mut ws_tx, mut ws_rx) = socket.split();
    let Registration {
        id,
        receiver: mut outbound,
    } = device.hub().register(Some(peer));
    counter!("ticker_device_connections_total", 1);
    info!(client = %id, peer = %peer, "client connected");

    let writer = tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            if ws_tx.send(message).await.is_err() {
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    let result: Result<()> = loop {
        let next = tokio::select! {
            _ = state.shutdown.cancelled() => break Ok(()),
            next = ws_rx.next() => next,
        };
        match next {
            Some(Ok(Message::Text(text))) => handlers::handle_text(device, id, &text).await,
            Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                Ok(text) => handlers::handle_text(device, id, text).await,
                Err(_) => warn!(client = %id, "dropping non-utf8 binary frame"),
            },
            Some(Ok(Message::Close(frame))) => {
                debug!(client = %id, reason = ?frame.map(|f| f.reason), "client closed");
                break Ok(());
            }
            Some(Ok(_)) => continue,
            Some(Err(err)) => {
                break Err(anyhow::Error::new(err).context("websocket read failed"));
            }
            None => break Ok(()),
        }
    };

    device.hub().unregister(id);
    device.tracker().forget_client(id);
    writer.abort();
    info!(client = %id, "client disconnected");
    result
}
