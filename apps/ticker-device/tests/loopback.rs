use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use ticker_client::config::ClientConfig;
use ticker_client::invoke::{Args, HttpFetcher};
use ticker_client::{ClientRuntime, SessionView, UserAction, WsDialer};
use ticker_device::{Device, DeviceConfig, Telemetry};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const WAIT: Duration = Duration::from_secs(5);

struct Harness {
    device: Device,
    client: ClientRuntime,
    shutdown: CancellationToken,
    server: JoinHandle<anyhow::Result<()>>,
    dir: PathBuf,
}

impl Harness {
    async fn start() -> Self {
        let dir = std::env::temp_dir().join(format!("ticker-loopback-{}", Uuid::new_v4()));
        let mut config = DeviceConfig::local(&dir);
        config.rotation_interval = Duration::from_secs(60);
        let device = Device::open(config.clone()).await.expect("device");
        let listeners = ticker_device::bind(&config).await.expect("bind");
        let ws_port = listeners.ws_addr().expect("ws addr").port();
        let http_port = listeners.http_addr().expect("http addr").port();

        let shutdown = CancellationToken::new();
        let server = tokio::spawn(ticker_device::serve(
            device.clone(),
            Telemetry::detached().metrics_handle(),
            listeners,
            shutdown.clone(),
        ));

        let client_config = ClientConfig {
            ws_port,
            http_port,
            ..ClientConfig::new("127.0.0.1")
        };
        let fetcher = HttpFetcher::new(&client_config.http_base()).expect("fetcher");
        let client = ticker_client::start(client_config, WsDialer, Arc::new(fetcher), shutdown.clone())
            .expect("client");

        Self {
            device,
            client,
            shutdown,
            server,
            dir,
        }
    }

    async fn wait_for<F>(&self, what: &str, predicate: F) -> SessionView
    where
        F: FnMut(&SessionView) -> bool,
    {
        timeout(WAIT, self.client.session.wait_for(predicate))
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for {what}"))
            .unwrap_or_else(|| panic!("session stopped while waiting for {what}"))
    }

    fn click(&self, menu: &str, item: &str) {
        assert!(self.client.session.act(UserAction::ClickMenu {
            menu: menu.into(),
            item: item.into(),
        }));
    }

    async fn stop(self) {
        self.shutdown.cancel();
        let served = timeout(WAIT, self.server).await.expect("server stops");
        served.expect("server task").expect("server result");
        self.client.join().await;
        let _ = tokio::fs::remove_dir_all(&self.dir).await;
    }
}

#[tokio::test]
async fn client_renders_the_main_page_after_connecting() {
    let harness = Harness::start().await;
    let view = harness
        .wait_for("main page", |view| view.ui.title() == "esp Ticker32")
        .await;
    assert!(view.ui.contains("scrollingMonitor"));
    assert!(view.ui.menu_item("Main Menu", "FSmanager").is_some());
    assert_eq!(harness.device.hub().len(), 1);
    harness.stop().await;
}

#[tokio::test]
async fn local_messages_page_fetches_and_saves_the_list() {
    let harness = Harness::start().await;
    harness
        .wait_for("main page", |view| view.ui.title() == "esp Ticker32")
        .await;

    harness.click("Main Menu", "LocalMessages");
    let view = harness
        .wait_for("local messages", |view| {
            view.ui.title() == "Local Messages" && !view.local_messages.is_empty()
        })
        .await;
    assert_eq!(view.local_messages, harness.device.messages().list());

    assert!(harness.client.session.act(UserAction::EditLocalMessage {
        index: 0,
        value: "Welcome to the lobby".into(),
    }));
    assert!(harness.client.session.invoke("saveLocalMessages", Args::None));
    harness
        .wait_for("saved echo", |view| {
            view.local_messages.first().map(String::as_str) == Some("Welcome to the lobby")
                && view.status.contains("saved")
        })
        .await;
    assert_eq!(
        harness.device.messages().list().first().map(String::as_str),
        Some("Welcome to the lobby")
    );
    harness.stop().await;
}

#[tokio::test]
async fn settings_edits_reach_the_device_store() {
    let harness = Harness::start().await;
    harness
        .wait_for("main page", |view| view.ui.title() == "esp Ticker32")
        .await;

    harness.click("Main Menu", "Settings");
    harness
        .wait_for("settings menu", |view| view.ui.title() == "Settings")
        .await;
    harness.click("Settings", "Device Settings");
    harness
        .wait_for("device settings form", |view| {
            view.ui.title() == "Device Settings"
                && view
                    .settings
                    .as_ref()
                    .is_some_and(|form| form.field("hostname").is_some())
        })
        .await;

    assert!(harness.client.session.act(UserAction::EditSetting {
        field: "hostname".into(),
        value: "lobby".into(),
    }));
    assert!(harness.client.session.invoke("saveSettings", Args::None));
    harness
        .wait_for("save confirmation", |view| {
            view.status.contains("Settings saved successfully!")
        })
        .await;

    let stored = harness
        .device
        .settings()
        .form("deviceSettings")
        .and_then(|form| form.field("hostname").map(|field| field.display_value()));
    assert_eq!(stored.as_deref(), Some("lobby"));
    harness.stop().await;
}
