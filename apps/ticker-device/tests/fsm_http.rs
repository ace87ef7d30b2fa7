use std::path::PathBuf;
use std::time::Duration;

use reqwest::{multipart, Client, StatusCode};
use serde_json::Value;
use ticker_device::{Device, DeviceConfig, Telemetry};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

struct Served {
    base: String,
    http: Client,
    shutdown: CancellationToken,
    server: JoinHandle<anyhow::Result<()>>,
    dir: PathBuf,
}

impl Served {
    async fn start() -> Self {
        let dir = std::env::temp_dir().join(format!("ticker-fsm-{}", Uuid::new_v4()));
        let mut config = DeviceConfig::local(&dir);
        config.fs_capacity = 1 << 20;
        let device = Device::open(config.clone()).await.expect("device");
        let listeners = ticker_device::bind(&config).await.expect("bind");
        let base = format!("http://{}", listeners.http_addr().expect("addr"));
        let shutdown = CancellationToken::new();
        let server = tokio::spawn(ticker_device::serve(
            device,
            Telemetry::detached().metrics_handle(),
            listeners,
            shutdown.clone(),
        ));
        Self {
            base,
            http: Client::new(),
            shutdown,
            server,
            dir,
        }
    }

    async fn list(&self, folder: &str) -> reqwest::Response {
        self.http
            .get(format!("{}/fsm/filelist", self.base))
            .query(&[("folder", folder)])
            .send()
            .await
            .expect("filelist")
    }

    async fn post_form(&self, path: &str, field: &str, value: &str) -> StatusCode {
        self.http
            .post(format!("{}{path}", self.base))
            .form(&[(field, value)])
            .send()
            .await
            .expect("form post")
            .status()
    }

    async fn upload(&self, folder: &str, name: &str, body: &'static [u8]) -> StatusCode {
        let form = multipart::Form::new()
            .text("folder", folder.to_string())
            .part("file", multipart::Part::bytes(body).file_name(name.to_string()));
        self.http
            .post(format!("{}/fsm/upload", self.base))
            .multipart(form)
            .send()
            .await
            .expect("upload")
            .status()
    }

    async fn stop(self) {
        self.shutdown.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(5), self.server).await;
        let _ = tokio::fs::remove_dir_all(&self.dir).await;
    }
}

#[tokio::test]
async fn root_listing_reports_system_folder_read_only() {
    let served = Served::start().await;
    let response = served.list("/").await;
    assert_eq!(response.status(), StatusCode::OK);
    let list: Value = response.json().await.expect("json");

    assert_eq!(list["currentFolder"], "/");
    assert_eq!(list["totalSpace"], 1 << 20);
    let files = list["files"].as_array().expect("files");
    assert_eq!(files[0]["name"], "SYS");
    assert_eq!(files[0]["isDir"], true);
    assert_eq!(files[0]["access"], "r");
    assert_eq!(files[0]["size"], 3);
    assert!(files
        .iter()
        .any(|file| file["name"] == "localMessages.txt" && file["access"] == "rw"));
    served.stop().await;
}

#[tokio::test]
async fn missing_folders_are_a_bad_request() {
    let served = Served::start().await;
    assert_eq!(served.list("/missing/").await.status(), StatusCode::BAD_REQUEST);
    assert_eq!(served.list("/../etc/").await.status(), StatusCode::BAD_REQUEST);
    served.stop().await;
}

#[tokio::test]
async fn folders_and_files_follow_their_life_cycle() {
    let served = Served::start().await;
    assert_eq!(
        served.post_form("/fsm/createFolder", "name", "/logs").await,
        StatusCode::OK
    );
    assert_eq!(served.upload("/logs/", "today.txt", b"sunny").await, StatusCode::OK);

    let download = served
        .http
        .get(format!("{}/fsm/download", served.base))
        .query(&[("file", "/logs/today.txt")])
        .send()
        .await
        .expect("download");
    assert_eq!(download.status(), StatusCode::OK);
    assert_eq!(download.text().await.expect("body"), "sunny");

    assert_eq!(
        served.post_form("/fsm/deleteFolder", "folder", "/logs").await,
        StatusCode::CONFLICT
    );
    assert_eq!(
        served.post_form("/fsm/delete", "file", "/logs/today.txt").await,
        StatusCode::OK
    );
    assert_eq!(
        served.post_form("/fsm/delete", "file", "/logs/today.txt").await,
        StatusCode::NOT_FOUND
    );
    assert_eq!(
        served.post_form("/fsm/deleteFolder", "folder", "/logs").await,
        StatusCode::OK
    );
    served.stop().await;
}

#[tokio::test]
async fn system_files_and_bad_names_are_refused() {
    let served = Served::start().await;
    assert_eq!(
        served.post_form("/fsm/delete", "file", "/SYS/espTicker32.js").await,
        StatusCode::FORBIDDEN
    );
    assert_eq!(served.upload("/SYS/", "evil.js", b"x").await, StatusCode::FORBIDDEN);
    assert_eq!(served.upload("/./SYS/", "evil.js", b"x").await, StatusCode::FORBIDDEN);
    assert_eq!(
        served.post_form("/fsm/delete", "file", "/./SYS/espTicker32.js").await,
        StatusCode::FORBIDDEN
    );
    assert!(!served.dir.join("SYS").join("evil.js").exists());
    assert_eq!(
        served.upload("/", "this-name-is-far-too-long-for-the-device.txt", b"x").await,
        StatusCode::BAD_REQUEST
    );
    served.stop().await;
}

#[tokio::test]
async fn health_and_metrics_are_served() {
    let served = Served::start().await;
    let health: Value = served
        .http
        .get(format!("{}/healthz", served.base))
        .send()
        .await
        .expect("healthz")
        .json()
        .await
        .expect("json");
    assert_eq!(health["status"], "ok");

    let metrics = served
        .http
        .get(format!("{}/metrics", served.base))
        .send()
        .await
        .expect("metrics");
    assert_eq!(metrics.status(), StatusCode::OK);
    served.stop().await;
}
