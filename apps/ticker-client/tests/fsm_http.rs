use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Multipart, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use parking_lot::Mutex;
use serde_json::json;
use ticker_client::fsm::{FsmClient, FsmError};

#[derive(Default)]
struct Recorder {
    calls: Mutex<Vec<String>>,
}

impl Recorder {
    fn log(&self, line: String) {
        self.calls.lock().push(line);
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

type Shared = Arc<Recorder>;

async fn filelist(
    State(recorder): State<Shared>,
    Query(query): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let folder = query.get("folder").cloned().unwrap_or_else(|| "/".into());
    recorder.log(format!("list {folder}"));
    let files = match folder.as_str() {
        "/missing/" => return (StatusCode::BAD_REQUEST, "no such folder").into_response(),
        "/full/" => json!([{"name": "keep.txt", "isDir": false, "size": 4, "access": "rw"}]),
        "/" => json!([
            {"name": "notes.txt", "isDir": false, "size": 12, "access": "rw"},
            {"name": "SYS", "isDir": true, "size": 3, "access": "r"}
        ]),
        _ => json!([]),
    };
    Json(json!({
        "currentFolder": folder,
        "files": files,
        "totalSpace": 2048,
        "usedSpace": 512
    }))
    .into_response()
}

async fn upload(State(recorder): State<Shared>, mut multipart: Multipart) -> StatusCode {
    let mut parts = Vec::new();
    while let Ok(Some(field)) = multipart.next_field().await {
        let name = field.name().unwrap_or_default().to_string();
        let file_name = field.file_name().map(str::to_string);
        let Ok(bytes) = field.bytes().await else {
            return StatusCode::BAD_REQUEST;
        };
        match file_name {
            Some(file_name) => parts.push(format!("{name}:{file_name}:{}", bytes.len())),
            None => parts.push(format!("{name}={}", String::from_utf8_lossy(&bytes))),
        }
    }
    parts.sort();
    recorder.log(format!("upload {}", parts.join(" ")));
    StatusCode::OK
}

async fn form_call(
    recorder: Shared,
    operation: &str,
    fields: HashMap<String, String>,
) -> StatusCode {
    let mut fields: Vec<String> = fields.into_iter().map(|(k, v)| format!("{k}={v}")).collect();
    fields.sort();
    recorder.log(format!("{operation} {}", fields.join(" ")));
    StatusCode::OK
}

fn app(recorder: Shared) -> Router {
    Router::new()
        .route("/fsm/filelist", get(filelist))
        .route("/fsm/upload", post(upload))
        .route(
            "/fsm/delete",
            post(|State(r): State<Shared>, Form(f): Form<HashMap<String, String>>| async move {
                form_call(r, "delete", f).await
            }),
        )
        .route(
            "/fsm/deleteFolder",
            post(|State(r): State<Shared>, Form(f): Form<HashMap<String, String>>| async move {
                form_call(r, "deleteFolder", f).await
            }),
        )
        .route(
            "/fsm/createFolder",
            post(|State(r): State<Shared>, Form(f): Form<HashMap<String, String>>| async move {
                form_call(r, "createFolder", f).await
            }),
        )
        .route(
            "/fsm/download",
            get(|Query(q): Query<HashMap<String, String>>| async move {
                match q.get("file").map(String::as_str) {
                    Some("/notes.txt") => (StatusCode::OK, "remember the milk").into_response(),
                    _ => StatusCode::NOT_FOUND.into_response(),
                }
            }),
        )
        .with_state(recorder)
}

async fn serve() -> (FsmClient, Shared) {
    let recorder: Shared = Arc::new(Recorder::default());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr");
    let router = app(recorder.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    let client = FsmClient::new(&format!("http://{addr}/")).expect("client");
    (client, recorder)
}

#[tokio::test]
async fn rejected_listing_falls_back_to_root_once() {
    let (fsm, recorder) = serve().await;
    fsm.set_current_folder("/missing/");

    let list = fsm.refresh().await.expect("listing");
    assert_eq!(list.current_folder, "/");
    assert_eq!(fsm.current_folder(), "/");
    assert_eq!(recorder.calls(), ["list /missing/", "list /"]);
    // folders sort first
    assert!(list.files[0].is_dir);
    assert_eq!(list.free_space(), 1536);
}

#[tokio::test]
async fn first_listing_adopts_the_reported_folder() {
    let (fsm, _) = serve().await;
    fsm.set_current_folder("/logs");
    let list = fsm.list().await.expect("listing");
    assert_eq!(list.current_folder, "/logs/");
    assert_eq!(fsm.current_folder(), "/logs/");

    assert_eq!(fsm.open_folder("2024"), "/logs/2024/");
    assert_eq!(fsm.navigate_up(), "/logs/");
}

#[tokio::test]
async fn non_empty_folders_are_not_deleted() {
    let (fsm, recorder) = serve().await;
    let err = fsm.delete_folder("full").await.expect_err("not empty");
    assert!(matches!(err, FsmError::FolderNotEmpty(ref name) if name == "full"));
    assert_eq!(recorder.calls(), ["list /full/"]);

    let removed = fsm.delete_folder("empty").await.expect("deleted");
    assert_eq!(removed, "/empty");
    assert_eq!(
        recorder.calls().last().map(String::as_str),
        Some("deleteFolder folder=/empty")
    );
}

#[tokio::test]
async fn uploads_carry_the_target_folder() {
    let (fsm, recorder) = serve().await;
    fsm.set_current_folder("/docs/");
    let remote = fsm
        .upload_bytes("readme.txt", b"hello".to_vec())
        .await
        .expect("upload");
    assert_eq!(remote, "/docs/readme.txt");
    assert_eq!(
        recorder.calls(),
        ["upload file:readme.txt:5 folder=/docs/"]
    );
}

#[tokio::test]
async fn file_operations_post_full_paths() {
    let (fsm, recorder) = serve().await;
    fsm.set_current_folder("/logs/");
    fsm.delete_file("old.txt").await.expect("delete");
    fsm.create_folder("2025").await.expect("mkdir");
    assert_eq!(
        recorder.calls(),
        ["delete file=/logs/old.txt", "createFolder name=/logs/2025"]
    );
}

#[tokio::test]
async fn downloads_land_in_the_target_directory() {
    let (fsm, _) = serve().await;
    let dir = std::env::temp_dir().join(format!("ticker-client-{}", uuid::Uuid::new_v4()));
    tokio::fs::create_dir_all(&dir).await.expect("scratch dir");

    let local = fsm.download("notes.txt", &dir).await.expect("download");
    let body = tokio::fs::read_to_string(&local).await.expect("read back");
    assert_eq!(body, "remember the milk");

    let err = fsm.download("absent.bin", &dir).await.expect_err("missing");
    assert!(matches!(err, FsmError::Status { status, .. } if status.as_u16() == 404));

    let _ = tokio::fs::remove_dir_all(&dir).await;
}
