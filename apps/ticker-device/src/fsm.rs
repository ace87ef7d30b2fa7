//! File manager over HTTP, rooted at the device data directory, plus the
//! static file fallback the browser loads scripts and stylesheets from.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::{
    extract::{multipart::MultipartError, Multipart, Query, State},
    http::{header, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use metrics::counter;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use ticker_proto::fsm::validate_filename;
use ticker_proto::{FileEntry, FileList};
use tracing::{debug, info};

use crate::server::AppState;

/// Folder shipped with the firmware; listed read-only and never modified.
pub const SYSTEM_FOLDER: &str = "SYS";

#[derive(Debug, Error)]
pub enum FsmError {
    #[error("`{0}` is outside the file system")]
    OutsideRoot(String),
    #[error("folder `{0}` does not exist")]
    FolderNotFound(String),
    #[error("file `{0}` does not exist")]
    FileNotFound(String),
    #[error("`{0}` is read-only")]
    ReadOnly(String),
    #[error("folder `{0}` is not empty")]
    NotEmpty(String),
    #[error("{0}")]
    InvalidName(String),
    #[error("missing form field `{0}`")]
    MissingField(&'static str),
    #[error("malformed upload: {0}")]
    Multipart(#[from] MultipartError),
    #[error("file system error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl FsmError {
    fn status(&self) -> (StatusCode, &'static str) {
        match self {
            // a missing folder is a 400 so browsers fall back to the root
            FsmError::OutsideRoot(_) | FsmError::FolderNotFound(_) => {
                (StatusCode::BAD_REQUEST, "bad_folder")
            }
            FsmError::FileNotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            FsmError::ReadOnly(_) => (StatusCode::FORBIDDEN, "read_only"),
            FsmError::NotEmpty(_) => (StatusCode::CONFLICT, "not_empty"),
            FsmError::InvalidName(_) | FsmError::MissingField(_) | FsmError::Multipart(_) => {
                (StatusCode::BAD_REQUEST, "bad_request")
            }
            FsmError::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "io"),
        }
    }
}

impl IntoResponse for FsmError {
    fn into_response(self) -> Response {
        let (status, error) = self.status();
        debug!(status = %status, error = %self, "file manager request refused");
        (
            status,
            Json(ErrorBody {
                error,
                message: self.to_string(),
            }),
        )
            .into_response()
    }
}

pub type FsmResult<T> = Result<T, FsmError>;

/// Maps a device path (`/logs/today.txt`) under `root`. `..` is refused.
pub fn resolve(root: &Path, remote: &str) -> FsmResult<PathBuf> {
    let mut path = root.to_path_buf();
    for part in remote.split('/') {
        match part {
            "" | "." => continue,
            ".." => return Err(FsmError::OutsideRoot(remote.to_string())),
            part if part.contains('\\') || part.contains('\0') => {
                return Err(FsmError::OutsideRoot(remote.to_string()))
            }
            part => path.push(part),
        }
    }
    Ok(path)
}

/// `logs` -> `/logs/`, `` -> `/`.
pub fn normalize_folder(remote: &str) -> String {
    let inner = remote.trim_matches('/');
    if inner.is_empty() {
        "/".into()
    } else {
        format!("/{inner}/")
    }
}

pub fn is_protected(remote: &str) -> bool {
    remote
        .split('/')
        .find(|part| !part.is_empty() && *part != ".")
        .is_some_and(|first| first == SYSTEM_FOLDER)
}

fn ensure_writable(remote: &str) -> FsmResult<()> {
    if is_protected(remote) {
        return Err(FsmError::ReadOnly(remote.to_string()));
    }
    Ok(())
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/fsm/filelist", get(file_list))
        .route("/fsm/upload", post(upload))
        .route("/fsm/delete", post(delete_file))
        .route("/fsm/deleteFolder", post(delete_folder))
        .route("/fsm/createFolder", post(create_folder))
        .route("/fsm/download", get(download))
}

/// Lists `folder`. Sub-folders report their entry count as size.
pub async fn list_folder(root: &Path, folder: &str, capacity: u64) -> FsmResult<FileList> {
    let current_folder = normalize_folder(folder);
    let dir = resolve(root, &current_folder)?;
    let mut reader = match tokio::fs::read_dir(&dir).await {
        Ok(reader) => reader,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(FsmError::FolderNotFound(current_folder))
        }
        Err(err) => return Err(err.into()),
    };

    let mut files = Vec::new();
    while let Some(entry) = reader.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        let metadata = entry.metadata().await?;
        let remote = format!("{current_folder}{name}");
        let size = if metadata.is_dir() {
            count_entries(&entry.path()).await?
        } else {
            metadata.len()
        };
        files.push(FileEntry {
            name,
            is_dir: metadata.is_dir(),
            size,
            access: if is_protected(&remote) { "r" } else { "rw" }.into(),
        });
    }

    let used_space = used_space(root).await?;
    Ok(FileList {
        current_folder,
        files,
        total_space: capacity.max(used_space),
        used_space,
    }
    .sorted())
}

async fn count_entries(dir: &Path) -> FsmResult<u64> {
    let mut reader = tokio::fs::read_dir(dir).await?;
    let mut count = 0;
    while reader.next_entry().await?.is_some() {
        count += 1;
    }
    Ok(count)
}

async fn used_space(root: &Path) -> FsmResult<u64> {
    let mut total = 0;
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let mut reader = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = reader.next_entry().await? {
            let metadata = entry.metadata().await?;
            if metadata.is_dir() {
                pending.push(entry.path());
            } else {
                total += metadata.len();
            }
        }
    }
    Ok(total)
}

#[derive(Debug, Deserialize)]
struct FolderQuery {
    folder: Option<String>,
}

async fn file_list(
    State(state): State<Arc<AppState>>,
    Query(query): Query<FolderQuery>,
) -> FsmResult<Json<FileList>> {
    counter!("ticker_device_fsm_requests_total", 1, "operation" => "filelist");
    let folder = query.folder.unwrap_or_else(|| "/".into());
    let root = state.device.data_dir();
    let list = list_folder(root, &folder, state.device.config().fs_capacity).await?;
    Ok(Json(list))
}

async fn upload(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> FsmResult<StatusCode> {
    counter!("ticker_device_fsm_requests_total", 1, "operation" => "upload");
    let mut folder = "/".to_string();
    let mut file = None;
    while let Some(field) = multipart.next_field().await? {
        match field.name() {
            Some("folder") => folder = field.text().await?,
            Some("file") => {
                let name = field.file_name().unwrap_or_default().to_string();
                file = Some((name, field.bytes().await?));
            }
            other => debug!(field = ?other, "ignoring upload field"),
        }
    }
    let (name, bytes) = file.ok_or(FsmError::MissingField("file"))?;
    validate_filename(&name).map_err(FsmError::InvalidName)?;

    let folder = normalize_folder(&folder);
    let remote = format!("{folder}{name}");
    ensure_writable(&remote)?;
    let dir = resolve(state.device.data_dir(), &folder)?;
    if !tokio::fs::metadata(&dir).await.is_ok_and(|meta| meta.is_dir()) {
        return Err(FsmError::FolderNotFound(folder));
    }
    tokio::fs::write(dir.join(&name), &bytes).await?;
    info!(file = %remote, bytes = bytes.len(), "file uploaded");
    Ok(StatusCode::OK)
}

#[derive(Debug, Deserialize)]
struct FileForm {
    file: String,
}

async fn delete_file(
    State(state): State<Arc<AppState>>,
    Form(form): Form<FileForm>,
) -> FsmResult<StatusCode> {
    counter!("ticker_device_fsm_requests_total", 1, "operation" => "delete");
    ensure_writable(&form.file)?;
    let path = resolve(state.device.data_dir(), &form.file)?;
    match tokio::fs::metadata(&path).await {
        Ok(meta) if meta.is_file() => {}
        _ => return Err(FsmError::FileNotFound(form.file)),
    }
    tokio::fs::remove_file(&path).await?;
    info!(file = %form.file, "file deleted");
    Ok(StatusCode::OK)
}

#[derive(Debug, Deserialize)]
struct FolderForm {
    folder: String,
}

async fn delete_folder(
    State(state): State<Arc<AppState>>,
    Form(form): Form<FolderForm>,
) -> FsmResult<StatusCode> {
    counter!("ticker_device_fsm_requests_total", 1, "operation" => "deleteFolder");
    ensure_writable(&form.folder)?;
    if form.folder.trim_matches('/').is_empty() {
        return Err(FsmError::ReadOnly("/".into()));
    }
    let path = resolve(state.device.data_dir(), &form.folder)?;
    match tokio::fs::metadata(&path).await {
        Ok(meta) if meta.is_dir() => {}
        _ => return Err(FsmError::FolderNotFound(form.folder)),
    }
    if count_entries(&path).await? > 0 {
        return Err(FsmError::NotEmpty(form.folder));
    }
    tokio::fs::remove_dir(&path).await?;
    info!(folder = %form.folder, "folder deleted");
    Ok(StatusCode::OK)
}

#[derive(Debug, Deserialize)]
struct NameForm {
    name: String,
}

async fn create_folder(
    State(state): State<Arc<AppState>>,
    Form(form): Form<NameForm>,
) -> FsmResult<StatusCode> {
    counter!("ticker_device_fsm_requests_total", 1, "operation" => "createFolder");
    let trimmed = form.name.trim_end_matches('/');
    let leaf = trimmed.rsplit('/').next().unwrap_or(trimmed);
    validate_filename(leaf).map_err(FsmError::InvalidName)?;
    ensure_writable(trimmed)?;
    let path = resolve(state.device.data_dir(), trimmed)?;
    tokio::fs::create_dir_all(&path).await?;
    info!(folder = %trimmed, "folder created");
    Ok(StatusCode::OK)
}

#[derive(Debug, Deserialize)]
struct FileQuery {
    file: String,
}

async fn download(
    State(state): State<Arc<AppState>>,
    Query(query): Query<FileQuery>,
) -> FsmResult<Response> {
    counter!("ticker_device_fsm_requests_total", 1, "operation" => "download");
    let path = resolve(state.device.data_dir(), &query.file)?;
    let bytes = read_file(&path, &query.file).await?;
    let name = query.file.rsplit('/').next().unwrap_or_default().replace('"', "");
    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{name}\""),
            ),
        ],
        bytes,
    )
        .into_response())
}

async fn read_file(path: &Path, remote: &str) -> FsmResult<Vec<u8>> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => Ok(tokio::fs::read(path).await?),
        _ => Err(FsmError::FileNotFound(remote.to_string())),
    }
}

fn content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("html") | Some("htm") => "text/html; charset=utf-8",
        Some("js") => "application/javascript",
        Some("css") => "text/css",
        Some("json") => "application/json",
        Some("txt") | Some("ini") => "text/plain; charset=utf-8",
        Some("png") => "image/png",
        Some("ico") => "image/x-icon",
        Some("svg") => "image/svg+xml",
        _ => "application/octet-stream",
    }
}

/// Any other GET serves `<data-dir>/<path>`, falling back to the system
/// folder, which doubles as the web root. `/` serves `index.html`.
pub async fn static_file(State(state): State<Arc<AppState>>, uri: Uri) -> FsmResult<Response> {
    let remote = match uri.path() {
        "/" => "/index.html",
        other => other,
    };
    let root = state.device.data_dir();
    let mut path = resolve(root, remote)?;
    if !is_file(&path).await {
        let system = resolve(&root.join(SYSTEM_FOLDER), remote)?;
        if is_file(&system).await {
            path = system;
        }
    }
    let bytes = read_file(&path, remote).await?;
    Ok(([(header::CONTENT_TYPE, content_type(&path))], bytes).into_response())
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .is_ok_and(|meta| meta.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parent_segments_never_escape_the_root() {
        let root = Path::new("/data");
        assert_eq!(
            resolve(root, "/logs/./today.txt").expect("inside"),
            PathBuf::from("/data/logs/today.txt")
        );
        assert!(matches!(
            resolve(root, "/logs/../../etc/passwd"),
            Err(FsmError::OutsideRoot(_))
        ));
        assert!(resolve(root, "..\\secret").is_err());
        assert_eq!(resolve(root, "/").expect("root"), PathBuf::from("/data"));
    }

    #[test]
    fn folders_are_normalized_with_slashes() {
        assert_eq!(normalize_folder(""), "/");
        assert_eq!(normalize_folder("logs"), "/logs/");
        assert_eq!(normalize_folder("/logs/2025/"), "/logs/2025/");
    }

    #[test]
    fn system_folder_is_read_only() {
        assert!(is_protected("/SYS/espTicker32.js"));
        assert!(is_protected("SYS"));
        assert!(!is_protected("/SYSTEM/x"));
        assert!(!is_protected("/notes.txt"));
        assert!(is_protected("/./SYS/espTicker32.js"));
        assert!(is_protected(".//SYS"));
        assert!(matches!(ensure_writable("/SYS/x"), Err(FsmError::ReadOnly(_))));
    }

    #[test]
    fn missing_folders_map_to_bad_request() {
        let (status, _) = FsmError::FolderNotFound("/x/".into()).status();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = FsmError::NotEmpty("/x".into()).status();
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(content_type(Path::new("a/b.js")), "application/javascript");
    }

    mod served {
        use axum::body::Body;
        use axum::http::Request;
        use tokio_util::sync::CancellationToken;
        use tower::ServiceExt;

        use super::super::*;
        use crate::config::DeviceConfig;
        use crate::device::Device;
        use crate::pages::SCRIPTS;
        use crate::server::http_router;
        use crate::telemetry::Telemetry;

        async fn router() -> (Router, PathBuf) {
            let dir = std::env::temp_dir().join(format!("ticker-fsm-unit-{}", uuid::Uuid::new_v4()));
            let device = Device::open(DeviceConfig::local(&dir)).await.expect("device");
            let state = Arc::new(AppState {
                device,
                metrics: Telemetry::detached().metrics_handle(),
                shutdown: CancellationToken::new(),
            });
            (http_router(state), dir)
        }

        #[tokio::test]
        async fn bare_script_names_resolve_to_the_system_folder() {
            let (router, dir) = router().await;
            tokio::fs::write(dir.join(SYSTEM_FOLDER).join("espTicker32.js"), "// app\n")
                .await
                .expect("write script");

            for remote in SCRIPTS {
                let name = remote.rsplit('/').next().expect("file name");
                let response = router
                    .clone()
                    .oneshot(Request::get(format!("/{name}")).body(Body::empty()).expect("request"))
                    .await
                    .expect("response");
                assert_eq!(response.status(), StatusCode::OK, "{name}");
            }

            let response = router
                .oneshot(Request::get("/espTicker32.js").body(Body::empty()).expect("request"))
                .await
                .expect("response");
            assert_eq!(
                response.headers().get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok()),
                Some("application/javascript")
            );
            let body = axum::body::to_bytes(response.into_body(), usize::MAX)
                .await
                .expect("body");
            assert_eq!(&body[..], b"// app\n");
            let _ = tokio::fs::remove_dir_all(&dir).await;
        }

        #[tokio::test]
        async fn dotted_paths_cannot_write_into_the_system_folder() {
            let (router, dir) = router().await;
            let response = router
                .oneshot(
                    Request::post("/fsm/delete")
                        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                        .body(Body::from("file=%2F.%2FSYS%2FespTicker32.js"))
                        .expect("request"),
                )
                .await
                .expect("response");
            assert_eq!(response.status(), StatusCode::FORBIDDEN);
            assert!(dir.join(SYSTEM_FOLDER).join("espTicker32.js").exists());
            let _ = tokio::fs::remove_dir_all(&dir).await;
        }
    }
}
