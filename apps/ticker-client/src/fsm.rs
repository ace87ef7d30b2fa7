//! File-manager consumer: the device's `/fsm/*` REST endpoints and the page
//! operations that drive them.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use thiserror::Error;
use ticker_proto::fsm::{format_size, validate_filename};
use ticker_proto::settings::escape_markup;
use ticker_proto::FileList;
use tracing::{debug, info, warn};
use url::Url;

use crate::invoke::{Args, CustomHandlers, Registry};
use crate::session::{ClientState, SessionEvent};

pub const FILE_LIST_TARGET: &str = "fsm_fileList";
pub const SPACE_INFO_TARGET: &str = "fsm_spaceInfo";
pub const FOLDER_NAME_INPUT: &str = "folderNameInput";

#[derive(Debug, Error)]
pub enum FsmError {
    #[error("invalid name: {0}")]
    InvalidName(String),
    #[error("folder `{0}` is not empty")]
    FolderNotEmpty(String),
    #[error("{operation} failed with status {status}")]
    Status {
        operation: &'static str,
        status: StatusCode,
    },
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
}

pub type FsmResult<T> = Result<T, FsmError>;

struct Inner {
    http: reqwest::Client,
    base: Url,
    current_folder: Mutex<String>,
}

/// REST client for one device. Cheap to clone; clones share the current
/// folder.
#[derive(Clone)]
pub struct FsmClient {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for FsmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FsmClient")
            .field("base", &self.inner.base.as_str())
            .field("current_folder", &self.current_folder())
            .finish()
    }
}

impl FsmClient {
    pub fn new(base: &str) -> FsmResult<Self> {
        Ok(Self {
            inner: Arc::new(Inner {
                http: reqwest::Client::new(),
                base: Url::parse(base)?,
                current_folder: Mutex::new("/".into()),
            }),
        })
    }

    pub fn current_folder(&self) -> String {
        self.inner.current_folder.lock().clone()
    }

    pub fn set_current_folder(&self, folder: &str) {
        *self.inner.current_folder.lock() = with_trailing_slash(folder);
    }

    /// Lists the current folder and adopts the folder the device reports.
    pub async fn list(&self) -> FsmResult<FileList> {
        self.fetch_listing(true).await
    }

    /// Lists the current folder, keeping the locally tracked folder.
    pub async fn refresh(&self) -> FsmResult<FileList> {
        self.fetch_listing(false).await
    }

    async fn fetch_listing(&self, adopt: bool) -> FsmResult<FileList> {
        let folder = self.current_folder();
        match self.list_folder(&folder).await {
            Err(FsmError::Status { status, .. }) if status == StatusCode::BAD_REQUEST => {
                warn!(folder = %folder, "folder listing rejected, returning to root");
                self.set_current_folder("/");
                self.list_folder("/").await
            }
            Ok(list) => {
                if adopt {
                    self.set_current_folder(&list.current_folder);
                }
                Ok(list)
            }
            Err(err) => Err(err),
        }
    }

    /// Lists an arbitrary folder without moving into it.
    pub async fn list_folder(&self, folder: &str) -> FsmResult<FileList> {
        let mut url = self.endpoint("fsm/filelist")?;
        url.query_pairs_mut().append_pair("folder", folder);
        let response = self.inner.http.get(url).send().await?;
        let response = check("list", response)?;
        Ok(response.json::<FileList>().await?.sorted())
    }

    pub fn open_folder(&self, name: &str) -> String {
        let folder = child_folder(&self.current_folder(), name);
        self.set_current_folder(&folder);
        folder
    }

    pub fn navigate_up(&self) -> String {
        let folder = parent_folder(&self.current_folder());
        self.set_current_folder(&folder);
        folder
    }

    /// Uploads a local file into the current folder under its own name.
    pub async fn upload(&self, path: &Path) -> FsmResult<String> {
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| FsmError::InvalidName(path.display().to_string()))?
            .to_string();
        let bytes = tokio::fs::read(path).await?;
        self.upload_bytes(&file_name, bytes).await
    }

    pub async fn upload_bytes(&self, file_name: &str, bytes: Vec<u8>) -> FsmResult<String> {
        validate_filename(file_name).map_err(FsmError::InvalidName)?;
        let folder = self.current_folder();
        let form = Form::new()
            .text("folder", folder.clone())
            .part("file", Part::bytes(bytes).file_name(file_name.to_string()));
        let response = self
            .inner
            .http
            .post(self.endpoint("fsm/upload")?)
            .multipart(form)
            .send()
            .await?;
        check("upload", response)?;
        info!(file = %file_name, folder = %folder, "uploaded");
        Ok(format!("{folder}{file_name}"))
    }

    pub async fn delete_file(&self, name: &str) -> FsmResult<String> {
        let path = format!("{}{name}", self.current_folder());
        self.post_form("delete", "fsm/delete", &[("file", path.as_str())])
            .await?;
        Ok(path)
    }

    /// Deletes a folder, refusing when it still has entries.
    pub async fn delete_folder(&self, name: &str) -> FsmResult<String> {
        let path = format!("{}{name}", self.current_folder());
        let contents = self.list_folder(&with_trailing_slash(&path)).await?;
        if !contents.files.is_empty() {
            return Err(FsmError::FolderNotEmpty(name.to_string()));
        }
        self.post_form("delete folder", "fsm/deleteFolder", &[("folder", path.as_str())])
            .await?;
        Ok(path)
    }

    pub async fn create_folder(&self, name: &str) -> FsmResult<String> {
        validate_filename(name).map_err(FsmError::InvalidName)?;
        let path = format!("{}{name}", self.current_folder());
        self.post_form("create folder", "fsm/createFolder", &[("name", path.as_str())])
            .await?;
        Ok(path)
    }

    /// Downloads a file from the current folder into `dir`.
    pub async fn download(&self, name: &str, dir: &Path) -> FsmResult<PathBuf> {
        let remote = format!("{}{name}", self.current_folder());
        let mut url = self.endpoint("fsm/download")?;
        url.query_pairs_mut().append_pair("file", &remote);
        let response = self.inner.http.get(url).send().await?;
        let bytes = check("download", response)?.bytes().await?;
        let local = dir.join(name);
        tokio::fs::write(&local, &bytes).await?;
        debug!(remote = %remote, local = %local.display(), size = bytes.len(), "downloaded");
        Ok(local)
    }

    async fn post_form(
        &self,
        operation: &'static str,
        path: &str,
        fields: &[(&str, &str)],
    ) -> FsmResult<()> {
        let response = self
            .inner
            .http
            .post(self.endpoint(path)?)
            .form(fields)
            .send()
            .await?;
        check(operation, response)?;
        Ok(())
    }

    fn endpoint(&self, path: &str) -> FsmResult<Url> {
        Ok(self.inner.base.join(path)?)
    }
}

fn check(operation: &'static str, response: reqwest::Response) -> FsmResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(FsmError::Status { operation, status })
    }
}

fn with_trailing_slash(folder: &str) -> String {
    if folder.ends_with('/') {
        folder.to_string()
    } else {
        format!("{folder}/")
    }
}

/// `/a/` + `b` gives `/a/b/`.
pub fn child_folder(current: &str, name: &str) -> String {
    let base = current.trim_end_matches('/');
    format!("{base}/{}/", name.trim_matches('/'))
}

/// One level up; the root is its own parent.
pub fn parent_folder(current: &str) -> String {
    let parts: Vec<&str> = current.split('/').collect();
    let keep = parts.len().saturating_sub(2);
    format!("{}/", parts[..keep].join("/"))
}

/// Listing markup for the file-manager page.
pub fn render_listing(list: &FileList, current_folder: &str) -> String {
    let mut html = String::from("<ul class='FSM_file-list'>");
    if current_folder != "/" {
        html.push_str(
            "<li class='FSM_file-item'><span class='FSM_folder' onclick=\"navigateUp()\">..</span></li>",
        );
    }
    let mut seen_folders = std::collections::BTreeSet::new();
    for entry in &list.files {
        let name = escape_markup(&entry.name);
        let locked = entry.access == "r";
        if entry.is_dir {
            if !seen_folders.insert(entry.name.as_str()) {
                continue;
            }
            html.push_str(&format!(
                "<li class='FSM_file-item'><span class='FSM_folder' onclick=\"openFolder('{name}')\">{name}</span><span class='FSM_size'>{} File(s)</span>",
                entry.size
            ));
            if locked {
                html.push_str("<span class='FSM_locked'>Locked</span>");
            } else {
                html.push_str(&format!(
                    "<button onclick=\"deleteFolder('{name}')\">Delete</button>"
                ));
            }
        } else {
            html.push_str(&format!(
                "<li class='FSM_file-item'><span class='FSM_file'>{name}</span><span class='FSM_size'>{}</span><button onclick=\"downloadFile('{name}')\">Download</button>",
                format_size(entry.size)
            ));
            if locked {
                html.push_str("<span class='FSM_locked'>Locked</span>");
            } else {
                html.push_str(&format!(
                    "<button onclick=\"deleteFile('{name}')\">Delete</button>"
                ));
            }
        }
        html.push_str("</li>");
    }
    html.push_str("</ul>");
    html
}

pub fn space_line(list: &FileList) -> String {
    format!(
        "FileSystem uses {} of {} ({} available)",
        format_size(list.used_space),
        format_size(list.total_space),
        format_size(list.free_space())
    )
}

/// Applies a finished listing to the page.
pub fn show_listing(state: &mut ClientState, outcome: Result<FileList, String>) {
    match outcome {
        Ok(list) => {
            let folder = state.fsm.current_folder();
            if !state
                .ui
                .set_inner_markup(FILE_LIST_TARGET, &render_listing(&list, &folder))
            {
                debug!("no file list on this page");
            }
            state.ui.set_text(SPACE_INFO_TARGET, &space_line(&list));
            state.files = Some(list);
        }
        Err(err) => state.alert(format!("Failed to load file list: {err}")),
    }
}

/// Reports a finished file operation. Successful changes refresh the listing.
pub fn operation_done(state: &mut ClientState, operation: &str, outcome: Result<String, String>) {
    match outcome {
        Ok(detail) => {
            info!(operation, detail = %detail, "file operation done");
            if operation != "download" {
                spawn_listing(state, false);
            }
        }
        Err(err) if operation == "download" => warn!(error = %err, "download failed"),
        Err(err) => state.alert(format!("{} failed: {err}", capitalized(operation))),
    }
}

fn capitalized(operation: &str) -> String {
    let mut chars = operation.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn spawn_listing(state: &ClientState, adopt: bool) {
    let fsm = state.fsm.clone();
    let inbox = state.inbox();
    tokio::spawn(async move {
        let outcome = if adopt { fsm.list().await } else { fsm.refresh().await };
        let _ = inbox.send(SessionEvent::FilesListed(outcome.map_err(|err| err.to_string())));
    });
}

fn spawn_operation<F>(state: &ClientState, operation: &'static str, work: F)
where
    F: std::future::Future<Output = FsmResult<String>> + Send + 'static,
{
    let inbox = state.inbox();
    tokio::spawn(async move {
        let outcome = work.await.map_err(|err| err.to_string());
        let _ = inbox.send(SessionEvent::FsmDone { operation, outcome });
    });
}

fn required(args: &Args, operation: &str) -> anyhow::Result<String> {
    args.first()
        .map(|name| name.trim_matches(|c| c == '\'' || c == '"').to_string())
        .filter(|name| !name.is_empty())
        .ok_or_else(|| anyhow::anyhow!("{operation} needs a name"))
}

/// Operations provided once `FSmanager.js` is loaded.
pub fn install(registry: &mut Registry<ClientState>, _customs: &mut CustomHandlers<ClientState>) {
    registry.register("loadFileList", |state, _| {
        spawn_listing(state, true);
        Ok(())
    });
    registry.register("isFSmanagerLoaded", |state, _| {
        spawn_listing(state, true);
        Ok(())
    });
    registry.register("openFolder", |state, args| {
        let name = required(&args, "openFolder")?;
        state.fsm.open_folder(&name);
        spawn_listing(state, false);
        Ok(())
    });
    registry.register("navigateUp", |state, _| {
        state.fsm.navigate_up();
        spawn_listing(state, false);
        Ok(())
    });
    registry.register("uploadSelectedFile", |state, args| {
        let path = match args {
            Args::File(path) => Some(path),
            other => other
                .first()
                .map(PathBuf::from)
                .or_else(|| state.selected_file.clone()),
        };
        let Some(path) = path else {
            state.alert("Please select a file first".into());
            return Ok(());
        };
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        if let Err(reason) = validate_filename(&name) {
            state.alert(format!("Cannot upload: {reason}"));
            return Ok(());
        }
        let fsm = state.fsm.clone();
        spawn_operation(state, "upload", async move { fsm.upload(&path).await });
        Ok(())
    });
    registry.register("createFolderFromInput", |state, args| {
        let name = args
            .first()
            .or_else(|| {
                state
                    .popups
                    .current()
                    .and_then(|popup| popup.inputs.get(FOLDER_NAME_INPUT).cloned())
            })
            .or_else(|| state.ui.input_value(FOLDER_NAME_INPUT).map(str::to_string))
            .unwrap_or_default();
        let name = name.trim().to_string();
        if name.is_empty() {
            state.alert("Please enter a folder name".into());
            return Ok(());
        }
        let fsm = state.fsm.clone();
        spawn_operation(state, "create folder", async move {
            fsm.create_folder(&name).await
        });
        Ok(())
    });
    registry.register("deleteFile", |state, args| {
        let name = required(&args, "deleteFile")?;
        let fsm = state.fsm.clone();
        spawn_operation(state, "delete", async move { fsm.delete_file(&name).await });
        Ok(())
    });
    registry.register("deleteFolder", |state, args| {
        let name = required(&args, "deleteFolder")?;
        let fsm = state.fsm.clone();
        spawn_operation(state, "delete folder", async move {
            fsm.delete_folder(&name).await
        });
        Ok(())
    });
    registry.register("downloadFile", |state, args| {
        let name = required(&args, "downloadFile")?;
        let fsm = state.fsm.clone();
        let dir = state.config.download_dir.clone();
        spawn_operation(state, "download", async move {
            fsm.download(&name, &dir)
                .await
                .map(|local| local.display().to_string())
        });
        Ok(())
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use ticker_proto::FileEntry;

    fn entry(name: &str, is_dir: bool, size: u64, access: &str) -> FileEntry {
        FileEntry {
            name: name.into(),
            is_dir,
            size,
            access: access.into(),
        }
    }

    #[test]
    fn folder_navigation_keeps_a_trailing_slash() {
        assert_eq!(child_folder("/", "logs"), "/logs/");
        assert_eq!(child_folder("/logs/", "archive"), "/logs/archive/");
        assert_eq!(parent_folder("/logs/archive/"), "/logs/");
        assert_eq!(parent_folder("/logs/"), "/");
        assert_eq!(parent_folder("/"), "/");
    }

    #[test]
    fn listing_renders_folders_once_and_locks_read_only_entries() {
        let list = FileList {
            current_folder: "/data/".into(),
            files: vec![
                entry("img", true, 3, "rw"),
                entry("img", true, 3, "rw"),
                entry("SYS", true, 1, "r"),
                entry("notes.txt", false, 2048, "rw"),
            ],
            total_space: 4096,
            used_space: 1024,
        };
        let html = render_listing(&list, "/data/");
        assert!(html.contains("navigateUp()"));
        assert_eq!(html.matches("openFolder('img')").count(), 1);
        assert!(html.contains("3 File(s)"));
        assert!(html.contains("Locked"));
        assert!(!html.contains("deleteFolder('SYS')"));
        assert!(html.contains("downloadFile('notes.txt')"));
        assert!(html.contains("2.00 KB"));
        assert_eq!(
            space_line(&list),
            "FileSystem uses 1.00 KB of 4.00 KB (3.00 KB available)"
        );
    }

    #[test]
    fn root_listing_has_no_way_up() {
        let list = FileList {
            current_folder: "/".into(),
            files: Vec::new(),
            total_space: 0,
            used_space: 0,
        };
        assert!(!render_listing(&list, "/").contains("navigateUp"));
    }

    #[tokio::test]
    async fn long_names_are_refused_before_any_request() {
        let fsm = FsmClient::new("http://127.0.0.1:9/").expect("client");
        let name = "x".repeat(ticker_proto::MAX_FILENAME_LEN + 1);
        let err = fsm
            .upload_bytes(&name, b"data".to_vec())
            .await
            .expect_err("name too long");
        assert!(matches!(err, FsmError::InvalidName(_)));
    }
}
