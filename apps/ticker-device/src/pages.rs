//! The ticker's page layout: main monitor, local-messages editor, file
//! manager and one page per settings group.

use std::path::Path;

use tracing::info;

use crate::error::{StoreError, StoreResult};
use crate::fsm::SYSTEM_FOLDER;
use crate::settings_store::SettingsGroup;
use crate::spa::{MenuBinding, Spa, SpaResult};

pub const MAIN_PAGE: &str = "Main";
pub const LOCAL_MESSAGES_PAGE: &str = "localMessagesPage";
pub const FSMANAGER_PAGE: &str = "FSmanagerPage";
pub const MAIN_SETTINGS_PAGE: &str = "mainSettingsPage";

pub const APP_LOADED: &str = "isEspTicker32Loaded";
pub const FSM_LOADED: &str = "isFSmanagerLoaded";
pub const LOAD_FILE_LIST: &str = "loadFileList";

pub const SCRIPTS: [&str; 2] = ["/SYS/FSmanager.js", "/SYS/espTicker32.js"];
pub const STYLESHEETS: [&str; 1] = ["/SYS/FSmanager.css"];

/// What a bound menu item does on the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handler {
    /// Shows `announce` in the status bar, activates `page`, then optionally
    /// asks every client to run `call`.
    Open {
        page: String,
        announce: String,
        call: Option<String>,
    },
    /// Asks every client to run a function.
    Call(String),
    /// Reloads the stores from disk and returns to the main page.
    Restart,
}

impl Handler {
    fn open(page: &str, announce: &str, call: Option<&str>) -> MenuBinding {
        MenuBinding::Handler(Handler::Open {
            page: page.into(),
            announce: announce.into(),
            call: call.map(str::to_string),
        })
    }
}

pub fn settings_page(key: &str) -> String {
    format!("{key}Page")
}

/// Function the client runs once `page` has been rendered.
pub fn loaded_hook(page: &str) -> Option<&'static str> {
    match page {
        FSMANAGER_PAGE => Some(LOAD_FILE_LIST),
        LOCAL_MESSAGES_PAGE => Some(APP_LOADED),
        page if page.ends_with("SettingsPage") && page != MAIN_SETTINGS_PAGE => Some(APP_LOADED),
        _ => None,
    }
}

const MAIN_BODY: &str = r#"<div style="font-size: 48px; text-align: left; font-weight: bold;">Ticker Monitor</div>
<pre id="scrollingMonitor" style="width: 80ch; height: 18em; overflow: hidden; font-family: 'Courier New', Courier, monospace; white-space: pre-wrap; border: 1px solid #ccc; padding: 0.5em;"></pre>"#;

const LOCAL_MESSAGES_BODY: &str = r#"<div style="font-size: 48px; text-align: center; font-weight: bold;">Messages</div>
<div id="dynamicInputContainer">
  <table id="inputTable" style="width: 100%; border-collapse: collapse;">
    <thead><tr><th style="text-align: left; padding: 8px;">(Local) Messages</th></tr></thead>
    <tbody id="inputTableBody"></tbody>
  </table>
  <div style="margin-top: 20px;"><button id="saveButton" onclick="saveLocalMessages()">Save</button></div>
</div>"#;

const LOCAL_MESSAGES_HELP: &str = r#"<div id="popupHelpLocalMessages">Keywords</div>
<ul>
  <li><b>&lt;time&gt;</b> current time</li>
  <li><b>&lt;date&gt;</b> current date</li>
  <li><b>&lt;datetime&gt;</b> current date and time</li>
  <li><b>&lt;space&gt;</b> blanks the ticker</li>
  <li><b>&lt;weerlive&gt;</b> weather report</li>
  <li><b>&lt;mediastack&gt;</b> next news item</li>
  <li><b>&lt;rssfeed&gt;</b> next feed item</li>
</ul>
A keyword must be the only text of its message.
<br><button type="button" onClick="closePopup('popup_Local_Messages_Help')">Close</button>"#;

const FSMANAGER_BODY: &str = r#"<div id="fsm_fileList" style="display: block;"></div>
<div id="fsm_spaceInfo" class="FSM_space-info" style="display: block;"></div>"#;

const UPLOAD_POPUP: &str = r#"<div id="popUpUploadFile">Upload File</div>
<div id="fsm_fileUpload">
  <input type="file" id="fsm_fileInput" onchange="handleFileSelect()">
  <div id="selectedFileName" style="margin-top: 5px; font-style: italic;"></div>
</div>
<div style="margin-top: 10px;">
  <button type="button" onClick="closePopup('popup_FS_Manager_Upload_File')">Cancel</button>
  <button type="button" id="uploadButton" onClick="uploadSelectedFile()" disabled>Upload File</button>
</div>"#;

const NEW_FOLDER_POPUP: &str = r#"<div id="popupCreateFolder">Create Folder</div>
<label for="folderNameInput">Folder Name:</label>
<input type="text" id="folderNameInput" placeholder="Enter folder name">
<br>
<button type="button" onClick="closePopup('popup_FS_Manager_Create_Folder')">Cancel</button>
<button type="button" onClick="createFolderFromInput()">Create Folder</button>"#;

const SETTINGS_BODY: &str = r#"<div id="settingsName" style="font-size: 48px; text-align: center; font-weight: bold;">Settings</div>
<div id="dynamicSettingsContainer">
  <table id="settingsTable" style="width: 100%; border-collapse: collapse;">
    <thead><tr><th style="text-align: right; padding: 8px;">Setting</th><th style="text-align: left; padding: 8px;">Value</th></tr></thead>
    <tbody id="settingsTableBody"></tbody>
  </table>
  <div style="margin-top: 20px;"><button id="saveSettingsButton" onclick="saveSettings()">Save</button></div>
</div>
<div style="font-size: 12px; text-align: center;">Most settings take effect after a restart.</div>"#;

fn main_settings_body(groups: &[SettingsGroup]) -> String {
    let items: String = groups
        .iter()
        .map(|group| format!("<li>{}</li>", group.title))
        .collect();
    format!(
        "<div style=\"font-size: 48px; text-align: center; font-weight: bold;\">Settings</div>\
         <br>System settings that influence the operation of the device.<ul>{items}</ul>"
    )
}

/// Registers every page, menu and include. `Main` ends up active.
pub fn install(spa: &Spa, groups: &[SettingsGroup]) -> SpaResult<()> {
    spa.add_page(MAIN_PAGE, MAIN_BODY);
    spa.set_page_title(MAIN_PAGE, "esp Ticker32")?;
    spa.add_menu(MAIN_PAGE, "Main Menu")?;
    spa.add_menu_item(
        MAIN_PAGE,
        "Main Menu",
        "LocalMessages",
        Handler::open(
            LOCAL_MESSAGES_PAGE,
            "Main Menu [Local Messages] clicked!",
            Some(APP_LOADED),
        ),
    )?;
    spa.add_menu_item(
        MAIN_PAGE,
        "Main Menu",
        "Settings",
        Handler::open(MAIN_SETTINGS_PAGE, "Main Menu [Settings] clicked!", None),
    )?;
    spa.add_menu_item(
        MAIN_PAGE,
        "Main Menu",
        "FSmanager",
        Handler::open(
            FSMANAGER_PAGE,
            "Main Menu [FSmanager] clicked!",
            Some(LOAD_FILE_LIST),
        ),
    )?;
    for function in [FSM_LOADED, APP_LOADED] {
        spa.add_menu_item(
            MAIN_PAGE,
            "Main Menu",
            function,
            MenuBinding::Handler(Handler::Call(function.into())),
        )?;
    }

    spa.add_page(LOCAL_MESSAGES_PAGE, LOCAL_MESSAGES_BODY);
    spa.set_page_title(LOCAL_MESSAGES_PAGE, "Local Messages")?;
    spa.add_menu(LOCAL_MESSAGES_PAGE, "Local Messages")?;
    spa.add_menu_item(
        LOCAL_MESSAGES_PAGE,
        "Local Messages",
        "Help",
        MenuBinding::Popup(LOCAL_MESSAGES_HELP.into()),
    )?;
    spa.add_menu_item(
        LOCAL_MESSAGES_PAGE,
        "Local Messages",
        "Exit",
        Handler::open(MAIN_PAGE, "Local Messages: [Exit] clicked!", None),
    )?;

    spa.add_page(FSMANAGER_PAGE, FSMANAGER_BODY);
    spa.set_page_title(FSMANAGER_PAGE, "FileSystem Manager")?;
    spa.add_menu(FSMANAGER_PAGE, "FS Manager")?;
    spa.add_menu_item(
        FSMANAGER_PAGE,
        "FS Manager",
        "Upload File",
        MenuBinding::Popup(UPLOAD_POPUP.into()),
    )?;
    spa.add_menu_item(
        FSMANAGER_PAGE,
        "FS Manager",
        "Create Folder",
        MenuBinding::Popup(NEW_FOLDER_POPUP.into()),
    )?;
    spa.add_menu_item(
        FSMANAGER_PAGE,
        "FS Manager",
        "Exit",
        Handler::open(MAIN_PAGE, "FS manager: [Exit] clicked!", None),
    )?;

    spa.add_page(MAIN_SETTINGS_PAGE, &main_settings_body(groups));
    spa.set_page_title(MAIN_SETTINGS_PAGE, "Settings")?;
    spa.add_menu(MAIN_SETTINGS_PAGE, "Settings")?;
    for group in groups {
        let page = settings_page(&group.key);
        spa.add_page(&page, SETTINGS_BODY);
        spa.set_page_title(&page, &group.title)?;
        spa.add_menu(&page, &group.title)?;
        spa.add_menu_item(
            &page,
            &group.title,
            "Exit",
            Handler::open(MAIN_SETTINGS_PAGE, "Settings: [Exit] clicked!", None),
        )?;

        spa.add_menu_item(
            MAIN_SETTINGS_PAGE,
            "Settings",
            &group.title,
            Handler::open(
                &page,
                &format!("Main Menu [{}] clicked!", group.title),
                Some(APP_LOADED),
            ),
        )?;
    }
    spa.add_menu_item(
        MAIN_SETTINGS_PAGE,
        "Settings",
        "Exit",
        Handler::open(MAIN_PAGE, "Main Settings: [Exit] clicked!", None),
    )?;
    spa.add_menu(MAIN_SETTINGS_PAGE, "System")?;
    spa.add_menu_item(
        MAIN_SETTINGS_PAGE,
        "System",
        "RESTART espTicker32",
        MenuBinding::Handler(Handler::Restart),
    )?;

    for path in STYLESHEETS {
        spa.include_css_file(path);
    }
    for path in SCRIPTS {
        spa.include_js_file(path);
    }
    spa.activate_page(MAIN_PAGE)
}

/// Writes an empty placeholder for every include missing from `data_dir`.
/// Real assets are uploaded through the file manager.
pub async fn seed_system_files(data_dir: &Path) -> StoreResult<()> {
    let sys = data_dir.join(SYSTEM_FOLDER);
    tokio::fs::create_dir_all(&sys)
        .await
        .map_err(|source| StoreError::Write {
            path: sys.clone(),
            source,
        })?;
    for remote in SCRIPTS.iter().chain(STYLESHEETS.iter()) {
        let path = data_dir.join(remote.trim_start_matches('/'));
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            continue;
        }
        let placeholder = if remote.ends_with(".css") {
            "/* placeholder */\n"
        } else {
            "// placeholder\n"
        };
        tokio::fs::write(&path, placeholder)
            .await
            .map_err(|source| StoreError::Write {
                path: path.clone(),
                source,
            })?;
        info!(file = %remote, "seeded placeholder system file");
    }
    Ok(())
}
