use std::env;
use std::path::PathBuf;
use std::time::Duration;

#[cfg(test)]
use std::sync::Mutex;

/// Port the device serves its WebSocket endpoint on.
pub const DEFAULT_WS_PORT: u16 = 81;
pub const DEFAULT_HTTP_PORT: u16 = 80;
/// Fixed pause between a channel closing and the next connect attempt.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// A settings page the device may show, identified by its storage key and
/// the page title it is displayed under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingsPage {
    pub key: String,
    pub title: String,
}

impl SettingsPage {
    pub fn new(key: &str, title: &str) -> Self {
        Self {
            key: key.into(),
            title: title.into(),
        }
    }
}

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Device host name or address; every endpoint is derived from it.
    pub host: String,
    pub ws_port: u16,
    pub http_port: u16,
    pub reconnect_delay: Duration,
    pub settings_pages: Vec<SettingsPage>,
    /// Where `downloadFile` writes fetched files.
    pub download_dir: PathBuf,
}

impl ClientConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Self::default()
        }
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let host = env::var("TICKER_HOST").unwrap_or(defaults.host);
        let ws_port = env::var("TICKER_WS_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_WS_PORT);
        let http_port = env::var("TICKER_HTTP_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_HTTP_PORT);
        let settings_pages = env::var("TICKER_SETTINGS_PAGES")
            .ok()
            .map(|raw| parse_settings_pages(&raw))
            .filter(|pages| !pages.is_empty())
            .unwrap_or(defaults.settings_pages);
        let download_dir = env::var("TICKER_DOWNLOAD_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.download_dir);

        Self {
            host,
            ws_port,
            http_port,
            reconnect_delay: defaults.reconnect_delay,
            settings_pages,
            download_dir,
        }
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}:{}/", self.host, self.ws_port)
    }

    pub fn http_base(&self) -> String {
        if self.http_port == DEFAULT_HTTP_PORT {
            format!("http://{}/", self.host)
        } else {
            format!("http://{}:{}/", self.host, self.http_port)
        }
    }

    pub fn settings_page_by_title(&self, title: &str) -> Option<&SettingsPage> {
        self.settings_pages.iter().find(|page| page.title == title)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            ws_port: DEFAULT_WS_PORT,
            http_port: DEFAULT_HTTP_PORT,
            reconnect_delay: RECONNECT_DELAY,
            settings_pages: default_settings_pages(),
            download_dir: PathBuf::from("."),
        }
    }
}

pub fn default_settings_pages() -> Vec<SettingsPage> {
    vec![
        SettingsPage::new("deviceSettings", "Device Settings"),
        SettingsPage::new("parolaSettings", "Parola Settings"),
        SettingsPage::new("neopixelsSettings", "Neopixels Settings"),
        SettingsPage::new("weerliveSettings", "Weerlive Settings"),
        SettingsPage::new("rssfeedSettings", "RSSfeed Settings"),
        SettingsPage::new("mediastackSettings", "Mediastack Settings"),
    ]
}

/// Parses `key=Title` pairs separated by `;`.
fn parse_settings_pages(raw: &str) -> Vec<SettingsPage> {
    raw.split(';')
        .filter_map(|pair| {
            let (key, title) = pair.split_once('=')?;
            let (key, title) = (key.trim(), title.trim());
            (!key.is_empty() && !title.is_empty()).then(|| SettingsPage::new(key, title))
        })
        .collect()
}

#[cfg(test)]
static ENV_MUTEX: Mutex<()> = Mutex::new(());
