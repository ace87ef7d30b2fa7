//! Named settings groups persisted as `fieldName=value` lines.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use ticker_proto::settings::SaveOutcome;
use ticker_proto::{FieldKind, SettingsField, SettingsForm};
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};

#[derive(Debug, Clone)]
pub struct SettingsGroup {
    /// Storage key, e.g. `deviceSettings`.
    pub key: String,
    /// Page title and `settingsName`, e.g. `Device Settings`.
    pub title: String,
    pub file_name: String,
    form: SettingsForm,
}

impl SettingsGroup {
    pub fn new(key: &str, title: &str, file_name: &str, fields: Vec<SettingsField>) -> Self {
        Self {
            key: key.into(),
            title: title.into(),
            file_name: file_name.into(),
            form: SettingsForm::new(title, fields),
        }
    }

    pub fn form(&self) -> &SettingsForm {
        &self.form
    }
}

pub fn default_groups() -> Vec<SettingsGroup> {
    vec![
        SettingsGroup::new(
            "deviceSettings",
            "Device Settings",
            "settings.ini",
            vec![
                SettingsField::text("hostname", "hostname", 32, "espTicker32"),
                SettingsField::numeric("tickerSpeed", "Ticker Scroll Speed", 10.0, 120.0, 1.0, 25.0),
                SettingsField::numeric("LDRMinWaarde", "LDR Min. Waarde", 10.0, 100.0, 1.0, 10.0),
                SettingsField::numeric("LDRMaxWaarde", "LDR Max. Waarde", 11.0, 101.0, 1.0, 100.0),
                SettingsField::numeric("maxIntensiteitLeds", "Max. Intensiteit LEDS", 10.0, 55.0, 1.0, 50.0),
                SettingsField::text("skipItems", "Words to skip", 256, ""),
            ],
        ),
        SettingsGroup::new(
            "parolaSettings",
            "Parola Settings",
            "parola.ini",
            vec![
                SettingsField::numeric(
                    "hardwareType",
                    "Type (1=PAROLA_HW, 2=FC16_HW, 3=GENERIC_HW)",
                    1.0,
                    3.0,
                    1.0,
                    2.0,
                ),
                SettingsField::numeric("numDevices", "Aantal segmenten", 1.0, 22.0, 1.0, 8.0),
                SettingsField::numeric("numZones", "Aantal rijen (Zones)", 1.0, 2.0, 1.0, 1.0),
                SettingsField::numeric("pinDIN", "DIN/MOSI GPIO pin (0 = default)", 0.0, 15.0, 1.0, 0.0),
                SettingsField::numeric("pinCS", "CS/SS GPIO pin (default 5)", 1.0, 15.0, 1.0, 5.0),
                SettingsField::numeric("pinCLK", "CLK/SCK GPIO pin (0 = default )", 0.0, 15.0, 1.0, 0.0),
            ],
        ),
        SettingsGroup::new(
            "neopixelsSettings",
            "Neopixels Settings",
            "neopixels.ini",
            vec![
                SettingsField::boolean("hasNeopixels", "Neopixels aanwezig", false),
                SettingsField::numeric("pin", "Data GPIO pin", 0.0, 39.0, 1.0, 13.0),
                SettingsField::numeric("numPixels", "Aantal pixels", 1.0, 255.0, 1.0, 8.0),
                SettingsField::numeric("brightness", "Helderheid", 0.0, 255.0, 1.0, 50.0),
            ],
        ),
        SettingsGroup::new(
            "weerliveSettings",
            "Weerlive Settings",
            "weerlive.ini",
            vec![
                SettingsField::text("authToken", "weerlive Auth. Token", 16, ""),
                SettingsField::text("plaats", "Plaats", 32, "Amsterdam"),
                SettingsField::numeric(
                    "requestInterval",
                    "Request Interval (minuten)",
                    10.0,
                    120.0,
                    1.0,
                    30.0,
                ),
            ],
        ),
        SettingsGroup::new(
            "rssfeedSettings",
            "RSSfeed Settings",
            "rssfeed.ini",
            vec![
                SettingsField::text("feedUrl0", "Feed 1 URL", 128, ""),
                SettingsField::numeric("maxFeeds0", "Feed 1 max. items", 0.0, 20.0, 1.0, 5.0),
                SettingsField::text("feedUrl1", "Feed 2 URL", 128, ""),
                SettingsField::numeric("maxFeeds1", "Feed 2 max. items", 0.0, 20.0, 1.0, 5.0),
                SettingsField::numeric(
                    "requestInterval",
                    "Request Interval (minuten)",
                    10.0,
                    240.0,
                    1.0,
                    60.0,
                ),
            ],
        ),
    ]
}

#[derive(Clone)]
pub struct SettingsStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    dir: PathBuf,
    groups: RwLock<Vec<SettingsGroup>>,
}

impl SettingsStore {
    /// Loads every group from `dir`; groups without a file keep their
    /// defaults until first saved.
    pub async fn open(dir: &Path, groups: Vec<SettingsGroup>) -> StoreResult<Self> {
        let store = Self {
            inner: Arc::new(StoreInner {
                dir: dir.to_path_buf(),
                groups: RwLock::new(groups),
            }),
        };
        store.reload().await?;
        Ok(store)
    }

    pub async fn reload(&self) -> StoreResult<()> {
        for key in self.keys() {
            self.load(&key).await?;
        }
        Ok(())
    }

    pub fn keys(&self) -> Vec<String> {
        self.inner
            .groups
            .read()
            .iter()
            .map(|group| group.key.clone())
            .collect()
    }

    pub fn groups(&self) -> Vec<SettingsGroup> {
        self.inner.groups.read().clone()
    }

    pub fn title(&self, key: &str) -> Option<String> {
        self.group(key).map(|group| group.title)
    }

    pub fn form(&self, key: &str) -> Option<SettingsForm> {
        self.group(key).map(|group| group.form)
    }

    /// Maps a request resource (`DeviceSettings`) or process key
    /// (`deviceSettings`) to the stored group key.
    pub fn resolve(&self, name: &str) -> Option<String> {
        self.inner
            .groups
            .read()
            .iter()
            .find(|group| group.key.eq_ignore_ascii_case(name))
            .map(|group| group.key.clone())
    }

    pub fn path_of(&self, key: &str) -> Option<PathBuf> {
        self.group(key)
            .map(|group| self.inner.dir.join(&group.file_name))
    }

    fn group(&self, key: &str) -> Option<SettingsGroup> {
        self.inner
            .groups
            .read()
            .iter()
            .find(|group| group.key == key)
            .cloned()
    }

    fn replace_form(&self, key: &str, form: SettingsForm) {
        if let Some(group) = self
            .inner
            .groups
            .write()
            .iter_mut()
            .find(|group| group.key == key)
        {
            group.form = form;
        }
    }

    async fn load(&self, key: &str) -> StoreResult<()> {
        let (mut form, path) = match (self.form(key), self.path_of(key)) {
            (Some(form), Some(path)) => (form, path),
            _ => return Err(StoreError::UnknownGroup(key.to_string())),
        };
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(file = %path.display(), "no stored settings, using defaults");
                return Ok(());
            }
            Err(source) => return Err(StoreError::Read { path, source }),
        };
        apply_stored(&mut form, &raw);
        self.replace_form(key, form);
        debug!(group = %key, file = %path.display(), "settings loaded");
        Ok(())
    }

    /// Applies a save payload with clamping, persists the group and returns
    /// the form as stored.
    pub async fn save(&self, key: &str, payload: &str) -> StoreResult<(SettingsForm, SaveOutcome)> {
        let mut form = self
            .form(key)
            .ok_or_else(|| StoreError::UnknownGroup(key.to_string()))?;
        let outcome = form.apply_save(payload)?;
        if !outcome.ignored.is_empty() {
            warn!(group = %key, fields = ?outcome.ignored, "ignored unknown or invalid settings");
        }
        self.persist(key, &form).await?;
        self.replace_form(key, form.clone());
        info!(group = %key, applied = outcome.applied.len(), "settings saved");
        Ok((form, outcome))
    }

    async fn persist(&self, key: &str, form: &SettingsForm) -> StoreResult<()> {
        let path = self
            .path_of(key)
            .ok_or_else(|| StoreError::UnknownGroup(key.to_string()))?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| StoreError::Write {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        tokio::fs::write(&path, render_stored(form))
            .await
            .map_err(|source| StoreError::Write { path, source })
    }
}

/// One `fieldName=value` line per field.
pub fn render_stored(form: &SettingsForm) -> String {
    let mut out = String::new();
    for field in &form.fields {
        let value = match field.field_type {
            FieldKind::Boolean => field.as_bool().to_string(),
            _ => field.display_value(),
        };
        let value: String = value.chars().filter(|c| *c != '\n' && *c != '\r').collect();
        out.push_str(&field.field_name);
        out.push('=');
        out.push_str(&value);
        out.push('\n');
    }
    out
}

/// Lines naming unknown fields are skipped; values are clamped like a save.
pub fn apply_stored(form: &mut SettingsForm, raw: &str) {
    for line in raw.lines() {
        let Some((name, value)) = line.trim().split_once('=') else {
            continue;
        };
        if let Some(field) = form.field_mut(name) {
            if !field.apply_saved(&Value::String(value.trim().to_string())) {
                debug!(field = %name, "stored value does not fit the field");
            }
        }
    }
}
