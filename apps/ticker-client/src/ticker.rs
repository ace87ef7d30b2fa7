//! The ticker application pages: settings forms, the local-messages editor
//! and the scrolling monitor feed.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use serde_json::Value;
use ticker_proto::settings::{data_key, escape_markup, request_resource, save_process_type};
use ticker_proto::SettingsForm;
use tracing::{debug, warn};

use crate::invoke::{Args, CustomHandlers, Registry};
use crate::session::ClientState;

pub const LOCAL_MESSAGES_TABLE: &str = "inputTableBody";
pub const SETTINGS_TABLE: &str = "settingsTableBody";
pub const SETTINGS_NAME: &str = "settingsName";
pub const MONITOR_ELEMENT: &str = "scrollingMonitor";
pub const LOCAL_MESSAGES_ACTION: &str = "LocalMessagesData";
pub const LOCAL_MESSAGES_RESOURCE: &str = "LocalMessages";
pub const SAVE_LOCAL_MESSAGES: &str = "saveLocalMessages";
pub const MAX_MESSAGE_LEN: usize = 150;
const LOADED_RETRY: Duration = Duration::from_millis(100);

/// Settings forms received from the device, keyed by page key.
#[derive(Debug, Default)]
pub struct FormStore {
    forms: BTreeMap<String, SettingsForm>,
    requesting: BTreeSet<String>,
    active: Option<String>,
}

impl FormStore {
    pub fn form(&self, key: &str) -> Option<&SettingsForm> {
        self.forms.get(key)
    }

    /// The form currently rendered on the page.
    pub fn active(&self) -> Option<&str> {
        self.active.as_deref()
    }

    /// Marks a request outstanding; `false` when one already is.
    pub fn begin_request(&mut self, key: &str) -> bool {
        self.requesting.insert(key.to_string())
    }

    pub fn abandon_request(&mut self, key: &str) {
        self.requesting.remove(key);
    }

    pub fn is_requesting(&self, key: &str) -> bool {
        self.requesting.contains(key)
    }

    /// Forgets every outstanding request. A reply lost with its link would
    /// otherwise block the page from asking again.
    pub fn reset_requests(&mut self) {
        self.requesting.clear();
    }

    pub fn receive(&mut self, key: &str, form: SettingsForm) {
        self.requesting.remove(key);
        self.forms.insert(key.to_string(), form);
    }

    fn active_form_mut(&mut self) -> Option<&mut SettingsForm> {
        let key = self.active.as_deref()?;
        self.forms.get_mut(key)
    }
}

/// The editable list of locally stored ticker messages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalMessages {
    items: Vec<String>,
}

impl LocalMessages {
    /// Accepts a JSON array or a string holding one. Nulls are skipped.
    pub fn parse(data: &Value) -> Result<Self> {
        let parsed;
        let list = match data {
            Value::String(text) => {
                parsed = serde_json::from_str::<Value>(text)
                    .context("local messages are not valid JSON")?;
                &parsed
            }
            other => other,
        };
        let Value::Array(entries) = list else {
            bail!("local messages must be a list");
        };
        let items = entries
            .iter()
            .filter_map(|entry| match entry {
                Value::Null => None,
                Value::String(text) => Some(text.clone()),
                other => Some(other.to_string()),
            })
            .map(|text| clip(&text))
            .collect();
        Ok(Self { items })
    }

    pub fn items(&self) -> &[String] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn push_empty(&mut self) {
        self.items.push(String::new());
    }

    pub fn add_below(&mut self, index: usize) {
        let at = (index + 1).min(self.items.len());
        self.items.insert(at, String::new());
    }

    pub fn move_up(&mut self, index: usize) -> bool {
        if index == 0 || index >= self.items.len() {
            return false;
        }
        self.items.swap(index, index - 1);
        true
    }

    pub fn move_down(&mut self, index: usize) -> bool {
        if index + 1 >= self.items.len() {
            return false;
        }
        self.items.swap(index, index + 1);
        true
    }

    pub fn remove(&mut self, index: usize) -> bool {
        if index >= self.items.len() {
            return false;
        }
        self.items.remove(index);
        true
    }

    pub fn set(&mut self, index: usize, text: &str) -> bool {
        match self.items.get_mut(index) {
            Some(slot) => {
                *slot = clip(text);
                true
            }
            None => false,
        }
    }

    pub fn to_payload(&self) -> String {
        serde_json::to_string(&self.items).unwrap_or_else(|_| "[]".into())
    }

    pub fn to_table_rows(&self) -> String {
        let last = self.items.len().saturating_sub(1);
        let mut rows = String::new();
        for (index, text) in self.items.iter().enumerate() {
            rows.push_str(&format!(
                "<tr><td style='padding: 8px;'><input type='text' id='{}' value='{}' maxlength='{MAX_MESSAGE_LEN}' data-index='{index}'>",
                message_input_id(index),
                escape_markup(text)
            ));
            rows.push_str(&format!(
                "<button onclick=\"addMessageBelow({index})\">+</button>"
            ));
            rows.push_str(&format!(
                "<button onclick=\"moveMessageUp({index})\"{}>Up</button>",
                if index == 0 { " disabled" } else { "" }
            ));
            rows.push_str(&format!(
                "<button onclick=\"moveMessageDown({index})\"{}>Down</button>",
                if index == last { " disabled" } else { "" }
            ));
            rows.push_str(&format!(
                "<button onclick=\"removeMessage({index})\">-</button></td></tr>"
            ));
        }
        rows
    }
}

pub fn message_input_id(index: usize) -> String {
    format!("localMessage_{index}")
}

fn clip(text: &str) -> String {
    text.chars().take(MAX_MESSAGE_LEN).collect()
}

/// Asks the device for whatever data the current page shows. Until the
/// channel is open this re-arms itself every 100 ms.
pub fn request_page_data(state: &mut ClientState) {
    if !state.emitter.is_open() {
        debug!("channel not open yet, retrying page data request");
        state.call_later(LOADED_RETRY, "isEspTicker32Loaded", Args::None);
        return;
    }
    let title = state.ui.title().to_string();

    if title.contains("Messages") && state.ui.contains(LOCAL_MESSAGES_TABLE) {
        let _ = state.emitter.request(LOCAL_MESSAGES_RESOURCE);
    }

    if !state.ui.contains(SETTINGS_TABLE) {
        return;
    }
    let Some(key) = state
        .config
        .settings_pages
        .iter()
        .find(|page| title.contains(&page.title))
        .map(|page| page.key.clone())
    else {
        return;
    };
    if !state.forms.begin_request(&key) {
        debug!(page = %key, "settings request already outstanding");
        return;
    }
    if state.emitter.request(&request_resource(&key)).is_err() {
        state.forms.abandon_request(&key);
    }
}

fn receive_settings(state: &mut ClientState, action: &str, data: Value) -> Result<()> {
    let key = action
        .strip_suffix("Data")
        .ok_or_else(|| anyhow!("`{action}` is not a settings payload"))?;
    let form = match SettingsForm::parse(&data) {
        Ok(form) => form,
        Err(err) => {
            state.forms.abandon_request(key);
            return Err(err).with_context(|| format!("bad settings payload for {key}"));
        }
    };
    state.forms.receive(key, form);
    render_settings(state, key);
    Ok(())
}

fn render_settings(state: &mut ClientState, key: &str) {
    let Some(rows) = state.forms.form(key).map(SettingsForm::to_table_rows) else {
        return;
    };
    if !state.ui.set_inner_markup(SETTINGS_TABLE, &rows) {
        debug!(page = %key, "settings table not on this page");
        return;
    }
    let title = state
        .config
        .settings_pages
        .iter()
        .find(|page| page.key == key)
        .map(|page| page.title.clone())
        .unwrap_or_else(|| key.to_string());
    state.ui.set_text(SETTINGS_NAME, &title);
    state.forms.active = Some(key.to_string());
}

/// Applies a local edit to the rendered settings form. Rejected input
/// leaves the stored value alone and shows the reason.
pub fn edit_setting(state: &mut ClientState, field: &str, value: &str) -> bool {
    let outcome = match state.forms.active_form_mut() {
        Some(form) => form.set_value(field, value),
        None => {
            debug!(field, "no settings form on the page");
            return false;
        }
    };
    match outcome {
        Ok(()) => {
            state.ui.set_value(field, value);
            true
        }
        Err(err) => {
            warn!(field, error = %err, "setting rejected");
            state.set_message(&err.to_string(), 3, true);
            false
        }
    }
}

pub fn save_settings(state: &mut ClientState) -> Result<()> {
    let name = state
        .ui
        .element_text(SETTINGS_NAME)
        .unwrap_or_default()
        .to_string();
    let key = state
        .config
        .settings_page_by_title(&name)
        .map(|page| page.key.clone())
        .ok_or_else(|| anyhow!("unknown settings page `{name}`"))?;
    let payload = state
        .forms
        .form(&key)
        .map(SettingsForm::to_save_payload)
        .ok_or_else(|| anyhow!("no {key} form has been received"))?;
    let mut inputs = BTreeMap::new();
    inputs.insert(data_key(&key), payload);
    state
        .emitter
        .process(&save_process_type(&key), None, inputs)
        .with_context(|| format!("could not save {name}"))?;
    Ok(())
}

pub fn save_local_messages(state: &mut ClientState) -> Result<()> {
    let mut inputs = BTreeMap::new();
    inputs.insert(
        LOCAL_MESSAGES_ACTION.to_string(),
        state.local_messages.to_payload(),
    );
    state
        .emitter
        .process(SAVE_LOCAL_MESSAGES, None, inputs)
        .context("could not save local messages")?;
    Ok(())
}

pub fn render_local_messages(state: &mut ClientState) {
    let rows = state.local_messages.to_table_rows();
    if !state.ui.set_inner_markup(LOCAL_MESSAGES_TABLE, &rows) {
        debug!("local messages table not on this page");
    }
}

/// A keystroke in one local message input.
pub fn edit_local_message(state: &mut ClientState, index: usize, value: &str) -> bool {
    if !state.local_messages.set(index, value) {
        return false;
    }
    let stored = state.local_messages.items()[index].clone();
    state.ui.set_value(&message_input_id(index), &stored);
    true
}

fn with_index(
    state: &mut ClientState,
    args: &Args,
    edit: impl FnOnce(&mut LocalMessages, usize) -> bool,
) -> Result<()> {
    let index = args
        .index()
        .ok_or_else(|| anyhow!("expected a message index, got {args:?}"))?;
    if edit(&mut state.local_messages, index) {
        render_local_messages(state);
    }
    Ok(())
}

/// Operations and custom handlers provided once `espTicker32.js` is loaded.
pub fn install(registry: &mut Registry<ClientState>, customs: &mut CustomHandlers<ClientState>) {
    registry.register("queueMessageToMonitor", |state, args| {
        let Some(text) = args.first().filter(|text| !text.is_empty()) else {
            debug!("empty monitor message ignored");
            return Ok(());
        };
        if !state.ui.contains(MONITOR_ELEMENT) {
            debug!("no scrolling monitor on this page");
            return Ok(());
        }
        state.monitor.queue(&text);
        Ok(())
    });
    registry.register("isEspTicker32Loaded", |state, _| {
        request_page_data(state);
        Ok(())
    });
    registry.register("requestLocalMessages", |state, _| {
        state.emitter.request(LOCAL_MESSAGES_RESOURCE)?;
        Ok(())
    });
    registry.register("saveSettings", |state, _| save_settings(state));
    registry.register("saveLocalMessages", |state, _| save_local_messages(state));
    registry.register("addInputField", |state, _| {
        state.local_messages.push_empty();
        render_local_messages(state);
        Ok(())
    });
    registry.register("addMessageBelow", |state, args| {
        with_index(state, &args, |messages, index| {
            messages.add_below(index);
            true
        })
    });
    registry.register("moveMessageUp", |state, args| {
        with_index(state, &args, LocalMessages::move_up)
    });
    registry.register("moveMessageDown", |state, args| {
        with_index(state, &args, LocalMessages::move_down)
    });
    registry.register("removeMessage", |state, args| {
        with_index(state, &args, LocalMessages::remove)
    });

    customs.on(LOCAL_MESSAGES_ACTION, |state, _, data| {
        state.local_messages = LocalMessages::parse(&data)?;
        render_local_messages(state);
        Ok(())
    });
    customs.on_suffix("SettingsData", receive_settings);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn local_messages_accept_embedded_json_and_skip_nulls() {
        let messages =
            LocalMessages::parse(&json!("[\"one\", null, \"two\"]")).expect("parse");
        assert_eq!(messages.items(), ["one", "two"]);
        let messages = LocalMessages::parse(&json!(["x".repeat(200)])).expect("parse");
        assert_eq!(messages.items()[0].len(), MAX_MESSAGE_LEN);
        assert!(LocalMessages::parse(&json!({"not": "a list"})).is_err());
    }

    #[test]
    fn list_edits_keep_order() {
        let mut messages = LocalMessages::parse(&json!(["a", "b", "c"])).expect("parse");
        messages.add_below(0);
        assert_eq!(messages.items(), ["a", "", "b", "c"]);
        assert!(messages.move_down(0));
        assert_eq!(messages.items(), ["", "a", "b", "c"]);
        assert!(!messages.move_up(0));
        assert!(!messages.move_down(3));
        assert!(messages.move_up(3));
        assert_eq!(messages.items(), ["", "a", "c", "b"]);
        assert!(messages.remove(0));
        assert!(!messages.remove(7));
        messages.push_empty();
        assert_eq!(messages.to_payload(), r#"["a","c","b",""]"#);
    }

    #[test]
    fn rows_disable_moves_past_the_ends() {
        let messages = LocalMessages::parse(&json!(["first", "last"])).expect("parse");
        let rows = messages.to_table_rows();
        assert!(rows.contains("moveMessageUp(0)\" disabled"));
        assert!(rows.contains("moveMessageDown(1)\" disabled"));
        assert!(!rows.contains("moveMessageDown(0)\" disabled"));
        assert!(rows.contains("id='localMessage_1'"));
    }

    #[test]
    fn requests_are_tracked_per_page() {
        let mut forms = FormStore::default();
        assert!(forms.begin_request("deviceSettings"));
        assert!(!forms.begin_request("deviceSettings"));
        forms.receive("deviceSettings", SettingsForm::default());
        assert!(!forms.is_requesting("deviceSettings"));
        assert!(forms.begin_request("deviceSettings"));
        forms.reset_requests();
        assert!(forms.begin_request("deviceSettings"));
    }
}
