//! Inbound frame dispatch for one connected client.

use std::collections::BTreeMap;

use metrics::counter;
use ticker_proto::settings::data_key;
use ticker_proto::{ClientFrame, Notice, ServerFrame};
use tracing::{debug, error, info, warn};

use crate::device::Device;
use crate::hub::ClientId;
use crate::local_messages::to_table_rows;
use crate::pages::{loaded_hook, Handler};
use crate::spa::{popup_id, Audience, MenuBinding};

pub const LOCAL_MESSAGES_RESOURCE: &str = "LocalMessages";
pub const LOCAL_MESSAGES_DATA: &str = "LocalMessagesData";
pub const SAVE_LOCAL_MESSAGES: &str = "saveLocalMessages";
const SAVE_PREFIX: &str = "save";
const NOTICE_MS: u64 = 3000;

fn frame_label(frame: &ClientFrame) -> &'static str {
    match frame {
        ClientFrame::PageLoaded => "pageLoaded",
        ClientFrame::InputChange { .. } => "inputChange",
        ClientFrame::MenuClick { .. } => "menuClick",
        ClientFrame::Process { .. } => "process",
        ClientFrame::JsFunctionResult { .. } => "jsFunctionResult",
        ClientFrame::Request { .. } => "request",
    }
}

/// Decodes one text frame and acts on it. Malformed frames are logged and
/// dropped; the connection stays up.
pub async fn handle_text(device: &Device, client: ClientId, raw: &str) {
    let frame = match ClientFrame::decode(raw) {
        Ok(frame) => frame,
        Err(err) => {
            counter!("ticker_device_frames_rejected_total", 1);
            warn!(client = %client, error = %err, "dropping malformed frame");
            return;
        }
    };
    counter!("ticker_device_frames_received_total", 1, "type" => frame_label(&frame));
    dispatch(device, client, frame).await;
}

pub async fn dispatch(device: &Device, client: ClientId, frame: ClientFrame) {
    match frame {
        ClientFrame::PageLoaded => page_loaded(device, client),
        ClientFrame::InputChange { placeholder, value } => {
            debug!(client = %client, input = %placeholder, "input changed");
            device.record_input(&placeholder, &value);
        }
        ClientFrame::MenuClick { menu, item } => menu_click(device, client, &menu, &item).await,
        ClientFrame::Process {
            process_type,
            input_values,
            ..
        } => process(device, client, &process_type, &input_values).await,
        ClientFrame::Request { resource } => request(device, client, &resource),
        ClientFrame::JsFunctionResult {
            function_name,
            success,
        } => {
            if !device.tracker().acknowledge(client, &function_name) {
                debug!(client = %client, function = %function_name, "result for an untracked call");
            }
            if !success {
                warn!(client = %client, function = %function_name, "client function failed");
            }
        }
    }
}

/// Sends the active page, then every include, then the page's loaded hook.
fn page_loaded(device: &Device, client: ClientId) {
    let spa = device.spa();
    spa.send_active_state(client);
    spa.send_includes(client);
    if let Some(hook) = spa.active_page_name().as_deref().and_then(loaded_hook) {
        spa.call_js_function(Audience::Client(client), hook, None);
    }
    debug!(client = %client, "page state sent");
}

async fn menu_click(device: &Device, client: ClientId, menu: &str, item: &str) {
    match device.spa().resolve_click(menu, item) {
        Some(MenuBinding::Handler(handler)) => {
            info!(menu = %menu, item = %item, "menu item clicked");
            run_handler(device, handler).await;
        }
        Some(MenuBinding::Popup(markup)) => {
            device
                .spa()
                .show_popup(Audience::Client(client), &popup_id(menu, item), &markup);
        }
        Some(MenuBinding::Link(url)) => {
            debug!(menu = %menu, item = %item, url = %url, "link items navigate client side");
        }
        None => warn!(menu = %menu, item = %item, "click on unknown or disabled menu item"),
    }
}

pub async fn run_handler(device: &Device, handler: Handler) {
    let spa = device.spa();
    match handler {
        Handler::Open {
            page,
            announce,
            call,
        } => {
            spa.set_message(&announce, 5);
            if let Err(err) = spa.activate_page(&page) {
                warn!(error = %err, "menu points at a missing page");
                return;
            }
            if let Some(function) = call {
                spa.call_js_function(Audience::All, &function, None);
            }
        }
        Handler::Call(function) => spa.call_js_function(Audience::All, &function, None),
        Handler::Restart => {
            spa.set_message("Main Settings: [Restart] clicked!", 5);
            if let Err(err) = device.restart().await {
                error!(error = ?err, "restart failed");
                spa.set_error_message(&format!("Restart failed: {err}"), 0);
            }
        }
    }
}

async fn process(
    device: &Device,
    client: ClientId,
    process_type: &str,
    input_values: &BTreeMap<String, String>,
) {
    if process_type == SAVE_LOCAL_MESSAGES {
        save_local_messages(device, client, input_values).await;
        return;
    }
    let key = process_type
        .strip_prefix(SAVE_PREFIX)
        .and_then(|name| device.settings().resolve(name));
    match key {
        Some(key) => save_settings(device, client, &key, input_values).await,
        None => warn!(client = %client, process = %process_type, "unknown process type"),
    }
}

fn request(device: &Device, client: ClientId, resource: &str) {
    if resource == LOCAL_MESSAGES_RESOURCE {
        send_local_messages(device, client, None);
        return;
    }
    match device.settings().resolve(resource) {
        Some(key) => send_settings(device, client, &key, None),
        None => warn!(client = %client, resource = %resource, "request for unknown resource"),
    }
}

/// `settingsName`, the table rows, then the form as `<key>Data`.
fn send_settings(device: &Device, client: ClientId, key: &str, notice: Option<Notice>) {
    let (Some(title), Some(form)) = (device.settings().title(key), device.settings().form(key))
    else {
        warn!(group = %key, "settings group vanished");
        return;
    };
    let spa = device.spa();
    let to = Audience::Client(client);
    spa.update_target(to, "settingsName", &title);
    spa.update_target(to, "settingsTableBody", &form.to_table_rows());
    let frame = ServerFrame::custom(data_key(key), form.to_json());
    match notice {
        Some(notice) => spa.send_raw(to, &frame.with_notice(&notice)),
        None => spa.send(to, &frame),
    };
}

fn send_local_messages(device: &Device, client: ClientId, notice: Option<Notice>) {
    let spa = device.spa();
    let to = Audience::Client(client);
    let messages = device.messages();
    spa.update_target(to, "inputTableBody", &to_table_rows(&messages.list()));
    let frame = ServerFrame::custom(LOCAL_MESSAGES_DATA, messages.to_json());
    match notice {
        Some(notice) => spa.send_raw(to, &frame.with_notice(&notice)),
        None => spa.send(to, &frame),
    };
}

async fn save_settings(
    device: &Device,
    client: ClientId,
    key: &str,
    input_values: &BTreeMap<String, String>,
) {
    let Some(payload) = input_values.get(&data_key(key)) else {
        warn!(client = %client, group = %key, "save carried no settings data");
        device.spa().notify(
            Audience::Client(client),
            &Notice::error("No settings data received", NOTICE_MS),
        );
        return;
    };
    match device.settings().save(key, payload).await {
        Ok(_) => {
            counter!("ticker_device_settings_saved_total", 1, "group" => key.to_string());
            let notice = Notice::status("Settings saved successfully!", NOTICE_MS);
            send_settings(device, client, key, Some(notice));
        }
        Err(err) => {
            warn!(client = %client, group = %key, error = %err, "settings not saved");
            device.spa().notify(
                Audience::Client(client),
                &Notice::error(format!("Saving settings failed: {err}"), 0),
            );
        }
    }
}

async fn save_local_messages(
    device: &Device,
    client: ClientId,
    input_values: &BTreeMap<String, String>,
) {
    let Some(payload) = input_values.get(LOCAL_MESSAGES_DATA) else {
        warn!(client = %client, "save carried no local messages");
        return;
    };
    match device.messages().replace_from_json(payload).await {
        Ok(count) => {
            let notice = Notice::status(format!("{count} local messages saved"), NOTICE_MS);
            send_local_messages(device, client, Some(notice));
        }
        Err(err) => {
            warn!(client = %client, error = %err, "local messages not saved");
            device.spa().notify(
                Audience::Client(client),
                &Notice::error(format!("Saving messages failed: {err}"), 0),
            );
        }
    }
}
